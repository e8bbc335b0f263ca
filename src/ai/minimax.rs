use std::str::FromStr;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::game::{
    AbilityTarget, AbilityTrigger, CardUid, Game, GameLogic, GamePhase, MatchState, PlayerId, RuleError, Selector,
    Slot,
};

/// 搜索与 JS 层共用的玩家操作描述。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum GameAction {
    PlayCard {
        uid: CardUid,
        #[serde(default)]
        slot: Option<Slot>,
    },
    CastAbility {
        uid: CardUid,
        ability_id: String,
    },
    AttackCard {
        attacker: CardUid,
        target: CardUid,
    },
    AttackPlayer {
        attacker: CardUid,
        target: PlayerId,
    },
    SelectCard {
        uid: CardUid,
    },
    SelectPlayer {
        target: PlayerId,
    },
    SelectSlot {
        slot: Slot,
    },
    SelectChoice {
        index: usize,
    },
    CancelSelection,
    EndTurn,
}

impl GameAction {
    pub fn apply(&self, logic: &mut GameLogic, player_id: PlayerId) -> Result<(), RuleError> {
        match self {
            GameAction::PlayCard { uid, slot } => logic.play_card(player_id, *uid, *slot),
            GameAction::CastAbility { uid, ability_id } => logic.cast_ability(player_id, *uid, ability_id),
            GameAction::AttackCard { attacker, target } => logic.attack_target(player_id, *attacker, *target),
            GameAction::AttackPlayer { attacker, target } => logic.attack_player(player_id, *attacker, *target),
            GameAction::SelectCard { uid } => logic.select_card(player_id, *uid),
            GameAction::SelectPlayer { target } => logic.select_player(player_id, *target),
            GameAction::SelectSlot { slot } => logic.select_slot(player_id, *slot),
            GameAction::SelectChoice { index } => logic.select_choice(player_id, *index),
            GameAction::CancelSelection => logic.cancel_selection(player_id),
            GameAction::EndTurn => logic.end_turn(player_id),
        }
    }
}

/// 局面评分由调用方提供，数值越大对 `player_id` 越有利。
pub trait Evaluator {
    fn evaluate(&self, game: &Game, player_id: PlayerId) -> f64;
}

impl<F> Evaluator for F
where
    F: Fn(&Game, PlayerId) -> f64,
{
    fn evaluate(&self, game: &Game, player_id: PlayerId) -> f64 {
        self(game, player_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiDifficulty {
    Easy,
    Normal,
    Hard,
    Expert,
}

impl FromStr for AiDifficulty {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "easy" => Ok(AiDifficulty::Easy),
            "normal" | "medium" => Ok(AiDifficulty::Normal),
            "hard" => Ok(AiDifficulty::Hard),
            "expert" | "extreme" => Ok(AiDifficulty::Expert),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// 以单个操作为一层的搜索深度。
    pub depth: u8,
    /// 展开节点数上限，超过后剩余分支直接评分。
    pub node_budget: u64,
    pub randomness: f64,
}

impl AiConfig {
    pub fn from_difficulty(difficulty: AiDifficulty) -> Self {
        match difficulty {
            AiDifficulty::Easy => Self {
                depth: 1,
                node_budget: 200,
                randomness: 1.2,
            },
            AiDifficulty::Normal => Self {
                depth: 2,
                node_budget: 1_500,
                randomness: 0.6,
            },
            AiDifficulty::Hard => Self {
                depth: 3,
                node_budget: 6_000,
                randomness: 0.2,
            },
            AiDifficulty::Expert => Self {
                depth: 4,
                node_budget: 20_000,
                randomness: 0.0,
            },
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        AiConfig::from_difficulty(AiDifficulty::Normal)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiDecision {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<GameAction>,
    pub evaluation: f64,
    pub depth_reached: u8,
    pub nodes: u64,
    pub budget_exhausted: bool,
}

struct SearchStats {
    nodes: u64,
    depth_reached: u8,
    budget_exhausted: bool,
}

impl SearchStats {
    fn new() -> Self {
        Self {
            nodes: 0,
            depth_reached: 0,
            budget_exhausted: false,
        }
    }
}

const WIN_SCORE: f64 = 1_000_000.0;

/// 当前应该由谁行动：有待选择时是选择者，否则是回合玩家。
pub fn acting_player(game: &Game) -> PlayerId {
    game.selector
        .context()
        .map(|ctx| ctx.player_id)
        .unwrap_or(game.current_player)
}

/// 列出 `player_id` 此刻所有合法操作；结算未完成或对局结束时为空。
pub fn legal_actions(logic: &GameLogic, player_id: PlayerId) -> Vec<GameAction> {
    let game = logic.game();
    if game.state != MatchState::Play || logic.is_busy() {
        return Vec::new();
    }
    if !game.selector.is_none() {
        return selector_actions(logic, player_id);
    }
    if !game.is_player_action_turn(player_id) || game.phase != GamePhase::Main {
        return Vec::new();
    }

    let rules = logic.rules();
    let catalog = logic.catalog();
    let Some(player) = game.get_player(player_id) else {
        return Vec::new();
    };
    let mut actions = Vec::new();

    for card in player.cards_hand.iter().chain(player.cards_extra.iter()) {
        let Some(def) = card.def(catalog) else {
            continue;
        };
        if def.is_board_card() {
            actions.extend(
                rules
                    .play_slots(card, false)
                    .filter(|slot| slot.is_valid())
                    .map(|slot| GameAction::PlayCard {
                        uid: card.uid,
                        slot: Some(slot),
                    }),
            );
        } else if def.is_equipment() || catalog.is_require_target_spell(&def) {
            actions.extend(rules.play_slots(card, false).map(|slot| GameAction::PlayCard {
                uid: card.uid,
                slot: Some(slot),
            }));
        } else if rules.can_play_card(card, None, false) {
            actions.push(GameAction::PlayCard {
                uid: card.uid,
                slot: None,
            });
        }
    }

    let casters = player.hero.iter().chain(player.cards_board.iter());
    for card in casters {
        for ability_id in card.ability_ids() {
            let Some(ability) = catalog.ability(ability_id) else {
                continue;
            };
            if ability.trigger == AbilityTrigger::Activate && rules.can_cast_ability(card, &ability) {
                actions.push(GameAction::CastAbility {
                    uid: card.uid,
                    ability_id: ability_id.clone(),
                });
            }
        }
    }

    for attacker in player.cards_board.iter() {
        for opponent in game.players.iter().filter(|p| p.player_id != player_id) {
            for target in opponent.cards_board.iter() {
                if rules.can_attack_card(attacker, target, false) {
                    actions.push(GameAction::AttackCard {
                        attacker: attacker.uid,
                        target: target.uid,
                    });
                }
            }
            if rules.can_attack_player(attacker, opponent, false) {
                actions.push(GameAction::AttackPlayer {
                    attacker: attacker.uid,
                    target: opponent.player_id,
                });
            }
        }
    }

    actions.push(GameAction::EndTurn);
    actions
}

/// 格位选择不在枚举之内：只有卡牌与玩家目标会被列出。
fn selector_actions(logic: &GameLogic, player_id: PlayerId) -> Vec<GameAction> {
    let game = logic.game();
    let catalog = logic.catalog();
    let Some(ctx) = game.selector.context() else {
        return Vec::new();
    };
    if ctx.player_id != player_id {
        return Vec::new();
    }
    let (Some(caster), Some(ability)) = (game.card(ctx.caster_uid), catalog.ability(&ctx.ability_id)) else {
        return vec![GameAction::CancelSelection];
    };
    let rules = logic.rules();
    let mut actions = Vec::new();

    match &game.selector {
        Selector::SelectTarget(_) => {
            for player in game.players.iter() {
                if ability.can_target(game, catalog, caster, crate::game::ability::TargetRef::Player(player)) {
                    actions.push(GameAction::SelectPlayer {
                        target: player.player_id,
                    });
                }
                for card in player.cards_board.iter() {
                    if ability.can_target(game, catalog, caster, crate::game::ability::TargetRef::Card(card)) {
                        actions.push(GameAction::SelectCard { uid: card.uid });
                    }
                }
            }
        }
        Selector::SelectorCard(_) => {
            let cards = game.players.iter().flat_map(|p| p.all_cards());
            for card in cards {
                if rules.is_card_selection_valid(caster, &ability, card) {
                    actions.push(GameAction::SelectCard { uid: card.uid });
                }
            }
        }
        Selector::SelectorChoice(_) if ability.target == AbilityTarget::ChoiceSelector => {
            for (index, chain_id) in ability.chain_abilities.iter().enumerate() {
                let allowed = catalog
                    .ability(chain_id)
                    .map(|chosen| rules.can_select_ability(caster, &chosen))
                    .unwrap_or(false);
                if allowed {
                    actions.push(GameAction::SelectChoice { index });
                }
            }
        }
        _ => {}
    }
    actions.push(GameAction::CancelSelection);
    actions
}

/// 在即时模式快照上做 alpha-beta 搜索；原对局不会被修改。
pub struct AiAgent {
    config: AiConfig,
    rng: SmallRng,
    evaluator: Box<dyn Evaluator>,
}

impl AiAgent {
    pub fn new(config: AiConfig, evaluator: Box<dyn Evaluator>) -> Self {
        Self {
            config,
            rng: SmallRng::from_entropy(),
            evaluator,
        }
    }

    pub fn with_seed(config: AiConfig, evaluator: Box<dyn Evaluator>, seed: u64) -> Self {
        Self {
            config,
            rng: SmallRng::seed_from_u64(seed),
            evaluator,
        }
    }

    pub fn config(&self) -> &AiConfig {
        &self.config
    }

    pub fn decide_action(&mut self, logic: &GameLogic, player_id: PlayerId) -> AiDecision {
        let mut stats = SearchStats::new();
        let mut actions = legal_actions(logic, player_id);
        if actions.is_empty() {
            return AiDecision {
                action: None,
                evaluation: self.evaluate(logic.game(), player_id),
                depth_reached: 0,
                nodes: 0,
                budget_exhausted: false,
            };
        }
        if self.config.randomness > 0.0 {
            actions.shuffle(&mut self.rng);
        }

        let depth = self.config.depth.max(1) - 1;
        let mut alpha = f64::NEG_INFINITY;
        let beta = f64::INFINITY;
        let mut best_action = None;
        let mut best_score = f64::NEG_INFINITY;
        let mut best_cmp = f64::NEG_INFINITY;
        let mut scratch = logic.snapshot();

        for action in actions {
            logic.snapshot_into(&mut scratch);
            if action.apply(&mut scratch, player_id).is_err() {
                continue;
            }
            stats.nodes += 1;
            let score = self.alphabeta(&scratch, depth, alpha, beta, player_id, &mut stats);
            let comparison = score + self.random_noise();
            if comparison > best_cmp {
                best_cmp = comparison;
                best_score = score;
                best_action = Some(action);
            }
            alpha = alpha.max(score);
            if stats.budget_exhausted {
                break;
            }
        }

        if best_action.is_none() {
            best_score = self.evaluate(logic.game(), player_id);
        }
        debug!(
            target: "engine",
            player_id,
            nodes = stats.nodes,
            depth = stats.depth_reached,
            score = best_score,
            "ai decision"
        );
        AiDecision {
            action: best_action,
            evaluation: best_score,
            depth_reached: stats.depth_reached,
            nodes: stats.nodes,
            budget_exhausted: stats.budget_exhausted,
        }
    }

    fn alphabeta(
        &mut self,
        logic: &GameLogic,
        depth_remaining: u8,
        mut alpha: f64,
        mut beta: f64,
        root_player: PlayerId,
        stats: &mut SearchStats,
    ) -> f64 {
        let explored = self.config.depth.saturating_sub(depth_remaining);
        stats.depth_reached = stats.depth_reached.max(explored);

        if stats.nodes >= self.config.node_budget {
            stats.budget_exhausted = true;
            return self.evaluate(logic.game(), root_player);
        }
        if depth_remaining == 0 || logic.game().has_ended() {
            return self.evaluate(logic.game(), root_player);
        }

        let actor = acting_player(logic.game());
        let actions = legal_actions(logic, actor);
        if actions.is_empty() {
            return self.evaluate(logic.game(), root_player);
        }
        let maximizing = actor == root_player;
        let mut value = if maximizing { f64::NEG_INFINITY } else { f64::INFINITY };
        let mut child = logic.snapshot();

        for action in actions {
            logic.snapshot_into(&mut child);
            if action.apply(&mut child, actor).is_err() {
                continue;
            }
            stats.nodes += 1;
            let score = self.alphabeta(&child, depth_remaining - 1, alpha, beta, root_player, stats);
            if maximizing {
                value = value.max(score);
                alpha = alpha.max(value);
            } else {
                value = value.min(score);
                beta = beta.min(value);
            }
            if stats.budget_exhausted || beta <= alpha {
                break;
            }
        }
        if value.is_infinite() {
            return self.evaluate(logic.game(), root_player);
        }
        value
    }

    fn evaluate(&self, game: &Game, player_id: PlayerId) -> f64 {
        if game.has_ended() {
            let alive = game.get_player(player_id).map(|p| !p.is_dead()).unwrap_or(false);
            let others_alive = game.players.iter().any(|p| p.player_id != player_id && !p.is_dead());
            return match (alive, others_alive) {
                (true, false) => WIN_SCORE,
                (false, true) => -WIN_SCORE,
                _ => 0.0,
            };
        }
        self.evaluator.evaluate(game, player_id)
    }

    fn random_noise(&mut self) -> f64 {
        if self.config.randomness <= 0.0 {
            0.0
        } else {
            (self.rng.gen::<f64>() - 0.5) * 2.0 * self.config.randomness
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::testing::{logic, place};
    use crate::game::Zone;

    fn hp_difference(game: &Game, player_id: PlayerId) -> f64 {
        game.players
            .iter()
            .map(|p| {
                let board = p.cards_board.len() as i32 * 2;
                let value = (p.hp + board) as f64;
                if p.player_id == player_id {
                    value
                } else {
                    -value
                }
            })
            .sum()
    }

    fn greedy() -> AiConfig {
        AiConfig {
            depth: 2,
            node_budget: 5_000,
            randomness: 0.0,
        }
    }

    #[test]
    fn enumerates_attacks_and_end_turn() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let brute = place(logic.game_mut(), &catalog, "brute", 0, 1);
        let squishy = place(logic.game_mut(), &catalog, "squishy", 1, 1);

        let actions = legal_actions(&logic, 0);
        assert!(actions.contains(&GameAction::AttackCard {
            attacker: brute,
            target: squishy
        }));
        assert!(
            !actions.contains(&GameAction::AttackPlayer { attacker: brute, target: 1 }),
            "blockers present"
        );
        assert_eq!(actions.last(), Some(&GameAction::EndTurn));
        assert!(legal_actions(&logic, 1).is_empty(), "not player 1's turn");
    }

    #[test]
    fn every_enumerated_action_is_accepted() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        place(logic.game_mut(), &catalog, "brute", 0, 1);
        place(logic.game_mut(), &catalog, "healer", 0, 2);
        place(logic.game_mut(), &catalog, "squishy", 1, 1);
        crate::game::testing::put(logic.game_mut(), &catalog, "grunt", 0, Zone::Hand);

        for action in legal_actions(&logic, 0) {
            let mut copy = logic.snapshot();
            assert!(action.apply(&mut copy, 0).is_ok(), "{action:?} should be legal");
        }
    }

    #[test]
    fn selector_offers_targets_and_cancel() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let sniper = place(logic.game_mut(), &catalog, "sniper", 0, 1);
        let wall = place(logic.game_mut(), &catalog, "wall", 1, 1);
        logic.cast_ability(0, sniper, "snipe").expect("cast");

        assert_eq!(acting_player(logic.game()), 0);
        let actions = legal_actions(&logic, 0);
        assert!(actions.contains(&GameAction::SelectCard { uid: wall }));
        assert!(actions.contains(&GameAction::CancelSelection));
        assert!(!actions.contains(&GameAction::EndTurn));
    }

    #[test]
    fn search_finds_lethal_without_touching_the_game() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let brute = place(logic.game_mut(), &catalog, "brute", 0, 1);
        logic.game_mut().get_player_mut(1).expect("player 1").hp = 5;
        let before = serde_json::to_string(logic.game()).expect("serialize");

        let mut agent = AiAgent::with_seed(greedy(), Box::new(hp_difference), 3);
        let decision = agent.decide_action(&logic, 0);

        assert_eq!(decision.action, Some(GameAction::AttackPlayer { attacker: brute, target: 1 }));
        assert_eq!(decision.evaluation, WIN_SCORE);
        assert!(decision.nodes > 0);
        assert_eq!(serde_json::to_string(logic.game()).expect("serialize"), before);
    }

    #[test]
    fn finished_games_yield_no_action() {
        let mut logic = logic();
        logic.game_mut().get_player_mut(1).expect("player 1").hp = 0;
        logic.check_for_winner();
        assert!(logic.game().has_ended());
        let mut agent = AiAgent::with_seed(greedy(), Box::new(hp_difference), 1);
        let decision = agent.decide_action(&logic, 0);
        assert!(decision.action.is_none());
        assert_eq!(decision.evaluation, WIN_SCORE);
    }

    #[test]
    fn node_budget_stops_the_search() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        for x in 1..=3 {
            place(logic.game_mut(), &catalog, "grunt", 0, x);
            place(logic.game_mut(), &catalog, "grunt", 1, x);
        }
        let config = AiConfig {
            depth: 4,
            node_budget: 10,
            randomness: 0.0,
        };
        let mut agent = AiAgent::with_seed(config, Box::new(hp_difference), 5);
        let decision = agent.decide_action(&logic, 0);
        assert!(decision.budget_exhausted);
        assert!(decision.action.is_some());
    }

    #[test]
    fn difficulty_names_parse() {
        assert!(matches!("Hard".parse::<AiDifficulty>(), Ok(AiDifficulty::Hard)));
        assert!("impossible".parse::<AiDifficulty>().is_err());
    }
}
