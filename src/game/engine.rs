//! 对局引擎：持有状态、目录与结算队列，提供回合流程、玩家操作入口与队列驱动。
//!
//! 所有入口先做合法性检查，失败时返回 `RuleError` 且不改动任何状态。

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace, warn};

use super::ability::{AbilityTarget, AbilityTrigger};
use super::catalog::{CardDef, CardSubType, Catalog, CatalogError, Element};
use super::config::GameplaySettings;
use super::events::{GameEvent, GameObserver};
use super::queue::{AttackStage, AttackTarget, Continuation, QueueItem, QueuedAttack, ResolveMode, ResolveQueue};
use super::rules::{RuleEngine, RuleError};
use super::state::{Card, CardUid, Game, GamePhase, HistoryEntry, MatchState, Player, PlayerId, Slot, Zone};
use super::status::StatusType;

pub const PLAYER_COUNT: usize = 2;

pub struct GameLogic {
    pub(crate) game: Game,
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) settings: GameplaySettings,
    pub(crate) queue: ResolveQueue,
    pub(crate) rng: SmallRng,
    pub(crate) observers: Vec<Box<dyn GameObserver>>,
    pub(crate) cards_to_clear: Vec<CardUid>,
}

impl std::fmt::Debug for GameLogic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameLogic")
            .field("game", &self.game)
            .field("queue", &self.queue)
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// 起手牌依次挑选的子类型组；最后一组只给后手玩家。
const OPENING_PICKS: [&[CardSubType]; 5] = [
    &[CardSubType::Summoner],
    &[CardSubType::Summoner, CardSubType::Entity],
    &[CardSubType::Spell, CardSubType::Skill],
    &[CardSubType::Item],
    &[CardSubType::Miracle],
];

fn subtype_of(catalog: &Catalog, card: &Card) -> Option<CardSubType> {
    card.def(catalog).map(|def| def.subtype)
}

fn has_subtype(catalog: &Catalog, card: &Card, wanted: &[CardSubType]) -> bool {
    subtype_of(catalog, card).map(|s| wanted.contains(&s)).unwrap_or(false)
}

const UNIT_SUBTYPES: [CardSubType; 2] = [CardSubType::Summoner, CardSubType::Entity];

/// 电脑玩家的回合抽牌：场上空位多或手里没有单位时找单位，否则找功能牌。牌库为空时返回 `None`。
fn guided_draw_index(player: &Player, catalog: &Catalog, rng: &mut SmallRng) -> Option<usize> {
    if player.cards_deck.is_empty() {
        return None;
    }
    let deck = &player.cards_deck;
    let find = |wanted: &[CardSubType]| deck.iter().position(|card| has_subtype(catalog, card, wanted));

    let empty_slots = player.empty_slots().len();
    let hand_unit = player.cards_hand.iter().any(|card| has_subtype(catalog, card, &UNIT_SUBTYPES));
    let wants_unit = empty_slots > 3 || (empty_slots > 0 && !hand_unit);
    if wants_unit {
        let unit = if player.mana < 10 {
            find(&[CardSubType::Summoner][..]).or_else(|| find(&UNIT_SUBTYPES[..]))
        } else {
            let units: Vec<usize> = deck
                .iter()
                .enumerate()
                .filter(|(_, card)| has_subtype(catalog, card, &UNIT_SUBTYPES))
                .map(|(index, _)| index)
                .collect();
            units.choose(rng).copied()
        };
        if unit.is_some() {
            return unit;
        }
    }

    if let Some(index) = find(&[CardSubType::Miracle][..]) {
        return Some(index);
    }
    let preferred = match (player.hp < 8, player.mana < 8) {
        (true, false) => find(&[CardSubType::Spell][..]),
        (false, true) => find(&[CardSubType::Skill][..]),
        (true, true) => find(&[CardSubType::Item][..]),
        (false, false) => None,
    };
    preferred.or(Some(0))
}

fn seeded_rng(seed: Option<u64>) -> SmallRng {
    match seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_entropy(),
    }
}

impl GameLogic {
    pub fn new(catalog: Arc<Catalog>, settings: GameplaySettings, mode: ResolveMode) -> Self {
        Self::from_game(Game::new("local", PLAYER_COUNT), catalog, settings, mode)
    }

    /// 接管一份已有的对局状态（例如从 JSON 恢复）。
    pub fn from_game(game: Game, catalog: Arc<Catalog>, settings: GameplaySettings, mode: ResolveMode) -> Self {
        let rng = seeded_rng(settings.seed);
        Self {
            game,
            catalog,
            settings,
            queue: ResolveQueue::new(mode),
            rng,
            observers: Vec::new(),
            cards_to_clear: Vec::new(),
        }
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn game_mut(&mut self) -> &mut Game {
        &mut self.game
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn settings(&self) -> &GameplaySettings {
        &self.settings
    }

    pub fn queue(&self) -> &ResolveQueue {
        &self.queue
    }

    pub fn rules(&self) -> RuleEngine<'_> {
        self.game.rules(&self.catalog)
    }

    pub fn add_observer(&mut self, observer: Box<dyn GameObserver>) {
        self.observers.push(observer);
    }

    pub(crate) fn emit(&mut self, event: GameEvent) {
        for observer in self.observers.iter_mut() {
            observer.on_event(&event, &self.game);
        }
    }

    /// 供搜索使用的深拷贝：即时模式、无观察者、随机数发生器状态一并复制。
    pub fn snapshot(&self) -> GameLogic {
        let mut queue = self.queue.clone();
        queue.set_mode(ResolveMode::Instant);
        GameLogic {
            game: self.game.clone(),
            catalog: Arc::clone(&self.catalog),
            settings: self.settings.clone(),
            queue,
            rng: self.rng.clone(),
            observers: Vec::new(),
            cards_to_clear: self.cards_to_clear.clone(),
        }
    }

    /// 与 `snapshot` 结果相同，但复用 `dst` 已有的分配。
    pub fn snapshot_into(&self, dst: &mut GameLogic) {
        self.game.copy_into(&mut dst.game);
        dst.catalog = Arc::clone(&self.catalog);
        dst.settings.clone_from(&self.settings);
        self.queue.copy_into(&mut dst.queue);
        dst.queue.set_mode(ResolveMode::Instant);
        dst.rng = self.rng.clone();
        dst.observers.clear();
        dst.cards_to_clear.clone_from(&self.cards_to_clear);
    }

    /// 队列中仍有条目、正在等待延迟或正在结算时，拒绝新的玩家操作。
    pub fn is_busy(&self) -> bool {
        !self.queue.is_empty() || self.queue.is_waiting() || self.queue.is_resolving()
    }

    fn ensure_idle(&self) -> Result<(), RuleError> {
        if self.is_busy() {
            return Err(RuleError::Resolving);
        }
        Ok(())
    }

    fn ensure_owner(&self, player_id: PlayerId, uid: CardUid) -> Result<&Card, RuleError> {
        let card = self.game.card(uid).ok_or(RuleError::CardNotFound { uid })?;
        if self.game.owner_of(uid) != Some(player_id) {
            return Err(RuleError::NotPlayerTurn { player_id });
        }
        Ok(card)
    }

    // ---- 准备 ----

    /// 清空玩家的所有区域，按卡牌 id 建立新牌库并洗牌。
    pub fn load_deck<S: AsRef<str>>(&mut self, player_id: PlayerId, hero: Option<&str>, cards: &[S]) -> Result<(), CatalogError> {
        let hero = hero
            .map(|id| self.catalog.card(id).ok_or_else(|| CatalogError::UnknownCard(id.to_string())))
            .transpose()?;
        let defs = cards
            .iter()
            .map(|id| {
                let id = id.as_ref();
                self.catalog.card(id).ok_or_else(|| CatalogError::UnknownCard(id.to_string()))
            })
            .collect::<Result<Vec<Arc<CardDef>>, CatalogError>>()?;

        if self.game.get_player(player_id).is_none() {
            warn!(target: "engine", player_id, "deck for unknown player ignored");
            return Ok(());
        }
        let mut created = Vec::with_capacity(defs.len());
        for def in &defs {
            let uid = self.game.alloc_uid();
            created.push(Card::create(def, "", player_id, uid));
        }
        let hero = hero.map(|def| {
            let uid = self.game.alloc_uid();
            Card::create(&def, "", player_id, uid)
        });

        let Some(player) = self.game.get_player_mut(player_id) else {
            return Ok(());
        };
        let is_ai = player.is_ai;
        *player = Player::new(player_id);
        player.is_ai = is_ai;
        if let Some(hero) = hero {
            player.add_card(Zone::Hero, hero);
        }
        for card in created {
            player.add_card(Zone::Deck, card);
        }
        player.cards_deck.shuffle(&mut self.rng);
        debug!(target: "engine", player_id, cards = defs.len(), "deck loaded");
        Ok(())
    }

    // ---- 回合流程 ----

    pub fn start_game(&mut self) {
        if self.game.has_started() {
            warn!(target: "engine", "game already started");
            return;
        }
        let count = self.game.players.len().max(1);
        let first = self.rng.gen_range(0..count) as PlayerId;
        self.game.state = MatchState::Play;
        self.game.first_player = first;
        self.game.current_player = first;
        self.game.turn_count = 1;

        let ids: Vec<PlayerId> = self.game.players.iter().map(|p| p.player_id).collect();
        for player_id in ids {
            self.setup_player(player_id, player_id != first);
        }

        debug!(target: "engine", first_player = first, "game started");
        self.emit(GameEvent::GameStarted { first_player: first });
        self.start_turn();
    }

    fn setup_player(&mut self, player_id: PlayerId, second: bool) {
        let catalog = Arc::clone(&self.catalog);
        let hp = self.settings.hp_start;
        let mana = self.settings.mana_start;
        let Some(player) = self.game.get_player_mut(player_id) else {
            return;
        };
        player.hp_max = hp;
        player.hp = hp;
        player.mana_max = mana;
        player.mana = mana;

        let fusions: Vec<CardUid> = player
            .cards_deck
            .iter()
            .filter(|card| subtype_of(&catalog, card) == Some(CardSubType::Fusion))
            .map(|card| card.uid)
            .collect();
        for uid in fusions {
            if let Some(card) = player.take_card(uid) {
                player.add_card(Zone::Extra, card);
            }
        }

        let picks = if second { &OPENING_PICKS[..] } else { &OPENING_PICKS[..4] };
        for wanted in picks {
            let found = player
                .cards_deck
                .iter()
                .find(|card| has_subtype(&catalog, card, wanted))
                .map(|card| card.uid);
            if let Some(card) = found.and_then(|uid| player.take_card(uid)) {
                player.add_card(Zone::Hand, card);
            }
        }
    }

    fn clear_turn_data(&mut self) {
        let game = &mut self.game;
        game.selector = super::state::Selector::None;
        game.last_played = None;
        game.last_targeted = None;
        game.last_destroyed = None;
        game.last_summoned = None;
        game.ability_triggerer = None;
        game.abilities_played.clear();
        game.cards_attacked.clear();
        game.non_unit_casts = 0;
        for player in game.players.iter_mut() {
            player.init_actions(self.settings.player_actions, self.settings.player_half_actions);
        }
    }

    pub fn start_turn(&mut self) {
        if self.game.has_ended() {
            return;
        }
        self.clear_turn_data();
        self.game.phase = GamePhase::StartTurn;
        let current = self.game.current_player;
        debug!(target: "engine", player_id = current, turn = self.game.turn_count, "turn started");
        self.emit(GameEvent::TurnStarted {
            player_id: current,
            turn: self.game.turn_count,
        });

        let guided = self.game.get_player(current).map(|p| p.is_ai).unwrap_or(false);
        self.draw_cards(current, self.settings.cards_per_turn, guided);

        let mana_cap = self.settings.mana_max;
        let mana_step = self.settings.mana_per_turn;
        let board: Vec<CardUid> = match self.game.get_player_mut(current) {
            Some(player) => {
                player.mana_max = (player.mana_max + mana_step).min(mana_cap);
                player.mana = player.mana_max;
                player.history.clear();
                if let Some(hero) = player.hero.as_mut() {
                    hero.refresh();
                }
                player.cards_board.iter().rev().map(|card| card.uid).collect()
            }
            None => Vec::new(),
        };

        for uid in board {
            self.start_turn_card(uid);
        }

        self.update_ongoing();
        self.trigger_player_cards_ability_type(current, AbilityTrigger::StartOfTurn);
        self.trigger_player_secrets(current, AbilityTrigger::StartOfTurn);

        self.queue.push_continuation(Continuation::StartMainPhase);
        self.resolve_all_after(self.settings.delays.turn());
    }

    /// 单张场上卡牌的回合开始处理：刷新动作、被动状态、持续伤害。
    fn start_turn_card(&mut self, uid: CardUid) {
        let dots: Vec<i32> = match self.game.card_mut(uid) {
            Some(card) => {
                card.refresh();
                super::damage::adjust_passive_statuses(card, true);
                let hp_max = card.hp_max();
                let mut present: Vec<StatusType> = card.status.iter().map(|s| s.status_type).collect();
                present.sort();
                present.dedup();
                present
                    .into_iter()
                    .filter_map(|status| status.damage_over_time(hp_max))
                    .collect()
            }
            None => return,
        };
        for damage in dots {
            if !self.game.is_on_board(uid) {
                break;
            }
            self.damage_card(uid, damage);
        }
    }

    pub fn start_main_phase(&mut self) {
        if self.game.has_ended() {
            return;
        }
        self.game.phase = GamePhase::Main;
        self.emit(GameEvent::MainPhaseStarted {
            player_id: self.game.current_player,
        });
    }

    fn start_next_turn(&mut self) {
        if self.game.has_ended() {
            return;
        }
        let count = self.game.players.len().max(1) as PlayerId;
        self.game.current_player = (self.game.current_player + 1) % count;
        if self.game.current_player == self.game.first_player {
            self.game.turn_count += 1;
        }
        self.check_for_winner();
        self.start_turn();
    }

    /// 结束当前回合；回合结束处理排在队列末尾执行。
    pub fn end_turn(&mut self, player_id: PlayerId) -> Result<(), RuleError> {
        self.rules().ensure_action_turn(player_id)?;
        self.ensure_idle()?;
        self.rules().ensure_phase(GamePhase::Main)?;
        debug!(target: "engine", player_id, "end turn requested");
        self.queue.push_continuation(Continuation::EndTurn);
        self.resolve_all();
        Ok(())
    }

    /// 有待选择时放弃它，然后在队列清空后结束回合。
    pub fn next_step(&mut self, player_id: PlayerId) -> Result<(), RuleError> {
        self.rules().ensure_running()?;
        let selecting = self.game.is_player_selector_turn(player_id);
        if !selecting && self.game.current_player != player_id {
            return Err(RuleError::NotPlayerTurn { player_id });
        }
        self.clear_selection();
        self.queue.push_continuation(Continuation::EndTurn);
        self.resolve_all();
        Ok(())
    }

    fn run_end_turn(&mut self) {
        if self.game.has_ended() || self.game.phase != GamePhase::Main {
            return;
        }
        self.game.selector = super::state::Selector::None;
        self.game.phase = GamePhase::EndTurn;

        for player in self.game.players.iter_mut() {
            for card in player.cards_board.iter_mut().chain(player.cards_equip.iter_mut()) {
                card.reduce_status_durations();
            }
        }

        let current = self.game.current_player;
        self.trigger_player_cards_ability_type(current, AbilityTrigger::EndOfTurn);
        self.emit(GameEvent::TurnEnded { player_id: current });

        self.queue.push_continuation(Continuation::StartNextTurn);
        self.resolve_all_after(self.settings.delays.turn());
    }

    pub fn end_game(&mut self, winner: Option<PlayerId>) {
        if self.game.has_ended() {
            return;
        }
        self.game.state = MatchState::Ended;
        self.game.phase = GamePhase::None;
        self.game.selector = super::state::Selector::None;
        if let Some(winner) = winner {
            self.game.current_player = winner;
        }
        self.queue.clear();
        debug!(target: "engine", ?winner, "game ended");
        self.emit(GameEvent::GameEnded { winner });
    }

    /// 没有存活玩家时平局，只剩一名时其获胜。
    pub fn check_for_winner(&mut self) {
        if self.game.state != MatchState::Play {
            return;
        }
        let alive: Vec<PlayerId> = self
            .game
            .players
            .iter()
            .filter(|player| !player.is_dead())
            .map(|player| player.player_id)
            .collect();
        match alive.as_slice() {
            [] => self.end_game(None),
            [winner] => self.end_game(Some(*winner)),
            _ => {}
        }
    }

    // ---- 玩家操作 ----

    pub fn play_card(&mut self, player_id: PlayerId, uid: CardUid, slot: Option<Slot>) -> Result<(), RuleError> {
        self.rules().ensure_action_turn(player_id)?;
        self.ensure_idle()?;
        self.ensure_owner(player_id, uid)?;
        self.begin_play(uid, slot, false)
    }

    /// 出牌前触发先入队；结算中的嵌套出牌立即完成，顶层出牌把放置排在这些触发之后。
    pub(crate) fn begin_play(&mut self, uid: CardUid, slot: Option<Slot>, skip_cost: bool) -> Result<(), RuleError> {
        let card = self.game.card(uid).ok_or(RuleError::CardNotFound { uid })?;
        self.rules().check_play_card(card, slot, skip_cost)?;
        debug!(target: "engine", uid, ?slot, skip_cost, "card played");

        self.trigger_secrets(AbilityTrigger::OnBeforePlayOther, Some(uid));
        self.trigger_other_cards_ability_type(AbilityTrigger::OnBeforePlayOther, uid);
        self.trigger_card_ability_type(AbilityTrigger::OnBeforePlaySelf, uid, None);

        if self.queue.is_resolving() {
            self.complete_play(uid, slot, skip_cost);
        } else {
            self.queue.push_continuation(Continuation::CompletePlay { uid, slot, skip_cost });
            self.resolve_all();
        }
        Ok(())
    }

    fn complete_play(&mut self, uid: CardUid, slot: Option<Slot>, skip_cost: bool) {
        if !matches!(self.game.zone_of(uid), Some(Zone::Hand) | Some(Zone::Extra)) {
            return;
        }
        let Some(card) = self.game.card(uid) else {
            return;
        };
        let Some(def) = card.def(&self.catalog) else {
            return;
        };
        let player_id = card.player_id;
        let mana = card.mana();
        let Some(owner) = self.game.owner_of(uid) else {
            return;
        };
        let turn_count = self.game.turn_count;

        let Some(player) = self.game.get_player_mut(owner) else {
            return;
        };
        if !skip_cost {
            player.pay_mana(mana);
        }
        if let Some(card) = player.card_mut(uid) {
            if card.has_status(StatusType::CounteredToHand) {
                card.remove_status(StatusType::CounteredToHand);
                debug!(target: "engine", uid, "play countered back to hand");
                return;
            }
        }
        let Some(mut card) = player.take_card(uid) else {
            return;
        };
        if card.has_status(StatusType::Countered) {
            card.remove_status(StatusType::Countered);
            card.slot = slot;
            player.add_card(Zone::Discard, card);
            debug!(target: "engine", uid, "play countered");
            return;
        }
        if card.has_status(StatusType::CounteredToDeck) {
            card.reset(&def);
            card.slot = None;
            player.add_card(Zone::Deck, card);
            debug!(target: "engine", uid, "play countered into the deck");
            return;
        }

        if def.is_board_card() {
            let actions = if turn_count > 1 { 1 } else { 0 };
            card.slot = slot;
            card.exhausted = false;
            card.available_actions = 0;
            card.half_actions = actions;
            card.total_actions = actions;
            player.add_card(Zone::Board, card);
        } else if def.is_equipment() {
            player.add_card(Zone::Temp, card);
        } else if def.is_secret() {
            player.add_card(Zone::Secret, card);
        } else {
            card.slot = slot;
            player.add_card(Zone::Discard, card);
        }

        if skip_cost {
            if def.is_character() && def.subtype == CardSubType::Fusion {
                player.use_action(false);
            }
        } else if def.is_character() || def.subtype == CardSubType::Miracle {
            player.use_action(false);
        } else {
            player.use_action(true);
        }
        if !def.is_secret() {
            player.history.push(HistoryEntry::Played {
                card_id: def.id.clone(),
                uid,
                slot,
            });
        }

        if def.is_equipment() {
            if let Some(bearer) = slot.and_then(|s| self.game.board_card_at(s)).map(|c| c.uid) {
                self.equip_card(bearer, uid);
            }
            // 出牌前的触发可能已让持有者离场或易主，没装上的装备直接弃掉。
            if self.game.zone_of(uid) == Some(Zone::Temp) {
                debug!(target: "engine", uid, "equipment lost its bearer");
                self.discard_card(uid);
            }
        }
        if !def.is_character() {
            self.game.non_unit_casts += 1;
        }
        self.game.last_played = Some(uid);
        trace!(target: "engine", uid, player_id, "card placed");
        self.update_ongoing();

        self.trigger_secrets(AbilityTrigger::OnPlayOther, Some(uid));
        self.trigger_card_ability_type(AbilityTrigger::OnPlay, uid, None);
        self.trigger_other_cards_ability_type(AbilityTrigger::OnPlayOther, uid);

        self.emit(GameEvent::CardPlayed { uid, slot });
        self.resolve_all_after(self.settings.delays.play());
    }

    /// 移动在本规则中始终不合法。
    pub fn move_card(&mut self, _player_id: PlayerId, _uid: CardUid, _slot: Slot) -> Result<(), RuleError> {
        Err(RuleError::MoveDisabled)
    }

    pub fn cast_ability(&mut self, player_id: PlayerId, uid: CardUid, ability_id: &str) -> Result<(), RuleError> {
        self.rules().ensure_action_turn(player_id)?;
        self.ensure_idle()?;
        let card = self.ensure_owner(player_id, uid)?;
        let ability = self
            .catalog
            .ability(ability_id)
            .filter(|_| card.has_ability(ability_id))
            .ok_or_else(|| RuleError::AbilityNotFound {
                ability_id: ability_id.to_string(),
            })?;
        self.rules().check_cast_ability(card, &ability)?;

        let card_id = card.card_id.clone();
        debug!(target: "engine", uid, ability = ability_id, "ability cast");
        if ability.target != AbilityTarget::SelectTarget {
            if let Some(player) = self.game.get_player_mut(player_id) {
                player.history.push(HistoryEntry::CastAbility {
                    card_id,
                    uid,
                    ability_id: ability.id.clone(),
                });
            }
        }
        if let Some(card) = self.game.card_mut(uid) {
            card.remove_status(StatusType::Stealth);
        }
        self.trigger_card_ability(&ability, uid, None);
        self.resolve_all();
        Ok(())
    }

    pub fn attack_target(&mut self, player_id: PlayerId, attacker: CardUid, target: CardUid) -> Result<(), RuleError> {
        self.rules().ensure_action_turn(player_id)?;
        self.ensure_idle()?;
        let card = self.ensure_owner(player_id, attacker)?;
        let defender = self.game.card(target).ok_or(RuleError::CardNotFound { uid: target })?;
        self.rules().check_attack_card(card, defender, false)?;
        debug!(target: "engine", attacker, defender = target, "attack declared");

        if let Some(player) = self.game.get_player_mut(player_id) {
            player.history.push(HistoryEntry::Attacked { uid: attacker, target });
        }
        self.trigger_card_ability_type(AbilityTrigger::OnBeforeAttack, attacker, Some(target));
        self.trigger_card_ability_type(AbilityTrigger::OnBeforeDefend, target, Some(attacker));
        self.trigger_secrets(AbilityTrigger::OnBeforeAttack, Some(attacker));
        self.trigger_secrets(AbilityTrigger::OnBeforeDefend, Some(target));

        self.queue
            .push_attack(attacker, AttackTarget::Card { uid: target }, AttackStage::Resolve, false);
        self.resolve_all();
        Ok(())
    }

    pub fn attack_player(&mut self, player_id: PlayerId, attacker: CardUid, target: PlayerId) -> Result<(), RuleError> {
        self.rules().ensure_action_turn(player_id)?;
        self.ensure_idle()?;
        let card = self.ensure_owner(player_id, attacker)?;
        let defender = self
            .game
            .get_player(target)
            .ok_or(RuleError::PlayerNotFound { player_id: target })?;
        self.rules().check_attack_player(card, defender, false)?;
        debug!(target: "engine", attacker, defender = target, "player attack declared");

        if let Some(player) = self.game.get_player_mut(player_id) {
            player.history.push(HistoryEntry::AttackedPlayer { uid: attacker, target });
        }
        self.trigger_secrets(AbilityTrigger::OnBeforeAttack, Some(attacker));
        self.trigger_card_ability_type_player(AbilityTrigger::OnBeforeAttack, attacker, target);

        self.queue.push_attack(
            attacker,
            AttackTarget::Player { player_id: target },
            AttackStage::Resolve,
            false,
        );
        self.resolve_all();
        Ok(())
    }

    fn resolve_attack(&mut self, attack: QueuedAttack) {
        let QueuedAttack {
            attacker,
            target,
            stage,
            skip_cost,
        } = attack;
        match (target, stage) {
            (AttackTarget::Card { uid }, AttackStage::Resolve) => {
                if !self.game.is_on_board(attacker) || !self.game.is_on_board(uid) {
                    return;
                }
                self.emit(GameEvent::AttackStarted { attacker, target: uid });
                self.begin_hit(attacker, target, skip_cost);
            }
            (AttackTarget::Player { player_id }, AttackStage::Resolve) => {
                if !self.game.is_on_board(attacker) {
                    return;
                }
                self.emit(GameEvent::AttackPlayerStarted {
                    attacker,
                    target: player_id,
                });
                self.begin_hit(attacker, target, skip_cost);
            }
            (AttackTarget::Card { uid }, AttackStage::Hit) => self.attack_card_hit(attacker, uid, skip_cost),
            (AttackTarget::Player { player_id }, AttackStage::Hit) => {
                self.attack_player_hit(attacker, player_id, skip_cost)
            }
        }
    }

    fn begin_hit(&mut self, attacker: CardUid, target: AttackTarget, skip_cost: bool) {
        if let Some(card) = self.game.card_mut(attacker) {
            card.remove_status(StatusType::Stealth);
        }
        self.update_ongoing();
        self.queue.push_attack(attacker, target, AttackStage::Hit, skip_cost);
        self.resolve_all_after(self.settings.delays.play());
    }

    fn attack_card_hit(&mut self, attacker: CardUid, target: CardUid, skip_cost: bool) {
        let Some(card) = self.game.card(attacker) else {
            return;
        };
        let damage = card.attack();
        let element = card.def(&self.catalog).map(|def| def.primary_element).unwrap_or_default();
        self.damage_card_by(attacker, target, damage, element, Element::None);
        if !skip_cost {
            self.exhaust_battle(attacker);
        }
        self.update_ongoing();

        if self.game.is_on_board(attacker) {
            self.trigger_card_ability_type(AbilityTrigger::OnAfterAttack, attacker, Some(target));
        }
        if self.game.is_on_board(target) {
            self.trigger_card_ability_type(AbilityTrigger::OnAfterDefend, target, Some(attacker));
        }
        if self.game.is_on_board(attacker) {
            self.trigger_secrets(AbilityTrigger::OnAfterAttack, Some(attacker));
        }
        if self.game.is_on_board(target) {
            self.trigger_secrets(AbilityTrigger::OnAfterDefend, Some(target));
        }

        self.emit(GameEvent::AttackEnded { attacker });
        self.check_for_winner();
        self.resolve_all_after(self.settings.delays.turn());
    }

    fn attack_player_hit(&mut self, attacker: CardUid, target: PlayerId, skip_cost: bool) {
        let Some(damage) = self.game.card(attacker).map(|card| card.attack()) else {
            return;
        };
        self.damage_player_by(attacker, target, damage);
        if !skip_cost {
            self.exhaust_battle(attacker);
        }
        self.update_ongoing();

        if self.game.is_on_board(attacker) {
            self.trigger_card_ability_type_player(AbilityTrigger::OnAfterAttack, attacker, target);
        }
        self.trigger_secrets(AbilityTrigger::OnAfterAttack, Some(attacker));

        self.emit(GameEvent::AttackEnded { attacker });
        self.check_for_winner();
        self.resolve_all_after(self.settings.delays.turn());
    }

    fn exhaust_battle(&mut self, attacker: CardUid) {
        self.game.cards_attacked.insert(attacker);
        if let Some(card) = self.game.card_mut(attacker) {
            if card.has_status(StatusType::Fury) {
                card.grant_bonus_action();
            }
            card.reduce_action_value();
        }
    }

    /// 掷骰：`[min, max)` 内的随机值，区间为空时取 `min`。
    pub fn roll_random_value(&mut self, min: i32, max: i32) -> i32 {
        let value = if min >= max { min } else { self.rng.gen_range(min..max) };
        self.game.rolled_value = value;
        self.emit(GameEvent::DiceRolled { value });
        self.queue.set_delay(self.settings.delays.roll());
        value
    }

    // ---- 卡牌操作 ----

    /// 牌库为空或手牌已满时改为疲劳伤害；电脑玩家不受疲劳伤害。
    pub fn draw_card(&mut self, player_id: PlayerId, count: u32) {
        self.draw_cards(player_id, count, false);
    }

    /// `guided` 为真时按场面挑牌（电脑玩家的回合抽牌），否则取牌库顶。
    fn draw_cards(&mut self, player_id: PlayerId, count: u32, guided: bool) {
        let cards_max = self.settings.cards_max;
        for _ in 0..count {
            let Some(player) = self.game.get_player(player_id) else {
                return;
            };
            let is_ai = player.is_ai;
            let index = if player.cards_hand.len() >= cards_max {
                None
            } else if guided {
                guided_draw_index(player, &self.catalog, &mut self.rng)
            } else if player.cards_deck.is_empty() {
                None
            } else {
                Some(0)
            };
            let Some(index) = index else {
                if !is_ai {
                    debug!(target: "engine", player_id, "fatigue");
                    self.damage_player(player_id, self.settings.fatigue_damage);
                }
                continue;
            };

            let Some(player) = self.game.get_player_mut(player_id) else {
                return;
            };
            let Some(uid) = player.cards_deck.get(index).map(|card| card.uid) else {
                continue;
            };
            if let Some(card) = player.take_card(uid) {
                player.add_card(Zone::Hand, card);
            }
            self.emit(GameEvent::CardDrawn { player_id, uid });
            self.trigger_other_cards_ability_type(AbilityTrigger::OnOpponentDraw, uid);
            self.trigger_player_cards_ability_type(player_id, AbilityTrigger::OnPlayerDraw);
        }
        self.queue.set_delay(self.settings.delays.play());
    }

    /// 牌库顶的牌直接进入弃牌堆。
    pub fn draw_discard_card(&mut self, player_id: PlayerId, count: u32) {
        for _ in 0..count {
            let Some(player) = self.game.get_player_mut(player_id) else {
                return;
            };
            let Some(uid) = player.cards_deck.first().map(|card| card.uid) else {
                return;
            };
            if let Some(card) = player.take_card(uid) {
                player.add_card(Zone::Discard, card);
            }
            self.emit(GameEvent::CardDiscarded { uid });
        }
    }

    pub fn shuffle_deck(&mut self, player_id: PlayerId) {
        if let Some(player) = self.game.get_player_mut(player_id) {
            player.cards_deck.shuffle(&mut self.rng);
        }
    }

    pub fn summon_card_hand(&mut self, owner: PlayerId, def: &Arc<CardDef>) -> Option<CardUid> {
        self.game.get_player(owner)?;
        let uid = self.game.alloc_uid();
        let card = Card::create(def, "", owner, uid);
        self.game.get_player_mut(owner)?.add_card(Zone::Hand, card);
        self.game.last_summoned = Some(uid);
        trace!(target: "engine", uid, card_id = %def.id, "card summoned");
        self.emit(GameEvent::CardSummoned { uid });
        Some(uid)
    }

    /// 生成到手牌后立即免费打出；位置不可用时什么也不做。
    pub fn summon_card(&mut self, owner: PlayerId, def: &Arc<CardDef>, slot: Slot) -> Option<CardUid> {
        if !slot.is_valid() || self.game.board_card_at(slot).is_some() {
            return None;
        }
        let uid = self.summon_card_hand(owner, def)?;
        if let Err(err) = self.begin_play(uid, Some(slot), true) {
            debug!(target: "engine", uid, %err, "summoned card stays in hand");
        }
        Some(uid)
    }

    pub fn summon_copy(&mut self, owner: PlayerId, original: CardUid, slot: Slot) -> Option<CardUid> {
        let def = self.game.card(original)?.def(&self.catalog)?;
        self.summon_card(owner, &def, slot)
    }

    pub fn summon_copy_hand(&mut self, owner: PlayerId, original: CardUid) -> Option<CardUid> {
        let def = self.game.card(original)?.def(&self.catalog)?;
        self.summon_card_hand(owner, &def)
    }

    pub fn transform_card(&mut self, uid: CardUid, def: &Arc<CardDef>) {
        let Some(card) = self.game.card_mut(uid) else {
            return;
        };
        card.set_card(def);
        self.emit(GameEvent::CardTransformed {
            uid,
            card_id: def.id.clone(),
        });
    }

    pub fn equip_card(&mut self, bearer: CardUid, equip: CardUid) {
        let (Some(holder), Some(item)) = (self.game.card(bearer), self.game.card(equip)) else {
            return;
        };
        if holder.player_id != item.player_id {
            return;
        }
        let holder_ok = holder.def(&self.catalog).map(|d| !d.is_equipment()).unwrap_or(false);
        let item_ok = item.def(&self.catalog).map(|d| d.is_equipment()).unwrap_or(false);
        if !holder_ok || !item_ok {
            return;
        }
        let slot = holder.slot;
        let Some(owner) = self.game.owner_of(equip) else {
            return;
        };

        self.unequip_all(bearer);
        let Some(player) = self.game.get_player_mut(owner) else {
            return;
        };
        let Some(mut item) = player.take_card(equip) else {
            return;
        };
        item.slot = slot;
        player.add_card(Zone::Equip, item);
        if let Some(holder) = self.game.card_mut(bearer) {
            holder.equipped_uid = Some(equip);
        }
        self.emit(GameEvent::CardEquipped { bearer, equip });
    }

    pub fn unequip_all(&mut self, bearer: CardUid) {
        let Some(equip) = self.game.card_mut(bearer).and_then(|card| card.equipped_uid.take()) else {
            return;
        };
        self.discard_card(equip);
    }

    /// 移到新主人的同类区域；场上卡牌占用新主人第一个空格位，没有空位时不变。
    pub fn change_owner(&mut self, uid: CardUid, new_owner: PlayerId) {
        let Some(old_owner) = self.game.owner_of(uid) else {
            return;
        };
        let Some(zone) = self.game.zone_of(uid) else {
            return;
        };
        if old_owner == new_owner || zone == Zone::Hero {
            return;
        }
        let Some(target) = self.game.get_player(new_owner) else {
            return;
        };
        let slot = if zone == Zone::Board {
            match target.empty_slots().first() {
                Some(slot) => Some(*slot),
                None => return,
            }
        } else {
            None
        };
        if zone == Zone::Board {
            self.unequip_all(uid);
        }

        let Some(mut card) = self.game.get_player_mut(old_owner).and_then(|p| p.take_card(uid)) else {
            return;
        };
        card.player_id = new_owner;
        if slot.is_some() {
            card.slot = slot;
        }
        if let Some(player) = self.game.get_player_mut(new_owner) {
            player.add_card(zone, card);
        }
        debug!(target: "engine", uid, from = old_owner, to = new_owner, "owner changed");
    }

    fn send_to_zone(&mut self, uid: CardUid, to_hand: bool) {
        let Some(owner) = self.game.owner_of(uid) else {
            return;
        };
        let Some(def) = self.game.card(uid).and_then(|card| card.def(&self.catalog)) else {
            return;
        };
        self.unequip_all(uid);
        let cards_max = self.settings.cards_max;
        let Some(player) = self.game.get_player_mut(owner) else {
            return;
        };
        let Some(mut card) = player.take_card(uid) else {
            return;
        };
        for bearer in player.cards_board.iter_mut().filter(|c| c.equipped_uid == Some(uid)) {
            bearer.equipped_uid = None;
        }
        card.reset(&def);
        card.slot = None;
        let zone = match to_hand {
            true if player.cards_hand.len() >= cards_max => Zone::Discard,
            true => Zone::Hand,
            false => Zone::Deck,
        };
        player.add_card(zone, card);
    }

    /// 手牌已满时改为进入弃牌堆。
    pub fn send_to_hand(&mut self, uid: CardUid) {
        self.send_to_zone(uid, true);
    }

    /// 放到牌库底。
    pub fn send_to_deck(&mut self, uid: CardUid) {
        self.send_to_zone(uid, false);
    }

    pub fn redirect_attack(&mut self, attacker: CardUid, target: AttackTarget) {
        self.queue.redirect_attack(attacker, target);
    }

    // ---- 队列驱动 ----

    /// 依次结算队列条目，直到队列为空、需要等待、出现选择器或对局结束。嵌套调用直接返回。
    pub fn resolve_all(&mut self) {
        if !self.queue.begin_resolve() {
            return;
        }
        while !self.queue.is_waiting() && !self.game.has_ended() && self.game.selector.is_none() {
            let Some(item) = self.queue.pop() else {
                break;
            };
            self.execute(item);
        }
        self.queue.end_resolve();
    }

    pub fn resolve_all_after(&mut self, delay: Duration) {
        self.queue.set_delay(delay);
        self.resolve_all();
    }

    fn execute(&mut self, item: QueueItem) {
        trace!(target: "engine", ?item, "resolve step");
        match item {
            QueueItem::Ability(ability) => self.resolve_queued_ability(ability),
            QueueItem::Secret(secret) => self.resolve_secret(secret),
            QueueItem::Attack(attack) => self.resolve_attack(attack),
            QueueItem::Continuation(continuation) => match continuation {
                Continuation::StartMainPhase => self.start_main_phase(),
                Continuation::StartNextTurn => self.start_next_turn(),
                Continuation::EndTurn => self.run_end_turn(),
                Continuation::CompletePlay { uid, slot, skip_cost } => self.complete_play(uid, slot, skip_cost),
            },
        }
    }

    pub fn pending_delay(&self) -> Duration {
        self.queue.delay()
    }

    /// 推进节奏计时，等待结束后继续结算。
    pub fn update(&mut self, elapsed: Duration) {
        self.queue.tick(elapsed);
        if !self.queue.is_waiting() {
            self.resolve_all();
        }
    }

    /// 以固定步长推进，直到没有待处理的延迟。返回推进的总时长。
    pub fn run_paced(&mut self, step: Duration) -> Duration {
        let step = step.max(Duration::from_millis(1));
        let mut elapsed = Duration::ZERO;
        while self.queue.is_waiting() {
            self.update(step);
            elapsed += step;
        }
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::EventLog;
    use crate::game::testing::{catalog, logic, logic_with_mode, place, put};

    fn state_json(logic: &GameLogic) -> String {
        serde_json::to_string(logic.game()).expect("state should serialize")
    }

    #[test]
    fn start_game_deals_the_opening_hand() {
        let settings = GameplaySettings::default().with_seed(11);
        let mut logic = GameLogic::new(Arc::new(catalog()), settings, ResolveMode::Instant);
        let deck = ["grunt", "bolt", "chimera", "summoner", "potion", "blessing", "grunt", "grunt"];
        logic.load_deck(0, None, &deck).expect("deck 0");
        logic.load_deck(1, None, &deck).expect("deck 1");
        logic.start_game();

        let game = logic.game();
        assert_eq!(game.state, MatchState::Play);
        assert_eq!(game.phase, GamePhase::Main, "start of turn resolves into the main phase");
        let first = game.first_player;
        let second = (first + 1) % 2;
        let first_player = game.get_player(first).expect("first player");
        let second_player = game.get_player(second).expect("second player");

        assert_eq!(first_player.cards_hand.len(), 5, "four openers plus the turn draw");
        assert_eq!(second_player.cards_hand.len(), 5, "four openers plus the miracle");
        assert!(second_player.cards_hand.iter().any(|c| c.card_id == "blessing"));
        assert_eq!(first_player.cards_extra.len(), 1, "fusion cards wait in the extra deck");
        assert_eq!(first_player.cards_extra[0].card_id, "chimera");
        assert_eq!(first_player.mana, 2);
        assert_eq!(second_player.hp, 20);
        game.integrity_check().expect("zones stay consistent");
    }

    #[test]
    fn unknown_deck_cards_are_reported() {
        let mut logic = logic();
        let err = logic.load_deck(0, None, &["grunt", "nope"]).expect_err("unknown id");
        assert!(matches!(err, CatalogError::UnknownCard(id) if id == "nope"));
    }

    #[test]
    fn attack_kills_a_four_hp_defender() {
        let mut logic = logic();
        let log = EventLog::new();
        logic.add_observer(Box::new(log.clone()));
        let catalog = logic.catalog().clone();
        let brute = place(logic.game_mut(), &catalog, "brute", 0, 1);
        let squishy = place(logic.game_mut(), &catalog, "squishy", 1, 1);

        logic.attack_target(0, brute, squishy).expect("attack should be legal");

        assert_eq!(logic.game().zone_of(squishy), Some(Zone::Discard));
        assert_eq!(logic.game().get_player(0).expect("player 0").kill_count, 1);
        assert!(logic.game().cards_attacked.contains(&brute));
        let events = log.take();
        assert!(events.contains(&GameEvent::AttackStarted { attacker: brute, target: squishy }));
        assert!(events.contains(&GameEvent::AttackEnded { attacker: brute }));
    }

    #[test]
    fn rejected_play_leaves_state_untouched() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        place(logic.game_mut(), &catalog, "lord", 0, 1);
        let grunt = put(logic.game_mut(), &catalog, "grunt", 0, Zone::Hand);
        let before = state_json(&logic);

        let result = logic.play_card(0, grunt, Some(Slot::board(2, 0)));
        assert_eq!(result, Err(RuleError::LeaderConflict));
        assert_eq!(state_json(&logic), before, "a rejected intent must not mutate");
    }

    #[test]
    fn playing_a_unit_pays_mana_and_places_it() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let grunt = put(logic.game_mut(), &catalog, "grunt", 0, Zone::Hand);
        let mana = logic.game().get_player(0).expect("player 0").mana;

        logic.play_card(0, grunt, Some(Slot::board(2, 0))).expect("play should be legal");

        let game = logic.game();
        assert_eq!(game.zone_of(grunt), Some(Zone::Board));
        assert_eq!(game.card(grunt).expect("grunt").slot, Some(Slot::board(2, 0)));
        assert_eq!(game.get_player(0).expect("player 0").mana, mana - 1);
        assert_eq!(game.last_played, Some(grunt));
    }

    #[test]
    fn equipment_without_a_bearer_is_discarded() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let grunt = place(logic.game_mut(), &catalog, "grunt", 0, 1);
        let sword = put(logic.game_mut(), &catalog, "sword", 0, Zone::Hand);
        let spare = put(logic.game_mut(), &catalog, "sword", 0, Zone::Hand);

        logic.complete_play(sword, Some(Slot::board(1, 0)), false);
        assert_eq!(logic.game().zone_of(sword), Some(Zone::Equip));
        assert_eq!(logic.game().card(grunt).expect("grunt").equipped_uid, Some(sword));

        logic.complete_play(spare, Some(Slot::board(3, 0)), false);
        let player = logic.game().get_player(0).expect("player 0");
        assert_eq!(logic.game().zone_of(spare), Some(Zone::Discard));
        assert!(player.cards_temp.is_empty(), "nothing is left waiting in temp");
        logic.game().integrity_check().expect("zones stay consistent");
    }

    #[test]
    fn moving_is_always_rejected() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let grunt = place(logic.game_mut(), &catalog, "grunt", 0, 1);
        assert_eq!(logic.move_card(0, grunt, Slot::board(2, 0)), Err(RuleError::MoveDisabled));
    }

    #[test]
    fn ending_the_turn_ticks_status_durations() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let grunt = place(logic.game_mut(), &catalog, "grunt", 0, 1);
        {
            let card = logic.game_mut().card_mut(grunt).expect("grunt");
            card.add_status(StatusType::Stealth, 0, 1);
            card.add_status(StatusType::Flying, 0, 2);
        }

        logic.end_turn(0).expect("end turn");

        let card = logic.game().card(grunt).expect("grunt");
        assert!(!card.has_status(StatusType::Stealth), "one-turn status expires");
        assert!(card.has_status(StatusType::Flying));
        assert_eq!(logic.game().current_player, 1);
        assert_eq!(logic.game().phase, GamePhase::Main);
    }

    #[test]
    fn drawing_from_an_empty_deck_costs_fatigue() {
        let mut logic = logic();
        let hp = logic.game().get_player(1).expect("player 1").hp;
        logic.end_turn(0).expect("end turn");
        let player = logic.game().get_player(1).expect("player 1");
        assert_eq!(player.hp, hp - 3);
        assert!(player.cards_hand.is_empty());
    }

    fn hand_ids(logic: &GameLogic, player_id: PlayerId) -> Vec<String> {
        let player = logic.game().get_player(player_id).expect("player");
        player.cards_hand.iter().map(|card| card.card_id.clone()).collect()
    }

    #[test]
    fn ai_turn_draw_looks_for_a_unit_on_an_open_board() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        logic.game_mut().get_player_mut(1).expect("player 1").is_ai = true;
        for id in ["bolt", "potion", "grunt"] {
            put(logic.game_mut(), &catalog, id, 1, Zone::Deck);
        }

        logic.end_turn(0).expect("end turn");

        assert_eq!(hand_ids(&logic, 1), vec!["grunt".to_string()]);
        let deck = &logic.game().get_player(1).expect("player 1").cards_deck;
        assert_eq!(deck[0].card_id, "bolt", "the rest of the deck keeps its order");
    }

    #[test]
    fn ai_turn_draw_takes_a_miracle_when_units_are_covered() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        logic.game_mut().get_player_mut(1).expect("player 1").is_ai = true;
        place(logic.game_mut(), &catalog, "grunt", 1, 1);
        place(logic.game_mut(), &catalog, "grunt", 1, 2);
        put(logic.game_mut(), &catalog, "grunt", 1, Zone::Hand);
        for id in ["grunt", "potion", "blessing"] {
            put(logic.game_mut(), &catalog, id, 1, Zone::Deck);
        }

        logic.end_turn(0).expect("end turn");

        assert_eq!(hand_ids(&logic, 1), vec!["grunt".to_string(), "blessing".to_string()]);
    }

    #[test]
    fn ai_players_skip_fatigue() {
        let mut logic = logic();
        logic.game_mut().get_player_mut(1).expect("player 1").is_ai = true;

        logic.end_turn(0).expect("end turn");

        assert_eq!(logic.game().get_player(1).expect("player 1").hp, 20);
        logic.draw_card(1, 2);
        assert_eq!(logic.game().get_player(1).expect("player 1").hp, 20, "effect draws spare them too");
    }

    #[test]
    fn bleeding_ticks_at_the_owners_turn_start() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let wall = place(logic.game_mut(), &catalog, "wall", 1, 1);
        logic
            .game_mut()
            .card_mut(wall)
            .expect("wall")
            .add_status(StatusType::Bleeding, 0, 0);

        logic.end_turn(0).expect("end turn");

        assert_eq!(logic.game().card(wall).expect("wall").damage, 2, "1 flat + 5% of 10 rounded up");
    }

    #[test]
    fn paced_intents_wait_for_the_queue() {
        let mut logic = logic_with_mode(ResolveMode::Paced);
        let catalog = logic.catalog().clone();
        let brute = place(logic.game_mut(), &catalog, "brute", 0, 1);
        let squishy = place(logic.game_mut(), &catalog, "squishy", 1, 1);

        logic.attack_target(0, brute, squishy).expect("attack");
        assert!(logic.pending_delay() > Duration::ZERO);
        assert_eq!(logic.end_turn(0), Err(RuleError::Resolving));
        assert_eq!(logic.game().zone_of(squishy), Some(Zone::Board), "hit waits for the delay");

        logic.run_paced(Duration::from_millis(50));
        assert_eq!(logic.game().zone_of(squishy), Some(Zone::Discard));
        assert!(!logic.is_busy());
    }

    #[test]
    fn paced_and_instant_modes_reach_the_same_state() {
        fn script(mode: ResolveMode) -> String {
            let mut logic = logic_with_mode(mode);
            let catalog = logic.catalog().clone();
            let brute = place(logic.game_mut(), &catalog, "brute", 0, 1);
            let wall = place(logic.game_mut(), &catalog, "wall", 1, 1);
            let squishy = place(logic.game_mut(), &catalog, "squishy", 1, 2);
            put(logic.game_mut(), &catalog, "trap", 1, Zone::Secret);
            let grunt = put(logic.game_mut(), &catalog, "grunt", 0, Zone::Hand);
            let step = Duration::from_millis(40);

            logic.attack_target(0, brute, wall).expect("attack wall");
            logic.run_paced(step);
            logic.play_card(0, grunt, Some(Slot::board(3, 0))).expect("play grunt");
            logic.run_paced(step);
            logic.end_turn(0).expect("end turn 0");
            logic.run_paced(step);
            logic.end_turn(1).expect("end turn 1");
            logic.run_paced(step);
            let brute_alive = logic.game().is_on_board(brute);
            if brute_alive {
                logic.attack_target(0, brute, squishy).expect("attack squishy");
                logic.run_paced(step);
            }
            state_json(&logic)
        }

        assert_eq!(script(ResolveMode::Instant), script(ResolveMode::Paced));
    }

    #[test]
    fn select_target_parks_and_resumes() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let sniper = place(logic.game_mut(), &catalog, "sniper", 0, 1);
        let target = place(logic.game_mut(), &catalog, "wall", 1, 1);
        let grunt = put(logic.game_mut(), &catalog, "grunt", 0, Zone::Hand);

        logic.cast_ability(0, sniper, "snipe").expect("cast");
        assert!(matches!(logic.game().selector, super::super::state::Selector::SelectTarget(_)));
        assert_eq!(
            logic.play_card(0, grunt, Some(Slot::board(2, 0))),
            Err(RuleError::SelectionPending)
        );
        assert_eq!(logic.select_card(1, target), Err(RuleError::NotPlayerTurn { player_id: 1 }));

        logic.select_card(0, target).expect("select");
        assert!(logic.game().selector.is_none());
        assert_eq!(logic.game().card(target).expect("wall").damage, 1, "2 damage minus 1 defense");
        assert!(logic.game().abilities_played.contains("snipe"));
    }

    #[test]
    fn cancelled_selection_applies_nothing() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let sniper = place(logic.game_mut(), &catalog, "sniper", 0, 1);
        let target = place(logic.game_mut(), &catalog, "wall", 1, 1);

        logic.cast_ability(0, sniper, "snipe").expect("cast");
        logic.cancel_selection(0).expect("cancel");
        assert!(logic.game().selector.is_none());
        assert_eq!(logic.game().card(target).expect("wall").damage, 0);
        assert_eq!(logic.cancel_selection(0), Err(RuleError::NoSelection));
    }

    #[test]
    fn choice_menu_resolves_the_picked_branch() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let oracle = place(logic.game_mut(), &catalog, "oracle", 0, 1);
        let mana = logic.game().get_player(0).expect("player 0").mana;

        logic.cast_ability(0, oracle, "omen").expect("cast");
        assert!(matches!(logic.game().selector, super::super::state::Selector::SelectorChoice(_)));
        assert_eq!(logic.select_choice(0, 5), Err(RuleError::InvalidTarget));

        logic.select_choice(0, 0).expect("choose");
        assert!(logic.game().selector.is_none());
        assert_eq!(logic.game().get_player(0).expect("player 0").mana, mana + 2);
    }

    #[test]
    fn chained_abilities_follow_their_parent() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let healer = place(logic.game_mut(), &catalog, "healer", 0, 1);
        logic.game_mut().card_mut(healer).expect("healer").damage = 2;

        logic.cast_ability(0, healer, "mend").expect("cast");

        let game = logic.game();
        assert_eq!(game.card(healer).expect("healer").damage, 0, "mend heals the caster");
        assert!(game.abilities_played.contains("mend"));
        assert!(game.abilities_played.contains("mend_draw"), "the chained draw resolves too");
    }

    #[test]
    fn snapshots_do_not_leak_into_the_source() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let brute = place(logic.game_mut(), &catalog, "brute", 0, 1);
        let squishy = place(logic.game_mut(), &catalog, "squishy", 1, 1);
        let before = state_json(&logic);

        let mut copy = logic.snapshot();
        copy.attack_target(0, brute, squishy).expect("attack in snapshot");
        assert_eq!(copy.game().zone_of(squishy), Some(Zone::Discard));
        assert_eq!(state_json(&logic), before);

        let mut reused = logic.snapshot();
        logic.snapshot_into(&mut reused);
        assert_eq!(reused.game(), logic.game());
    }

    #[test]
    fn killing_the_last_hp_ends_the_game() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let brute = place(logic.game_mut(), &catalog, "brute", 0, 1);
        logic.game_mut().get_player_mut(1).expect("player 1").hp = 4;

        logic.attack_player(0, brute, 1).expect("attack player");

        assert_eq!(logic.game().state, MatchState::Ended);
        assert_eq!(logic.game().current_player, 0, "winner holds the turn marker");
        assert_eq!(logic.end_turn(0), Err(RuleError::GameNotRunning));
    }

    #[test]
    fn rolls_stay_inside_the_half_open_range() {
        let mut logic = logic();
        for _ in 0..50 {
            let value = logic.roll_random_value(1, 7);
            assert!((1..7).contains(&value));
        }
        assert_eq!(logic.roll_random_value(4, 4), 4);
        assert_eq!(logic.game().rolled_value, 4);
    }

    #[test]
    fn returning_to_hand_resets_the_card() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let grunt = place(logic.game_mut(), &catalog, "grunt", 0, 1);
        logic.game_mut().card_mut(grunt).expect("grunt").damage = 2;

        logic.send_to_hand(grunt);

        let card = logic.game().card(grunt).expect("grunt");
        assert_eq!(logic.game().zone_of(grunt), Some(Zone::Hand));
        assert_eq!(card.damage, 0);
        assert_eq!(card.slot, None);
    }

    #[test]
    fn change_owner_takes_the_first_free_slot() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        place(logic.game_mut(), &catalog, "grunt", 0, 1);
        let stolen = place(logic.game_mut(), &catalog, "grunt", 1, 4);

        logic.change_owner(stolen, 0);

        let game = logic.game();
        assert_eq!(game.owner_of(stolen), Some(0));
        assert_eq!(game.card(stolen).expect("stolen").slot, Some(Slot::board(2, 0)));
        game.integrity_check().expect("zones stay consistent");
    }
}
