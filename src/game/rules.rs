//! 合法性判定。所有检查只读状态，遇到第一个不满足的前置条件即返回。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ability::{AbilityDef, AbilityTarget, AbilityTrigger, AbilityType, TargetRef};
use super::catalog::{CardDef, CardMythos, CardSubType, CardType, Catalog};
use super::state::{Card, CardUid, Game, GamePhase, MatchState, Player, PlayerId, Slot, Zone};
use super::status::StatusType;

const DARK_LORD: &str = "dark_lord";
const VASSAL: &str = "vassal";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[serde(tag = "type")]
pub enum RuleError {
    #[error("the game is not in progress")]
    GameNotRunning,
    #[error("it is not player {player_id}'s turn")]
    NotPlayerTurn { player_id: PlayerId },
    #[error("a selection is pending")]
    SelectionPending,
    #[error("no selection is pending")]
    NoSelection,
    #[error("the resolve queue is still busy")]
    Resolving,
    #[error("expected phase {expected:?}, found {actual:?}")]
    InvalidPhase { expected: GamePhase, actual: GamePhase },
    #[error("card {uid} not found")]
    CardNotFound { uid: CardUid },
    #[error("player {player_id} not found")]
    PlayerNotFound { player_id: PlayerId },
    #[error("card {uid} has no known definition")]
    UnknownDefinition { uid: CardUid },
    #[error("ability `{ability_id}` not found")]
    AbilityNotFound { ability_id: String },
    #[error("card {uid} is not in a playable zone")]
    NotPlayable { uid: CardUid },
    #[error("not enough mana: need {required}, have {available}")]
    InsufficientMana { required: i32, available: i32 },
    #[error("no player action left")]
    NoPlayerAction,
    #[error("leader rules forbid this play")]
    LeaderConflict,
    #[error("no matching mythos on the board")]
    MythosMismatch,
    #[error("slot is invalid or occupied")]
    InvalidSlot,
    #[error("only one non-unit card may be cast this turn")]
    SpellLimit,
    #[error("equipment needs an allied character")]
    InvalidBearer,
    #[error("invalid target")]
    InvalidTarget,
    #[error("card {uid} cannot attack")]
    CannotAttack { uid: CardUid },
    #[error("attacker and target belong to the same player")]
    SameOwner,
    #[error("card {uid} is not on the board")]
    NotOnBoard { uid: CardUid },
    #[error("only characters can attack")]
    NotACharacter,
    #[error("target is hidden")]
    TargetStealthed,
    #[error("target is protected")]
    TargetProtected,
    #[error("the opposing board still has blockers")]
    BlockersPresent,
    #[error("card {uid} cannot use abilities")]
    CannotAct { uid: CardUid },
    #[error("ability `{ability_id}` is not an activated ability")]
    NotActivated { ability_id: String },
    #[error("ability cost cannot be paid")]
    CannotPayCost,
    #[error("ability conditions are not met")]
    ConditionsNotMet,
    #[error("ability cannot be used from this zone")]
    WrongZone,
    #[error("moving cards is disabled")]
    MoveDisabled,
}

/// 借用当前对局与目录的只读视图。
pub struct RuleEngine<'a> {
    game: &'a Game,
    catalog: &'a Catalog,
}

impl<'a> RuleEngine<'a> {
    pub fn new(game: &'a Game, catalog: &'a Catalog) -> Self {
        Self { game, catalog }
    }

    fn definition(&self, card: &Card) -> Result<std::sync::Arc<CardDef>, RuleError> {
        card.def(self.catalog)
            .ok_or(RuleError::UnknownDefinition { uid: card.uid })
    }

    fn player(&self, player_id: PlayerId) -> Result<&'a Player, RuleError> {
        self.game
            .get_player(player_id)
            .ok_or(RuleError::PlayerNotFound { player_id })
    }

    pub fn ensure_running(&self) -> Result<(), RuleError> {
        if self.game.state != MatchState::Play {
            return Err(RuleError::GameNotRunning);
        }
        Ok(())
    }

    pub fn ensure_action_turn(&self, player_id: PlayerId) -> Result<(), RuleError> {
        self.ensure_running()?;
        if !self.game.selector.is_none() {
            return Err(RuleError::SelectionPending);
        }
        if self.game.current_player != player_id {
            return Err(RuleError::NotPlayerTurn { player_id });
        }
        Ok(())
    }

    pub fn ensure_selector_turn(&self, player_id: PlayerId) -> Result<(), RuleError> {
        self.ensure_running()?;
        if self.game.selector.is_none() {
            return Err(RuleError::NoSelection);
        }
        if !self.game.is_player_selector_turn(player_id) {
            return Err(RuleError::NotPlayerTurn { player_id });
        }
        Ok(())
    }

    pub fn ensure_phase(&self, expected: GamePhase) -> Result<(), RuleError> {
        if self.game.phase != expected {
            return Err(RuleError::InvalidPhase {
                expected,
                actual: self.game.phase,
            });
        }
        Ok(())
    }

    // ---- 出牌 ----

    pub fn check_play_card(&self, card: &Card, slot: Option<Slot>, skip_cost: bool) -> Result<(), RuleError> {
        let def = self.definition(card)?;
        let player = self.player(card.player_id)?;

        if !skip_cost {
            if !player.can_pay_mana(card.mana()) {
                return Err(RuleError::InsufficientMana {
                    required: card.mana(),
                    available: player.mana,
                });
            }
            if !player.has_actions() {
                return Err(RuleError::NoPlayerAction);
            }
        }

        if !matches!(player.zone_of(card.uid), Some(Zone::Hand) | Some(Zone::Extra)) {
            return Err(RuleError::NotPlayable { uid: card.uid });
        }

        self.ensure_leader_rules(card, &def, player)?;
        self.ensure_mythos(&def, player)?;

        if def.is_board_card() {
            let slot = slot.ok_or(RuleError::InvalidSlot)?;
            if !slot.is_valid() || self.game.board_card_at(slot).is_some() || slot.p != card.player_id {
                return Err(RuleError::InvalidSlot);
            }
            return Ok(());
        }

        if !def.is_character() && self.spell_limit_reached(card.player_id) {
            return Err(RuleError::SpellLimit);
        }

        if def.is_equipment() {
            let slot = slot.filter(Slot::is_valid).ok_or(RuleError::InvalidSlot)?;
            let bearer = self.game.board_card_at(slot).ok_or(RuleError::InvalidBearer)?;
            let bearer_is_character = bearer
                .def(self.catalog)
                .map(|d| d.is_character())
                .unwrap_or(false);
            if !bearer_is_character || bearer.player_id != card.player_id {
                return Err(RuleError::InvalidBearer);
            }
            return Ok(());
        }

        if self.catalog.is_require_target_spell(&def) {
            let slot = slot.ok_or(RuleError::InvalidTarget)?;
            if !self.is_play_target_valid(card, slot) {
                return Err(RuleError::InvalidTarget);
            }
        }
        Ok(())
    }

    pub fn can_play_card(&self, card: &Card, slot: Option<Slot>, skip_cost: bool) -> bool {
        self.check_play_card(card, slot, skip_cost).is_ok()
    }

    pub fn can_play_card_any_slot(&self, card: &Card, skip_cost: bool) -> bool {
        self.play_slots(card, skip_cost).next().is_some()
    }

    /// 该卡当前可以打出的全部位置（含玩家位）。
    pub fn play_slots<'b>(&'b self, card: &'b Card, skip_cost: bool) -> impl Iterator<Item = Slot> + 'b {
        let player_slots = self.game.players.iter().map(|p| Slot::player(p.player_id));
        Slot::all(self.game.players.len())
            .into_iter()
            .chain(player_slots)
            .filter(move |slot| self.can_play_card(card, Some(*slot), skip_cost))
    }

    fn ensure_leader_rules(&self, card: &Card, def: &CardDef, player: &Player) -> Result<(), RuleError> {
        let is_lord = card.has_trait(DARK_LORD);
        let is_vassal = card.has_trait(VASSAL);
        let has_lord = player.cards_board.iter().any(|c| c.has_trait(DARK_LORD));
        let has_non_vassal_units = player.cards_board.iter().any(|c| {
            !c.has_trait(VASSAL)
                && c.def(self.catalog)
                    .map(|d| d.card_type == CardType::Character)
                    .unwrap_or(false)
        });

        let allowed = if is_lord {
            !has_non_vassal_units
        } else if !is_vassal && def.card_type == CardType::Character {
            !has_lord
        } else if is_vassal {
            has_lord
        } else {
            true
        };

        if allowed {
            Ok(())
        } else {
            Err(RuleError::LeaderConflict)
        }
    }

    fn ensure_mythos(&self, def: &CardDef, player: &Player) -> Result<(), RuleError> {
        if !matches!(
            def.subtype,
            CardSubType::Miracle | CardSubType::Spell | CardSubType::Entity
        ) {
            return Ok(());
        }
        if def.mythos == CardMythos::Generic {
            return Ok(());
        }
        let matches_board = player
            .cards_board
            .iter()
            .filter_map(|c| c.def(self.catalog))
            .any(|d| d.mythos == def.mythos);
        if matches_board {
            Ok(())
        } else {
            Err(RuleError::MythosMismatch)
        }
    }

    fn spell_limit_reached(&self, player_id: PlayerId) -> bool {
        let limited = self
            .game
            .players
            .iter()
            .filter(|p| p.player_id != player_id)
            .flat_map(|p| p.cards_board.iter())
            .any(|c| c.has_status(StatusType::SpellLimit));
        limited && self.game.non_unit_casts >= 1
    }

    pub fn can_move_card(&self, _card: &Card, _slot: Slot) -> bool {
        false
    }

    // ---- 攻击 ----

    pub fn check_attack_card(&self, attacker: &Card, target: &Card, skip_cost: bool) -> Result<(), RuleError> {
        if !attacker.can_attack(skip_cost) {
            return Err(RuleError::CannotAttack { uid: attacker.uid });
        }
        if attacker.player_id == target.player_id {
            return Err(RuleError::SameOwner);
        }
        if !self.game.is_on_board(attacker.uid) {
            return Err(RuleError::NotOnBoard { uid: attacker.uid });
        }
        if !self.game.is_on_board(target.uid) {
            return Err(RuleError::NotOnBoard { uid: target.uid });
        }
        if !self.definition(attacker)?.is_character() {
            return Err(RuleError::NotACharacter);
        }
        if target.has_status(StatusType::Stealth) {
            return Err(RuleError::TargetStealthed);
        }
        if target.has_status(StatusType::Protected) && !attacker.has_status(StatusType::Flying) {
            return Err(RuleError::TargetProtected);
        }
        Ok(())
    }

    pub fn can_attack_card(&self, attacker: &Card, target: &Card, skip_cost: bool) -> bool {
        self.check_attack_card(attacker, target, skip_cost).is_ok()
    }

    pub fn check_attack_player(&self, attacker: &Card, target: &Player, skip_cost: bool) -> Result<(), RuleError> {
        if !attacker.can_attack(skip_cost) {
            return Err(RuleError::CannotAttack { uid: attacker.uid });
        }
        if attacker.player_id == target.player_id {
            return Err(RuleError::SameOwner);
        }
        if !self.game.is_on_board(attacker.uid) {
            return Err(RuleError::NotOnBoard { uid: attacker.uid });
        }
        if !self.definition(attacker)?.is_character() {
            return Err(RuleError::NotACharacter);
        }
        if target.has_status(StatusType::Protected) && !attacker.has_status(StatusType::Flying) {
            return Err(RuleError::TargetProtected);
        }
        if target.has_occupied_slot() {
            return Err(RuleError::BlockersPresent);
        }
        Ok(())
    }

    pub fn can_attack_player(&self, attacker: &Card, target: &Player, skip_cost: bool) -> bool {
        self.check_attack_player(attacker, target, skip_cost).is_ok()
    }

    // ---- 能力 ----

    fn can_pay_ability(card: &Card, ability: &AbilityDef) -> bool {
        if card.total_actions <= 0 {
            return false;
        }
        match ability.ability_type {
            AbilityType::Spell => card.mp() >= ability.mana_cost,
            AbilityType::Skill => card.hp() >= ability.mana_cost,
        }
    }

    pub fn check_cast_ability(&self, card: &Card, ability: &AbilityDef) -> Result<(), RuleError> {
        let check_actions = !ability.charge_player_action && !ability.free_action;
        if !card.can_do_activated_abilities(check_actions) {
            return Err(RuleError::CannotAct { uid: card.uid });
        }
        if ability.trigger != AbilityTrigger::Activate {
            return Err(RuleError::NotActivated {
                ability_id: ability.id.clone(),
            });
        }
        let player = self.player(card.player_id)?;
        if check_actions {
            if !Self::can_pay_ability(card, ability) {
                return Err(RuleError::CannotPayCost);
            }
        } else if ability.charge_player_action && !player.has_actions() {
            return Err(RuleError::NoPlayerAction);
        }
        if !ability.are_trigger_conditions_met(self.game, self.catalog, card, TargetRef::Card(card)) {
            return Err(RuleError::ConditionsNotMet);
        }
        if let Some(zone) = self.game.zone_of(card.uid) {
            if !ability.allowed_from_zone(zone) {
                return Err(RuleError::WrongZone);
            }
        }
        Ok(())
    }

    pub fn can_cast_ability(&self, card: &Card, ability: &AbilityDef) -> bool {
        self.check_cast_ability(card, ability).is_ok()
    }

    /// 选项菜单中的能力：由玩家法力支付，不检查卡牌动作。
    pub fn check_select_ability(&self, card: &Card, ability: &AbilityDef) -> Result<(), RuleError> {
        if !card.can_do_abilities() {
            return Err(RuleError::CannotAct { uid: card.uid });
        }
        let player = self.player(card.player_id)?;
        if (ability.exhaust && card.exhausted) || !player.can_pay_mana(ability.mana_cost) {
            return Err(RuleError::CannotPayCost);
        }
        if !ability.are_trigger_conditions_met(self.game, self.catalog, card, TargetRef::Card(card)) {
            return Err(RuleError::ConditionsNotMet);
        }
        if let Some(zone) = self.game.zone_of(card.uid) {
            if !ability.allowed_from_zone(zone) {
                return Err(RuleError::WrongZone);
            }
        }
        Ok(())
    }

    pub fn can_select_ability(&self, card: &Card, ability: &AbilityDef) -> bool {
        self.check_select_ability(card, ability).is_ok()
    }

    // ---- 目标 ----

    fn play_target_abilities<'b>(&'b self, caster: &'b Card) -> impl Iterator<Item = std::sync::Arc<AbilityDef>> + 'b {
        caster
            .ability_ids()
            .filter_map(move |id| self.catalog.ability(id))
            .filter(|ability| {
                ability.trigger == AbilityTrigger::OnPlay && ability.target == AbilityTarget::PlayTarget
            })
    }

    pub fn is_play_target_valid_card(&self, caster: &Card, target: &Card) -> bool {
        self.play_target_abilities(caster)
            .all(|ability| ability.can_target(self.game, self.catalog, caster, TargetRef::Card(target)))
    }

    pub fn is_play_target_valid_player(&self, caster: &Card, target: &Player) -> bool {
        self.play_target_abilities(caster)
            .all(|ability| ability.can_target(self.game, self.catalog, caster, TargetRef::Player(target)))
    }

    pub fn is_play_target_valid_slot(&self, caster: &Card, target: Slot) -> bool {
        self.play_target_abilities(caster)
            .all(|ability| ability.can_target(self.game, self.catalog, caster, TargetRef::Slot(target)))
    }

    /// 出牌位置可能指向玩家、场上卡牌或空格位。
    pub fn is_play_target_valid(&self, caster: &Card, slot: Slot) -> bool {
        if slot.is_player_slot() {
            return self
                .game
                .get_player(slot.p)
                .map(|player| self.is_play_target_valid_player(caster, player))
                .unwrap_or(false);
        }
        match self.game.board_card_at(slot) {
            Some(target) => self.is_play_target_valid_card(caster, target),
            None => slot.is_valid() && self.is_play_target_valid_slot(caster, slot),
        }
    }

    /// 卡牌选择器：目标必须存在且满足能力的目标条件。
    pub fn is_card_selection_valid(&self, caster: &Card, ability: &AbilityDef, target: &Card) -> bool {
        self.game.card(target.uid).is_some()
            && ability.are_target_conditions_met(self.game, self.catalog, caster, TargetRef::Card(target))
    }
}

impl Game {
    pub fn rules<'a>(&'a self, catalog: &'a Catalog) -> RuleEngine<'a> {
        RuleEngine::new(self, catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::testing::{catalog, place, put, started_game};

    #[test]
    fn dark_lord_blocks_ordinary_units() {
        let catalog = catalog();
        let mut game = started_game();
        place(&mut game, &catalog, "lord", 0, 1);
        let grunt = put(&mut game, &catalog, "grunt", 0, Zone::Hand);
        let vassal = put(&mut game, &catalog, "squire", 0, Zone::Hand);

        let rules = game.rules(&catalog);
        let grunt = game.card(grunt).expect("grunt in hand");
        assert_eq!(
            rules.check_play_card(grunt, Some(Slot::board(2, 0)), false),
            Err(RuleError::LeaderConflict)
        );
        let vassal = game.card(vassal).expect("vassal in hand");
        assert!(rules.can_play_card(vassal, Some(Slot::board(2, 0)), false));
    }

    #[test]
    fn vassal_requires_a_lord() {
        let catalog = catalog();
        let mut game = started_game();
        let vassal = put(&mut game, &catalog, "squire", 0, Zone::Hand);
        let rules = game.rules(&catalog);
        let vassal = game.card(vassal).expect("vassal in hand");
        assert_eq!(
            rules.check_play_card(vassal, Some(Slot::board(1, 0)), false),
            Err(RuleError::LeaderConflict)
        );
    }

    #[test]
    fn board_cards_need_an_empty_slot_on_own_side() {
        let catalog = catalog();
        let mut game = started_game();
        place(&mut game, &catalog, "grunt", 0, 3);
        let grunt = put(&mut game, &catalog, "grunt", 0, Zone::Hand);
        let rules = game.rules(&catalog);
        let grunt = game.card(grunt).expect("grunt in hand");

        assert!(!rules.can_play_card(grunt, Some(Slot::board(3, 0)), false), "occupied");
        assert!(!rules.can_play_card(grunt, Some(Slot::board(2, 1)), false), "enemy side");
        assert!(!rules.can_play_card(grunt, Some(Slot::board(9, 0)), false), "off board");
        assert!(rules.can_play_card(grunt, Some(Slot::board(2, 0)), false));
    }

    #[test]
    fn insufficient_mana_is_reported() {
        let catalog = catalog();
        let mut game = started_game();
        let ogre = put(&mut game, &catalog, "ogre", 0, Zone::Hand);
        let rules = game.rules(&catalog);
        let ogre = game.card(ogre).expect("ogre in hand");
        assert!(matches!(
            rules.check_play_card(ogre, Some(Slot::board(1, 0)), false),
            Err(RuleError::InsufficientMana { required: 5, .. })
        ));
        assert!(rules.can_play_card(ogre, Some(Slot::board(1, 0)), true), "skip cost ignores mana");
    }

    #[test]
    fn stealth_and_protection_block_attacks() {
        let catalog = catalog();
        let mut game = started_game();
        let attacker = place(&mut game, &catalog, "grunt", 0, 1);
        let target = place(&mut game, &catalog, "grunt", 1, 1);
        game.card_mut(attacker).expect("attacker").refresh();

        game.card_mut(target).expect("target").add_status(StatusType::Stealth, 0, 0);
        {
            let rules = game.rules(&catalog);
            let a = game.card(attacker).expect("attacker");
            let t = game.card(target).expect("target");
            assert_eq!(rules.check_attack_card(a, t, false), Err(RuleError::TargetStealthed));
        }

        let t = game.card_mut(target).expect("target");
        t.remove_status(StatusType::Stealth);
        t.add_ongoing_status(StatusType::Protected, 0);
        {
            let rules = game.rules(&catalog);
            let a = game.card(attacker).expect("attacker");
            let t = game.card(target).expect("target");
            assert_eq!(rules.check_attack_card(a, t, false), Err(RuleError::TargetProtected));
        }

        game.card_mut(attacker).expect("attacker").add_status(StatusType::Flying, 0, 0);
        let rules = game.rules(&catalog);
        let a = game.card(attacker).expect("attacker");
        let t = game.card(target).expect("target");
        assert!(rules.can_attack_card(a, t, false), "flying ignores protection");
    }

    #[test]
    fn paralyzed_units_cannot_attack() {
        let catalog = catalog();
        let mut game = started_game();
        let attacker = place(&mut game, &catalog, "grunt", 0, 1);
        let target = place(&mut game, &catalog, "grunt", 1, 1);
        let a = game.card_mut(attacker).expect("attacker");
        a.refresh();
        a.add_status(StatusType::Paralyzed, 0, 1);

        let rules = game.rules(&catalog);
        let a = game.card(attacker).expect("attacker");
        let t = game.card(target).expect("target");
        assert_eq!(
            rules.check_attack_card(a, t, false),
            Err(RuleError::CannotAttack { uid: attacker })
        );
    }

    #[test]
    fn players_can_only_be_attacked_over_an_empty_board() {
        let catalog = catalog();
        let mut game = started_game();
        let attacker = place(&mut game, &catalog, "grunt", 0, 1);
        game.card_mut(attacker).expect("attacker").refresh();
        {
            let rules = game.rules(&catalog);
            let a = game.card(attacker).expect("attacker");
            let p = game.get_player(1).expect("player 1");
            assert!(rules.can_attack_player(a, p, false));
        }

        place(&mut game, &catalog, "grunt", 1, 4);
        let rules = game.rules(&catalog);
        let a = game.card(attacker).expect("attacker");
        let p = game.get_player(1).expect("player 1");
        assert_eq!(rules.check_attack_player(a, p, false), Err(RuleError::BlockersPresent));
    }

    #[test]
    fn moving_is_never_allowed() {
        let catalog = catalog();
        let mut game = started_game();
        let grunt = place(&mut game, &catalog, "grunt", 0, 1);
        let rules = game.rules(&catalog);
        let grunt = game.card(grunt).expect("grunt");
        assert!(!rules.can_move_card(grunt, Slot::board(2, 0)));
    }
}
