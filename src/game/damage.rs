//! 伤害结算管线：命中判定、元素亲和、异常状态修正、防御、护盾、溢出伤害与吸血。

use tracing::trace;

use super::ability::AbilityTrigger;
use super::catalog::{Element, ElementalAffinity};
use super::engine::GameLogic;
use super::events::GameEvent;
use super::state::{Card, CardUid, PlayerId};
use super::status::StatusType;

/// 暴击与弱点命中的加成。
const CRITICAL_BONUS: i32 = 3;
const WEAK_BONUS: i32 = 3;
const RESIST_PENALTY: i32 = 2;
const DROWNING_THRESHOLD: i32 = 6;

struct AilmentAdjustment {
    ailment: StatusType,
    resistances: &'static [(Element, u8)],
    weaknesses: &'static [(Element, u8)],
    /// 只有弱点元素能造成伤害。
    void_except_weak: bool,
}

/// 按声明顺序逐项应用，伤害降为 0 时停止。
const AILMENT_TABLE: [AilmentAdjustment; 8] = [
    AilmentAdjustment {
        ailment: StatusType::Paralyzed,
        resistances: &[],
        weaknesses: &[(Element::Kinetic, 1), (Element::Ballistic, 1)],
        void_except_weak: false,
    },
    AilmentAdjustment {
        ailment: StatusType::Asleep,
        resistances: &[],
        weaknesses: &[(Element::Umbral, 1)],
        void_except_weak: false,
    },
    AilmentAdjustment {
        ailment: StatusType::Poisoned,
        resistances: &[],
        weaknesses: &[(Element::Verdant, 1)],
        void_except_weak: false,
    },
    AilmentAdjustment {
        ailment: StatusType::Wet,
        resistances: &[(Element::Infernal, 1)],
        weaknesses: &[(Element::Volt, 1), (Element::Frost, 1)],
        void_except_weak: false,
    },
    AilmentAdjustment {
        ailment: StatusType::Submerged,
        resistances: &[(Element::Infernal, 2)],
        weaknesses: &[(Element::Volt, 2), (Element::Frost, 2)],
        void_except_weak: false,
    },
    AilmentAdjustment {
        ailment: StatusType::Encased,
        resistances: &[],
        weaknesses: &[(Element::Radiant, 2), (Element::Frost, 2)],
        void_except_weak: true,
    },
    AilmentAdjustment {
        ailment: StatusType::Entombed,
        resistances: &[],
        weaknesses: &[(Element::Umbral, 2), (Element::Terra, 2)],
        void_except_weak: true,
    },
    AilmentAdjustment {
        ailment: StatusType::Frozen,
        resistances: &[(Element::Infernal, 1)],
        weaknesses: &[(Element::Frost, 2), (Element::Aqua, 2)],
        void_except_weak: false,
    },
];

fn stage_of(list: &[(Element, u8)], element: Element) -> Option<u8> {
    list.iter().find(|(e, _)| *e == element).map(|(_, stage)| *stage)
}

impl AilmentAdjustment {
    fn adjust(&self, damage: i32, element: Element) -> i32 {
        let weakness = stage_of(self.weaknesses, element);
        if self.void_except_weak {
            return match weakness {
                Some(stage) => damage + stage as i32,
                None => 0,
            };
        }
        match (stage_of(self.resistances, element), weakness) {
            (Some(1), _) => (damage - 1).max(0),
            (Some(_), _) => 0,
            (None, Some(stage)) => damage + stage as i32,
            (None, None) => damage,
        }
    }
}

pub(crate) fn adjust_for_ailments(target: &Card, damage: i32, element: Element) -> i32 {
    let mut adjusted = damage;
    for row in AILMENT_TABLE.iter() {
        if target.has_status(row.ailment) {
            adjusted = row.adjust(adjusted, element);
            if adjusted == 0 {
                break;
            }
        }
    }
    adjusted
}

/// 回合开始时的被动状态演变；`tick` 为真时推进浸没计数。
pub(crate) fn adjust_passive_statuses(card: &mut Card, tick: bool) {
    let mut add = Vec::new();
    if card.has_status(StatusType::Bleeding) && card.hp() * 2 < card.hp_max() {
        add.push(StatusType::Unconscious);
    }
    if card.has_status(StatusType::Submerged) {
        if tick {
            let counter = card.status_counters.entry(StatusType::Submerged).or_insert(0);
            *counter += 1;
            if *counter >= DROWNING_THRESHOLD {
                add.push(StatusType::Drowning);
            }
        }
    } else {
        card.remove_status(StatusType::Drowning);
        card.status_counters.remove(&StatusType::Submerged);
    }
    for status in add {
        card.add_status(status, 0, 0);
    }
}

/// 攻击方在结算期间需要的只读信息。
struct Striker {
    uid: CardUid,
    player_id: PlayerId,
    is_board_card: bool,
    is_character: bool,
    agility: i32,
    pierce: bool,
    fury: bool,
    trample: bool,
    channel_life: bool,
    life_steal: bool,
    deathtouch: bool,
}

impl GameLogic {
    fn striker(&self, uid: CardUid) -> Option<Striker> {
        let card = self.game.card(uid)?;
        let def = card.def(&self.catalog);
        Some(Striker {
            uid,
            player_id: card.player_id,
            is_board_card: def.as_ref().map(|d| d.is_board_card()).unwrap_or(false),
            is_character: def.as_ref().map(|d| d.is_character()).unwrap_or(false),
            agility: card.agility(),
            pierce: card.has_status(StatusType::Pierce),
            fury: card.has_status(StatusType::Fury),
            trample: card.has_status(StatusType::Trample),
            channel_life: card.has_status(StatusType::ChannelLife),
            life_steal: card.has_status(StatusType::LifeSteal),
            deathtouch: card.has_status(StatusType::Deathtouch),
        })
    }

    pub(crate) fn grant_bonus_action(&mut self, uid: CardUid) {
        if let Some(card) = self.game.card_mut(uid) {
            card.grant_bonus_action();
        }
    }

    fn adjust_for_affinity(&mut self, striker: &Striker, target: CardUid, damage: i32, element: Element) -> Option<i32> {
        let affinity = self.game.card(target)?.affinities.get(element);
        let mut adjusted = damage;
        let mut effective = striker.fury;
        match affinity {
            ElementalAffinity::Weak => {
                adjusted += WEAK_BONUS;
                effective = true;
            }
            ElementalAffinity::Resist if !striker.pierce => adjusted -= RESIST_PENALTY,
            ElementalAffinity::Void if !striker.pierce => return None,
            _ => {}
        }

        if effective {
            if striker.is_board_card {
                self.grant_bonus_action(striker.uid);
            } else if let Some(owner) = self.game.get_player_mut(striker.player_id) {
                owner.bonus_action = true;
            }
        }
        Some(adjusted)
    }

    /// 以卡牌为来源的伤害。`element2` 为 `Element::None` 时只按主元素计算。
    pub fn damage_card_by(&mut self, attacker: CardUid, target: CardUid, amount: i32, element: Element, element2: Element) {
        if let Some(card) = self.game.card_mut(target) {
            card.last_hit_damage = 0;
        }
        let Some(striker) = self.striker(attacker) else {
            return;
        };
        let Some(defender) = self.game.card(target) else {
            return;
        };
        if defender.has_status(StatusType::Invincibility) {
            return;
        }
        if defender.has_status(StatusType::SpellImmunity) && !striker.is_character {
            return;
        }

        let initial = amount;
        let mut value = amount;

        if striker.is_board_card {
            let target_agility = defender.agility();
            if target_agility >= striker.agility * 2 {
                trace!(target: "engine", attacker, defender = target, "attack missed");
                return;
            }
            if striker.agility >= target_agility * 2 || defender.is_incapacitated() {
                value += CRITICAL_BONUS;
                self.grant_bonus_action(attacker);
            }
        }

        let Some(adjusted) = self.adjust_for_affinity(&striker, target, value, element) else {
            return self.finish_hit(&striker, target, 0, 0, element, element2);
        };
        value = adjusted;
        if element2 != Element::None {
            match self.adjust_for_affinity(&striker, target, value, element2) {
                Some(adjusted) => value = adjusted,
                None => return self.finish_hit(&striker, target, 0, 0, element, element2),
            }
        }

        // 双元素攻击只按副元素查异常状态表。
        let ailment_element = if element2 != Element::None { element2 } else { element };
        if let Some(defender) = self.game.card(target) {
            value = adjust_for_ailments(defender, value, ailment_element);
        }

        let bonus = (value - initial).max(0);
        self.finish_hit(&striker, target, value, bonus, element, element2);
    }

    fn finish_hit(&mut self, striker: &Striker, target: CardUid, value: i32, bonus: i32, element: Element, element2: Element) {
        let current_player = self.game.current_player;
        let Some(defender) = self.game.card_mut(target) else {
            return;
        };

        let value = (value - defender.defense()).max(0);
        if value > 0 && defender.has_status(StatusType::Shell) {
            defender.remove_status(StatusType::Shell);
            return;
        }

        let hp = defender.hp();
        let dealt = value.min(hp).max(0);
        let overflow = (value - hp).max(0);
        defender.damage += dealt;
        defender.last_hit_damage = dealt.min(defender.hp_max());
        let defender_owner = defender.player_id;
        let is_character = defender
            .def(&self.catalog)
            .map(|def| def.is_character())
            .unwrap_or(false);

        if striker.player_id == current_player && striker.trample {
            if let Some(owner) = self.game.get_player_mut(defender_owner) {
                owner.hp = (owner.hp - overflow - bonus).max(0);
            }
        }
        if striker.channel_life {
            self.heal_player(striker.player_id, dealt);
        }
        if striker.life_steal {
            self.heal_card(striker.uid, dealt);
        }

        if let Some(defender) = self.game.card_mut(target) {
            defender.remove_status(StatusType::Asleep);
        }
        self.apply_element_transitions(target, element);
        if element2 != Element::None {
            self.apply_element_transitions(target, element2);
        }
        self.emit(GameEvent::CardDamaged {
            uid: target,
            amount: dealt,
        });

        if value > 0 && striker.deathtouch && is_character {
            self.kill_card(striker.uid, target);
        }
        if self.game.card(target).map(|card| card.hp() <= 0).unwrap_or(false) {
            self.kill_card(striker.uid, target);
        }
    }

    fn apply_element_transitions(&mut self, target: CardUid, element: Element) {
        let Some(card) = self.game.card_mut(target) else {
            return;
        };
        if element == Element::Kinetic {
            card.remove_status(StatusType::Asleep);
        }
        if card.has_status(StatusType::Bleeding) && card.hp() * 2 < card.hp_max() {
            card.add_status(StatusType::Unconscious, 0, 0);
        }
        if matches!(element, Element::Radiant | Element::Frost) {
            card.remove_status(StatusType::Encased);
        }
        if matches!(element, Element::Umbral | Element::Terra) {
            card.remove_status(StatusType::Entombed);
        }
        if element == Element::Infernal && card.has_status(StatusType::Frozen) {
            card.remove_status(StatusType::Frozen);
            card.add_status(StatusType::Wet, 0, 0);
        }
        if element == Element::Terra && card.has_status(StatusType::Submerged) {
            let owner = card.player_id;
            if let Some(player) = self.game.get_player_mut(owner) {
                for ally in player.cards_board.iter_mut().filter(|ally| ally.uid != target) {
                    ally.add_status(StatusType::Wet, 0, 0);
                }
            }
        }
    }

    /// 不来自其他卡牌的伤害（持续伤害等），跳过命中与元素修正。
    pub fn damage_card(&mut self, target: CardUid, amount: i32) {
        let Some(card) = self.game.card_mut(target) else {
            return;
        };
        if card.has_status(StatusType::Invincibility) || card.has_status(StatusType::SpellImmunity) {
            return;
        }
        let amount = amount.max(0);
        card.damage += amount;
        let dead = card.hp() <= 0;
        self.emit(GameEvent::CardDamaged { uid: target, amount });
        if dead {
            self.discard_card(target);
        }
    }

    pub fn damage_player(&mut self, player_id: PlayerId, amount: i32) {
        let Some(player) = self.game.get_player_mut(player_id) else {
            return;
        };
        player.hp = (player.hp - amount).clamp(0, player.hp_max);
        self.emit(GameEvent::PlayerDamaged { player_id, amount });
    }

    pub fn damage_player_by(&mut self, attacker: CardUid, player_id: PlayerId, amount: i32) {
        self.damage_player(player_id, amount);
        let Some(striker) = self.striker(attacker) else {
            return;
        };
        if striker.channel_life {
            self.heal_player(striker.player_id, amount);
        }
        if striker.life_steal {
            self.heal_card(attacker, amount);
        }
    }

    pub fn heal_card(&mut self, target: CardUid, amount: i32) {
        let Some(card) = self.game.card_mut(target) else {
            return;
        };
        if card.has_status(StatusType::Invincibility) {
            return;
        }
        card.damage = (card.damage - amount).max(0);
        self.emit(GameEvent::CardHealed { uid: target, amount });
    }

    pub fn heal_player(&mut self, player_id: PlayerId, amount: i32) {
        let Some(player) = self.game.get_player_mut(player_id) else {
            return;
        };
        player.hp = (player.hp + amount).clamp(0, player.hp_max);
        self.emit(GameEvent::PlayerHealed { player_id, amount });
    }

    pub fn kill_card(&mut self, attacker: CardUid, target: CardUid) {
        if !self.game.is_on_board(target) && !self.game.is_equipped(target) {
            return;
        }
        let Some(victim) = self.game.card(target) else {
            return;
        };
        if victim.has_status(StatusType::Invincibility) {
            return;
        }
        let victim_owner = victim.player_id;
        if let Some(killer_owner) = self.game.card(attacker).map(|card| card.player_id) {
            if killer_owner != victim_owner {
                if let Some(player) = self.game.get_player_mut(killer_owner) {
                    player.kill_count += 1;
                }
            }
        }

        self.emit(GameEvent::CardKilled {
            uid: target,
            killer: Some(attacker),
        });
        self.discard_card(target);
        self.trigger_card_ability_type(AbilityTrigger::OnKill, attacker, Some(target));
    }

    /// 离场触发在移入弃牌堆之后入队；实例重置推迟到下一次持续效果重算。
    pub fn discard_card(&mut self, uid: CardUid) {
        if self.game.is_in_discard(uid) {
            return;
        }
        let Some(owner) = self.game.owner_of(uid) else {
            return;
        };
        let was_in_play = self.game.is_on_board(uid) || self.game.is_equipped(uid);

        self.unequip_all(uid);
        let Some(player) = self.game.get_player_mut(owner) else {
            return;
        };
        let Some(card) = player.take_card(uid) else {
            return;
        };
        player.add_card(super::state::Zone::Discard, card);
        for bearer in player.cards_board.iter_mut().filter(|c| c.equipped_uid == Some(uid)) {
            bearer.equipped_uid = None;
        }
        self.game.last_destroyed = Some(uid);

        if was_in_play {
            self.trigger_card_ability_type(AbilityTrigger::OnDeath, uid, None);
            self.trigger_card_ability_type(AbilityTrigger::OnRemovedFromPlay, uid, None);
            self.trigger_other_cards_ability_type(AbilityTrigger::OnDeathOther, uid);
            self.trigger_secrets(AbilityTrigger::OnDeathOther, Some(uid));
        }

        self.cards_to_clear.push(uid);
        self.emit(GameEvent::CardDiscarded { uid });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::catalog::CardType;
    use crate::game::state::Zone;
    use crate::game::testing::{logic, place, put};
    use std::sync::Arc;

    fn card_with(status: StatusType) -> Card {
        let def = Arc::new(crate::game::catalog::CardDef::new("dummy", CardType::Character).with_stats(1, 10));
        let mut card = Card::create(&def, "", 0, 1);
        card.add_status(status, 0, 0);
        card
    }

    #[test]
    fn ailments_apply_in_table_order_and_stop_at_zero() {
        let frozen = card_with(StatusType::Frozen);
        assert_eq!(adjust_for_ailments(&frozen, 4, Element::Frost), 6, "frozen is weak to frost");
        assert_eq!(adjust_for_ailments(&frozen, 4, Element::Infernal), 3);

        let mut encased = card_with(StatusType::Encased);
        assert_eq!(adjust_for_ailments(&encased, 4, Element::Kinetic), 0, "encased voids non weak elements");
        encased.add_status(StatusType::Frozen, 0, 0);
        assert_eq!(
            adjust_for_ailments(&encased, 4, Element::Kinetic),
            0,
            "later rows are skipped once damage hits zero"
        );
        assert_eq!(adjust_for_ailments(&encased, 4, Element::Frost), 8);
    }

    #[test]
    fn dual_element_hits_check_ailments_with_the_secondary_element() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let attacker = place(logic.game_mut(), &catalog, "grunt", 0, 1);
        let target = place(logic.game_mut(), &catalog, "ogre", 1, 1);
        logic
            .game_mut()
            .card_mut(target)
            .expect("ogre")
            .add_status(StatusType::Frozen, 0, 0);

        logic.damage_card_by(attacker, target, 4, Element::Frost, Element::Kinetic);

        let ogre = logic.game().card(target).expect("ogre survives");
        assert_eq!(ogre.damage, 7, "4 + 3 critical, kinetic has no frozen modifier");
    }

    #[test]
    fn five_attack_kills_four_hp_and_counts_the_kill() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let attacker = place(logic.game_mut(), &catalog, "brute", 0, 1);
        let target = place(logic.game_mut(), &catalog, "squishy", 1, 1);

        logic.damage_card_by(attacker, target, 5, Element::Kinetic, Element::None);

        assert_eq!(logic.game().zone_of(target), Some(Zone::Discard));
        assert_eq!(logic.game().get_player(0).expect("player 0").kill_count, 1);
    }

    #[test]
    fn resist_reduces_damage_by_two_before_defense() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let attacker = place(logic.game_mut(), &catalog, "grunt", 0, 1);
        let target = place(logic.game_mut(), &catalog, "wall", 1, 1);

        logic.damage_card_by(attacker, target, 5, Element::Frost, Element::None);
        let wall = logic.game().card(target).expect("wall survives");
        assert_eq!(wall.damage, 2, "5 - 2 resist - 1 defense");
    }

    #[test]
    fn void_affinity_negates_damage_unless_piercing() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let attacker = place(logic.game_mut(), &catalog, "grunt", 0, 1);
        let target = place(logic.game_mut(), &catalog, "wall", 1, 1);

        for amount in [1, 5, 40] {
            logic.damage_card_by(attacker, target, amount, Element::Infernal, Element::None);
            assert_eq!(logic.game().card(target).expect("wall").damage, 0, "void absorbs {amount}");
        }

        logic
            .game_mut()
            .card_mut(attacker)
            .expect("attacker")
            .add_status(StatusType::Pierce, 0, 0);
        logic.damage_card_by(attacker, target, 3, Element::Infernal, Element::None);
        assert_eq!(logic.game().card(target).expect("wall").damage, 2, "pierce ignores void");
    }

    #[test]
    fn shell_blocks_exactly_one_hit() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let attacker = place(logic.game_mut(), &catalog, "grunt", 0, 1);
        let target = place(logic.game_mut(), &catalog, "ogre", 1, 1);
        logic
            .game_mut()
            .card_mut(target)
            .expect("ogre")
            .add_status(StatusType::Shell, 0, 0);

        logic.damage_card_by(attacker, target, 3, Element::Kinetic, Element::None);
        let ogre = logic.game().card(target).expect("ogre");
        assert_eq!(ogre.damage, 0);
        assert!(!ogre.has_status(StatusType::Shell), "shell is consumed");

        logic.damage_card_by(attacker, target, 3, Element::Kinetic, Element::None);
        assert_eq!(logic.game().card(target).expect("ogre").damage, 3);
    }

    #[test]
    fn healing_never_drops_damage_below_zero() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let target = place(logic.game_mut(), &catalog, "ogre", 1, 1);
        logic.damage_card(target, 2);
        logic.heal_card(target, 10);
        let ogre = logic.game().card(target).expect("ogre");
        assert_eq!(ogre.damage, 0);
        assert_eq!(ogre.hp(), ogre.hp_max());
    }

    #[test]
    fn infernal_thaws_frozen_into_wet() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let attacker = place(logic.game_mut(), &catalog, "grunt", 0, 1);
        let target = place(logic.game_mut(), &catalog, "ogre", 1, 1);
        logic
            .game_mut()
            .card_mut(target)
            .expect("ogre")
            .add_status(StatusType::Frozen, 0, 2);

        logic.damage_card_by(attacker, target, 2, Element::Infernal, Element::None);
        let ogre = logic.game().card(target).expect("ogre");
        assert!(!ogre.has_status(StatusType::Frozen));
        assert!(ogre.has_status(StatusType::Wet));
    }

    #[test]
    fn submerged_units_start_drowning_after_six_turns() {
        let def = Arc::new(crate::game::catalog::CardDef::new("fish", CardType::Character).with_stats(1, 10));
        let mut card = Card::create(&def, "", 0, 1);
        card.add_status(StatusType::Submerged, 0, 0);
        for _ in 0..5 {
            adjust_passive_statuses(&mut card, true);
        }
        assert!(!card.has_status(StatusType::Drowning));
        adjust_passive_statuses(&mut card, true);
        assert!(card.has_status(StatusType::Drowning));

        card.remove_status(StatusType::Submerged);
        adjust_passive_statuses(&mut card, true);
        assert!(!card.has_status(StatusType::Drowning), "drowning ends when no longer submerged");
    }

    #[test]
    fn discarding_from_hand_does_not_fire_death_triggers() {
        let mut logic = logic();
        let catalog = logic.catalog().clone();
        let uid = put(logic.game_mut(), &catalog, "grunt", 0, Zone::Hand);
        logic.discard_card(uid);
        assert_eq!(logic.game().zone_of(uid), Some(Zone::Discard));
        assert!(logic.queue().is_empty());
    }
}
