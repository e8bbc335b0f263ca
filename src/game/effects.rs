//! 能力效果词表。
//!
//! 每个效果按目标种类各有一个入口；不适用于该目标种类的效果静默忽略。
//! 持续（Ongoing）能力走 `apply_ongoing_*`，只写入每次重算都会清空的 ongoing 字段。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::ability::AbilityDef;
use super::catalog::Element;
use super::engine::GameLogic;
use super::queue::AttackTarget;
use super::state::{Card, CardStat, CardUid, Player, PlayerId, Slot};
use super::status::StatusType;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum AbilityEffect {
    /// 缺省元素时使用施放者的主元素。
    Damage {
        amount: i32,
        #[serde(default)]
        element: Option<Element>,
        #[serde(default)]
        element2: Option<Element>,
    },
    Heal {
        amount: i32,
    },
    AddStat {
        stat: CardStat,
        amount: i32,
    },
    SetStat {
        stat: CardStat,
        value: i32,
    },
    AddStatus {
        status: StatusType,
        #[serde(default)]
        value: i32,
        #[serde(default)]
        duration: i32,
    },
    RemoveStatus {
        status: StatusType,
    },
    AddTrait {
        trait_id: String,
        #[serde(default)]
        value: i32,
    },
    AddAbility {
        ability_id: String,
    },
    Draw {
        #[serde(default = "one")]
        count: u32,
    },
    Mill {
        #[serde(default = "one")]
        count: u32,
    },
    GainMana {
        amount: i32,
    },
    Destroy,
    SendToDiscard,
    ReturnToHand,
    SendToDeck,
    Summon {
        #[serde(default)]
        card_id: Option<String>,
    },
    SummonCopy,
    Transform {
        card_id: String,
    },
    ChangeOwner,
    Roll {
        min: i32,
        max: i32,
    },
    RedirectAttack,
    GrantAction,
    ShuffleDeck,
}

fn one() -> u32 {
    1
}

/// 正在结算的能力及其施放者、触发者。
#[derive(Debug, Clone)]
pub struct EffectContext {
    pub ability: Arc<AbilityDef>,
    pub caster: CardUid,
    pub triggerer: Option<CardUid>,
}

impl AbilityEffect {
    pub fn referenced_card(&self) -> Option<&str> {
        match self {
            AbilityEffect::Summon { card_id: Some(id) } => Some(id),
            AbilityEffect::Transform { card_id } => Some(card_id),
            _ => None,
        }
    }

    pub fn referenced_ability(&self) -> Option<&str> {
        match self {
            AbilityEffect::AddAbility { ability_id } => Some(ability_id),
            _ => None,
        }
    }

    fn caster_owner(logic: &GameLogic, ctx: &EffectContext) -> Option<PlayerId> {
        logic.game().card(ctx.caster).map(|caster| caster.player_id)
    }

    fn damage_elements(logic: &GameLogic, ctx: &EffectContext, element: Option<Element>, element2: Option<Element>) -> (Element, Element) {
        let primary = element.unwrap_or_else(|| {
            logic
                .game()
                .card(ctx.caster)
                .and_then(|caster| caster.def(logic.catalog()))
                .map(|def| def.primary_element)
                .unwrap_or_default()
        });
        (primary, element2.unwrap_or_default())
    }

    pub(crate) fn apply_card(&self, logic: &mut GameLogic, ctx: &EffectContext, target: CardUid) {
        match self {
            AbilityEffect::Damage {
                amount,
                element,
                element2,
            } => {
                let (first, second) = Self::damage_elements(logic, ctx, *element, *element2);
                logic.damage_card_by(ctx.caster, target, *amount, first, second);
            }
            AbilityEffect::Heal { amount } => logic.heal_card(target, *amount),
            AbilityEffect::AddStat { stat, amount } => {
                if let Some(card) = logic.game_mut().card_mut(target) {
                    *card.base.get_mut(*stat) += amount;
                }
            }
            AbilityEffect::SetStat { stat, value } => {
                if let Some(card) = logic.game_mut().card_mut(target) {
                    *card.base.get_mut(*stat) = *value;
                }
            }
            AbilityEffect::AddStatus {
                status,
                value,
                duration,
            } => {
                if let Some(card) = logic.game_mut().card_mut(target) {
                    card.add_status(*status, *value, *duration);
                    if *status == StatusType::Submerged {
                        card.status_counters.insert(StatusType::Submerged, 0);
                    }
                }
            }
            AbilityEffect::RemoveStatus { status } => {
                if let Some(card) = logic.game_mut().card_mut(target) {
                    card.remove_status(*status);
                }
            }
            AbilityEffect::AddTrait { trait_id, value } => {
                if let Some(card) = logic.game_mut().card_mut(target) {
                    card.add_trait(trait_id, *value);
                }
            }
            AbilityEffect::AddAbility { ability_id } => {
                if let Some(card) = logic.game_mut().card_mut(target) {
                    card.add_ability(ability_id);
                }
            }
            AbilityEffect::Draw { count } => {
                if let Some(owner) = logic.game().card(target).map(|card| card.player_id) {
                    logic.draw_card(owner, *count);
                }
            }
            AbilityEffect::Destroy => {
                if logic.game().is_in_play(target) {
                    logic.kill_card(ctx.caster, target);
                } else {
                    logic.discard_card(target);
                }
            }
            AbilityEffect::SendToDiscard => logic.discard_card(target),
            AbilityEffect::ReturnToHand => logic.send_to_hand(target),
            AbilityEffect::SendToDeck => logic.send_to_deck(target),
            AbilityEffect::SummonCopy => {
                if let Some(owner) = Self::caster_owner(logic, ctx) {
                    logic.summon_copy_hand(owner, target);
                }
            }
            AbilityEffect::Transform { card_id } => {
                if let Some(def) = logic.catalog().card(card_id) {
                    logic.transform_card(target, &def);
                }
            }
            AbilityEffect::ChangeOwner => {
                if let Some(owner) = Self::caster_owner(logic, ctx) {
                    logic.change_owner(target, owner);
                }
            }
            AbilityEffect::RedirectAttack => {
                if let Some(attacker) = ctx.triggerer {
                    logic.redirect_attack(attacker, AttackTarget::Card { uid: target });
                }
            }
            AbilityEffect::GrantAction => {
                if let Some(card) = logic.game_mut().card_mut(target) {
                    card.grant_bonus_action();
                }
            }
            AbilityEffect::Roll { min, max } => {
                logic.roll_random_value(*min, *max);
            }
            AbilityEffect::Summon { .. }
            | AbilityEffect::Mill { .. }
            | AbilityEffect::GainMana { .. }
            | AbilityEffect::ShuffleDeck => {}
        }
    }

    pub(crate) fn apply_player(&self, logic: &mut GameLogic, ctx: &EffectContext, target: PlayerId) {
        match self {
            AbilityEffect::Damage { amount, .. } => logic.damage_player_by(ctx.caster, target, *amount),
            AbilityEffect::Heal { amount } => logic.heal_player(target, *amount),
            AbilityEffect::AddStat { stat, amount } => {
                if let Some(player) = logic.game_mut().get_player_mut(target) {
                    match stat {
                        CardStat::Hp => player.hp = (player.hp + amount).clamp(0, player.hp_max),
                        CardStat::Mana => player.mana = (player.mana + amount).max(0),
                        _ => {}
                    }
                }
            }
            AbilityEffect::SetStat { stat, value } => {
                if let Some(player) = logic.game_mut().get_player_mut(target) {
                    match stat {
                        CardStat::Hp => player.hp = (*value).clamp(0, player.hp_max),
                        CardStat::Mana => player.mana = (*value).max(0),
                        _ => {}
                    }
                }
            }
            AbilityEffect::AddStatus {
                status,
                value,
                duration,
            } => {
                if let Some(player) = logic.game_mut().get_player_mut(target) {
                    player.add_status(*status, *value, *duration);
                }
            }
            AbilityEffect::RemoveStatus { status } => {
                if let Some(player) = logic.game_mut().get_player_mut(target) {
                    player.remove_status(*status);
                }
            }
            AbilityEffect::Draw { count } => logic.draw_card(target, *count),
            AbilityEffect::Mill { count } => logic.draw_discard_card(target, *count),
            AbilityEffect::GainMana { amount } => {
                let cap = logic.settings().mana_max;
                if let Some(player) = logic.game_mut().get_player_mut(target) {
                    player.mana = (player.mana + amount).clamp(0, cap.max(player.mana_max));
                }
            }
            AbilityEffect::Summon { card_id } => {
                if let Some(def) = card_id.as_deref().and_then(|id| logic.catalog().card(id)) {
                    logic.summon_card_hand(target, &def);
                }
            }
            AbilityEffect::RedirectAttack => {
                if let Some(attacker) = ctx.triggerer {
                    logic.redirect_attack(attacker, AttackTarget::Player { player_id: target });
                }
            }
            AbilityEffect::GrantAction => {
                if let Some(player) = logic.game_mut().get_player_mut(target) {
                    player.bonus_action = true;
                }
            }
            AbilityEffect::ShuffleDeck => logic.shuffle_deck(target),
            AbilityEffect::Roll { min, max } => {
                logic.roll_random_value(*min, *max);
            }
            _ => {}
        }
    }

    pub(crate) fn apply_slot(&self, logic: &mut GameLogic, ctx: &EffectContext, target: Slot) {
        let Some(owner) = Self::caster_owner(logic, ctx) else {
            return;
        };
        match self {
            AbilityEffect::Summon { card_id: Some(card_id) } => {
                if let Some(def) = logic.catalog().card(card_id) {
                    logic.summon_card(owner, &def, target);
                }
            }
            AbilityEffect::SummonCopy => {
                logic.summon_copy(owner, ctx.caster, target);
            }
            AbilityEffect::Roll { min, max } => {
                logic.roll_random_value(*min, *max);
            }
            _ => {}
        }
    }

    pub(crate) fn apply_card_data(&self, logic: &mut GameLogic, ctx: &EffectContext, target: &str) {
        if let AbilityEffect::Summon { .. } = self {
            let owner = Self::caster_owner(logic, ctx);
            let def = logic.catalog().card(target);
            if let (Some(owner), Some(def)) = (owner, def) {
                logic.summon_card_hand(owner, &def);
            }
        }
    }

    pub(crate) fn apply_none(&self, logic: &mut GameLogic, ctx: &EffectContext) {
        match self {
            AbilityEffect::Roll { min, max } => {
                logic.roll_random_value(*min, *max);
            }
            AbilityEffect::Summon { card_id: Some(card_id) } => {
                let owner = Self::caster_owner(logic, ctx);
                let def = logic.catalog().card(card_id);
                if let (Some(owner), Some(def)) = (owner, def) {
                    logic.summon_card_hand(owner, &def);
                }
            }
            AbilityEffect::Draw { count } => {
                if let Some(owner) = Self::caster_owner(logic, ctx) {
                    logic.draw_card(owner, *count);
                }
            }
            AbilityEffect::GainMana { .. } | AbilityEffect::ShuffleDeck | AbilityEffect::Mill { .. } => {
                if let Some(owner) = Self::caster_owner(logic, ctx) {
                    self.apply_player(logic, ctx, owner);
                }
            }
            _ => {}
        }
    }

    pub(crate) fn apply_ongoing_card(&self, card: &mut Card) {
        match self {
            AbilityEffect::AddStatus { status, value, .. } => card.add_ongoing_status(*status, *value),
            AbilityEffect::AddStat { stat, amount } => *card.ongoing.get_mut(*stat) += amount,
            AbilityEffect::AddTrait { trait_id, value } => card.add_ongoing_trait(trait_id, *value),
            AbilityEffect::AddAbility { ability_id } => card.add_ongoing_ability(ability_id),
            _ => {}
        }
    }

    pub(crate) fn apply_ongoing_player(&self, player: &mut Player) {
        if let AbilityEffect::AddStatus { status, value, .. } = self {
            player.add_ongoing_status(*status, *value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::catalog::{CardDef, CardType};

    #[test]
    fn effects_parse_with_defaults() {
        let effects: Vec<AbilityEffect> = serde_json::from_str(
            r#"[
                { "type": "Damage", "amount": 3 },
                { "type": "Draw" },
                { "type": "AddStatus", "status": "Wet", "duration": 2 },
                { "type": "Summon", "card_id": "imp" }
            ]"#,
        )
        .expect("effects should parse");
        assert_eq!(
            effects[0],
            AbilityEffect::Damage {
                amount: 3,
                element: None,
                element2: None
            }
        );
        assert_eq!(effects[1], AbilityEffect::Draw { count: 1 });
        assert_eq!(effects[3].referenced_card(), Some("imp"));
    }

    #[test]
    fn ongoing_effects_only_touch_ongoing_fields() {
        let def = Arc::new(CardDef::new("grunt", CardType::Character).with_stats(2, 3));
        let mut card = Card::create(&def, "", 0, 1);
        AbilityEffect::AddStat {
            stat: CardStat::Attack,
            amount: 2,
        }
        .apply_ongoing_card(&mut card);
        AbilityEffect::AddStatus {
            status: StatusType::Flying,
            value: 0,
            duration: 3,
        }
        .apply_ongoing_card(&mut card);

        assert_eq!(card.base.attack, 2);
        assert_eq!(card.attack(), 4);
        assert!(card.status.is_empty(), "persistent statuses stay untouched");
        card.clear_ongoing();
        assert_eq!(card.attack(), 2);
        assert!(!card.has_status(StatusType::Flying));
    }
}
