//! 能力定义：触发时机、目标模式与条件。

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::catalog::{CardDef, CardSubType, CardType, Catalog, Element};
use super::effects::AbilityEffect;
use super::state::{Card, CardStat, Game, Player, PlayerId, Slot, Zone};
use super::status::StatusType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AbilityTrigger {
    None,
    Ongoing,
    Activate,
    OnPlay,
    OnPlayOther,
    OnBeforePlaySelf,
    OnBeforePlayOther,
    StartOfTurn,
    EndOfTurn,
    OnBeforeAttack,
    OnAfterAttack,
    OnBeforeDefend,
    OnAfterDefend,
    OnKill,
    OnDeath,
    OnDeathOther,
    OnRemovedFromPlay,
    OnOpponentDraw,
    OnPlayerDraw,
}

impl Default for AbilityTrigger {
    fn default() -> Self {
        AbilityTrigger::None
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AbilityTarget {
    None,
    #[serde(rename = "Self")]
    CharacterSelf,
    PlayerSelf,
    PlayerOpponent,
    AllPlayers,
    AllCardsBoard,
    AllCardsHand,
    AllCardsAllPiles,
    AllSlots,
    AllCardData,
    PlayTarget,
    AbilityTriggerer,
    EquippedCard,
    SelectTarget,
    CardSelector,
    ChoiceSelector,
    LastPlayed,
    LastTargeted,
    LastDestroyed,
    LastSummoned,
}

impl Default for AbilityTarget {
    fn default() -> Self {
        AbilityTarget::None
    }
}

/// 法术消耗卡牌的 MP，技能以自身生命值支付。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AbilityType {
    Spell,
    Skill,
}

impl Default for AbilityType {
    fn default() -> Self {
        AbilityType::Spell
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
}

impl CompareOp {
    pub fn compare(self, left: i32, right: i32) -> bool {
        match self {
            CompareOp::Equal => left == right,
            CompareOp::NotEqual => left != right,
            CompareOp::Greater => left > right,
            CompareOp::GreaterEqual => left >= right,
            CompareOp::Less => left < right,
            CompareOp::LessEqual => left <= right,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OwnerRelation {
    Ally,
    Enemy,
    Any,
}

impl OwnerRelation {
    fn matches(self, owner: PlayerId, caster_owner: PlayerId) -> bool {
        match self {
            OwnerRelation::Ally => owner == caster_owner,
            OwnerRelation::Enemy => owner != caster_owner,
            OwnerRelation::Any => true,
        }
    }
}

/// 条件判定的对象。
#[derive(Debug, Clone, Copy)]
pub enum TargetRef<'a> {
    Card(&'a Card),
    Player(&'a Player),
    Slot(Slot),
    CardData(&'a CardDef),
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Condition {
    CardType {
        card_type: CardType,
    },
    SubType {
        subtype: CardSubType,
    },
    Element {
        element: Element,
    },
    HasStatus {
        status: StatusType,
    },
    HasTrait {
        trait_id: String,
    },
    Stat {
        stat: CardStat,
        op: CompareOp,
        value: i32,
    },
    Owner {
        relation: OwnerRelation,
    },
    IsSelf,
    InZone {
        zone: Zone,
    },
    Exhausted,
    YourTurn,
    RolledValue {
        op: CompareOp,
        value: i32,
    },
    BoardCount {
        relation: OwnerRelation,
        op: CompareOp,
        value: i32,
    },
    Any {
        conditions: Vec<Condition>,
    },
    All {
        conditions: Vec<Condition>,
    },
    Not {
        condition: Box<Condition>,
    },
}

impl Condition {
    pub fn is_met(&self, game: &Game, catalog: &Catalog, caster: &Card, target: TargetRef<'_>) -> bool {
        match self {
            Condition::CardType { card_type } => match target {
                TargetRef::Card(card) => card
                    .def(catalog)
                    .map(|def| def.card_type == *card_type)
                    .unwrap_or(false),
                TargetRef::CardData(def) => def.card_type == *card_type,
                _ => false,
            },
            Condition::SubType { subtype } => match target {
                TargetRef::Card(card) => card
                    .def(catalog)
                    .map(|def| def.subtype == *subtype)
                    .unwrap_or(false),
                TargetRef::CardData(def) => def.subtype == *subtype,
                _ => false,
            },
            Condition::Element { element } => match target {
                TargetRef::Card(card) => card
                    .def(catalog)
                    .map(|def| def.primary_element == *element)
                    .unwrap_or(false),
                TargetRef::CardData(def) => def.primary_element == *element,
                _ => false,
            },
            Condition::HasStatus { status } => match target {
                TargetRef::Card(card) => card.has_status(*status),
                TargetRef::Player(player) => player.has_status(*status),
                _ => false,
            },
            Condition::HasTrait { trait_id } => match target {
                TargetRef::Card(card) => card.has_trait(trait_id),
                TargetRef::CardData(def) => def.has_trait(trait_id),
                _ => false,
            },
            Condition::Stat { stat, op, value } => match target {
                TargetRef::Card(card) => op.compare(card.stat(*stat), *value),
                TargetRef::CardData(def) => op.compare(stat.of_definition(def), *value),
                TargetRef::Player(player) => match stat {
                    CardStat::Hp => op.compare(player.hp, *value),
                    CardStat::Mana => op.compare(player.mana, *value),
                    _ => false,
                },
                _ => false,
            },
            Condition::Owner { relation } => match target {
                TargetRef::Card(card) => relation.matches(card.player_id, caster.player_id),
                TargetRef::Player(player) => relation.matches(player.player_id, caster.player_id),
                TargetRef::Slot(slot) => relation.matches(slot.p, caster.player_id),
                _ => false,
            },
            Condition::IsSelf => match target {
                TargetRef::Card(card) => card.uid == caster.uid,
                _ => false,
            },
            Condition::InZone { zone } => match target {
                TargetRef::Card(card) => game.zone_of(card.uid) == Some(*zone),
                _ => false,
            },
            Condition::Exhausted => match target {
                TargetRef::Card(card) => card.exhausted,
                _ => false,
            },
            Condition::YourTurn => game.current_player == caster.player_id,
            Condition::RolledValue { op, value } => op.compare(game.rolled_value, *value),
            Condition::BoardCount { relation, op, value } => {
                let count: usize = game
                    .players
                    .iter()
                    .filter(|player| relation.matches(player.player_id, caster.player_id))
                    .map(|player| player.cards_board.len())
                    .sum();
                op.compare(count as i32, *value)
            }
            Condition::Any { conditions } => conditions
                .iter()
                .any(|condition| condition.is_met(game, catalog, caster, target)),
            Condition::All { conditions } => conditions
                .iter()
                .all(|condition| condition.is_met(game, catalog, caster, target)),
            Condition::Not { condition } => !condition.is_met(game, catalog, caster, target),
        }
    }
}

/// 对候选目标的二次筛选。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum TargetFilter {
    Random { count: usize },
    First { count: usize },
}

impl TargetFilter {
    pub fn apply<T, R: Rng>(&self, mut items: Vec<T>, rng: &mut R) -> Vec<T> {
        match self {
            TargetFilter::First { count } => {
                items.truncate(*count);
                items
            }
            TargetFilter::Random { count } => {
                let mut picked = Vec::with_capacity((*count).min(items.len()));
                while picked.len() < *count && !items.is_empty() {
                    let index = rng.gen_range(0..items.len());
                    picked.push(items.swap_remove(index));
                }
                picked
            }
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AbilityDef {
    pub id: String,
    #[serde(default)]
    pub trigger: AbilityTrigger,
    #[serde(default)]
    pub target: AbilityTarget,
    #[serde(default)]
    pub ability_type: AbilityType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions_trigger: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions_target: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_target: Option<TargetFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<AbilityEffect>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain_abilities: Vec<String>,
    #[serde(default)]
    pub mana_cost: i32,
    #[serde(default)]
    pub exhaust: bool,
    #[serde(default)]
    pub charge_player_action: bool,
    #[serde(default)]
    pub half_action: bool,
    #[serde(default)]
    pub free_action: bool,
    #[serde(default = "default_true")]
    pub from_board: bool,
    #[serde(default)]
    pub from_discard: bool,
    #[serde(default)]
    pub from_extra_deck: bool,
}

impl AbilityDef {
    pub fn new(id: impl Into<String>, trigger: AbilityTrigger, target: AbilityTarget) -> Self {
        Self {
            id: id.into(),
            trigger,
            target,
            ability_type: AbilityType::default(),
            conditions_trigger: Vec::new(),
            conditions_target: Vec::new(),
            filter_target: None,
            effects: Vec::new(),
            chain_abilities: Vec::new(),
            mana_cost: 0,
            exhaust: false,
            charge_player_action: false,
            half_action: false,
            free_action: false,
            from_board: true,
            from_discard: false,
            from_extra_deck: false,
        }
    }

    pub fn with_effect(mut self, effect: AbilityEffect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_trigger_condition(mut self, condition: Condition) -> Self {
        self.conditions_trigger.push(condition);
        self
    }

    pub fn with_target_condition(mut self, condition: Condition) -> Self {
        self.conditions_target.push(condition);
        self
    }

    pub fn with_chain(mut self, ability_id: impl Into<String>) -> Self {
        self.chain_abilities.push(ability_id.into());
        self
    }

    pub fn with_cost(mut self, ability_type: AbilityType, mana_cost: i32) -> Self {
        self.ability_type = ability_type;
        self.mana_cost = mana_cost;
        self
    }

    pub fn with_filter(mut self, filter: TargetFilter) -> Self {
        self.filter_target = Some(filter);
        self
    }

    pub fn is_selector(&self) -> bool {
        matches!(
            self.target,
            AbilityTarget::SelectTarget | AbilityTarget::CardSelector | AbilityTarget::ChoiceSelector
        )
    }

    pub fn are_trigger_conditions_met(
        &self,
        game: &Game,
        catalog: &Catalog,
        caster: &Card,
        triggerer: TargetRef<'_>,
    ) -> bool {
        self.conditions_trigger
            .iter()
            .all(|condition| condition.is_met(game, catalog, caster, triggerer))
    }

    pub fn are_target_conditions_met(
        &self,
        game: &Game,
        catalog: &Catalog,
        caster: &Card,
        target: TargetRef<'_>,
    ) -> bool {
        self.conditions_target
            .iter()
            .all(|condition| condition.is_met(game, catalog, caster, target))
    }

    /// 潜行与法术免疫的卡牌无法被能力选为目标。
    pub fn can_target(&self, game: &Game, catalog: &Catalog, caster: &Card, target: TargetRef<'_>) -> bool {
        if let TargetRef::Card(card) = target {
            if card.has_status(StatusType::Stealth) || card.has_status(StatusType::SpellImmunity) {
                return false;
            }
        }
        self.are_target_conditions_met(game, catalog, caster, target)
    }

    pub fn allowed_from_zone(&self, zone: Zone) -> bool {
        match zone {
            Zone::Board | Zone::Equip | Zone::Hero => self.from_board,
            Zone::Discard => self.from_discard,
            Zone::Extra => self.from_extra_deck,
            _ => true,
        }
    }

    pub fn has_effects(&self) -> bool {
        !self.effects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn random_filter_picks_distinct_items() {
        let mut rng = SmallRng::seed_from_u64(7);
        let picked = TargetFilter::Random { count: 2 }.apply(vec![1, 2, 3, 4], &mut rng);
        assert_eq!(picked.len(), 2);
        assert_ne!(picked[0], picked[1], "random picks must not repeat");

        let all = TargetFilter::Random { count: 9 }.apply(vec![1, 2], &mut rng);
        assert_eq!(all.len(), 2, "cannot pick more items than available");
    }

    #[test]
    fn first_filter_keeps_positional_order() {
        let mut rng = SmallRng::seed_from_u64(1);
        let picked = TargetFilter::First { count: 2 }.apply(vec!['a', 'b', 'c'], &mut rng);
        assert_eq!(picked, vec!['a', 'b']);
    }

    #[test]
    fn ability_definition_defaults_from_json() {
        let ability: AbilityDef = serde_json::from_str(
            r#"{ "id": "burn", "trigger": "Activate", "target": "SelectTarget" }"#,
        )
        .expect("ability should parse");
        assert!(ability.from_board);
        assert!(!ability.from_discard);
        assert!(ability.is_selector());
        assert_eq!(ability.ability_type, AbilityType::Spell);
    }
}
