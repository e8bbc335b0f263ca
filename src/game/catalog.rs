//! 只读的定义目录：卡牌、能力、状态与特性。
//!
//! 目录在启动时构建一次，之后以 `Arc<Catalog>` 注入引擎，运行期间只读。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::ability::{AbilityDef, AbilityTarget, AbilityTrigger};
use super::status::{CardTrait, StatusType};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CardType {
    None,
    Hero,
    Character,
    Spell,
    Artifact,
    Secret,
    Equipment,
}

impl Default for CardType {
    fn default() -> Self {
        CardType::None
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CardMythos {
    Generic,
    Lusticia,
    Adonai,
    Nehmet,
    Reikon,
    Nordvind,
}

impl Default for CardMythos {
    fn default() -> Self {
        CardMythos::Generic
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CardSubType {
    Spell,
    Skill,
    Item,
    Miracle,
    Fusion,
    Entity,
    Summoner,
    None,
}

impl Default for CardSubType {
    fn default() -> Self {
        CardSubType::Entity
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Element {
    Kinetic,
    Ballistic,
    Arcane,
    Infernal,
    Frost,
    Terra,
    Verdant,
    Volt,
    Aqua,
    Gale,
    Holy,
    Umbral,
    Necrotic,
    Radiant,
    None,
}

impl Default for Element {
    fn default() -> Self {
        Element::None
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ElementalAffinity {
    Weak,
    Neutral,
    Resist,
    Void,
}

impl Default for ElementalAffinity {
    fn default() -> Self {
        ElementalAffinity::Neutral
    }
}

/// 每个元素一项亲和度；未列出的元素视为 `Neutral`。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Affinities(BTreeMap<Element, ElementalAffinity>);

impl Affinities {
    pub fn get(&self, element: Element) -> ElementalAffinity {
        self.0.get(&element).copied().unwrap_or_default()
    }

    pub fn set(&mut self, element: Element, affinity: ElementalAffinity) {
        if affinity == ElementalAffinity::Neutral {
            self.0.remove(&element);
        } else {
            self.0.insert(element, affinity);
        }
    }

    pub fn with(mut self, element: Element, affinity: ElementalAffinity) -> Self {
        self.set(element, affinity);
        self
    }
}

fn default_primary_element() -> Element {
    Element::Kinetic
}

fn default_deck_limit() -> u8 {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardDef {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub card_type: CardType,
    #[serde(default)]
    pub subtype: CardSubType,
    #[serde(default)]
    pub mythos: CardMythos,
    #[serde(default = "default_primary_element")]
    pub primary_element: Element,
    #[serde(default)]
    pub mana: i32,
    #[serde(default)]
    pub mp: i32,
    #[serde(default)]
    pub attack: i32,
    #[serde(default)]
    pub defense: i32,
    #[serde(default)]
    pub agility: i32,
    #[serde(default)]
    pub hp: i32,
    #[serde(default)]
    pub hp_cost: i32,
    #[serde(default)]
    pub level: i32,
    #[serde(default)]
    pub affinities: Affinities,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traits: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stats: Vec<CardTrait>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub abilities: Vec<String>,
    #[serde(default = "default_deck_limit")]
    pub deck_limit: u8,
}

impl CardDef {
    pub fn new(id: impl Into<String>, card_type: CardType) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            card_type,
            subtype: CardSubType::default(),
            mythos: CardMythos::Generic,
            primary_element: default_primary_element(),
            mana: 0,
            mp: 0,
            attack: 0,
            defense: 0,
            agility: 0,
            hp: 0,
            hp_cost: 0,
            level: 0,
            affinities: Affinities::default(),
            traits: Vec::new(),
            stats: Vec::new(),
            abilities: Vec::new(),
            deck_limit: default_deck_limit(),
        }
    }

    pub fn with_stats(mut self, attack: i32, hp: i32) -> Self {
        self.attack = attack;
        self.hp = hp;
        self
    }

    pub fn with_defense(mut self, defense: i32) -> Self {
        self.defense = defense;
        self
    }

    pub fn with_agility(mut self, agility: i32) -> Self {
        self.agility = agility;
        self
    }

    pub fn with_mana(mut self, mana: i32) -> Self {
        self.mana = mana;
        self
    }

    pub fn with_mp(mut self, mp: i32) -> Self {
        self.mp = mp;
        self
    }

    pub fn with_subtype(mut self, subtype: CardSubType) -> Self {
        self.subtype = subtype;
        self
    }

    pub fn with_mythos(mut self, mythos: CardMythos) -> Self {
        self.mythos = mythos;
        self
    }

    pub fn with_element(mut self, element: Element) -> Self {
        self.primary_element = element;
        self
    }

    pub fn with_affinity(mut self, element: Element, affinity: ElementalAffinity) -> Self {
        self.affinities.set(element, affinity);
        self
    }

    pub fn with_trait(mut self, trait_id: impl Into<String>) -> Self {
        self.traits.push(trait_id.into());
        self
    }

    pub fn with_ability(mut self, ability_id: impl Into<String>) -> Self {
        self.abilities.push(ability_id.into());
        self
    }

    pub fn is_character(&self) -> bool {
        self.card_type == CardType::Character
    }

    pub fn is_board_card(&self) -> bool {
        matches!(self.card_type, CardType::Character | CardType::Artifact)
    }

    pub fn is_secret(&self) -> bool {
        self.card_type == CardType::Secret
    }

    pub fn is_equipment(&self) -> bool {
        self.card_type == CardType::Equipment
    }

    pub fn has_trait(&self, trait_id: &str) -> bool {
        self.traits.iter().any(|t| t == trait_id)
    }

    pub fn stat(&self, trait_id: &str) -> i32 {
        self.stats
            .iter()
            .find(|s| s.id == trait_id)
            .map(|s| s.value)
            .unwrap_or(0)
    }

    /// 组卡上限：召唤师与奇迹牌固定为 1。
    pub fn copies_allowed(&self) -> u8 {
        match self.subtype {
            CardSubType::Summoner | CardSubType::Miracle => 1,
            _ => self.deck_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusDef {
    pub effect: StatusType,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub desc: String,
    /// AI 评估用的权重，引擎本身不读取。
    #[serde(default)]
    pub hvalue: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraitDef {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog data is malformed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate {kind} id `{id}`")]
    Duplicate { kind: &'static str, id: String },
    #[error("card `{card}` references unknown ability `{ability}`")]
    MissingCardAbility { card: String, ability: String },
    #[error("ability `{ability}` chains into unknown ability `{chain}`")]
    MissingChainAbility { ability: String, chain: String },
    #[error("ability `{ability}` references unknown card `{card}`")]
    MissingEffectCard { ability: String, card: String },
    #[error("ability `{ability}` grants unknown ability `{granted}`")]
    MissingEffectAbility { ability: String, granted: String },
    #[error("unknown card `{0}`")]
    UnknownCard(String),
}

/// 目录的序列化形式，便于从 JSON 资源一次性载入。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogData {
    #[serde(default)]
    pub cards: Vec<CardDef>,
    #[serde(default)]
    pub abilities: Vec<AbilityDef>,
    #[serde(default)]
    pub statuses: Vec<StatusDef>,
    #[serde(default)]
    pub traits: Vec<TraitDef>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    cards: BTreeMap<String, Arc<CardDef>>,
    abilities: BTreeMap<String, Arc<AbilityDef>>,
    statuses: BTreeMap<StatusType, StatusDef>,
    traits: BTreeMap<String, TraitDef>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let data: CatalogData = serde_json::from_str(json)?;
        Self::from_data(data)
    }

    pub fn from_data(data: CatalogData) -> Result<Self, CatalogError> {
        let mut catalog = Catalog::new();
        for card in data.cards {
            catalog.insert_card(card)?;
        }
        for ability in data.abilities {
            catalog.insert_ability(ability)?;
        }
        for status in data.statuses {
            catalog.insert_status(status)?;
        }
        for trait_def in data.traits {
            catalog.insert_trait(trait_def)?;
        }
        catalog.validate()?;
        debug!(
            target: "catalog",
            cards = catalog.cards.len(),
            abilities = catalog.abilities.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    pub fn insert_card(&mut self, card: CardDef) -> Result<(), CatalogError> {
        if self.cards.contains_key(&card.id) {
            return Err(CatalogError::Duplicate {
                kind: "card",
                id: card.id,
            });
        }
        self.cards.insert(card.id.clone(), Arc::new(card));
        Ok(())
    }

    pub fn insert_ability(&mut self, ability: AbilityDef) -> Result<(), CatalogError> {
        if self.abilities.contains_key(&ability.id) {
            return Err(CatalogError::Duplicate {
                kind: "ability",
                id: ability.id,
            });
        }
        self.abilities.insert(ability.id.clone(), Arc::new(ability));
        Ok(())
    }

    pub fn insert_status(&mut self, status: StatusDef) -> Result<(), CatalogError> {
        if self.statuses.contains_key(&status.effect) {
            return Err(CatalogError::Duplicate {
                kind: "status",
                id: format!("{:?}", status.effect),
            });
        }
        self.statuses.insert(status.effect, status);
        Ok(())
    }

    pub fn insert_trait(&mut self, trait_def: TraitDef) -> Result<(), CatalogError> {
        if self.traits.contains_key(&trait_def.id) {
            return Err(CatalogError::Duplicate {
                kind: "trait",
                id: trait_def.id,
            });
        }
        self.traits.insert(trait_def.id.clone(), trait_def);
        Ok(())
    }

    /// 测试与工具代码使用的链式构建；重复 id 直接覆盖。
    pub fn with_card(mut self, card: CardDef) -> Self {
        self.cards.insert(card.id.clone(), Arc::new(card));
        self
    }

    pub fn with_ability(mut self, ability: AbilityDef) -> Self {
        self.abilities.insert(ability.id.clone(), Arc::new(ability));
        self
    }

    pub fn card(&self, id: &str) -> Option<Arc<CardDef>> {
        self.cards.get(id).cloned()
    }

    pub fn ability(&self, id: &str) -> Option<Arc<AbilityDef>> {
        self.abilities.get(id).cloned()
    }

    pub fn status(&self, status: StatusType) -> Option<&StatusDef> {
        self.statuses.get(&status)
    }

    pub fn trait_def(&self, id: &str) -> Option<&TraitDef> {
        self.traits.get(id)
    }

    pub fn cards(&self) -> impl Iterator<Item = &Arc<CardDef>> {
        self.cards.values()
    }

    pub fn has_ability(&self, card: &CardDef, trigger: AbilityTrigger, target: AbilityTarget) -> bool {
        card.abilities
            .iter()
            .filter_map(|id| self.abilities.get(id))
            .any(|ability| ability.trigger == trigger && ability.target == target)
    }

    pub fn is_require_target_spell(&self, card: &CardDef) -> bool {
        card.card_type == CardType::Spell
            && self.has_ability(card, AbilityTrigger::OnPlay, AbilityTarget::PlayTarget)
    }

    pub fn is_require_target(&self, card: &CardDef) -> bool {
        card.is_equipment() || self.is_require_target_spell(card)
    }

    /// 检查所有跨定义引用，缺失条目属于内容完整性错误。
    pub fn validate(&self) -> Result<(), CatalogError> {
        for card in self.cards.values() {
            if let Some(missing) = card.abilities.iter().find(|id| !self.abilities.contains_key(*id)) {
                return Err(CatalogError::MissingCardAbility {
                    card: card.id.clone(),
                    ability: missing.clone(),
                });
            }
        }

        for ability in self.abilities.values() {
            if let Some(missing) = ability
                .chain_abilities
                .iter()
                .find(|id| !self.abilities.contains_key(*id))
            {
                return Err(CatalogError::MissingChainAbility {
                    ability: ability.id.clone(),
                    chain: missing.clone(),
                });
            }
            for effect in &ability.effects {
                if let Some(card) = effect.referenced_card() {
                    if !self.cards.contains_key(card) {
                        return Err(CatalogError::MissingEffectCard {
                            ability: ability.id.clone(),
                            card: card.to_string(),
                        });
                    }
                }
                if let Some(granted) = effect.referenced_ability() {
                    if !self.abilities.contains_key(granted) {
                        return Err(CatalogError::MissingEffectAbility {
                            ability: ability.id.clone(),
                            granted: granted.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_catalog_from_json() {
        let json = r#"{
            "cards": [
                { "id": "wolf", "card_type": "Character", "attack": 3, "hp": 2,
                  "affinities": { "Frost": "Weak" }, "abilities": ["howl"] }
            ],
            "abilities": [
                { "id": "howl", "trigger": "OnPlay", "target": "PlayerSelf",
                  "effects": [ { "type": "Draw", "count": 1 } ] }
            ],
            "statuses": [ { "effect": "Stealth", "title": "Stealth" } ]
        }"#;
        let catalog = Catalog::from_json(json).expect("catalog should load");
        let wolf = catalog.card("wolf").expect("wolf should exist");
        assert_eq!(wolf.attack, 3);
        assert_eq!(wolf.primary_element, Element::Kinetic);
        assert_eq!(wolf.affinities.get(Element::Frost), ElementalAffinity::Weak);
        assert_eq!(wolf.affinities.get(Element::Infernal), ElementalAffinity::Neutral);
        assert!(catalog.ability("howl").is_some());
        assert!(catalog.status(StatusType::Stealth).is_some());
        assert!(catalog.card("missing").is_none(), "unknown ids resolve to none");
    }

    #[test]
    fn missing_ability_reference_is_an_integrity_error() {
        let catalog = Catalog::new()
            .with_card(CardDef::new("broken", CardType::Character).with_ability("nowhere"));
        let err = catalog.validate().expect_err("dangling ability should be rejected");
        assert!(matches!(err, CatalogError::MissingCardAbility { .. }));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let data = CatalogData {
            cards: vec![
                CardDef::new("twin", CardType::Spell),
                CardDef::new("twin", CardType::Spell),
            ],
            ..CatalogData::default()
        };
        let err = Catalog::from_data(data).expect_err("duplicate card ids should fail");
        assert!(matches!(err, CatalogError::Duplicate { kind: "card", .. }));
    }

    #[test]
    fn summoners_are_limited_to_one_copy() {
        let summoner = CardDef::new("sage", CardType::Character).with_subtype(CardSubType::Summoner);
        assert_eq!(summoner.copies_allowed(), 1);
        assert_eq!(CardDef::new("imp", CardType::Character).copies_allowed(), 4);
    }
}
