use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use once_cell::unsync::OnceCell;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::catalog::{Affinities, CardDef, Catalog};
use super::status::{self, CardStatus, CardTrait, StatusType};

pub type CardUid = u32;
pub type PlayerId = u8;

pub const SLOT_X_MIN: i8 = 1;
pub const SLOT_X_MAX: i8 = 5;
pub const SLOT_Y_MIN: i8 = 1;
pub const SLOT_Y_MAX: i8 = 1;

/// 棋盘格位置。`x == 0 && y == 0` 表示玩家本身（用于以玩家为目标的出牌）。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot {
    pub x: i8,
    pub y: i8,
    pub p: PlayerId,
}

impl Slot {
    pub fn new(x: i8, y: i8, p: PlayerId) -> Self {
        Self { x, y, p }
    }

    pub fn board(x: i8, p: PlayerId) -> Self {
        Self::new(x, SLOT_Y_MIN, p)
    }

    pub fn player(p: PlayerId) -> Self {
        Self::new(0, 0, p)
    }

    pub fn is_valid(&self) -> bool {
        (SLOT_X_MIN..=SLOT_X_MAX).contains(&self.x) && (SLOT_Y_MIN..=SLOT_Y_MAX).contains(&self.y)
    }

    pub fn is_player_slot(&self) -> bool {
        self.x == 0 && self.y == 0
    }

    pub fn for_player(p: PlayerId) -> impl Iterator<Item = Slot> {
        (SLOT_Y_MIN..=SLOT_Y_MAX)
            .flat_map(move |y| (SLOT_X_MIN..=SLOT_X_MAX).map(move |x| Slot::new(x, y, p)))
    }

    pub fn all(player_count: usize) -> Vec<Slot> {
        (0..player_count)
            .flat_map(|p| Slot::for_player(p as PlayerId))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Zone {
    Deck,
    Hand,
    Board,
    Discard,
    Secret,
    Equip,
    Extra,
    Temp,
    Hero,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CardStat {
    Attack,
    Defense,
    Agility,
    Hp,
    Mana,
    Mp,
    HpCost,
}

impl CardStat {
    pub fn of_definition(self, def: &CardDef) -> i32 {
        match self {
            CardStat::Attack => def.attack,
            CardStat::Defense => def.defense,
            CardStat::Agility => def.agility,
            CardStat::Hp => def.hp,
            CardStat::Mana => def.mana,
            CardStat::Mp => def.mp,
            CardStat::HpCost => def.hp_cost,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardStats {
    pub attack: i32,
    pub defense: i32,
    pub agility: i32,
    pub hp: i32,
    pub mana: i32,
    pub mp: i32,
    pub hp_cost: i32,
}

impl CardStats {
    pub fn from_definition(def: &CardDef) -> Self {
        Self {
            attack: def.attack,
            defense: def.defense,
            agility: def.agility,
            hp: def.hp,
            mana: def.mana,
            mp: def.mp,
            hp_cost: def.hp_cost,
        }
    }

    pub fn get(&self, stat: CardStat) -> i32 {
        match stat {
            CardStat::Attack => self.attack,
            CardStat::Defense => self.defense,
            CardStat::Agility => self.agility,
            CardStat::Hp => self.hp,
            CardStat::Mana => self.mana,
            CardStat::Mp => self.mp,
            CardStat::HpCost => self.hp_cost,
        }
    }

    pub fn get_mut(&mut self, stat: CardStat) -> &mut i32 {
        match stat {
            CardStat::Attack => &mut self.attack,
            CardStat::Defense => &mut self.defense,
            CardStat::Agility => &mut self.agility,
            CardStat::Hp => &mut self.hp,
            CardStat::Mana => &mut self.mana,
            CardStat::Mp => &mut self.mp,
            CardStat::HpCost => &mut self.hp_cost,
        }
    }
}

/// 卡牌定义的惰性缓存；不参与序列化，克隆后为空，比较时忽略。
#[derive(Debug, Default)]
pub struct DefinitionMemo {
    card: OnceCell<Option<Arc<CardDef>>>,
}

impl DefinitionMemo {
    fn with(def: Arc<CardDef>) -> Self {
        Self {
            card: OnceCell::with_value(Some(def)),
        }
    }
}

impl Clone for DefinitionMemo {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl PartialEq for DefinitionMemo {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for DefinitionMemo {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Card {
    pub card_id: String,
    pub uid: CardUid,
    pub player_id: PlayerId,
    pub original_player_id: PlayerId,
    #[serde(default)]
    pub variant_id: String,
    #[serde(default)]
    pub slot: Option<Slot>,
    #[serde(default)]
    pub exhausted: bool,
    #[serde(default)]
    pub damage: i32,
    #[serde(default)]
    pub last_hit_damage: i32,
    pub base: CardStats,
    #[serde(default)]
    pub ongoing: CardStats,
    pub available_actions: i32,
    pub half_actions: i32,
    pub total_actions: i32,
    #[serde(default)]
    pub affinities: Affinities,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traits: Vec<CardTrait>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ongoing_traits: Vec<CardTrait>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status: Vec<CardStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ongoing_status: Vec<CardStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub abilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ongoing_abilities: Vec<String>,
    #[serde(default)]
    pub equipped_uid: Option<CardUid>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub status_counters: BTreeMap<StatusType, i32>,
    #[serde(skip)]
    memo: DefinitionMemo,
}

impl Card {
    pub fn create(def: &Arc<CardDef>, variant_id: &str, player_id: PlayerId, uid: CardUid) -> Self {
        let mut card = Self {
            card_id: def.id.clone(),
            uid,
            player_id,
            original_player_id: player_id,
            variant_id: variant_id.to_string(),
            slot: None,
            exhausted: false,
            damage: 0,
            last_hit_damage: 0,
            base: CardStats::default(),
            ongoing: CardStats::default(),
            available_actions: 0,
            half_actions: 1,
            total_actions: 1,
            affinities: Affinities::default(),
            traits: Vec::new(),
            ongoing_traits: Vec::new(),
            status: Vec::new(),
            ongoing_status: Vec::new(),
            abilities: Vec::new(),
            ongoing_abilities: Vec::new(),
            equipped_uid: None,
            status_counters: BTreeMap::new(),
            memo: DefinitionMemo::default(),
        };
        card.set_card(def);
        card
    }

    /// 以新定义覆盖基础数值、亲和度、特性与能力（变形也走这里）。
    pub fn set_card(&mut self, def: &Arc<CardDef>) {
        self.card_id = def.id.clone();
        self.base = CardStats::from_definition(def);
        self.affinities = def.affinities.clone();
        self.traits = def
            .traits
            .iter()
            .map(|id| CardTrait::new(id.clone(), 0))
            .chain(def.stats.iter().cloned())
            .collect();
        self.abilities = def.abilities.clone();
        self.memo = DefinitionMemo::with(Arc::clone(def));
    }

    pub fn def(&self, catalog: &Catalog) -> Option<Arc<CardDef>> {
        match self.memo.card.get() {
            Some(Some(def)) if def.id == self.card_id => Some(Arc::clone(def)),
            Some(_) => catalog.card(&self.card_id),
            None => self
                .memo
                .card
                .get_or_init(|| catalog.card(&self.card_id))
                .clone(),
        }
    }

    pub fn attack(&self) -> i32 {
        (self.base.attack + self.ongoing.attack).max(0)
    }

    pub fn defense(&self) -> i32 {
        (self.base.defense + self.ongoing.defense).max(0)
    }

    pub fn agility(&self) -> i32 {
        (self.base.agility + self.ongoing.agility).max(0)
    }

    pub fn mana(&self) -> i32 {
        (self.base.mana + self.ongoing.mana).max(0)
    }

    pub fn mp(&self) -> i32 {
        (self.base.mp + self.ongoing.mp).max(0)
    }

    pub fn hp_cost(&self) -> i32 {
        (self.base.hp_cost + self.ongoing.hp_cost).max(0)
    }

    pub fn hp_max(&self) -> i32 {
        (self.base.hp + self.ongoing.hp).max(0)
    }

    /// 当前生命值，始终由伤害推导，不单独存储。
    pub fn hp(&self) -> i32 {
        (self.base.hp + self.ongoing.hp - self.damage).max(0)
    }

    pub fn stat(&self, stat: CardStat) -> i32 {
        match stat {
            CardStat::Attack => self.attack(),
            CardStat::Defense => self.defense(),
            CardStat::Agility => self.agility(),
            CardStat::Hp => self.hp(),
            CardStat::Mana => self.mana(),
            CardStat::Mp => self.mp(),
            CardStat::HpCost => self.hp_cost(),
        }
    }

    pub fn refresh(&mut self) {
        self.exhausted = false;
        self.available_actions = if self.agility() > 0 { 1 } else { 0 };
        self.half_actions = 0;
        self.total_actions = self.available_actions;
    }

    pub fn clear_ongoing(&mut self) {
        self.ongoing = CardStats::default();
        self.ongoing_status.clear();
        self.ongoing_traits.clear();
        self.ongoing_abilities.clear();
    }

    /// 离开场上时把实例恢复为定义的初始状态（保留所在格位）。
    pub fn reset(&mut self, def: &Arc<CardDef>) {
        self.clear_ongoing();
        self.refresh();
        self.damage = 0;
        self.last_hit_damage = 0;
        self.status.clear();
        self.status_counters.clear();
        self.set_card(def);
        self.equipped_uid = None;
    }

    pub fn reduce_action_value(&mut self) {
        if self.available_actions > 0 {
            self.available_actions -= 1;
        } else if self.half_actions > 0 {
            self.half_actions -= 1;
        }
        self.total_actions = self.available_actions + self.half_actions;
    }

    pub fn grant_bonus_action(&mut self) {
        if self.available_actions > 0 {
            self.half_actions = 1;
        }
        self.total_actions = self.available_actions + self.half_actions;
    }

    pub fn add_status(&mut self, status_type: StatusType, value: i32, duration: i32) {
        if status_type != StatusType::None {
            status::merge_status(&mut self.status, status_type, value, duration);
        }
    }

    pub fn add_ongoing_status(&mut self, status_type: StatusType, value: i32) {
        if status_type != StatusType::None {
            status::merge_status(&mut self.ongoing_status, status_type, value, 0);
        }
    }

    pub fn remove_status(&mut self, status_type: StatusType) {
        self.status.retain(|s| s.status_type != status_type);
    }

    pub fn has_status(&self, status_type: StatusType) -> bool {
        self.status
            .iter()
            .chain(self.ongoing_status.iter())
            .any(|s| s.status_type == status_type)
    }

    pub fn status_value(&self, status_type: StatusType) -> i32 {
        self.status
            .iter()
            .chain(self.ongoing_status.iter())
            .filter(|s| s.status_type == status_type)
            .map(|s| s.value)
            .sum()
    }

    pub fn reduce_status_durations(&mut self) {
        status::reduce_durations(&mut self.status);
    }

    pub fn add_trait(&mut self, trait_id: &str, value: i32) {
        status::merge_trait(&mut self.traits, trait_id, value);
    }

    pub fn add_ongoing_trait(&mut self, trait_id: &str, value: i32) {
        status::merge_trait(&mut self.ongoing_traits, trait_id, value);
    }

    pub fn has_trait(&self, trait_id: &str) -> bool {
        self.traits
            .iter()
            .chain(self.ongoing_traits.iter())
            .any(|t| t.id == trait_id)
    }

    pub fn trait_value(&self, trait_id: &str) -> i32 {
        self.traits
            .iter()
            .chain(self.ongoing_traits.iter())
            .filter(|t| t.id == trait_id)
            .map(|t| t.value)
            .sum()
    }

    pub fn ability_ids(&self) -> impl Iterator<Item = &String> {
        self.abilities.iter().chain(self.ongoing_abilities.iter())
    }

    pub fn has_ability(&self, ability_id: &str) -> bool {
        self.ability_ids().any(|id| id == ability_id)
    }

    pub fn add_ability(&mut self, ability_id: &str) {
        if !self.abilities.iter().any(|id| id == ability_id) {
            self.abilities.push(ability_id.to_string());
        }
    }

    pub fn remove_ability(&mut self, ability_id: &str) {
        self.abilities.retain(|id| id != ability_id);
    }

    pub fn add_ongoing_ability(&mut self, ability_id: &str) {
        if !self.has_ability(ability_id) {
            self.ongoing_abilities.push(ability_id.to_string());
        }
    }

    pub fn is_incapacitated(&self) -> bool {
        self.status
            .iter()
            .chain(self.ongoing_status.iter())
            .any(|s| s.status_type.is_incapacitating())
    }

    pub fn is_muted(&self) -> bool {
        self.has_status(StatusType::Silenced)
    }

    pub fn can_attack(&self, skip_cost: bool) -> bool {
        if self.is_incapacitated() {
            return false;
        }
        skip_cost || self.available_actions + self.half_actions >= 1
    }

    pub fn can_do_abilities(&self) -> bool {
        !self.is_muted()
    }

    pub fn can_do_activated_abilities(&self, check_actions: bool) -> bool {
        if self.is_muted() || self.is_incapacitated() {
            return false;
        }
        !check_actions || self.total_actions >= 1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum HistoryEntry {
    Played {
        card_id: String,
        uid: CardUid,
        #[serde(default)]
        slot: Option<Slot>,
    },
    CastAbility {
        card_id: String,
        uid: CardUid,
        ability_id: String,
    },
    Attacked {
        uid: CardUid,
        target: CardUid,
    },
    AttackedPlayer {
        uid: CardUid,
        target: PlayerId,
    },
    SecretTriggered {
        uid: CardUid,
        triggerer: CardUid,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Player {
    pub player_id: PlayerId,
    #[serde(default)]
    pub is_ai: bool,
    pub hp: i32,
    pub hp_max: i32,
    pub mana: i32,
    pub mana_max: i32,
    #[serde(default)]
    pub kill_count: i32,
    #[serde(default)]
    pub actions: i32,
    #[serde(default)]
    pub half_actions: i32,
    #[serde(default)]
    pub bonus_action: bool,
    #[serde(default)]
    pub hero: Option<Card>,
    #[serde(default)]
    pub cards_deck: Vec<Card>,
    #[serde(default)]
    pub cards_hand: Vec<Card>,
    #[serde(default)]
    pub cards_board: Vec<Card>,
    #[serde(default)]
    pub cards_equip: Vec<Card>,
    #[serde(default)]
    pub cards_discard: Vec<Card>,
    #[serde(default)]
    pub cards_secret: Vec<Card>,
    #[serde(default)]
    pub cards_extra: Vec<Card>,
    #[serde(default)]
    pub cards_temp: Vec<Card>,
    #[serde(default)]
    pub card_index: BTreeMap<CardUid, Zone>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status: Vec<CardStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ongoing_status: Vec<CardStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
}

impl Player {
    pub fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            is_ai: false,
            hp: 0,
            hp_max: 0,
            mana: 0,
            mana_max: 0,
            kill_count: 0,
            actions: 0,
            half_actions: 0,
            bonus_action: false,
            hero: None,
            cards_deck: Vec::new(),
            cards_hand: Vec::new(),
            cards_board: Vec::new(),
            cards_equip: Vec::new(),
            cards_discard: Vec::new(),
            cards_secret: Vec::new(),
            cards_extra: Vec::new(),
            cards_temp: Vec::new(),
            card_index: BTreeMap::new(),
            status: Vec::new(),
            ongoing_status: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn zone(&self, zone: Zone) -> &[Card] {
        match zone {
            Zone::Deck => &self.cards_deck,
            Zone::Hand => &self.cards_hand,
            Zone::Board => &self.cards_board,
            Zone::Discard => &self.cards_discard,
            Zone::Secret => &self.cards_secret,
            Zone::Equip => &self.cards_equip,
            Zone::Extra => &self.cards_extra,
            Zone::Temp => &self.cards_temp,
            Zone::Hero => self.hero.as_slice(),
        }
    }

    fn zone_vec_mut(&mut self, zone: Zone) -> Option<&mut Vec<Card>> {
        match zone {
            Zone::Deck => Some(&mut self.cards_deck),
            Zone::Hand => Some(&mut self.cards_hand),
            Zone::Board => Some(&mut self.cards_board),
            Zone::Discard => Some(&mut self.cards_discard),
            Zone::Secret => Some(&mut self.cards_secret),
            Zone::Equip => Some(&mut self.cards_equip),
            Zone::Extra => Some(&mut self.cards_extra),
            Zone::Temp => Some(&mut self.cards_temp),
            Zone::Hero => None,
        }
    }

    /// 放入区域并登记索引；调用方负责先把卡从原区域取出。
    pub fn add_card(&mut self, zone: Zone, card: Card) {
        self.card_index.insert(card.uid, zone);
        match self.zone_vec_mut(zone) {
            Some(cards) => cards.push(card),
            None => self.hero = Some(card),
        }
    }

    pub fn take_card(&mut self, uid: CardUid) -> Option<Card> {
        let zone = self.card_index.remove(&uid)?;
        match self.zone_vec_mut(zone) {
            Some(cards) => {
                let index = cards.iter().position(|card| card.uid == uid)?;
                Some(cards.remove(index))
            }
            None => self.hero.take(),
        }
    }

    pub fn zone_of(&self, uid: CardUid) -> Option<Zone> {
        self.card_index.get(&uid).copied()
    }

    pub fn card(&self, uid: CardUid) -> Option<&Card> {
        let zone = self.zone_of(uid)?;
        self.zone(zone).iter().find(|card| card.uid == uid)
    }

    pub fn card_mut(&mut self, uid: CardUid) -> Option<&mut Card> {
        let zone = self.zone_of(uid)?;
        if zone == Zone::Hero {
            return self.hero.as_mut().filter(|card| card.uid == uid);
        }
        self.zone_vec_mut(zone)?.iter_mut().find(|card| card.uid == uid)
    }

    pub fn board_card_at(&self, slot: Slot) -> Option<&Card> {
        self.cards_board.iter().find(|card| card.slot == Some(slot))
    }

    pub fn empty_slots(&self) -> Vec<Slot> {
        Slot::for_player(self.player_id)
            .filter(|slot| self.board_card_at(*slot).is_none())
            .collect()
    }

    pub fn has_occupied_slot(&self) -> bool {
        Slot::for_player(self.player_id).any(|slot| self.board_card_at(slot).is_some())
    }

    pub fn can_pay_mana(&self, cost: i32) -> bool {
        self.mana >= cost
    }

    pub fn pay_mana(&mut self, cost: i32) {
        self.mana = (self.mana - cost).max(0);
    }

    pub fn init_actions(&mut self, full: i32, half: i32) {
        self.actions = full;
        self.half_actions = half;
        self.bonus_action = false;
    }

    pub fn can_use_action(&self, full: bool) -> bool {
        if full {
            self.actions > 0 || self.bonus_action
        } else {
            self.has_actions()
        }
    }

    /// 整动作优先消耗整动作，半动作依次回退到整动作与奖励动作。
    pub fn use_action(&mut self, full: bool) {
        if full {
            if self.actions > 0 {
                self.actions -= 1;
            } else if self.bonus_action {
                self.bonus_action = false;
            }
        } else if self.half_actions > 0 {
            self.half_actions -= 1;
        } else if self.actions > 0 {
            self.actions -= 1;
        } else if self.bonus_action {
            self.bonus_action = false;
        }
    }

    pub fn has_actions(&self) -> bool {
        self.actions > 0 || self.half_actions > 0 || self.bonus_action
    }

    pub fn add_status(&mut self, status_type: StatusType, value: i32, duration: i32) {
        if status_type != StatusType::None {
            status::merge_status(&mut self.status, status_type, value, duration);
        }
    }

    pub fn add_ongoing_status(&mut self, status_type: StatusType, value: i32) {
        if status_type != StatusType::None {
            status::merge_status(&mut self.ongoing_status, status_type, value, 0);
        }
    }

    pub fn remove_status(&mut self, status_type: StatusType) {
        self.status.retain(|s| s.status_type != status_type);
    }

    pub fn has_status(&self, status_type: StatusType) -> bool {
        self.status
            .iter()
            .chain(self.ongoing_status.iter())
            .any(|s| s.status_type == status_type)
    }

    pub fn clear_ongoing(&mut self) {
        self.ongoing_status.clear();
    }

    pub fn is_dead(&self) -> bool {
        self.hp <= 0
    }

    pub fn all_cards(&self) -> impl Iterator<Item = &Card> {
        self.hero
            .iter()
            .chain(self.cards_deck.iter())
            .chain(self.cards_hand.iter())
            .chain(self.cards_board.iter())
            .chain(self.cards_equip.iter())
            .chain(self.cards_discard.iter())
            .chain(self.cards_secret.iter())
            .chain(self.cards_extra.iter())
            .chain(self.cards_temp.iter())
    }

    /// 与 `clone_from` 相同的结果，但复用目标已有的向量容量。
    pub fn copy_into(&self, dst: &mut Player) {
        dst.player_id = self.player_id;
        dst.is_ai = self.is_ai;
        dst.hp = self.hp;
        dst.hp_max = self.hp_max;
        dst.mana = self.mana;
        dst.mana_max = self.mana_max;
        dst.kill_count = self.kill_count;
        dst.actions = self.actions;
        dst.half_actions = self.half_actions;
        dst.bonus_action = self.bonus_action;
        dst.hero.clone_from(&self.hero);
        dst.cards_deck.clone_from(&self.cards_deck);
        dst.cards_hand.clone_from(&self.cards_hand);
        dst.cards_board.clone_from(&self.cards_board);
        dst.cards_equip.clone_from(&self.cards_equip);
        dst.cards_discard.clone_from(&self.cards_discard);
        dst.cards_secret.clone_from(&self.cards_secret);
        dst.cards_extra.clone_from(&self.cards_extra);
        dst.cards_temp.clone_from(&self.cards_temp);
        dst.card_index.clone_from(&self.card_index);
        dst.status.clone_from(&self.status);
        dst.ongoing_status.clone_from(&self.ongoing_status);
        dst.history.clone_from(&self.history);
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MatchState {
    Connecting,
    Play,
    Ended,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GamePhase {
    None,
    StartTurn,
    Main,
    EndTurn,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectorContext {
    pub player_id: PlayerId,
    pub ability_id: String,
    pub caster_uid: CardUid,
}

/// 等待玩家输入时暂停的能力，恢复通过独立的选择入口完成。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Selector {
    None,
    SelectTarget(SelectorContext),
    SelectorCard(SelectorContext),
    SelectorChoice(SelectorContext),
}

impl Default for Selector {
    fn default() -> Self {
        Selector::None
    }
}

impl Selector {
    pub fn is_none(&self) -> bool {
        matches!(self, Selector::None)
    }

    pub fn context(&self) -> Option<&SelectorContext> {
        match self {
            Selector::None => None,
            Selector::SelectTarget(ctx) | Selector::SelectorCard(ctx) | Selector::SelectorChoice(ctx) => {
                Some(ctx)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum IntegrityError {
    DuplicateCard { uid: CardUid },
    IndexMismatch { player_id: PlayerId, uid: CardUid },
    OwnerMismatch { player_id: PlayerId, uid: CardUid },
    InvalidBoardSlot { uid: CardUid },
    SlotConflict { slot: Slot },
    PlayerIdMismatch { index: usize, player_id: PlayerId },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Game {
    pub game_uid: String,
    pub players: Vec<Player>,
    pub first_player: PlayerId,
    pub current_player: PlayerId,
    pub turn_count: u32,
    pub state: MatchState,
    pub phase: GamePhase,
    #[serde(default)]
    pub selector: Selector,
    #[serde(default)]
    pub last_played: Option<CardUid>,
    #[serde(default)]
    pub last_targeted: Option<CardUid>,
    #[serde(default)]
    pub last_destroyed: Option<CardUid>,
    #[serde(default)]
    pub last_summoned: Option<CardUid>,
    #[serde(default)]
    pub ability_triggerer: Option<CardUid>,
    #[serde(default)]
    pub rolled_value: i32,
    #[serde(default)]
    pub abilities_played: BTreeSet<String>,
    #[serde(default)]
    pub cards_attacked: BTreeSet<CardUid>,
    #[serde(default)]
    pub non_unit_casts: u32,
    #[serde(default)]
    pub next_uid: CardUid,
}

impl Game {
    pub fn new(game_uid: impl Into<String>, player_count: usize) -> Self {
        Self {
            game_uid: game_uid.into(),
            players: (0..player_count).map(|id| Player::new(id as PlayerId)).collect(),
            first_player: 0,
            current_player: 0,
            turn_count: 0,
            state: MatchState::Connecting,
            phase: GamePhase::None,
            selector: Selector::None,
            last_played: None,
            last_targeted: None,
            last_destroyed: None,
            last_summoned: None,
            ability_triggerer: None,
            rolled_value: 0,
            abilities_played: BTreeSet::new(),
            cards_attacked: BTreeSet::new(),
            non_unit_casts: 0,
            next_uid: 0,
        }
    }

    pub fn get_player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(id as usize)
    }

    pub fn get_player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(id as usize)
    }

    pub fn opponent_of(&self, player_id: PlayerId) -> Option<PlayerId> {
        self.players
            .iter()
            .find(|p| p.player_id != player_id)
            .map(|p| p.player_id)
    }

    pub fn alloc_uid(&mut self) -> CardUid {
        self.next_uid += 1;
        self.next_uid
    }

    pub fn card(&self, uid: CardUid) -> Option<&Card> {
        self.players.iter().find_map(|player| player.card(uid))
    }

    pub fn card_mut(&mut self, uid: CardUid) -> Option<&mut Card> {
        let owner = self.owner_of(uid)?;
        self.get_player_mut(owner)?.card_mut(uid)
    }

    /// 持有该卡的玩家（按区域索引，而非卡面上的 `player_id`）。
    pub fn owner_of(&self, uid: CardUid) -> Option<PlayerId> {
        self.players
            .iter()
            .find(|player| player.card_index.contains_key(&uid))
            .map(|player| player.player_id)
    }

    pub fn zone_of(&self, uid: CardUid) -> Option<Zone> {
        self.players.iter().find_map(|player| player.zone_of(uid))
    }

    pub fn is_on_board(&self, uid: CardUid) -> bool {
        self.zone_of(uid) == Some(Zone::Board)
    }

    pub fn is_in_hand(&self, uid: CardUid) -> bool {
        self.zone_of(uid) == Some(Zone::Hand)
    }

    pub fn is_in_discard(&self, uid: CardUid) -> bool {
        self.zone_of(uid) == Some(Zone::Discard)
    }

    pub fn is_in_secret(&self, uid: CardUid) -> bool {
        self.zone_of(uid) == Some(Zone::Secret)
    }

    pub fn is_equipped(&self, uid: CardUid) -> bool {
        self.zone_of(uid) == Some(Zone::Equip)
    }

    pub fn is_in_play(&self, uid: CardUid) -> bool {
        matches!(self.zone_of(uid), Some(Zone::Board) | Some(Zone::Equip) | Some(Zone::Hero))
    }

    pub fn board_card_at(&self, slot: Slot) -> Option<&Card> {
        self.get_player(slot.p)?.board_card_at(slot)
    }

    pub fn equipped_card(&self, bearer: &Card) -> Option<&Card> {
        bearer.equipped_uid.and_then(|uid| self.card(uid))
    }

    pub fn bearer_of(&self, equip_uid: CardUid) -> Option<&Card> {
        self.players
            .iter()
            .flat_map(|player| player.cards_board.iter())
            .find(|card| card.equipped_uid == Some(equip_uid))
    }

    pub fn has_started(&self) -> bool {
        self.state != MatchState::Connecting
    }

    pub fn has_ended(&self) -> bool {
        self.state == MatchState::Ended
    }

    pub fn is_player_action_turn(&self, player_id: PlayerId) -> bool {
        self.current_player == player_id && self.state == MatchState::Play && self.selector.is_none()
    }

    pub fn is_player_selector_turn(&self, player_id: PlayerId) -> bool {
        self.state == MatchState::Play
            && self
                .selector
                .context()
                .map(|ctx| ctx.player_id == player_id)
                .unwrap_or(false)
    }

    pub fn random_player<R: Rng>(&self, rng: &mut R) -> Option<PlayerId> {
        self.players.choose(rng).map(|player| player.player_id)
    }

    pub fn random_board_card<R: Rng>(&self, rng: &mut R) -> Option<&Card> {
        let cards: Vec<&Card> = self
            .players
            .iter()
            .flat_map(|player| player.cards_board.iter())
            .collect();
        cards.choose(rng).copied()
    }

    pub fn random_slot<R: Rng>(&self, rng: &mut R) -> Option<Slot> {
        Slot::all(self.players.len()).choose(rng).copied()
    }

    pub fn copy_into(&self, dst: &mut Game) {
        if dst.players.len() == self.players.len() {
            for (src, target) in self.players.iter().zip(dst.players.iter_mut()) {
                src.copy_into(target);
            }
        } else {
            dst.players.clone_from(&self.players);
        }
        dst.game_uid.clone_from(&self.game_uid);
        dst.first_player = self.first_player;
        dst.current_player = self.current_player;
        dst.turn_count = self.turn_count;
        dst.state = self.state;
        dst.phase = self.phase;
        dst.selector.clone_from(&self.selector);
        dst.last_played = self.last_played;
        dst.last_targeted = self.last_targeted;
        dst.last_destroyed = self.last_destroyed;
        dst.last_summoned = self.last_summoned;
        dst.ability_triggerer = self.ability_triggerer;
        dst.rolled_value = self.rolled_value;
        dst.abilities_played.clone_from(&self.abilities_played);
        dst.cards_attacked.clone_from(&self.cards_attacked);
        dst.non_unit_casts = self.non_unit_casts;
        dst.next_uid = self.next_uid;
    }

    pub fn integrity_check(&self) -> Result<(), IntegrityError> {
        let mut seen = BTreeSet::new();
        for (index, player) in self.players.iter().enumerate() {
            if player.player_id as usize != index {
                return Err(IntegrityError::PlayerIdMismatch {
                    index,
                    player_id: player.player_id,
                });
            }

            let mut counted = 0usize;
            for zone in [
                Zone::Deck,
                Zone::Hand,
                Zone::Board,
                Zone::Discard,
                Zone::Secret,
                Zone::Equip,
                Zone::Extra,
                Zone::Temp,
                Zone::Hero,
            ] {
                for card in player.zone(zone) {
                    counted += 1;
                    if !seen.insert(card.uid) {
                        return Err(IntegrityError::DuplicateCard { uid: card.uid });
                    }
                    if player.zone_of(card.uid) != Some(zone) {
                        return Err(IntegrityError::IndexMismatch {
                            player_id: player.player_id,
                            uid: card.uid,
                        });
                    }
                    if card.player_id != player.player_id {
                        return Err(IntegrityError::OwnerMismatch {
                            player_id: player.player_id,
                            uid: card.uid,
                        });
                    }
                }
            }
            if counted != player.card_index.len() {
                let stray = player
                    .card_index
                    .keys()
                    .find(|uid| player.card(**uid).is_none())
                    .copied()
                    .unwrap_or_default();
                return Err(IntegrityError::IndexMismatch {
                    player_id: player.player_id,
                    uid: stray,
                });
            }

            let mut slots = BTreeSet::new();
            for card in &player.cards_board {
                let slot = match card.slot {
                    Some(slot) if slot.is_valid() && slot.p == player.player_id => slot,
                    _ => return Err(IntegrityError::InvalidBoardSlot { uid: card.uid }),
                };
                if !slots.insert(slot) {
                    return Err(IntegrityError::SlotConflict { slot });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::catalog::CardType;

    fn unit(uid: CardUid, player_id: PlayerId) -> Card {
        let def = Arc::new(CardDef::new("grunt", CardType::Character).with_stats(2, 3));
        Card::create(&def, "", player_id, uid)
    }

    #[test]
    fn hp_is_derived_from_damage_and_never_negative() {
        let mut card = unit(1, 0);
        card.ongoing.hp = 2;
        card.damage = 4;
        assert_eq!(card.hp_max(), 5);
        assert_eq!(card.hp(), 1);
        card.damage = 9;
        assert_eq!(card.hp(), 0, "hp is floored at zero");
        card.ongoing.attack = -7;
        assert_eq!(card.attack(), 0, "attack is floored at zero");
    }

    #[test]
    fn zones_are_mutually_exclusive() {
        let mut game = Game::new("g", 2);
        let player = game.get_player_mut(0).expect("player 0 should exist");
        player.add_card(Zone::Hand, unit(1, 0));
        let card = player.take_card(1).expect("card should be in hand");
        player.add_card(Zone::Discard, card);

        assert_eq!(game.zone_of(1), Some(Zone::Discard));
        assert!(game.get_player(0).expect("player 0").cards_hand.is_empty());
        assert!(game.integrity_check().is_ok());
    }

    #[test]
    fn hero_and_zone_cards_are_mutable_by_uid() {
        let mut game = Game::new("g", 2);
        let player = game.get_player_mut(0).expect("player 0 should exist");
        player.add_card(Zone::Hero, unit(1, 0));
        player.add_card(Zone::Board, unit(2, 0));

        game.card_mut(1).expect("hero should be found").damage = 1;
        game.card_mut(2).expect("board card should be found").damage = 2;

        assert_eq!(game.card(1).expect("hero").damage, 1);
        assert_eq!(game.card(2).expect("board card").damage, 2);
        assert!(game.card_mut(3).is_none());
    }

    #[test]
    fn integrity_check_catches_shared_slot() {
        let mut game = Game::new("g", 2);
        let player = game.get_player_mut(1).expect("player 1 should exist");
        let mut a = unit(1, 1);
        a.slot = Some(Slot::board(2, 1));
        let mut b = unit(2, 1);
        b.slot = Some(Slot::board(2, 1));
        player.add_card(Zone::Board, a);
        player.add_card(Zone::Board, b);

        assert_eq!(
            game.integrity_check(),
            Err(IntegrityError::SlotConflict {
                slot: Slot::board(2, 1)
            })
        );
    }

    #[test]
    fn snapshot_copy_is_independent() {
        let mut game = Game::new("g", 2);
        game.get_player_mut(0)
            .expect("player 0")
            .add_card(Zone::Hand, unit(1, 0));
        let mut branch = Game::new("other", 2);
        game.copy_into(&mut branch);
        assert_eq!(branch, game);

        branch
            .card_mut(1)
            .expect("card should be copied")
            .damage = 2;
        assert_eq!(game.card(1).expect("live card").damage, 0, "branch must not alias live state");
    }

    #[test]
    fn player_action_economy_falls_back_in_order() {
        let mut player = Player::new(0);
        player.init_actions(1, 1);
        player.bonus_action = true;

        player.use_action(false);
        assert_eq!((player.actions, player.half_actions), (1, 0));
        player.use_action(false);
        assert_eq!(player.actions, 0, "half action falls back to a full action");
        assert!(player.can_use_action(true), "bonus action still covers a full action");
        player.use_action(true);
        assert!(!player.has_actions());
    }

    #[test]
    fn memo_survives_clone_as_empty_and_resolves_again() {
        let def = Arc::new(CardDef::new("grunt", CardType::Character).with_stats(2, 3));
        let catalog = Catalog::new().with_card((*def).clone());
        let card = Card::create(&def, "", 0, 1);
        let cloned = card.clone();
        assert_eq!(cloned.def(&catalog).map(|d| d.attack), Some(2));

        let json = serde_json::to_string(&card).expect("card should serialize");
        let restored: Card = serde_json::from_str(&json).expect("card should deserialize");
        assert_eq!(restored, card);
        assert!(restored.def(&catalog).is_some());
    }
}
