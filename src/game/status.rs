//! 状态效果与特性（trait）的运行时数据。

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatusType {
    None,

    AddAttack,
    AddDefense,
    #[serde(rename = "AddHP")]
    AddHp,
    AddManaCost,
    AddAgility,

    Stealth,
    Invincibility,
    Shell,
    Protection,
    Protected,
    Armor,
    SpellImmunity,

    Deathtouch,
    Fury,
    Intimidate,
    Flying,
    Trample,
    LifeSteal,
    Ranged,
    ChannelLife,
    Pierce,

    Bleeding,
    Ablaze,
    Frozen,
    Petrified,
    Paralyzed,
    Wet,
    Submerged,
    Silenced,
    Corrupted,
    Charmed,
    Poisoned,
    Unconscious,
    Asleep,
    Dazed,
    Nightmare,
    InfectedI,
    InfectedII,
    InfectedIII,
    Encased,
    Entombed,
    Immobilized,
    QuickSand,
    Erosion,
    Overclocked,
    Enraged,
    Panic,
    Drowning,

    Countered,
    CounteredToHand,
    CounteredToDeck,
    DisableEnemyWards,
    SpellLimit,
    PhasedOut,
}

impl Default for StatusType {
    fn default() -> Self {
        StatusType::None
    }
}

/// 每回合开始时造成伤害的状态：固定值 + 最大生命值百分比（向上取整）。
const DAMAGE_OVER_TIME: [(StatusType, i32, i32); 10] = [
    (StatusType::Bleeding, 1, 5),
    (StatusType::Ablaze, 2, 8),
    (StatusType::Poisoned, 1, 6),
    (StatusType::InfectedI, 1, 4),
    (StatusType::InfectedII, 2, 6),
    (StatusType::InfectedIII, 3, 8),
    (StatusType::Nightmare, 0, 7),
    (StatusType::Frozen, 0, 3),
    (StatusType::Drowning, 0, 50),
    (StatusType::Overclocked, 1, 0),
];

const INCAPACITATING: [StatusType; 6] = [
    StatusType::Paralyzed,
    StatusType::Frozen,
    StatusType::Submerged,
    StatusType::Encased,
    StatusType::Asleep,
    StatusType::Unconscious,
];

impl StatusType {
    pub fn is_incapacitating(self) -> bool {
        INCAPACITATING.contains(&self)
    }

    /// 持续伤害数值，`None` 表示该状态没有持续伤害。
    pub fn damage_over_time(self, hp_max: i32) -> Option<i32> {
        DAMAGE_OVER_TIME
            .iter()
            .find(|(status, _, _)| *status == self)
            .map(|(_, flat, percent)| flat + ceil_percent(hp_max, *percent))
    }
}

fn ceil_percent(value: i32, percent: i32) -> i32 {
    let scaled = value.max(0) * percent;
    (scaled + 99) / 100
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardStatus {
    #[serde(rename = "type")]
    pub status_type: StatusType,
    pub value: i32,
    pub duration: i32,
    pub permanent: bool,
}

impl CardStatus {
    pub fn new(status_type: StatusType, value: i32, duration: i32) -> Self {
        Self {
            status_type,
            value,
            duration,
            permanent: duration == 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardTrait {
    pub id: String,
    pub value: i32,
}

impl CardTrait {
    pub fn new(id: impl Into<String>, value: i32) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }
}

/// 合并式添加：同类型状态累加数值、取较长持续时间。
pub(crate) fn merge_status(list: &mut Vec<CardStatus>, status_type: StatusType, value: i32, duration: i32) {
    if let Some(existing) = list.iter_mut().find(|s| s.status_type == status_type) {
        existing.value += value;
        existing.duration = existing.duration.max(duration);
        existing.permanent = existing.permanent || duration == 0;
    } else {
        list.push(CardStatus::new(status_type, value, duration));
    }
}

pub(crate) fn merge_trait(list: &mut Vec<CardTrait>, id: &str, value: i32) {
    if let Some(existing) = list.iter_mut().find(|t| t.id == id) {
        existing.value += value;
    } else {
        list.push(CardTrait::new(id, value));
    }
}

/// 回合结束时递减非永久状态，并移除已到期的状态。
pub(crate) fn reduce_durations(list: &mut Vec<CardStatus>) {
    for status in list.iter_mut().filter(|s| !s.permanent) {
        status.duration -= 1;
    }
    list.retain(|s| s.permanent || s.duration > 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn damage_over_time_rounds_percentage_up() {
        assert_eq!(StatusType::Bleeding.damage_over_time(10), Some(2));
        assert_eq!(StatusType::Drowning.damage_over_time(7), Some(4));
        assert_eq!(StatusType::Overclocked.damage_over_time(30), Some(1));
        assert_eq!(StatusType::Nightmare.damage_over_time(0), Some(0));
        assert_eq!(StatusType::Stealth.damage_over_time(10), None);
    }

    #[test]
    fn duration_pass_keeps_permanent_statuses() {
        let mut list = vec![
            CardStatus::new(StatusType::Poisoned, 1, 1),
            CardStatus::new(StatusType::Flying, 0, 0),
            CardStatus::new(StatusType::Wet, 0, 2),
        ];
        reduce_durations(&mut list);
        let kinds: Vec<StatusType> = list.iter().map(|s| s.status_type).collect();
        assert_eq!(kinds, vec![StatusType::Flying, StatusType::Wet]);
        assert_eq!(list[1].duration, 1, "finite duration should tick down by one");
    }

    #[test]
    fn merging_status_accumulates_value_and_keeps_longest_duration() {
        let mut list = Vec::new();
        merge_status(&mut list, StatusType::AddAttack, 2, 1);
        merge_status(&mut list, StatusType::AddAttack, 1, 3);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].value, 3);
        assert_eq!(list[0].duration, 3);
        assert!(!list[0].permanent);
    }
}
