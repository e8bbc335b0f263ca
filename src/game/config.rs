//! 对局参数。所有字段都有默认值，JSON 中缺省的项沿用默认。

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GameplaySettings {
    pub hp_start: i32,
    pub mana_start: i32,
    pub mana_per_turn: i32,
    pub mana_max: i32,
    pub cards_per_turn: u32,
    pub cards_max: usize,
    pub player_actions: i32,
    pub player_half_actions: i32,
    /// 牌库为空或手牌已满时抽牌造成的伤害。
    pub fatigue_damage: i32,
    pub seed: Option<u64>,
    pub delays: ResolveDelays,
}

impl Default for GameplaySettings {
    fn default() -> Self {
        Self {
            hp_start: 20,
            mana_start: 1,
            mana_per_turn: 1,
            mana_max: 10,
            cards_per_turn: 1,
            cards_max: 10,
            player_actions: 1,
            player_half_actions: 1,
            fatigue_damage: 3,
            seed: None,
            delays: ResolveDelays::default(),
        }
    }
}

impl GameplaySettings {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// 节奏模式下各类结算之间的等待时间（毫秒），仅用于表现层动画。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResolveDelays {
    pub turn_ms: u64,
    pub play_ms: u64,
    pub ability_ms: u64,
    pub secret_ms: u64,
    pub roll_ms: u64,
}

impl Default for ResolveDelays {
    fn default() -> Self {
        Self {
            turn_ms: 200,
            play_ms: 300,
            ability_ms: 500,
            secret_ms: 500,
            roll_ms: 1000,
        }
    }
}

impl ResolveDelays {
    pub fn turn(&self) -> Duration {
        Duration::from_millis(self.turn_ms)
    }

    pub fn play(&self) -> Duration {
        Duration::from_millis(self.play_ms)
    }

    pub fn ability(&self) -> Duration {
        Duration::from_millis(self.ability_ms)
    }

    pub fn secret(&self) -> Duration {
        Duration::from_millis(self.secret_ms)
    }

    pub fn roll(&self) -> Duration {
        Duration::from_millis(self.roll_ms)
    }
}
