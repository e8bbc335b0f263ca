//! 引擎对外发出的同步通知。
//!
//! 观察者只能读取事件和当前状态，不能在结算过程中回调修改引擎。

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::state::{CardUid, Game, PlayerId, Slot};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum GameEvent {
    GameStarted {
        first_player: PlayerId,
    },
    TurnStarted {
        player_id: PlayerId,
        turn: u32,
    },
    MainPhaseStarted {
        player_id: PlayerId,
    },
    TurnEnded {
        player_id: PlayerId,
    },
    GameEnded {
        #[serde(default)]
        winner: Option<PlayerId>,
    },
    CardPlayed {
        uid: CardUid,
        #[serde(default)]
        slot: Option<Slot>,
    },
    CardSummoned {
        uid: CardUid,
    },
    CardTransformed {
        uid: CardUid,
        card_id: String,
    },
    CardDrawn {
        player_id: PlayerId,
        uid: CardUid,
    },
    CardDiscarded {
        uid: CardUid,
    },
    CardKilled {
        uid: CardUid,
        #[serde(default)]
        killer: Option<CardUid>,
    },
    CardEquipped {
        bearer: CardUid,
        equip: CardUid,
    },
    AttackStarted {
        attacker: CardUid,
        target: CardUid,
    },
    AttackPlayerStarted {
        attacker: CardUid,
        target: PlayerId,
    },
    AttackEnded {
        attacker: CardUid,
    },
    CardDamaged {
        uid: CardUid,
        amount: i32,
    },
    PlayerDamaged {
        player_id: PlayerId,
        amount: i32,
    },
    CardHealed {
        uid: CardUid,
        amount: i32,
    },
    PlayerHealed {
        player_id: PlayerId,
        amount: i32,
    },
    AbilityTriggered {
        ability_id: String,
        caster: CardUid,
    },
    AbilityTargetCard {
        ability_id: String,
        caster: CardUid,
        target: CardUid,
    },
    AbilityTargetPlayer {
        ability_id: String,
        caster: CardUid,
        target: PlayerId,
    },
    AbilityTargetSlot {
        ability_id: String,
        caster: CardUid,
        slot: Slot,
    },
    AbilityEnded {
        ability_id: String,
        caster: CardUid,
    },
    SecretTriggered {
        secret: CardUid,
        #[serde(default)]
        triggerer: Option<CardUid>,
    },
    SecretResolved {
        secret: CardUid,
    },
    DiceRolled {
        value: i32,
    },
    SelectorStarted {
        player_id: PlayerId,
        ability_id: String,
    },
    SelectorCancelled,
}

pub trait GameObserver {
    fn on_event(&mut self, event: &GameEvent, game: &Game);
}

/// 把事件收集到共享缓冲区；克隆出的句柄共享同一缓冲区。
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Rc<RefCell<Vec<GameEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<GameEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    pub fn snapshot(&self) -> Vec<GameEvent> {
        self.events.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }
}

impl GameObserver for EventLog {
    fn on_event(&mut self, event: &GameEvent, _game: &Game) {
        self.events.borrow_mut().push(event.clone());
    }
}
