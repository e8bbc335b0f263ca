//! 结算队列。
//!
//! 四条先进先出通道：能力、奥秘、攻击、续延。每一步从第一条非空通道取一项；
//! 条目是纯数据，因此队列可以随快照一起克隆。

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ability::AbilityTrigger;
use super::state::{CardUid, PlayerId, Slot};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResolveMode {
    /// 搜索/预测用：忽略所有延迟，一次性结算完毕。
    Instant,
    /// 表现层用：条目之间按延迟暂停，由 `update` 推进。
    Paced,
}

impl Default for ResolveMode {
    fn default() -> Self {
        ResolveMode::Paced
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum AttackTarget {
    Card { uid: CardUid },
    Player { player_id: PlayerId },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AttackStage {
    Resolve,
    Hit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueuedAbility {
    pub ability_id: String,
    pub caster: CardUid,
    pub triggerer: Option<CardUid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueuedSecret {
    pub trigger: AbilityTrigger,
    pub secret: CardUid,
    pub triggerer: Option<CardUid>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueuedAttack {
    pub attacker: CardUid,
    pub target: AttackTarget,
    pub stage: AttackStage,
    pub skip_cost: bool,
}

/// 入口函数在中途结算之后还要继续执行的部分，作为队列条目延后运行。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Continuation {
    StartMainPhase,
    StartNextTurn,
    EndTurn,
    CompletePlay {
        uid: CardUid,
        slot: Option<Slot>,
        skip_cost: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum QueueItem {
    Ability(QueuedAbility),
    Secret(QueuedSecret),
    Attack(QueuedAttack),
    Continuation(Continuation),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolveQueue {
    mode: ResolveMode,
    abilities: VecDeque<QueuedAbility>,
    secrets: VecDeque<QueuedSecret>,
    attacks: VecDeque<QueuedAttack>,
    continuations: VecDeque<Continuation>,
    delay: Duration,
    resolving: bool,
}

impl ResolveQueue {
    pub fn new(mode: ResolveMode) -> Self {
        Self {
            mode,
            abilities: VecDeque::new(),
            secrets: VecDeque::new(),
            attacks: VecDeque::new(),
            continuations: VecDeque::new(),
            delay: Duration::ZERO,
            resolving: false,
        }
    }

    pub fn mode(&self) -> ResolveMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ResolveMode) {
        self.mode = mode;
        if mode == ResolveMode::Instant {
            self.delay = Duration::ZERO;
        }
    }

    pub fn push_ability(&mut self, ability_id: &str, caster: CardUid, triggerer: Option<CardUid>) {
        self.abilities.push_back(QueuedAbility {
            ability_id: ability_id.to_string(),
            caster,
            triggerer,
        });
    }

    pub fn push_secret(&mut self, trigger: AbilityTrigger, secret: CardUid, triggerer: Option<CardUid>) {
        self.secrets.push_back(QueuedSecret {
            trigger,
            secret,
            triggerer,
        });
    }

    pub fn push_attack(&mut self, attacker: CardUid, target: AttackTarget, stage: AttackStage, skip_cost: bool) {
        self.attacks.push_back(QueuedAttack {
            attacker,
            target,
            stage,
            skip_cost,
        });
    }

    pub fn push_continuation(&mut self, continuation: Continuation) {
        self.continuations.push_back(continuation);
    }

    pub fn pop(&mut self) -> Option<QueueItem> {
        if let Some(item) = self.abilities.pop_front() {
            return Some(QueueItem::Ability(item));
        }
        if let Some(item) = self.secrets.pop_front() {
            return Some(QueueItem::Secret(item));
        }
        if let Some(item) = self.attacks.pop_front() {
            return Some(QueueItem::Attack(item));
        }
        self.continuations.pop_front().map(QueueItem::Continuation)
    }

    pub fn len(&self) -> usize {
        self.abilities.len() + self.secrets.len() + self.attacks.len() + self.continuations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 节奏模式下取已有延迟与新延迟中的较大者；即时模式忽略。
    pub fn set_delay(&mut self, delay: Duration) {
        if self.mode == ResolveMode::Paced {
            self.delay = self.delay.max(delay);
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_waiting(&self) -> bool {
        !self.delay.is_zero()
    }

    /// 推进计时；返回 `true` 表示等待刚刚结束，应继续结算。
    pub fn tick(&mut self, elapsed: Duration) -> bool {
        if self.delay.is_zero() {
            return false;
        }
        self.delay = self.delay.saturating_sub(elapsed);
        self.delay.is_zero()
    }

    pub fn is_resolving(&self) -> bool {
        self.resolving
    }

    pub(crate) fn begin_resolve(&mut self) -> bool {
        if self.resolving {
            return false;
        }
        self.resolving = true;
        true
    }

    pub(crate) fn end_resolve(&mut self) {
        self.resolving = false;
    }

    pub fn clear(&mut self) {
        self.abilities.clear();
        self.secrets.clear();
        self.attacks.clear();
        self.continuations.clear();
    }

    pub fn redirect_attack(&mut self, attacker: CardUid, target: AttackTarget) {
        for attack in self.attacks.iter_mut().filter(|a| a.attacker == attacker) {
            attack.target = target;
            attack.stage = AttackStage::Resolve;
        }
    }

    pub fn pending_attacks(&self) -> impl Iterator<Item = &QueuedAttack> {
        self.attacks.iter()
    }

    pub fn copy_into(&self, dst: &mut ResolveQueue) {
        dst.clone_from(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abilities_drain_before_secrets_attacks_and_continuations() {
        let mut queue = ResolveQueue::new(ResolveMode::Instant);
        queue.push_continuation(Continuation::EndTurn);
        queue.push_attack(1, AttackTarget::Player { player_id: 1 }, AttackStage::Resolve, false);
        queue.push_secret(AbilityTrigger::OnPlayOther, 5, None);
        queue.push_ability("first", 2, None);
        queue.push_ability("second", 3, None);

        let order: Vec<QueueItem> = std::iter::from_fn(|| queue.pop()).collect();
        assert!(matches!(&order[0], QueueItem::Ability(a) if a.ability_id == "first"));
        assert!(matches!(&order[1], QueueItem::Ability(a) if a.ability_id == "second"));
        assert!(matches!(order[2], QueueItem::Secret(_)));
        assert!(matches!(order[3], QueueItem::Attack(_)));
        assert!(matches!(order[4], QueueItem::Continuation(Continuation::EndTurn)));
        assert!(queue.is_empty());
    }

    #[test]
    fn paced_mode_keeps_the_longest_delay() {
        let mut queue = ResolveQueue::new(ResolveMode::Paced);
        queue.set_delay(Duration::from_millis(300));
        queue.set_delay(Duration::from_millis(200));
        assert_eq!(queue.delay(), Duration::from_millis(300));
        assert!(!queue.tick(Duration::from_millis(100)));
        assert!(queue.tick(Duration::from_millis(500)), "delay should elapse");
        assert!(!queue.is_waiting());
    }

    #[test]
    fn instant_mode_ignores_delays() {
        let mut queue = ResolveQueue::new(ResolveMode::Instant);
        queue.set_delay(Duration::from_secs(1));
        assert!(!queue.is_waiting());
    }

    #[test]
    fn redirect_swaps_pending_attack_targets() {
        let mut queue = ResolveQueue::new(ResolveMode::Instant);
        queue.push_attack(7, AttackTarget::Card { uid: 9 }, AttackStage::Resolve, false);
        queue.push_attack(8, AttackTarget::Card { uid: 9 }, AttackStage::Resolve, false);
        queue.redirect_attack(7, AttackTarget::Card { uid: 4 });

        let targets: Vec<AttackTarget> = queue.pending_attacks().map(|a| a.target).collect();
        assert_eq!(
            targets,
            vec![AttackTarget::Card { uid: 4 }, AttackTarget::Card { uid: 9 }]
        );
    }

    #[test]
    fn clear_drops_everything() {
        let mut queue = ResolveQueue::new(ResolveMode::Instant);
        queue.push_ability("a", 1, None);
        queue.push_continuation(Continuation::StartMainPhase);
        queue.clear();
        assert!(queue.pop().is_none());
    }
}
