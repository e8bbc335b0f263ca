//! 游戏核心逻辑模块（状态、目录、规则、结算引擎）。

pub mod ability;
pub mod catalog;
pub mod config;
mod damage;
mod dispatch;
pub mod effects;
pub mod engine;
pub mod events;
pub mod queue;
pub mod rules;
pub mod state;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use ability::{AbilityDef, AbilityTarget, AbilityTrigger, AbilityType, Condition};
pub use catalog::{CardDef, CardSubType, CardType, Catalog, CatalogError, Element};
pub use config::{GameplaySettings, ResolveDelays};
pub use effects::AbilityEffect;
pub use engine::GameLogic;
pub use events::{EventLog, GameEvent, GameObserver};
pub use queue::{AttackTarget, ResolveMode};
pub use rules::{RuleEngine, RuleError};
pub use state::{Card, CardUid, Game, GamePhase, IntegrityError, MatchState, Player, PlayerId, Selector, Slot, Zone};
pub use status::StatusType;
