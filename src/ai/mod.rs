//! 搜索型对手：合法操作枚举与基于快照的 alpha-beta 搜索，局面评分由调用方注入。

pub mod minimax;

pub use minimax::{acting_player, legal_actions, AiAgent, AiConfig, AiDecision, AiDifficulty, Evaluator, GameAction};
