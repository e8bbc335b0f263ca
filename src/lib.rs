pub mod ai;
pub mod game;

use std::cell::RefCell;
use std::rc::Rc;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use gloo_timers::future::TimeoutFuture;
use serde::{Deserialize, Serialize};
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;
use web_sys::js_sys::{Function, Promise};

pub use ai::{legal_actions, AiAgent, AiConfig, AiDecision, AiDifficulty, Evaluator, GameAction};
pub use game::{
    Card, CardUid, Catalog, CatalogError, EventLog, Game, GameEvent, GameLogic, GameObserver, GamePhase,
    GameplaySettings, IntegrityError, Player, PlayerId, ResolveMode, RuleError, Slot,
};

#[cfg(feature = "wee_alloc")]
#[global_allocator]
static ALLOC: wee_alloc::WeeAlloc = wee_alloc::WeeAlloc::INIT;

#[wasm_bindgen(start)]
pub fn start() {
    set_panic_hook();
}

#[wasm_bindgen]
pub fn greet(name: &str) -> String {
    let message = format!("你好，{name}! 规则引擎已就绪。");
    web_sys::console::log_1(&message.clone().into());
    message
}

/// 每次调用返回给 JS 的结果：最新状态、本次产生的事件，以及被拒绝时的原因。
#[derive(Serialize)]
struct Resolution<'a> {
    state: &'a Game,
    events: Vec<GameEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rejected: Option<RuleError>,
    pending_ms: u64,
}

#[derive(Deserialize)]
struct DeckRequest {
    #[serde(default)]
    hero: Option<String>,
    cards: Vec<String>,
}

fn serde_to_js_error<E: std::fmt::Display>(error: E) -> JsValue {
    JsValue::from_str(&error.to_string())
}

fn resolution_json(logic: &GameLogic, events: &EventLog, rejected: Option<RuleError>) -> Result<String, JsValue> {
    let resolution = Resolution {
        state: logic.game(),
        events: events.take(),
        rejected,
        pending_ms: logic.pending_delay().as_millis() as u64,
    };
    serde_json::to_string(&resolution).map_err(serde_to_js_error)
}

/// JS 端提供的局面评分函数；调用失败或返回非数字时按 0 分处理。
struct JsEvaluator(Function);

impl Evaluator for JsEvaluator {
    fn evaluate(&self, game: &Game, player_id: PlayerId) -> f64 {
        let state = match to_value(game) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(target: "engine", %err, "state could not be passed to evaluator");
                return 0.0;
            }
        };
        match self.0.call2(&JsValue::NULL, &state, &JsValue::from(player_id)) {
            Ok(score) => score.as_f64().unwrap_or(0.0),
            Err(_) => {
                tracing::warn!(target: "engine", player_id, "evaluator threw");
                0.0
            }
        }
    }
}

#[wasm_bindgen]
pub struct GameEngine {
    logic: Rc<RefCell<GameLogic>>,
    events: EventLog,
}

impl GameEngine {
    fn run<F>(&self, intent: F) -> Result<String, JsValue>
    where
        F: FnOnce(&mut GameLogic) -> Result<(), RuleError>,
    {
        let mut logic = self.logic.borrow_mut();
        let rejected = intent(&mut *logic).err();
        if let Some(err) = &rejected {
            tracing::debug!(target: "engine", %err, "intent rejected");
        }
        resolution_json(&logic, &self.events, rejected)
    }
}

#[wasm_bindgen]
impl GameEngine {
    /// `paced` 为真时结算按延迟暂停，需要 `update` 或 `resolve_paced` 推进。
    #[wasm_bindgen(constructor)]
    pub fn new(catalog_json: &str, settings_json: Option<String>, paced: bool) -> Result<GameEngine, JsValue> {
        let catalog = Catalog::from_json(catalog_json).map_err(serde_to_js_error)?;
        catalog.validate().map_err(serde_to_js_error)?;
        let settings = match settings_json {
            Some(json) => GameplaySettings::from_json(&json).map_err(serde_to_js_error)?,
            None => GameplaySettings::default(),
        };
        let mode = if paced { ResolveMode::Paced } else { ResolveMode::Instant };

        let events = EventLog::new();
        let mut logic = GameLogic::new(Arc::new(catalog), settings, mode);
        logic.add_observer(Box::new(events.clone()));
        Ok(GameEngine {
            logic: Rc::new(RefCell::new(logic)),
            events,
        })
    }

    pub fn state_json(&self) -> Result<String, JsValue> {
        serde_json::to_string(self.logic.borrow().game()).map_err(serde_to_js_error)
    }

    pub fn set_state_json(&mut self, json: &str) -> Result<(), JsValue> {
        let game: Game = serde_json::from_str(json).map_err(serde_to_js_error)?;
        game.integrity_check()
            .map_err(|error| to_value(&error).unwrap_or_else(serde_to_js_error))?;
        *self.logic.borrow_mut().game_mut() = game;
        Ok(())
    }

    pub fn load_deck_json(&mut self, player_id: u8, json: &str) -> Result<(), JsValue> {
        let deck: DeckRequest = serde_json::from_str(json).map_err(serde_to_js_error)?;
        self.logic
            .borrow_mut()
            .load_deck(player_id, deck.hero.as_deref(), deck.cards.as_slice())
            .map_err(serde_to_js_error)
    }

    pub fn start_game(&mut self) -> Result<String, JsValue> {
        self.run(|logic| {
            logic.start_game();
            Ok(())
        })
    }

    /// 执行一个 `GameAction`（JSON），非法操作通过 `rejected` 字段返回。
    pub fn apply_action_json(&mut self, player_id: u8, action_json: &str) -> Result<String, JsValue> {
        let action: GameAction = serde_json::from_str(action_json).map_err(serde_to_js_error)?;
        self.run(|logic| action.apply(logic, player_id))
    }

    pub fn play_card(&mut self, player_id: u8, uid: u32, slot_json: Option<String>) -> Result<String, JsValue> {
        let slot = match slot_json {
            Some(json) => Some(serde_json::from_str::<Slot>(&json).map_err(serde_to_js_error)?),
            None => None,
        };
        self.run(|logic| logic.play_card(player_id, uid, slot))
    }

    pub fn attack_target(&mut self, player_id: u8, attacker: u32, target: u32) -> Result<String, JsValue> {
        self.run(|logic| logic.attack_target(player_id, attacker, target))
    }

    pub fn attack_player(&mut self, player_id: u8, attacker: u32, target: u8) -> Result<String, JsValue> {
        self.run(|logic| logic.attack_player(player_id, attacker, target))
    }

    pub fn cast_ability(&mut self, player_id: u8, uid: u32, ability_id: &str) -> Result<String, JsValue> {
        self.run(|logic| logic.cast_ability(player_id, uid, ability_id))
    }

    pub fn end_turn(&mut self, player_id: u8) -> Result<String, JsValue> {
        self.run(|logic| logic.end_turn(player_id))
    }

    pub fn next_step(&mut self, player_id: u8) -> Result<String, JsValue> {
        self.run(|logic| logic.next_step(player_id))
    }

    pub fn cancel_selection(&mut self, player_id: u8) -> Result<String, JsValue> {
        self.run(|logic| logic.cancel_selection(player_id))
    }

    pub fn roll(&mut self, min: i32, max: i32) -> Result<String, JsValue> {
        self.run(|logic| {
            logic.roll_random_value(min, max);
            Ok(())
        })
    }

    pub fn update(&mut self, delta_ms: u32) -> Result<String, JsValue> {
        self.run(|logic| {
            logic.update(Duration::from_millis(delta_ms as u64));
            Ok(())
        })
    }

    /// 按挂起的延迟逐段等待，直到队列不再等待，然后返回结果 JSON。
    pub fn resolve_paced(&self) -> Promise {
        let logic = Rc::clone(&self.logic);
        let events = self.events.clone();
        future_to_promise(async move {
            loop {
                let pending = logic.borrow().pending_delay();
                if pending.is_zero() {
                    break;
                }
                TimeoutFuture::new(pending.as_millis().min(u32::MAX as u128) as u32).await;
                logic.borrow_mut().update(pending);
            }
            let json = resolution_json(&logic.borrow(), &events, None)?;
            Ok(JsValue::from_str(&json))
        })
    }

    /// 返回 `player_id` 当前的合法操作列表（JSON 数组）。
    pub fn legal_actions_json(&self, player_id: u8) -> Result<String, JsValue> {
        let actions = legal_actions(&self.logic.borrow(), player_id);
        serde_json::to_string(&actions).map_err(serde_to_js_error)
    }

    /// 用 `evaluator(state, player_id) -> number` 给局面打分，跑一次搜索并返回 `AiDecision` JSON。
    pub fn think_ai(
        &self,
        player_id: u8,
        evaluator: Function,
        difficulty: Option<String>,
        delay_ms: Option<u32>,
    ) -> Promise {
        let logic = Rc::clone(&self.logic);
        let difficulty = difficulty
            .as_deref()
            .and_then(|value| AiDifficulty::from_str(value).ok())
            .unwrap_or(AiDifficulty::Normal);
        let delay = delay_ms.unwrap_or(0);

        future_to_promise(async move {
            if delay > 0 {
                TimeoutFuture::new(delay).await;
            }
            let mut agent = AiAgent::new(AiConfig::from_difficulty(difficulty), Box::new(JsEvaluator(evaluator)));
            let decision = agent.decide_action(&logic.borrow(), player_id);
            let json = serde_json::to_string(&decision).map_err(serde_to_js_error)?;
            Ok(JsValue::from_str(&json))
        })
    }

    pub fn difficulty_config(&self, difficulty: Option<String>) -> Result<String, JsValue> {
        let difficulty = difficulty
            .as_deref()
            .and_then(|value| AiDifficulty::from_str(value).ok())
            .unwrap_or(AiDifficulty::Normal);
        serde_json::to_string(&AiConfig::from_difficulty(difficulty)).map_err(serde_to_js_error)
    }
}

/// 将传入的游戏状态进行深拷贝后返回。
#[wasm_bindgen(js_name = "cloneGameState")]
pub fn clone_game_state(state: JsValue) -> Result<JsValue, JsValue> {
    let state: Game = from_value(state).map_err(JsValue::from)?;
    to_value(&state.clone()).map_err(JsValue::from)
}

#[wasm_bindgen(js_name = "validateState")]
pub fn validate_state(state: JsValue) -> Result<(), JsValue> {
    let state: Game = from_value(state).map_err(JsValue::from)?;
    state
        .integrity_check()
        .map_err(|error| to_value(&error).unwrap_or_else(JsValue::from))
}

#[cfg(feature = "console_error_panic_hook")]
fn set_panic_hook() {
    console_error_panic_hook::set_once();
}

#[cfg(not(feature = "console_error_panic_hook"))]
fn set_panic_hook() {}
