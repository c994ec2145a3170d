use rhai::{Dynamic, Engine, EvalAltResult};
use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::script::types::ScriptLimits;

/// 带资源限制的脚本引擎
///
/// 禁用 `eval`；墙钟时间由 [`Deadline`] 通过 `on_progress` 控制。
pub fn build_engine(limits: &ScriptLimits) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(limits.max_operations);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);
    engine.disable_symbol("eval");
    engine
}

/// 可重置的截止时间
#[derive(Clone)]
pub struct Deadline {
    at: Rc<Cell<Instant>>,
    budget: Duration,
}

impl Deadline {
    pub fn new(timeout_ms: u64) -> Self {
        let budget = Duration::from_millis(timeout_ms);
        Self {
            at: Rc::new(Cell::new(Instant::now() + budget)),
            budget,
        }
    }

    /// 开始新一段脚本前调用
    pub fn reset(&self) {
        self.at.set(Instant::now() + self.budget);
    }

    pub fn install(&self, engine: &mut Engine) {
        let at = Rc::clone(&self.at);
        let budget_ms = self.budget.as_millis();
        engine.on_progress(move |_ops| {
            if Instant::now() >= at.get() {
                Some(Dynamic::from(format!("Script timed out after {}ms", budget_ms)))
            } else {
                None
            }
        });
    }
}

/// 超时或超出操作数：整段脚本必须中止
pub fn is_fatal(err: &EvalAltResult) -> bool {
    match err {
        EvalAltResult::ErrorTerminated(..) | EvalAltResult::ErrorTooManyOperations(..) => true,
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => is_fatal(inner),
        _ => false,
    }
}

/// 提取面向用户的错误消息，展开函数调用包装
pub fn error_message(err: &EvalAltResult) -> String {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => error_message(inner),
        EvalAltResult::ErrorRuntime(value, _) => value.to_string(),
        EvalAltResult::ErrorTerminated(token, _) => token.to_string(),
        other => other.to_string(),
    }
}
