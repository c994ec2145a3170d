//! 请求级流程控制：依赖检查与条件表达式。
//!
//! 只在串行模式下使用；依赖只在当前迭代已产生的结果中查找。

use rhai::{Array, Dynamic, INT, Map, Scope};
use tracing::debug;

use crate::collection::RequestDefinition;
use crate::runner::ExecutionResult;
use crate::script::ScriptLimits;
use crate::script::engine::{build_engine, error_message};
use crate::variable::DataRow;

/// 门禁判定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    Skip(String),
}

impl GateDecision {
    pub fn is_skip(&self) -> bool {
        matches!(self, GateDecision::Skip(_))
    }
}

/// 流程门禁
#[derive(Debug, Clone, Default)]
pub struct FlowGate {
    limits: ScriptLimits,
}

fn result_map(result: &ExecutionResult) -> Map {
    let mut map = Map::new();
    map.insert("id".into(), Dynamic::from(result.request_id.clone()));
    map.insert("name".into(), Dynamic::from(result.request_name.clone()));
    map.insert("status".into(), Dynamic::from(result.response.status as INT));
    map.insert("passed".into(), Dynamic::from(result.is_successful()));
    map.insert("skipped".into(), Dynamic::from(result.skipped));
    map.insert("duration".into(), Dynamic::from(result.duration_ms as INT));
    map.insert("body".into(), Dynamic::from(result.response.body.clone()));
    map
}

impl FlowGate {
    pub fn new(limits: ScriptLimits) -> Self {
        Self { limits }
    }

    /// 判定请求是否可以发送
    ///
    /// `current` 为当前迭代已完成的结果，`all` 为整个运行到目前为止的结果。
    pub fn evaluate(
        &self,
        request: &RequestDefinition,
        iteration: usize,
        row: &DataRow,
        current: &[ExecutionResult],
        all: &[ExecutionResult],
    ) -> GateDecision {
        let mut deps = Map::new();
        let mut missing = Vec::new();
        let mut failed = Vec::new();

        for reference in request.dependencies() {
            let found = current
                .iter()
                .rev()
                .find(|r| r.chaos_case.is_none() && r.matches_reference(&reference));
            match found {
                None => missing.push(reference),
                Some(result) => {
                    if !result.is_successful() {
                        failed.push(reference.clone());
                    }
                    deps.insert(reference.as_str().into(), Dynamic::from(result_map(result)));
                }
            }
        }

        if !missing.is_empty() {
            return GateDecision::Skip(format!("Missing dependency: {}", missing.join(", ")));
        }
        if !failed.is_empty() {
            return GateDecision::Skip(format!(
                "Dependency not successful: {}",
                failed.join(", ")
            ));
        }

        let condition = request.flow_condition.trim();
        if condition.is_empty() {
            return GateDecision::Proceed;
        }

        let data: Map = row
            .iter()
            .map(|(k, v)| (k.as_str().into(), Dynamic::from(v.clone())))
            .collect();
        let results: Array = all.iter().map(|r| Dynamic::from(result_map(r))).collect();

        let mut scope = Scope::new();
        scope.push_constant("data", data);
        scope.push_constant("iteration", iteration as INT);
        scope.push_constant("deps", deps);
        scope.push_constant("results", results);

        let engine = build_engine(&self.limits);
        match engine.eval_expression_with_scope::<bool>(&mut scope, condition) {
            Ok(true) => GateDecision::Proceed,
            Ok(false) => {
                debug!("Condition false for {}: {}", request.display_name(), condition);
                GateDecision::Skip(format!("Condition evaluated to false: {}", condition))
            }
            Err(e) => GateDecision::Skip(format!("Condition error: {}", error_message(&e))),
        }
    }
}
