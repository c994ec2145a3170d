use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::assertion::AssertionResult;
use crate::chaos::{ChaosCase, ChaosLevel};
use crate::contract::ContractReport;
use crate::http::{Response, TransportHints};
use crate::perf::PerformanceReport;
use crate::script::{ScriptLimits, ScriptLogEntry};
use crate::variable::DataRow;

/// 调度模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Serial,
    Parallel,
}

/// 运行选项，可来自 `ruman.toml` 的 `[runner]` 段或命令行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// 迭代次数；未设置时取数据行数
    pub iterations: Option<usize>,
    pub mode: RunMode,
    /// 串行模式下两次发送之间的间隔（毫秒）
    pub delay_ms: u64,
    pub stop_on_failure: bool,
    pub chaos: Option<ChaosLevel>,
    pub contract: bool,
    pub update_contract: bool,
    /// 任何契约变化都视为失败
    pub strict_contract: bool,
    pub performance: bool,
    /// p95 回归阈值（百分比）
    pub perf_threshold: f64,
    pub update_performance: bool,
    pub transport: TransportHints,
    pub scripts: ScriptLimits,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            iterations: None,
            mode: RunMode::Serial,
            delay_ms: 0,
            stop_on_failure: false,
            chaos: None,
            contract: false,
            update_contract: false,
            strict_contract: false,
            performance: false,
            perf_threshold: 20.0,
            update_performance: false,
            transport: TransportHints::default(),
            scripts: ScriptLimits::default(),
        }
    }
}

impl RunOptions {
    pub fn chaos_cases(&self) -> &'static [ChaosCase] {
        self.chaos.map(|level| level.cases()).unwrap_or(&[])
    }
}

/// 协作式取消信号
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// 每次发送完成后的进度
#[derive(Debug, Clone, Copy)]
pub struct RunProgress<'a> {
    pub completed: usize,
    pub total: usize,
    pub latest: &'a ExecutionResult,
}

/// 单次发送的执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub request_id: String,
    pub request_name: String,
    pub method: String,
    pub url: String,
    pub response: Response,
    pub assertions: Vec<AssertionResult>,
    pub iteration: usize,
    pub data_row: DataRow,
    /// 耗时（毫秒）
    pub duration_ms: u64,
    pub skipped: bool,
    pub skip_reason: Option<String>,
    pub chaos_case: Option<ChaosCase>,
    pub logs: Vec<ScriptLogEntry>,
}

impl ExecutionResult {
    pub fn skipped(
        request_id: &str,
        request_name: &str,
        method: String,
        url: String,
        iteration: usize,
        data_row: DataRow,
        reason: String,
    ) -> Self {
        Self {
            request_id: request_id.to_string(),
            request_name: request_name.to_string(),
            method,
            url,
            response: Response::pseudo("Skipped", reason.clone()),
            assertions: Vec::new(),
            iteration,
            data_row,
            duration_ms: 0,
            skipped: true,
            skip_reason: Some(reason),
            chaos_case: None,
            logs: Vec::new(),
        }
    }

    pub fn assertions_passed(&self) -> bool {
        self.assertions.iter().all(|a| a.passed)
    }

    /// 未跳过、状态码在 [200, 400) 且所有断言通过
    pub fn is_successful(&self) -> bool {
        !self.skipped && (200..400).contains(&self.response.status) && self.assertions_passed()
    }

    /// 匹配依赖引用：id、name 精确匹配，或 name 忽略大小写匹配
    pub fn matches_reference(&self, reference: &str) -> bool {
        self.request_id == reference
            || self.request_name == reference
            || self.request_name.eq_ignore_ascii_case(reference)
    }

    /// 参与契约与性能统计
    pub fn is_measurable(&self) -> bool {
        !self.skipped && self.chaos_case.is_none()
    }
}

/// 运行统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_requests: usize,
    pub passed_requests: usize,
    pub failed_requests: usize,
    pub skipped_requests: usize,
    pub total_assertions: usize,
    pub passed_assertions: usize,
    pub failed_assertions: usize,
    pub total_duration_ms: u64,
}

impl RunSummary {
    pub fn from_results(results: &[ExecutionResult]) -> Self {
        let passed = results.iter().filter(|r| r.is_successful()).count();
        let skipped = results.iter().filter(|r| r.skipped).count();

        let total_assertions = results.iter().map(|r| r.assertions.len()).sum();
        let passed_assertions = results
            .iter()
            .flat_map(|r| &r.assertions)
            .filter(|a| a.passed)
            .count();

        Self {
            total_requests: results.len(),
            passed_requests: passed,
            failed_requests: results.len() - passed - skipped,
            skipped_requests: skipped,
            total_assertions,
            passed_assertions,
            failed_assertions: total_assertions - passed_assertions,
            total_duration_ms: results.iter().map(|r| r.duration_ms).sum(),
        }
    }
}

/// 一次完整运行的汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub collection_id: String,
    pub collection_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// 实际使用的调度模式
    pub mode: RunMode,
    pub iterations: usize,
    pub cancelled: bool,
    pub results: Vec<ExecutionResult>,
    pub summary: RunSummary,
    pub contract: Option<ContractReport>,
    pub performance: Option<PerformanceReport>,
}

impl RunResult {
    pub fn contract_gate_failed(&self) -> bool {
        self.contract.as_ref().is_some_and(|c| c.gate_failed)
    }

    pub fn performance_gate_failed(&self) -> bool {
        self.performance.as_ref().is_some_and(|p| p.gate_failed)
    }

    /// 0 表示没有失败请求、失败断言，且契约与性能门禁均通过
    pub fn exit_code(&self) -> i32 {
        let clean = self.summary.failed_requests == 0
            && self.summary.failed_assertions == 0
            && !self.contract_gate_failed()
            && !self.performance_gate_failed();
        if clean { 0 } else { 1 }
    }
}
