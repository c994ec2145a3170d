use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::assertion::AssertionResult;
use crate::http::Request;
use crate::variable::VariableMutation;

/// 脚本阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScriptPhase {
    PreRequest,
    PostResponse,
}

impl fmt::Display for ScriptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptPhase::PreRequest => write!(f, "pre-request"),
            ScriptPhase::PostResponse => write!(f, "post-response"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// 脚本日志条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptLogEntry {
    pub phase: ScriptPhase,
    pub level: LogLevel,
    /// 脚本名称，如 `collection`、`folder:users`、`request:login`
    pub script: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// 单段脚本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSource {
    pub name: String,
    pub code: String,
}

impl ScriptSource {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.code.trim().is_empty()
    }
}

/// 脚本执行预算
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    /// 每段脚本的墙钟时间上限（毫秒）
    pub timeout_ms: u64,
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_operations: 1_000_000,
            max_call_levels: 32,
            max_expr_depth: 64,
            max_string_size: 1024 * 1024,
            max_array_size: 10_000,
            max_map_size: 10_000,
        }
    }
}

/// 一个阶段所有脚本的执行结果
#[derive(Debug, Clone, Default)]
pub struct ScriptOutcome {
    /// `pm.test` 与脚本错误生成的合成断言
    pub tests: Vec<AssertionResult>,
    pub logs: Vec<ScriptLogEntry>,
    /// 按执行顺序记录的变量写入
    pub mutations: Vec<VariableMutation>,
    /// 第一个脚本错误
    pub error: Option<String>,
    /// 前置脚本修改后的请求
    pub request: Option<Request>,
}

impl ScriptOutcome {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}
