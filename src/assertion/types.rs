use serde::{Deserialize, Serialize};
use std::fmt;

fn enabled_by_default() -> bool {
    true
}

/// 断言错误类型
#[derive(Debug, thiserror::Error)]
pub enum AssertError {
    #[error("Invalid regex `{pattern}`: {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Response body is not valid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Value extraction failed: {0}")]
    ExtractionError(String),
}

/// 断言目标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AssertionKind {
    #[default]
    #[serde(rename = "status")]
    Status,
    #[serde(rename = "header")]
    Header,
    #[serde(rename = "jsonpath", alias = "json-path", alias = "jsonPath")]
    JsonPath,
    #[serde(rename = "body-contains", alias = "body", alias = "bodyContains")]
    BodyContains,
}

impl fmt::Display for AssertionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssertionKind::Status => "status",
            AssertionKind::Header => "header",
            AssertionKind::JsonPath => "jsonpath",
            AssertionKind::BodyContains => "body",
        };
        write!(f, "{}", name)
    }
}

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompareOp {
    #[default]
    #[serde(rename = "eq", alias = "equals", alias = "==")]
    Equal,
    #[serde(rename = "neq", alias = "not-equals", alias = "ne", alias = "!=")]
    NotEqual,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "gt", alias = "greater-than", alias = ">")]
    Greater,
    #[serde(rename = "lt", alias = "less-than", alias = "<")]
    Less,
    #[serde(rename = "exists")]
    Exists,
    #[serde(rename = "regex", alias = "matches")]
    Regex,
}

impl CompareOp {
    /// 转换为字符串表示
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Contains => "contains",
            Self::Greater => ">",
            Self::Less => "<",
            Self::Exists => "exists",
            Self::Regex => "matches",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 声明式断言
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionDef {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type")]
    pub kind: AssertionKind,

    /// header 名称或 JSON 路径
    #[serde(default)]
    pub property: String,

    #[serde(default, rename = "comparison", alias = "op")]
    pub op: CompareOp,

    #[serde(default)]
    pub expected: String,

    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl AssertionDef {
    pub fn new(
        id: impl Into<String>,
        kind: AssertionKind,
        property: impl Into<String>,
        op: CompareOp,
        expected: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            property: property.into(),
            op,
            expected: expected.into(),
            enabled: true,
        }
    }

    pub fn status(expected: u16) -> Self {
        Self::new("", AssertionKind::Status, "", CompareOp::Equal, expected.to_string())
    }

    pub fn json_path(path: &str, op: CompareOp, expected: &str) -> Self {
        Self::new("", AssertionKind::JsonPath, path, op, expected)
    }

    /// 可读描述，如 `jsonpath $.a.b == 1`
    pub fn describe(&self) -> String {
        let target = match self.kind {
            AssertionKind::Status | AssertionKind::BodyContains => self.kind.to_string(),
            _ => format!("{} {}", self.kind, self.property),
        };
        if self.op == CompareOp::Exists {
            format!("{} exists", target)
        } else {
            format!("{} {} {}", target, self.op, self.expected)
        }
    }
}

/// 断言结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResult {
    pub assertion_id: String,

    /// 断言描述或脚本测试名称
    pub name: String,

    /// 是否通过
    pub passed: bool,

    /// 实际值（字符串表示）
    pub actual: Option<String>,

    /// 期望描述
    pub expected: String,

    pub message: String,
}

impl AssertionResult {
    /// 创建成功的断言结果
    pub fn success(def: &AssertionDef, actual: String) -> Self {
        Self {
            assertion_id: def.id.clone(),
            name: def.describe(),
            passed: true,
            message: format!("{} passed", def.describe()),
            actual: Some(actual),
            expected: def.expected.clone(),
        }
    }

    /// 创建失败的断言结果
    pub fn failure(def: &AssertionDef, actual: Option<String>, message: String) -> Self {
        Self {
            assertion_id: def.id.clone(),
            name: def.describe(),
            passed: false,
            actual,
            expected: def.expected.clone(),
            message,
        }
    }

    /// 创建错误的断言结果（取值或执行错误）
    pub fn error(def: &AssertionDef, error: AssertError) -> Self {
        Self::failure(def, None, error.to_string())
    }

    /// 脚本 `pm.test` 或脚本错误生成的合成结果
    pub fn synthetic(name: impl Into<String>, passed: bool, message: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            assertion_id: format!("script:{}", name),
            name,
            passed,
            actual: None,
            expected: String::new(),
            message: message.into(),
        }
    }
}
