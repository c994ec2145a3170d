use crate::variable::data::DataRow;
use crate::variable::types::ScopeChain;
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use regex::{Captures, Regex};
use std::sync::OnceLock;

pub(crate) fn token_regex() -> &'static Regex {
    static TOKEN_REGEX: OnceLock<Regex> = OnceLock::new();
    TOKEN_REGEX.get_or_init(|| {
        Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("token pattern is valid")
    })
}

/// 变量替换器
///
/// 完整解析顺序：数据行 → 作用域静态替换 → vault 令牌 → 动态令牌。
/// 任何一步找不到的令牌都保持原样。
pub struct VariableResolver;

impl VariableResolver {
    /// 解析并替换系统环境变量 ${VAR}
    pub fn resolve_env_vars(text: &str) -> String {
        static ENV_REGEX: OnceLock<Regex> = OnceLock::new();
        let re = ENV_REGEX
            .get_or_init(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("env pattern is valid"));

        re.replace_all(text, |caps: &Captures| {
            let env_name = &caps[1];
            std::env::var(env_name).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string()
    }

    /// 按作用域链解析（当前时间）
    pub fn resolve(text: &str, chain: &ScopeChain) -> String {
        Self::resolve_at(text, chain, Utc::now())
    }

    /// 按作用域链解析，`now` 用于判断 vault 过期
    pub fn resolve_at(text: &str, chain: &ScopeChain, now: DateTime<Utc>) -> String {
        if !text.contains("{{") {
            return text.to_string();
        }

        let resolved = Self::replace_tokens(text, |name| chain.lookup(name, now));
        let resolved = Self::replace_tokens(&resolved, |name| {
            let key = name
                .strip_prefix("$vault:")
                .or_else(|| name.strip_prefix("vault."))?;
            chain.vault.get(key.trim(), now).map(str::to_string)
        });
        Self::resolve_dynamic(&resolved)
    }

    /// 数据行替换，单独的一遍
    pub fn substitute_row(text: &str, row: &DataRow) -> String {
        if row.is_empty() {
            return text.to_string();
        }
        Self::replace_tokens(text, |name| row.get(name).cloned())
    }

    /// 迭代时使用：数据行优先，然后按作用域链解析
    pub fn resolve_with_row(text: &str, chain: &ScopeChain, row: &DataRow) -> String {
        let with_row = Self::substitute_row(text, row);
        Self::resolve(&with_row, chain)
    }

    /// 动态令牌：$timestamp / $isoTimestamp / $uuid / $guid / $randomUUID / $randomInt
    pub fn resolve_dynamic(text: &str) -> String {
        Self::replace_tokens(text, |name| match name {
            "$timestamp" => Some(Utc::now().timestamp_millis().to_string()),
            "$isoTimestamp" => Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            "$uuid" | "$guid" | "$randomUUID" => Some(uuid::Uuid::new_v4().to_string()),
            "$randomInt" => Some(rand::rng().random_range(0..10_000).to_string()),
            _ => None,
        })
    }

    /// 文本中是否仍有未解析的令牌
    pub fn has_tokens(text: &str) -> bool {
        token_regex().is_match(text)
    }

    fn replace_tokens<F>(text: &str, lookup: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        token_regex()
            .replace_all(text, |caps: &Captures| {
                lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
            })
            .to_string()
    }
}
