use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::collection::KeyValue;

/// 变量上下文，存储单个作用域的变量
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableContext {
    /// 变量映射表
    variables: HashMap<String, String>,
}

impl VariableContext {
    /// 创建新的空变量上下文
    pub fn new() -> Self {
        Self::default()
    }

    /// 从键值列表构建，跳过禁用项与空键
    pub fn from_key_values(entries: &[KeyValue]) -> Self {
        let mut ctx = Self::new();
        for kv in entries {
            if kv.enabled && !kv.key.trim().is_empty() {
                ctx.insert(kv.key.trim(), kv.value.clone());
            }
        }
        ctx
    }

    /// 插入变量
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), value.into());
    }

    /// 设置变量 (insert 的别名)
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.insert(key, value);
    }

    /// 获取变量值
    pub fn get(&self, key: &str) -> Option<&str> {
        self.variables.get(key).map(|s| s.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.variables.contains_key(key)
    }

    /// 删除变量，返回旧值
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.variables.remove(key)
    }

    /// 批量插入变量
    pub fn extend(&mut self, vars: HashMap<String, String>) {
        self.variables.extend(vars);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.variables.iter()
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        self.variables.clone()
    }

    /// 变量数量
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

/// 带过期时间的临时密钥
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultEntry {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl VaultEntry {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// 临时密钥库，优先级最高的作用域
///
/// 过期条目不参与替换，由 [`Vault::purge_expired`] 惰性清理。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vault {
    entries: HashMap<String, VaultEntry>,
}

impl Vault {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入一个在 `ttl` 之后过期的密钥
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>, ttl: chrono::Duration) {
        self.insert_until(key, value, Utc::now() + ttl);
    }

    pub fn insert_until(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) {
        self.entries.insert(
            key.into(),
            VaultEntry {
                value: value.into(),
                expires_at,
            },
        );
    }

    /// 仅返回未过期的值
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<&str> {
        self.entries
            .get(key)
            .filter(|entry| entry.is_active(now))
            .map(|entry| entry.value.as_str())
    }

    /// 清理过期条目，返回清理数量
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_active(now));
        before - self.entries.len()
    }

    pub fn active(&self, now: DateTime<Utc>) -> impl Iterator<Item = (&String, &str)> {
        self.entries
            .iter()
            .filter(move |(_, entry)| entry.is_active(now))
            .map(|(key, entry)| (key, entry.value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 脚本可写的变量作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableScope {
    Global,
    Environment,
    Collection,
    Request,
    Runtime,
}

impl VariableScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariableScope::Global => "global",
            VariableScope::Environment => "environment",
            VariableScope::Collection => "collection",
            VariableScope::Request => "request",
            VariableScope::Runtime => "runtime",
        }
    }
}

/// 脚本对变量的一次写入；`value` 为 None 表示 unset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableMutation {
    pub scope: VariableScope,
    pub key: String,
    pub value: Option<String>,
}

impl VariableMutation {
    pub fn set(scope: VariableScope, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            scope,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn unset(scope: VariableScope, key: impl Into<String>) -> Self {
        Self {
            scope,
            key: key.into(),
            value: None,
        }
    }
}

/// 变量作用域链
///
/// 优先级从低到高：global < environment < collection < folders（外到内）
/// < request < runtime < vault。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeChain {
    pub global: VariableContext,
    pub environment: VariableContext,
    pub collection: VariableContext,
    pub folders: Vec<VariableContext>,
    pub request: VariableContext,
    pub runtime: VariableContext,
    pub vault: Vault,
}

impl ScopeChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// 复制运行级作用域，并替换 folder 与 request 层
    pub fn for_request(&self, folders: Vec<VariableContext>, request: VariableContext) -> Self {
        Self {
            folders,
            request,
            ..self.clone()
        }
    }

    /// 按优先级从低到高遍历普通作用域（不含 vault）
    pub fn layers(&self) -> impl Iterator<Item = &VariableContext> {
        [&self.global, &self.environment, &self.collection]
            .into_iter()
            .chain(self.folders.iter())
            .chain([&self.request, &self.runtime])
    }

    /// 查找变量的最高优先级值
    pub fn lookup(&self, key: &str, now: DateTime<Utc>) -> Option<String> {
        if let Some(value) = self.vault.get(key, now) {
            return Some(value.to_string());
        }
        let layers: Vec<&VariableContext> = self.layers().collect();
        layers
            .into_iter()
            .rev()
            .find_map(|ctx| ctx.get(key))
            .map(str::to_string)
    }

    /// 合并后的有效变量视图
    pub fn effective(&self, now: DateTime<Utc>) -> HashMap<String, String> {
        let mut merged = HashMap::new();
        for ctx in self.layers() {
            merged.extend(ctx.to_map());
        }
        for (key, value) in self.vault.active(now) {
            merged.insert(key.clone(), value.to_string());
        }
        merged
    }

    pub fn scope(&self, scope: VariableScope) -> &VariableContext {
        match scope {
            VariableScope::Global => &self.global,
            VariableScope::Environment => &self.environment,
            VariableScope::Collection => &self.collection,
            VariableScope::Request => &self.request,
            VariableScope::Runtime => &self.runtime,
        }
    }

    pub fn scope_mut(&mut self, scope: VariableScope) -> &mut VariableContext {
        match scope {
            VariableScope::Global => &mut self.global,
            VariableScope::Environment => &mut self.environment,
            VariableScope::Collection => &mut self.collection,
            VariableScope::Request => &mut self.request,
            VariableScope::Runtime => &mut self.runtime,
        }
    }

    pub fn apply(&mut self, mutation: &VariableMutation) {
        let ctx = self.scope_mut(mutation.scope);
        match &mutation.value {
            Some(value) => ctx.insert(mutation.key.clone(), value.clone()),
            None => {
                ctx.remove(&mutation.key);
            }
        }
    }

    pub fn apply_all<'a>(&mut self, mutations: impl IntoIterator<Item = &'a VariableMutation>) {
        for mutation in mutations {
            self.apply(mutation);
        }
    }
}

/// 环境配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Environment {
    /// 变量映射
    #[serde(flatten)]
    pub variables: HashMap<String, String>,
}
