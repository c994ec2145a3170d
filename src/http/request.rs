use serde::{Deserialize, Serialize};

use crate::http::types::Method;

/// Digest 认证凭据，由传输层在 401 挑战后使用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestCredentials {
    pub username: String,
    pub password: String,
}

/// 传输提示
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransportHints {
    pub timeout_ms: Option<u64>,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub proxy_url: Option<String>,
    pub verify_tls: bool,
    pub digest: Option<DigestCredentials>,
}

impl Default for TransportHints {
    fn default() -> Self {
        Self {
            timeout_ms: Some(30_000),
            retry_count: 0,
            retry_delay_ms: 1000,
            proxy_url: None,
            verify_tls: true,
            digest: None,
        }
    }
}

/// 可直接交给传输层的 HTTP 调用描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub url: String,
    /// Header 列表，保持插入顺序
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub hints: TransportHints,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            hints: TransportHints::default(),
        }
    }

    /// 忽略大小写获取 Header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// 设置 Header，已存在的同名 Header（忽略大小写）会被替换
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(slot) = self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            slot.1 = value;
        } else {
            self.headers.push((name.to_string(), value));
        }
    }

    /// 追加 Header，不去重
    pub fn append_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// 删除 Header，返回是否删除了任何条目
    pub fn remove_header(&mut self, name: &str) -> bool {
        let before = self.headers.len();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        before != self.headers.len()
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.set_header(key, value);
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = Some(body.to_owned());
        self
    }

    pub fn with_json_body(mut self, json: &str) -> Self {
        self.set_header("Content-Type", "application/json");
        self.body = Some(json.to_owned());
        self
    }

    /// 追加查询参数到 URL，URL 无法解析时原样返回
    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        if let Ok(mut url) = url::Url::parse(&self.url) {
            url.query_pairs_mut().append_pair(key, value);
            self.url = url.to_string();
        }
        self
    }

    pub fn with_auth_bearer(mut self, token: &str) -> Self {
        self.set_header("Authorization", &format!("Bearer {}", token));
        self
    }
}
