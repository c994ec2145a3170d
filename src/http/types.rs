use std::fmt;
use std::str::FromStr;

use crate::{Result, RumanError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Trace,
}

impl FromStr for Method {
    type Err = RumanError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "PATCH" => Ok(Method::Patch),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            "TRACE" => Ok(Method::Trace),
            _ => Err(RumanError::ParseError(format!(
                "Invalid HTTP method: {}",
                s
            ))),
        }
    }
}

impl Method {
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
        }
    }

    /// GET / HEAD / OPTIONS 不携带请求体
    pub fn allows_body(&self) -> bool {
        !matches!(self, Method::Get | Method::Head | Method::Options)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// 以大写字符串形式序列化，例如 "GET"
impl Serialize for Method {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Method {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// 默认 host，当 URL 中未指定 host 时使用
const DEFAULT_HOST: &str = "localhost";
/// 默认 scheme，当 URL 中未指定 scheme 时使用
const DEFAULT_SCHEME: &str = "http";

/// 规范化简写 URL 并解析
///
/// 处理各种简化格式:
/// 1. ":3000" -> "http://localhost:3000"
/// 2. "localhost:3000" -> "http://localhost:3000"
/// 3. "https://:8080" -> "https://localhost:8080"
pub fn normalize_url(s: &str) -> Result<url::Url> {
    let input = s.trim();
    if input.is_empty() {
        return Err(RumanError::InvalidUrl("empty URL".to_string()));
    }

    let normalized = if input.starts_with(':') {
        format!("{}://{}{}", DEFAULT_SCHEME, DEFAULT_HOST, input)
    } else if let Some(pos) = input.find("://") {
        let after_scheme = &input[pos + 3..];
        if after_scheme.starts_with(':') {
            format!("{}://{}{}", &input[..pos], DEFAULT_HOST, after_scheme)
        } else {
            input.to_string()
        }
    } else {
        format!("{}://{}", DEFAULT_SCHEME, input)
    };

    url::Url::parse(&normalized).map_err(|e| RumanError::InvalidUrl(format!("{}: {}", input, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_roundtrip_case_insensitive() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!(Method::parse(" Trace ").unwrap(), Method::Trace);
        assert!(Method::parse("FETCH").is_err());
        assert_eq!(Method::Patch.to_string(), "PATCH");
    }

    #[test]
    fn test_method_serde() {
        let m: Method = serde_json::from_str("\"delete\"").unwrap();
        assert_eq!(m, Method::Delete);
        assert_eq!(serde_json::to_string(&Method::Put).unwrap(), "\"PUT\"");
    }

    #[test]
    fn test_parse_full_url() {
        let url = normalize_url("https://api.example.com:8443/v1/users?id=1#section").unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("api.example.com"));
        assert_eq!(url.port(), Some(8443));
        assert_eq!(url.path(), "/v1/users");
        assert_eq!(url.query(), Some("id=1"));
    }

    #[test]
    fn test_parse_url_without_scheme() {
        let url = normalize_url("example.com/api/users").unwrap();
        assert_eq!(url.as_str(), "http://example.com/api/users");
    }

    #[test]
    fn test_parse_port_only() {
        let url = normalize_url(":8080/path").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/path");
    }

    #[test]
    fn test_parse_port_with_scheme() {
        let url = normalize_url("https://:8080").unwrap();
        assert_eq!(url.host_str(), Some("localhost"));
        assert_eq!(url.port(), Some(8080));
    }

    #[test]
    fn test_parse_localhost_with_port() {
        let url = normalize_url("  localhost:3000/api/v1  ").unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/api/v1");
    }

    #[test]
    fn test_parse_empty_url() {
        assert!(normalize_url("   ").is_err());
    }
}
