use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::http::{Method, Request};
use crate::{Result, RumanError};

/// 故障注入用例
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChaosCase {
    StripBody,
    DropAuth,
    InvalidJson,
    RandomMethod,
}

impl ChaosCase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChaosCase::StripBody => "strip-body",
            ChaosCase::DropAuth => "drop-auth",
            ChaosCase::InvalidJson => "invalid-json",
            ChaosCase::RandomMethod => "random-method",
        }
    }
}

impl fmt::Display for ChaosCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 故障注入强度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChaosLevel {
    Light,
    Aggressive,
}

impl ChaosLevel {
    pub fn cases(&self) -> &'static [ChaosCase] {
        match self {
            ChaosLevel::Light => &[ChaosCase::StripBody, ChaosCase::DropAuth],
            ChaosLevel::Aggressive => &[
                ChaosCase::StripBody,
                ChaosCase::DropAuth,
                ChaosCase::InvalidJson,
                ChaosCase::RandomMethod,
            ],
        }
    }
}

impl FromStr for ChaosLevel {
    type Err = RumanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "light" => Ok(ChaosLevel::Light),
            "aggressive" => Ok(ChaosLevel::Aggressive),
            other => Err(RumanError::ParseError(format!(
                "Invalid chaos level: {} (expected light or aggressive)",
                other
            ))),
        }
    }
}

const INVALID_JSON: &str = r#"{"chaos": true, "payload": [1, 2,"#;

fn is_auth_header(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name == "authorization"
        || name == "x-wsse"
        || name.contains("api-key")
        || name.contains("apikey")
        || name.contains("api_key")
}

/// 生成变异副本，原请求不变
pub fn mutate(request: &Request, case: ChaosCase) -> Request {
    let mut mutated = request.clone();
    match case {
        ChaosCase::StripBody => {
            mutated.body = None;
            mutated.remove_header("Content-Type");
        }
        ChaosCase::DropAuth => {
            mutated.headers.retain(|(name, _)| !is_auth_header(name));
            mutated.hints.digest = None;
        }
        ChaosCase::InvalidJson => {
            mutated.set_header("Content-Type", "application/json");
            mutated.body = Some(INVALID_JSON.to_string());
        }
        ChaosCase::RandomMethod => {
            mutated.method = Method::Trace;
        }
    }
    mutated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Request {
        Request::new(Method::Post, "https://api.example.com/orders")
            .with_header("Content-Type", "application/json")
            .with_header("authorization", "Bearer t")
            .with_header("X-Api-Key", "k")
            .with_header("Accept", "*/*")
            .with_body(r#"{"qty": 1}"#)
    }

    #[test]
    fn test_strip_body_leaves_original() {
        let original = base();
        let mutated = mutate(&original, ChaosCase::StripBody);

        assert!(mutated.body.is_none());
        assert!(mutated.header("content-type").is_none());
        assert_eq!(original, base());
        assert!(original.body.is_some());
    }

    #[test]
    fn test_drop_auth() {
        let mutated = mutate(&base(), ChaosCase::DropAuth);
        assert!(mutated.header("Authorization").is_none());
        assert!(mutated.header("x-api-key").is_none());
        assert_eq!(mutated.header("Accept"), Some("*/*"));
    }

    #[test]
    fn test_invalid_json_and_method() {
        let mutated = mutate(&Request::new(Method::Get, "http://x"), ChaosCase::InvalidJson);
        assert_eq!(mutated.header("content-type"), Some("application/json"));
        assert!(serde_json::from_str::<serde_json::Value>(mutated.body.as_deref().unwrap()).is_err());

        let mutated = mutate(&base(), ChaosCase::RandomMethod);
        assert_eq!(mutated.method, Method::Trace);
    }

    #[test]
    fn test_levels() {
        assert_eq!(ChaosLevel::Light.cases().len(), 2);
        assert_eq!(ChaosLevel::Aggressive.cases().len(), 4);
        assert_eq!("Aggressive".parse::<ChaosLevel>().unwrap(), ChaosLevel::Aggressive);
        assert!("wild".parse::<ChaosLevel>().is_err());
    }
}
