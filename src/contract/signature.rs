use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use crate::collection::RequestDefinition;
use crate::http::Response;

/// 响应形状指纹：`{status}|{content-type}|{schema}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSignature {
    pub status: u16,
    pub content_type: String,
    pub schema: String,
}

impl ContractSignature {
    pub fn from_response(response: &Response) -> Self {
        let content_type = normalize_content_type(&response.content_type);
        let schema = body_schema(&content_type, &response.body);
        Self {
            status: response.status,
            content_type,
            schema,
        }
    }
}

impl fmt::Display for ContractSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.status, self.content_type, self.schema)
    }
}

/// 去掉参数并统一大小写；`+json` 后缀归为 application/json
pub fn normalize_content_type(raw: &str) -> String {
    let media = raw.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    if media.is_empty() {
        "none".to_string()
    } else if media.ends_with("+json") {
        "application/json".to_string()
    } else {
        media
    }
}

fn is_json_type(content_type: &str) -> bool {
    content_type == "application/json" || content_type.ends_with("/json")
}

fn body_schema(content_type: &str, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty".to_string();
    }
    let looks_json = trimmed.starts_with('{') || trimmed.starts_with('[');
    if is_json_type(content_type) || looks_json {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => infer_schema(&value),
            Err(_) if is_json_type(content_type) => "invalid-json".to_string(),
            Err(_) => "text".to_string(),
        }
    } else {
        "text".to_string()
    }
}

/// 递归推断结构，只保留类型名，对象键排序
pub fn infer_schema(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "boolean".to_string(),
        Value::Number(_) => "number".to_string(),
        Value::String(_) => "string".to_string(),
        Value::Array(items) => {
            let kinds: BTreeSet<String> = items.iter().map(infer_schema).collect();
            if kinds.is_empty() {
                "array<unknown>".to_string()
            } else {
                format!("array<{}>", kinds.into_iter().collect::<Vec<_>>().join("|"))
            }
        }
        Value::Object(map) => {
            let mut fields: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}:{}", k, infer_schema(v)))
                .collect();
            fields.sort();
            format!("{{{}}}", fields.join(","))
        }
    }
}

fn path_param_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?::([A-Za-z_][\w-]*)|\{\{?\s*([^{}\s]+)\s*\}?\})$")
            .expect("path param pattern is valid")
    })
}

/// 推断请求必需的路径与查询参数，如 `path:id`、`query:page`
pub fn required_params(request: &RequestDefinition) -> BTreeSet<String> {
    let mut params = BTreeSet::new();

    let without_scheme = request
        .url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(&request.url);
    let (path, query) = without_scheme
        .split_once('?')
        .unwrap_or((without_scheme, ""));

    for segment in path.split('/').skip(1) {
        if let Some(caps) = path_param_regex().captures(segment.trim())
            && let Some(name) = caps.get(1).or_else(|| caps.get(2))
        {
            params.insert(format!("path:{}", name.as_str()));
        }
    }

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let key = pair.split('=').next().unwrap_or_default().trim();
        if !key.is_empty() {
            params.insert(format!("query:{}", key));
        }
    }

    for param in request.params.iter().filter(|p| p.enabled && !p.key.trim().is_empty()) {
        params.insert(format!("query:{}", param.key.trim()));
    }

    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::KeyValue;
    use crate::http::Method;

    fn json(status: u16, body: &str) -> Response {
        Response::new(status, body).with_header("Content-Type", "application/json; charset=utf-8")
    }

    #[test]
    fn test_leaf_values_do_not_matter() {
        let a = ContractSignature::from_response(&json(200, r#"{"id": 1, "name": "a", "tags": ["x"]}"#));
        let b = ContractSignature::from_response(&json(200, r#"{"name": "bbb", "tags": ["y", "z"], "id": 99}"#));
        assert_eq!(a, b);
        assert_eq!(
            a.to_string(),
            "200|application/json|{id:number,name:string,tags:array<string>}"
        );
    }

    #[test]
    fn test_added_key_changes_signature() {
        let a = ContractSignature::from_response(&json(200, r#"{"id": 1}"#));
        let b = ContractSignature::from_response(&json(200, r#"{"id": 1, "extra": true}"#));
        assert_ne!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_invalid_and_text_bodies() {
        let sig = ContractSignature::from_response(&json(500, "{oops"));
        assert_eq!(sig.schema, "invalid-json");

        let sig = ContractSignature::from_response(&Response::new(200, "hello"));
        assert_eq!(sig.to_string(), "200|text/plain|text");

        let sig = ContractSignature::from_response(&Response::new(204, ""));
        assert_eq!(sig.schema, "empty");
    }

    #[test]
    fn test_content_type_family() {
        assert_eq!(normalize_content_type("Application/Problem+JSON"), "application/json");
        assert_eq!(normalize_content_type(""), "none");
    }

    #[test]
    fn test_required_params() {
        let mut req = RequestDefinition::new(
            "r1",
            Method::Get,
            "{{base}}/users/:id/posts/{{post_id}}?page=1&sort",
        );
        req.params = vec![KeyValue::new("limit", "10"), KeyValue::disabled("debug", "1")];

        let params: Vec<_> = required_params(&req).into_iter().collect();
        assert_eq!(
            params,
            vec!["path:id", "path:post_id", "query:limit", "query:page", "query:sort"]
        );
    }
}
