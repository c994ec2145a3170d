use chrono::Utc;
use tracing::{debug, warn};
use url::form_urlencoded::byte_serialize;

use crate::Result;
use crate::collection::{KeyValue, RequestBody, RequestDefinition, RequestSettings};
use crate::http::{Request, TransportHints, normalize_url};
use crate::payload::auth::{apply_auth, resolve_auth};
use crate::variable::resolver::token_regex;
use crate::variable::{DataRow, ScopeChain, VariableResolver};

/// 请求体构建结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltBody {
    pub content: String,
    /// 派生的 Content-Type；显式 Header 优先
    pub content_type: Option<String>,
}

/// 把请求定义与变量作用域转换为可发送的调用描述
pub struct PayloadBuilder<'a> {
    chain: &'a ScopeChain,
    row: &'a DataRow,
    defaults: TransportHints,
}

impl<'a> PayloadBuilder<'a> {
    pub fn new(chain: &'a ScopeChain, row: &'a DataRow) -> Self {
        Self {
            chain,
            row,
            defaults: TransportHints::default(),
        }
    }

    /// 运行级的传输默认值，请求自身的 settings 会覆盖它们
    pub fn with_defaults(mut self, defaults: TransportHints) -> Self {
        self.defaults = defaults;
        self
    }

    /// 数据行 + 作用域链解析
    pub fn resolve(&self, text: &str) -> String {
        VariableResolver::resolve_with_row(text, self.chain, self.row)
    }

    /// 完整构建：URL、Header、Cookie、Body、传输提示与认证
    pub fn build(&self, definition: &RequestDefinition) -> Result<Request> {
        let mut request = self.prepare(definition)?;
        self.finalize_url(&mut request)?;
        self.authorize(definition, &mut request)?;
        Ok(request)
    }

    /// 构建除认证以外的部分
    ///
    /// URL 保持为文本模板，未解析的令牌原样保留，
    /// 由 `finalize_url` 在前置脚本之后规范化。
    pub fn prepare(&self, definition: &RequestDefinition) -> Result<Request> {
        let url = self.build_url(&definition.url, &definition.params);
        let mut request = Request::new(definition.method, url);

        for header in enabled(&definition.headers) {
            request.append_header(self.resolve(header.key.trim()), self.resolve(&header.value));
        }

        if let Some(cookie) = self.cookie_header(&definition.cookies) {
            match request.header("cookie") {
                Some(existing) if !existing.trim().is_empty() => {
                    let merged = format!("{}; {}", existing.trim_end_matches(';').trim(), cookie);
                    request.set_header("Cookie", merged);
                }
                _ => request.set_header("Cookie", cookie),
            }
        }

        if let Some(body) = self.build_body(&definition.body)? {
            if let Some(content_type) = body.content_type
                && !request.has_header("content-type")
            {
                request.set_header("Content-Type", content_type);
            }
            request.body = Some(body.content);
        }

        request.hints = self.build_hints(&definition.settings);
        debug!("Prepared {} {}", request.method, request.url);
        Ok(request)
    }

    /// 认证物化：字段先做变量解析，再按类型写入请求
    pub fn authorize(&self, definition: &RequestDefinition, request: &mut Request) -> Result<()> {
        let auth = resolve_auth(&definition.auth, |s| self.resolve(s));
        apply_auth(&auth, request, Utc::now())
    }

    /// 脚本修改请求后再次解析 URL、Header 与 Body
    pub fn re_resolve(&self, request: &mut Request, resolve_body: bool) {
        request.url = self.resolve(&request.url);
        for (key, value) in request.headers.iter_mut() {
            *key = self.resolve(key);
            *value = self.resolve(value);
        }
        if resolve_body && let Some(body) = request.body.as_mut() {
            *body = self.resolve(body);
        }
    }

    /// 规范化 URL（补全 scheme / host）并校验
    pub fn finalize_url(&self, request: &mut Request) -> Result<()> {
        if VariableResolver::has_tokens(&request.url) {
            warn!("Unresolved variables in URL {}", request.url);
        }
        request.url = normalize_url(&request.url)?.to_string();
        Ok(())
    }

    /// 解析模板并追加查询参数，不做 URL 解析
    fn build_url(&self, template: &str, params: &[KeyValue]) -> String {
        let resolved = self.resolve(template);
        let query: Vec<String> = enabled(params)
            .map(|p| {
                format!(
                    "{}={}",
                    encode_component(&self.resolve(p.key.trim())),
                    encode_component(&self.resolve(&p.value))
                )
            })
            .collect();
        if query.is_empty() {
            return resolved;
        }

        let (base, fragment) = match resolved.split_once('#') {
            Some((base, fragment)) => (base, Some(fragment)),
            None => (resolved.as_str(), None),
        };
        let separator = match base.find('?') {
            Some(pos) if pos + 1 < base.len() && !base.ends_with('&') => "&",
            Some(_) => "",
            None => "?",
        };
        let mut url = format!("{}{}{}", base, separator, query.join("&"));
        if let Some(fragment) = fragment {
            url.push('#');
            url.push_str(fragment);
        }
        url
    }

    fn cookie_header(&self, cookies: &[KeyValue]) -> Option<String> {
        let jar: Vec<String> = enabled(cookies)
            .map(|c| format!("{}={}", self.resolve(c.key.trim()), self.resolve(&c.value)))
            .collect();
        if jar.is_empty() {
            None
        } else {
            Some(jar.join("; "))
        }
    }

    /// 按 body 类型构建请求体
    pub fn build_body(&self, body: &RequestBody) -> Result<Option<BuiltBody>> {
        let built = match body {
            RequestBody::None => return Ok(None),

            RequestBody::Json { content } => BuiltBody {
                content: self.resolve(content),
                content_type: Some("application/json".to_string()),
            },

            RequestBody::Raw {
                content,
                content_type,
            } => BuiltBody {
                content: self.resolve(content),
                content_type: content_type.clone().filter(|c| !c.trim().is_empty()),
            },

            RequestBody::UrlEncoded { fields } => {
                let mut serializer = url::form_urlencoded::Serializer::new(String::new());
                for field in enabled(fields) {
                    serializer.append_pair(&self.resolve(field.key.trim()), &self.resolve(&field.value));
                }
                BuiltBody {
                    content: serializer.finish(),
                    content_type: Some("application/x-www-form-urlencoded".to_string()),
                }
            }

            RequestBody::Form { fields } => {
                let boundary = format!("----RumanFormBoundary{}", uuid::Uuid::new_v4().simple());
                let mut content = String::new();
                for field in enabled(fields) {
                    content.push_str(&format!(
                        "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                        boundary,
                        self.resolve(field.key.trim()),
                        self.resolve(&field.value)
                    ));
                }
                content.push_str(&format!("--{}--\r\n", boundary));
                BuiltBody {
                    content,
                    content_type: Some(format!("multipart/form-data; boundary={}", boundary)),
                }
            }

            RequestBody::Graphql { query, variables } => {
                let variables_text = self.resolve(variables);
                let variables: serde_json::Value = if variables_text.trim().is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str(&variables_text).map_err(|e| {
                        crate::RumanError::ParseError(format!("Invalid GraphQL variables: {}", e))
                    })?
                };
                let payload = serde_json::json!({
                    "query": self.resolve(query),
                    "variables": variables,
                });
                BuiltBody {
                    content: serde_json::to_string(&payload)?,
                    content_type: Some("application/json".to_string()),
                }
            }

            RequestBody::Binary {
                content,
                content_type,
            } => BuiltBody {
                content: content.clone(),
                content_type: Some(
                    content_type
                        .clone()
                        .filter(|c| !c.trim().is_empty())
                        .unwrap_or_else(|| "application/octet-stream".to_string()),
                ),
            },
        };
        Ok(Some(built))
    }

    fn build_hints(&self, settings: &RequestSettings) -> TransportHints {
        let defaults = &self.defaults;
        TransportHints {
            timeout_ms: settings.timeout_ms.or(defaults.timeout_ms),
            retry_count: settings.retry_count.unwrap_or(defaults.retry_count),
            retry_delay_ms: settings.retry_delay_ms.unwrap_or(defaults.retry_delay_ms),
            proxy_url: settings
                .proxy_url
                .as_deref()
                .map(|p| self.resolve(p))
                .filter(|p| !p.trim().is_empty())
                .or_else(|| defaults.proxy_url.clone()),
            verify_tls: settings.verify_tls.unwrap_or(defaults.verify_tls),
            digest: None,
        }
    }
}

/// 表单编码，`{{token}}` 原样保留以便脚本之后再解析
fn encode_component(text: &str) -> String {
    let mut encoded = String::new();
    let mut last = 0;
    for token in token_regex().find_iter(text) {
        encoded.extend(byte_serialize(text[last..token.start()].as_bytes()));
        encoded.push_str(token.as_str());
        last = token.end();
    }
    encoded.extend(byte_serialize(text[last..].as_bytes()));
    encoded
}

fn enabled(entries: &[KeyValue]) -> impl Iterator<Item = &KeyValue> {
    entries
        .iter()
        .filter(|kv| kv.enabled && !kv.key.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Auth;
    use crate::http::Method;

    fn chain() -> ScopeChain {
        let mut chain = ScopeChain::new();
        chain.environment.insert("base", "https://api.example.com");
        chain.environment.insert("token", "t-123");
        chain
    }

    #[test]
    fn test_build_url_with_params() {
        let chain = chain();
        let row = DataRow::new();
        let mut def = RequestDefinition::new("r1", Method::Get, "{{base}}/users");
        def.params = vec![
            KeyValue::new("page", "1"),
            KeyValue::disabled("debug", "true"),
            KeyValue::new("q", "a b"),
        ];

        let request = PayloadBuilder::new(&chain, &row).build(&def).unwrap();
        assert_eq!(request.url, "https://api.example.com/users?page=1&q=a+b");
    }

    #[test]
    fn test_data_row_overrides_scope() {
        let chain = chain();
        let mut row = DataRow::new();
        row.insert("token".to_string(), "row-token".to_string());
        let mut def = RequestDefinition::new("r1", Method::Get, "{{base}}/me");
        def.auth = Auth::Bearer {
            token: "{{token}}".to_string(),
        };

        let request = PayloadBuilder::new(&chain, &row).build(&def).unwrap();
        assert_eq!(request.header("authorization"), Some("Bearer row-token"));
    }

    #[test]
    fn test_cookies_join_existing_header() {
        let chain = chain();
        let row = DataRow::new();
        let mut def = RequestDefinition::new("r1", Method::Get, "{{base}}");
        def.headers = vec![KeyValue::new("Cookie", "a=1;")];
        def.cookies = vec![KeyValue::new("b", "2"), KeyValue::new("c", "{{token}}")];

        let request = PayloadBuilder::new(&chain, &row).build(&def).unwrap();
        assert_eq!(request.header("cookie"), Some("a=1; b=2; c=t-123"));
    }

    #[test]
    fn test_json_body_keeps_explicit_content_type() {
        let chain = chain();
        let row = DataRow::new();
        let mut def = RequestDefinition::new("r1", Method::Post, "{{base}}/items");
        def.headers = vec![KeyValue::new("Content-Type", "application/vnd.api+json")];
        def.body = RequestBody::Json {
            content: r#"{"token":"{{token}}"}"#.to_string(),
        };

        let request = PayloadBuilder::new(&chain, &row).build(&def).unwrap();
        assert_eq!(request.body.as_deref(), Some(r#"{"token":"t-123"}"#));
        assert_eq!(request.header("content-type"), Some("application/vnd.api+json"));
    }

    #[test]
    fn test_url_encoded_body() {
        let chain = chain();
        let row = DataRow::new();
        let builder = PayloadBuilder::new(&chain, &row);
        let body = builder
            .build_body(&RequestBody::UrlEncoded {
                fields: vec![
                    KeyValue::new("name", "J Doe"),
                    KeyValue::disabled("skip", "x"),
                    KeyValue::new("amp", "a&b"),
                ],
            })
            .unwrap()
            .unwrap();
        assert_eq!(body.content, "name=J+Doe&amp=a%26b");
        assert_eq!(
            body.content_type.as_deref(),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[test]
    fn test_form_body_uses_boundary() {
        let chain = chain();
        let row = DataRow::new();
        let body = PayloadBuilder::new(&chain, &row)
            .build_body(&RequestBody::Form {
                fields: vec![KeyValue::new("field", "value")],
            })
            .unwrap()
            .unwrap();
        let content_type = body.content_type.unwrap();
        let boundary = content_type.split("boundary=").nth(1).unwrap();
        assert!(body.content.starts_with(&format!("--{}\r\n", boundary)));
        assert!(body.content.contains("name=\"field\"\r\n\r\nvalue\r\n"));
        assert!(body.content.ends_with(&format!("--{}--\r\n", boundary)));
    }

    #[test]
    fn test_graphql_body() {
        let chain = chain();
        let row = DataRow::new();
        let body = PayloadBuilder::new(&chain, &row)
            .build_body(&RequestBody::Graphql {
                query: "{ me { id } }".to_string(),
                variables: r#"{"token":"{{token}}"}"#.to_string(),
            })
            .unwrap()
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&body.content).unwrap();
        assert_eq!(json["query"], "{ me { id } }");
        assert_eq!(json["variables"]["token"], "t-123");
    }

    #[test]
    fn test_binary_body_is_not_resolved() {
        let chain = chain();
        let row = DataRow::new();
        let body = PayloadBuilder::new(&chain, &row)
            .build_body(&RequestBody::Binary {
                content: "{{token}}".to_string(),
                content_type: None,
            })
            .unwrap()
            .unwrap();
        assert_eq!(body.content, "{{token}}");
        assert_eq!(body.content_type.as_deref(), Some("application/octet-stream"));
    }

    #[test]
    fn test_settings_override_defaults() {
        let chain = chain();
        let row = DataRow::new();
        let mut def = RequestDefinition::new("r1", Method::Get, "{{base}}");
        def.settings = RequestSettings {
            timeout_ms: Some(500),
            retry_count: Some(2),
            verify_tls: Some(false),
            ..RequestSettings::default()
        };

        let request = PayloadBuilder::new(&chain, &row).build(&def).unwrap();
        assert_eq!(request.hints.timeout_ms, Some(500));
        assert_eq!(request.hints.retry_count, 2);
        assert_eq!(request.hints.retry_delay_ms, 1000);
        assert!(!request.hints.verify_tls);
    }

    #[test]
    fn test_re_resolve_after_script() {
        let mut chain = chain();
        let row = DataRow::new();
        let def = RequestDefinition::new("r1", Method::Get, "{{base}}/a");
        let mut request = PayloadBuilder::new(&chain, &row).prepare(&def).unwrap();
        request.set_header("X-Trace", "{{trace}}");

        chain.runtime.insert("trace", "abc");
        PayloadBuilder::new(&chain, &row).re_resolve(&mut request, true);
        assert_eq!(request.header("x-trace"), Some("abc"));
    }

    #[test]
    fn test_unresolved_path_tokens_survive_until_finalize() {
        let mut chain = chain();
        let row = DataRow::new();
        let mut def = RequestDefinition::new("r1", Method::Get, "{{host}}/users/{{id}}");
        def.params = vec![KeyValue::new("q", "{{id}} x")];

        let mut request = PayloadBuilder::new(&chain, &row).prepare(&def).unwrap();
        assert_eq!(request.url, "{{host}}/users/{{id}}?q={{id}}+x");

        chain.runtime.insert("host", "api.test");
        chain.runtime.insert("id", "42");
        let builder = PayloadBuilder::new(&chain, &row);
        builder.re_resolve(&mut request, false);
        builder.finalize_url(&mut request).unwrap();
        assert_eq!(request.url, "http://api.test/users/42?q=42+x");
    }

    #[test]
    fn test_params_join_existing_query_before_fragment() {
        let chain = chain();
        let row = DataRow::new();
        let mut def = RequestDefinition::new("r1", Method::Get, "{{base}}/a?x=1#top");
        def.params = vec![KeyValue::new("y", "2")];

        let request = PayloadBuilder::new(&chain, &row).build(&def).unwrap();
        assert_eq!(request.url, "https://api.example.com/a?x=1&y=2#top");
    }

    #[test]
    fn test_empty_url_fails_to_finalize() {
        let chain = chain();
        let row = DataRow::new();
        let def = RequestDefinition::new("r1", Method::Get, "");
        assert!(PayloadBuilder::new(&chain, &row).build(&def).is_err());
    }
}
