use crate::assertion::AssertionDef;
use crate::http::Method;
use serde::{Deserialize, Serialize};

fn enabled_by_default() -> bool {
    true
}

/// 键值对（Header / Query / Cookie / 表单字段 / 变量）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,

    #[serde(default)]
    pub value: String,

    /// 禁用的条目不会参与构建请求或变量作用域
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            enabled: true,
        }
    }

    pub fn disabled(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            enabled: false,
            ..Self::new(key, value)
        }
    }
}

/// 请求体，按 mode 区分
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum RequestBody {
    #[default]
    None,
    Json {
        content: String,
    },
    Raw {
        content: String,
        #[serde(default, rename = "contentType")]
        content_type: Option<String>,
    },
    #[serde(alias = "urlencoded")]
    UrlEncoded {
        #[serde(default)]
        fields: Vec<KeyValue>,
    },
    #[serde(alias = "form-data")]
    Form {
        #[serde(default)]
        fields: Vec<KeyValue>,
    },
    Graphql {
        query: String,
        #[serde(default)]
        variables: String,
    },
    Binary {
        content: String,
        #[serde(default, rename = "contentType")]
        content_type: Option<String>,
    },
}

impl RequestBody {
    /// binary 内容按字面量透传，不做变量替换
    pub fn is_resolvable(&self) -> bool {
        !matches!(self, RequestBody::Binary { .. })
    }
}

/// API Key 放置位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    #[default]
    Header,
    Query,
}

/// 认证描述，按 type 区分
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Auth {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        #[serde(default)]
        password: String,
    },
    #[serde(rename = "apikey", alias = "api-key")]
    ApiKey {
        key: String,
        value: String,
        #[serde(default, rename = "in", alias = "location")]
        location: ApiKeyLocation,
    },
    Digest {
        username: String,
        password: String,
    },
    Ntlm {
        username: String,
        #[serde(default)]
        password: String,
        #[serde(default)]
        domain: String,
        #[serde(default)]
        workstation: String,
    },
    #[serde(rename = "awsv4", alias = "aws-sigv4")]
    AwsV4 {
        #[serde(rename = "accessKey")]
        access_key: String,
        #[serde(rename = "secretKey")]
        secret_key: String,
        #[serde(default, rename = "sessionToken")]
        session_token: Option<String>,
        region: String,
        service: String,
    },
    Wsse {
        username: String,
        password: String,
    },
}

/// 单个请求的传输设置，覆盖运行级默认值
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSettings {
    pub timeout_ms: Option<u64>,
    pub retry_count: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub proxy_url: Option<String>,
    pub verify_tls: Option<bool>,
}

/// 已保存的请求定义（对引擎只读）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDefinition {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub method: Method,

    pub url: String,

    #[serde(default)]
    pub headers: Vec<KeyValue>,

    #[serde(default)]
    pub params: Vec<KeyValue>,

    #[serde(default)]
    pub cookies: Vec<KeyValue>,

    #[serde(default)]
    pub body: RequestBody,

    #[serde(default)]
    pub auth: Auth,

    /// 请求级变量
    #[serde(default)]
    pub variables: Vec<KeyValue>,

    #[serde(default)]
    pub pre_request_script: String,

    #[serde(default)]
    pub post_response_script: String,

    #[serde(default)]
    pub assertions: Vec<AssertionDef>,

    /// 依赖的请求 id 或名称，逗号或换行分隔
    #[serde(default)]
    pub flow_depends_on: String,

    /// 布尔条件表达式
    #[serde(default)]
    pub flow_condition: String,

    #[serde(default)]
    pub settings: RequestSettings,
}

impl RequestDefinition {
    pub fn new(id: impl Into<String>, method: Method, url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            method,
            url: url.into(),
            headers: Vec::new(),
            params: Vec::new(),
            cookies: Vec::new(),
            body: RequestBody::None,
            auth: Auth::None,
            variables: Vec::new(),
            pre_request_script: String::new(),
            post_response_script: String::new(),
            assertions: Vec::new(),
            flow_depends_on: String::new(),
            flow_condition: String::new(),
            settings: RequestSettings::default(),
        }
    }

    /// 展示名称：优先 name，否则 id
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// 解析依赖列表
    pub fn dependencies(&self) -> Vec<String> {
        self.flow_depends_on
            .split([',', '\n'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn has_flow_control(&self) -> bool {
        !self.flow_depends_on.trim().is_empty() || !self.flow_condition.trim().is_empty()
    }

    /// 匹配依赖引用：先精确匹配 id / name，再忽略大小写匹配 name
    pub fn matches_reference(&self, reference: &str) -> bool {
        self.id == reference || self.name == reference || self.name.eq_ignore_ascii_case(reference)
    }
}

/// 文件夹，可嵌套，携带自己的变量与脚本
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    #[serde(default)]
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub variables: Vec<KeyValue>,

    #[serde(default)]
    pub pre_request_script: String,

    #[serde(default)]
    pub post_response_script: String,

    #[serde(default)]
    pub requests: Vec<RequestDefinition>,

    #[serde(default)]
    pub folders: Vec<Folder>,
}

/// 集合：请求树的根
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub variables: Vec<KeyValue>,

    #[serde(default)]
    pub pre_request_script: String,

    #[serde(default)]
    pub post_response_script: String,

    #[serde(default)]
    pub requests: Vec<RequestDefinition>,

    #[serde(default)]
    pub folders: Vec<Folder>,
}

impl Collection {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// 从 JSON 文本加载集合
    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// 集合中任意请求声明了依赖或条件
    pub fn has_flow_control(&self) -> bool {
        self.plan().iter().any(|p| p.request.has_flow_control())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependencies_split() {
        let mut req = RequestDefinition::new("b", Method::Get, "http://example.com");
        req.flow_depends_on = "login, profile\n\n settings ,".to_string();
        assert_eq!(req.dependencies(), vec!["login", "profile", "settings"]);
        assert!(req.has_flow_control());
    }

    #[test]
    fn test_request_from_json() {
        let json = r#"{
            "id": "r1",
            "name": "Create user",
            "method": "POST",
            "url": "{{base_url}}/users",
            "headers": [{"key": "X-Trace", "value": "1", "enabled": false}],
            "body": {"mode": "json", "content": "{\"name\":\"{{name}}\"}"},
            "auth": {"type": "apikey", "key": "X-Api-Key", "value": "k", "in": "query"},
            "assertions": [{"id": "a1", "type": "status", "comparison": "eq", "expected": "201"}],
            "flowDependsOn": "login"
        }"#;

        let req: RequestDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(req.method, Method::Post);
        assert!(!req.headers[0].enabled);
        assert!(matches!(req.body, RequestBody::Json { .. }));
        assert_eq!(
            req.auth,
            Auth::ApiKey {
                key: "X-Api-Key".to_string(),
                value: "k".to_string(),
                location: ApiKeyLocation::Query,
            }
        );
        assert_eq!(req.assertions.len(), 1);
        assert_eq!(req.dependencies(), vec!["login"]);
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        let mut req = RequestDefinition::new("r1", Method::Get, "http://example.com");
        req.name = "  ".to_string();
        assert_eq!(req.display_name(), "r1");
    }
}
