use ruman::collection::{ApiKeyLocation, Auth, KeyValue, RequestBody, RequestDefinition};
use ruman::http::Method;
use ruman::payload::PayloadBuilder;
use ruman::variable::{DataRow, ScopeChain};

fn scopes() -> ScopeChain {
    let mut chain = ScopeChain::new();
    chain.environment.insert("host", "api.example.com");
    chain.environment.insert("token", "secret");
    chain.runtime.insert("user", "alice");
    chain
}

#[test]
fn test_build_resolves_url_params_and_bearer() {
    let chain = scopes();
    let row = DataRow::from([("page".to_string(), "2".to_string())]);

    let mut def = RequestDefinition::new("list", Method::Get, "{{host}}/users");
    def.params = vec![
        KeyValue::new("page", "{{page}}"),
        KeyValue::disabled("debug", "1"),
    ];
    def.auth = Auth::Bearer {
        token: "{{token}}".to_string(),
    };

    let request = PayloadBuilder::new(&chain, &row).build(&def).unwrap();
    assert_eq!(request.url, "http://api.example.com/users?page=2");
    assert_eq!(request.header("authorization"), Some("Bearer secret"));
}

#[test]
fn test_json_body_and_explicit_content_type() {
    let chain = scopes();
    let row = DataRow::new();

    let mut def = RequestDefinition::new("create", Method::Post, "http://localhost/users");
    def.body = RequestBody::Json {
        content: r#"{"name":"{{user}}"}"#.to_string(),
    };
    let request = PayloadBuilder::new(&chain, &row).build(&def).unwrap();
    assert_eq!(request.body.as_deref(), Some(r#"{"name":"alice"}"#));
    assert_eq!(request.header("content-type"), Some("application/json"));

    def.headers = vec![KeyValue::new("Content-Type", "application/vnd.api+json")];
    let request = PayloadBuilder::new(&chain, &row).build(&def).unwrap();
    assert_eq!(request.header("content-type"), Some("application/vnd.api+json"));
}

#[test]
fn test_urlencoded_and_api_key_query() {
    let chain = scopes();
    let row = DataRow::new();

    let mut def = RequestDefinition::new("login", Method::Post, "http://localhost/login");
    def.body = RequestBody::UrlEncoded {
        fields: vec![
            KeyValue::new("user", "{{user}}"),
            KeyValue::new("note", "a b&c"),
        ],
    };
    def.auth = Auth::ApiKey {
        key: "api_key".to_string(),
        value: "{{token}}".to_string(),
        location: ApiKeyLocation::Query,
    };

    let request = PayloadBuilder::new(&chain, &row).build(&def).unwrap();
    assert_eq!(request.body.as_deref(), Some("user=alice&note=a+b%26c"));
    assert_eq!(
        request.header("content-type"),
        Some("application/x-www-form-urlencoded")
    );
    assert!(request.url.ends_with("/login?api_key=secret"));
}

#[test]
fn test_cookies_merge_into_header() {
    let chain = scopes();
    let row = DataRow::new();

    let mut def = RequestDefinition::new("me", Method::Get, "http://localhost/me");
    def.headers = vec![KeyValue::new("Cookie", "a=1;")];
    def.cookies = vec![KeyValue::new("sid", "{{token}}")];

    let request = PayloadBuilder::new(&chain, &row).build(&def).unwrap();
    assert_eq!(request.header("cookie"), Some("a=1; sid=secret"));
}

#[test]
fn test_invalid_graphql_variables_fail() {
    let chain = scopes();
    let row = DataRow::new();

    let mut def = RequestDefinition::new("gql", Method::Post, "http://localhost/graphql");
    def.body = RequestBody::Graphql {
        query: "{ me { id } }".to_string(),
        variables: "{not json".to_string(),
    };
    assert!(PayloadBuilder::new(&chain, &row).build(&def).is_err());
}
