use chrono::{Duration, Utc};
use ruman::collection::KeyValue;
use ruman::variable::{
    ConfigLoader, DataFormat, DataRow, DataSource, ScopeChain, VariableContext, VariableResolver,
};
use std::fs;
use tempfile::TempDir;

/// 测试从实际配置文件加载变量与运行选项
#[test]
fn test_load_config_from_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("ruman.toml");

    let config_content = r#"
[globals]
agent = "ruman"

[environments.dev]
base_url = "http://localhost:3000"
api_key = "dev-key-123"

[runner]
delay_ms = 50
stop_on_failure = true
"#;

    fs::write(&config_path, config_content).unwrap();

    let config = ConfigLoader::load_from_path(&config_path).unwrap();
    assert_eq!(config.globals.get("agent"), Some(&"ruman".to_string()));
    assert_eq!(config.runner.delay_ms, 50);
    assert!(config.runner.stop_on_failure);

    let chain = ConfigLoader::build_scope_chain(
        &config,
        Some("dev"),
        &[("api_key".to_string(), "cli-key".to_string())],
    );
    let text = VariableResolver::resolve("{{base_url}}?k={{api_key}}&a={{agent}}", &chain);
    assert_eq!(text, "http://localhost:3000?k=cli-key&a=ruman");
}

/// 测试作用域优先级：runtime 覆盖 request，request 覆盖 folder，依此类推
#[test]
fn test_scope_precedence() {
    let mut chain = ScopeChain::new();
    chain.global.insert("host", "global");
    chain.environment.insert("host", "env");
    chain.collection.insert("host", "collection");

    let mut folder = VariableContext::new();
    folder.insert("host", "folder");
    let request = VariableContext::from_key_values(&[
        KeyValue::new("path", "/users"),
        KeyValue::disabled("host", "disabled"),
    ]);
    let chain = chain.for_request(vec![folder], request);

    assert_eq!(VariableResolver::resolve("{{host}}{{path}}", &chain), "folder/users");

    let mut chain = chain;
    chain.runtime.insert("host", "runtime");
    assert_eq!(VariableResolver::resolve("{{host}}", &chain), "runtime");
}

/// 测试 vault 过期值不再参与解析
#[test]
fn test_vault_expiry() {
    let mut chain = ScopeChain::new();
    chain.runtime.insert("token", "runtime-token");
    chain.vault.insert("token", "vault-token", Duration::minutes(5));

    let now = Utc::now();
    assert_eq!(VariableResolver::resolve_at("{{token}}", &chain, now), "vault-token");

    let later = now + Duration::minutes(10);
    assert_eq!(
        VariableResolver::resolve_at("{{token}}", &chain, later),
        "runtime-token"
    );
    assert_eq!(chain.vault.purge_expired(later), 1);
}

/// 测试未定义变量保持原样，数据行优先于作用域
#[test]
fn test_row_wins_and_unknown_kept() {
    let mut chain = ScopeChain::new();
    chain.environment.insert("user", "env-user");
    let row = DataRow::from([("user".to_string(), "row-user".to_string())]);

    let text = VariableResolver::resolve_with_row("{{user}}/{{missing}}", &chain, &row);
    assert_eq!(text, "row-user/{{missing}}");
}

/// 测试 CSV 数据文件解析为迭代行
#[test]
fn test_data_file_rows() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("users.csv");
    fs::write(&path, "user,role\nalice,admin\nbob,viewer\n").unwrap();

    let source = DataSource::from_path(&path).unwrap();
    assert_eq!(source.format, DataFormat::Csv);

    let rows = source.parse_rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].get("role"), Some(&"viewer".to_string()));
}

/// 测试无法解析的 JSON 数据源退化为单个空行
#[test]
fn test_bad_json_data_falls_back() {
    let rows = DataSource::new(DataFormat::Json, "{oops").parse_rows();
    assert_eq!(rows, vec![DataRow::new()]);
}
