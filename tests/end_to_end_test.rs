use ruman::assertion::{AssertionDef, CompareOp};
use ruman::baseline::{BaselineStore, FileBaselineStore};
use ruman::chaos::ChaosLevel;
use ruman::collection::{Collection, Folder, KeyValue, RequestDefinition};
use ruman::http::{Method, ReqwestTransport};
use ruman::runner::{CollectionRunner, RunMode, RunOptions, TestReporter};
use ruman::variable::{DataRow, ScopeChain};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn runner(options: RunOptions) -> CollectionRunner {
    let transport = Arc::new(ReqwestTransport::new().unwrap());
    CollectionRunner::new(transport).with_options(options)
}

fn base_scopes(server: &MockServer) -> ScopeChain {
    let mut chain = ScopeChain::new();
    chain.environment.insert("base_url", server.uri());
    chain
}

fn get(id: &str, url: &str) -> RequestDefinition {
    RequestDefinition::new(id, Method::Get, url)
}

/// 依赖成功时继续发送；404 计为失败而不是跳过
#[tokio::test]
async fn test_dependency_then_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mut collection = Collection::new("c1", "flow");
    let a = get("A", "{{base_url}}/a");
    let mut b = get("B", "{{base_url}}/b");
    b.flow_depends_on = "A".to_string();
    collection.requests = vec![a, b];

    let result = runner(RunOptions::default())
        .run(&collection, base_scopes(&server), Vec::new())
        .await;

    assert_eq!(result.summary.passed_requests, 1);
    assert_eq!(result.summary.failed_requests, 1);
    assert_eq!(result.summary.skipped_requests, 0);
    assert_eq!(result.results[1].response.status, 404);
    assert!(result.results[1].skip_reason.is_none());
    assert_eq!(result.exit_code(), 1);
}

/// 依赖失败时跳过，条件为假时跳过
#[tokio::test]
async fn test_skips_on_failed_dependency_and_condition() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut collection = Collection::new("c1", "flow");
    let login = RequestDefinition::new("login", Method::Post, "{{base_url}}/login");
    let mut profile = get("profile", "{{base_url}}/profile");
    profile.flow_depends_on = "login".to_string();
    let mut report = get("report", "{{base_url}}/report");
    report.flow_condition = "iteration > 0".to_string();
    collection.requests = vec![login, profile, report];

    let result = runner(RunOptions::default())
        .run(&collection, base_scopes(&server), Vec::new())
        .await;

    assert_eq!(result.summary.skipped_requests, 2);
    assert_eq!(
        result.results[1].skip_reason.as_deref(),
        Some("Dependency not successful: login")
    );
    assert_eq!(
        result.results[2].skip_reason.as_deref(),
        Some("Condition evaluated to false: iteration > 0")
    );
    assert_eq!(result.results[1].response.status_text, "Skipped");
}

/// 登录脚本写入的 token 在后续请求中可用，断言与 pm.test 同时生效
#[tokio::test]
async fn test_token_flows_through_scripts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "abc"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("Authorization", "Bearer abc"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "alice"})),
        )
        .mount(&server)
        .await;

    let mut login = RequestDefinition::new("login", Method::Post, "{{base_url}}/login");
    login.post_response_script = r#"
        let body = pm.response.json();
        pm.environment.set("token", body.token);
        pm.test("token issued", || pm.expect(body.token).to_equal("abc"));
    "#
    .to_string();

    let mut me = get("me", "{{base_url}}/me");
    me.headers = vec![KeyValue::new("Authorization", "Bearer {{token}}")];
    me.assertions = vec![
        AssertionDef::status(200),
        AssertionDef::json_path("$.name", CompareOp::Equal, "alice"),
    ];

    let mut collection = Collection::new("c1", "auth");
    collection.folders.push(Folder {
        name: "users".to_string(),
        requests: vec![login, me],
        ..Folder::default()
    });

    let result = runner(RunOptions::default())
        .run(&collection, base_scopes(&server), Vec::new())
        .await;

    assert_eq!(result.summary.failed_requests, 0, "{:?}", result.results);
    assert_eq!(result.summary.total_assertions, 3);
    assert_eq!(result.summary.failed_assertions, 0);
    assert_eq!(result.exit_code(), 0);
}

/// 并行模式：每行数据一次迭代，结果按遍历顺序排列
#[tokio::test]
async fn test_parallel_iterations_with_rows() {
    let server = MockServer::start().await;
    for id in ["1", "2"] {
        Mock::given(method("GET"))
            .and(path(format!("/users/{}", id)))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut collection = Collection::new("c1", "parallel");
    collection.requests = vec![
        get("user", "{{base_url}}/users/{{id}}"),
        get("health", "{{base_url}}/health"),
    ];
    let rows: Vec<DataRow> = ["1", "2"]
        .iter()
        .map(|id| DataRow::from([("id".to_string(), id.to_string())]))
        .collect();

    let options = RunOptions {
        mode: RunMode::Parallel,
        ..RunOptions::default()
    };
    let result = runner(options)
        .run(&collection, base_scopes(&server), rows)
        .await;

    assert_eq!(result.mode, RunMode::Parallel);
    assert_eq!(result.iterations, 2);
    let order: Vec<(usize, &str)> = result
        .results
        .iter()
        .map(|r| (r.iteration, r.request_id.as_str()))
        .collect();
    assert_eq!(order, vec![(0, "user"), (0, "health"), (1, "user"), (1, "health")]);
    assert!(result.results[2].url.ends_with("/users/2"));
    assert_eq!(result.summary.passed_requests, 4);
}

/// 混沌变体与基础请求一起发送，并被标记
#[tokio::test]
async fn test_chaos_variants_reported() {
    let server = MockServer::start().await;
    Mock::given(path("/items"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut collection = Collection::new("c1", "chaos");
    collection.requests = vec![get("items", "{{base_url}}/items")];

    let options = RunOptions {
        chaos: Some(ChaosLevel::Light),
        ..RunOptions::default()
    };
    let result = runner(options)
        .run(&collection, base_scopes(&server), Vec::new())
        .await;

    let light = ChaosLevel::Light.cases();
    assert_eq!(result.results.len(), 1 + light.len());
    assert!(result.results[0].chaos_case.is_none());
    assert!(result.results[1..].iter().all(|r| r.chaos_case.is_some()));
}

/// 契约与性能基线：首轮记录，次轮比对；响应形状改变时门禁失败
#[tokio::test]
async fn test_contract_and_perf_baselines() {
    let temp_dir = TempDir::new().unwrap();
    let store: Arc<dyn BaselineStore> =
        Arc::new(FileBaselineStore::with_path(temp_dir.path().join("baselines.json")));

    let server = MockServer::start().await;
    let mut collection = Collection::new("c1", "contract");
    collection.requests = vec![get("user", "{{base_url}}/user")];

    let record = RunOptions {
        update_contract: true,
        contract: true,
        update_performance: true,
        performance: true,
        ..RunOptions::default()
    };

    {
        let _guard = Mock::given(path("/user"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 1, "name": "a"})),
            )
            .mount_as_scoped(&server)
            .await;
        let first = runner(record)
            .with_baseline_store(Arc::clone(&store))
            .run(&collection, base_scopes(&server), Vec::new())
            .await;
        let contract = first.contract.as_ref().unwrap();
        assert!(contract.baseline_updated);
        assert!(!contract.gate_failed);
        assert!(first.performance.as_ref().unwrap().baseline_updated);
    }
    assert!(temp_dir.path().join("baselines.json").exists());

    let _guard = Mock::given(path("/user"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "1"})))
        .mount_as_scoped(&server)
        .await;
    let check = RunOptions {
        contract: true,
        ..RunOptions::default()
    };
    let second = runner(check)
        .with_baseline_store(Arc::clone(&store))
        .run(&collection, base_scopes(&server), Vec::new())
        .await;

    let contract = second.contract.as_ref().unwrap();
    assert_eq!(contract.findings.len(), 1);
    assert!(contract.findings[0].breaking);
    assert!(contract.gate_failed);
    assert!(!contract.baseline_updated);
    assert_eq!(second.exit_code(), 1);

    let text = TestReporter::new(false).plain().render(&second);
    assert!(text.contains("Breaking changes:"));
}
