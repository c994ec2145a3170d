use chrono::Utc;
use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, INT, Map, Scope};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;
use tracing::debug;

use crate::assertion::AssertionResult;
use crate::http::{Method, Request, Response};
use crate::script::engine::{Deadline, build_engine, error_message, is_fatal};
use crate::script::expect::{self, Expectation};
use crate::script::types::{
    LogLevel, ScriptLimits, ScriptLogEntry, ScriptOutcome, ScriptPhase, ScriptSource,
};
use crate::variable::{DataRow, ScopeChain, VariableMutation, VariableScope};

type ApiResult<T> = Result<T, Box<EvalAltResult>>;
type SharedState = Rc<RefCell<SandboxState>>;

/// 脚本所在请求的信息
#[derive(Debug, Clone, Copy)]
pub struct ScriptContext<'a> {
    pub chain: &'a ScopeChain,
    pub row: &'a DataRow,
    pub iteration: usize,
    pub request_id: &'a str,
    pub request_name: &'a str,
}

struct SandboxState {
    phase: ScriptPhase,
    script: String,
    request: Request,
    response: Option<Response>,
    chain: ScopeChain,
    row: DataRow,
    iteration: usize,
    request_id: String,
    request_name: String,
    mutations: Vec<VariableMutation>,
    logs: Vec<ScriptLogEntry>,
    tests: Vec<AssertionResult>,
    pending_tests: Vec<(String, FnPtr)>,
}

impl SandboxState {
    fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        debug!(target: "ruman::script", "[{} {}] {}", self.phase, self.script, message);
        self.logs.push(ScriptLogEntry {
            phase: self.phase,
            level,
            script: self.script.clone(),
            message,
            timestamp: Utc::now(),
        });
    }

    fn write(&mut self, mutation: VariableMutation) {
        self.chain.apply(&mutation);
        self.mutations.push(mutation);
    }
}

/// `pm` 根对象
#[derive(Clone)]
pub struct PmApi {
    state: SharedState,
}

/// 变量作用域句柄；`scope` 为 None 表示合并视图 `pm.variables`
#[derive(Clone)]
pub struct VariablesApi {
    state: SharedState,
    scope: Option<VariableScope>,
}

#[derive(Clone)]
pub struct RequestApi {
    state: SharedState,
}

#[derive(Clone)]
pub struct ResponseApi {
    state: SharedState,
}

fn to_text(value: &Dynamic) -> String {
    if value.is_string() {
        value.to_string()
    } else if value.is_unit() {
        String::new()
    } else {
        match expect::to_json(value) {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        }
    }
}

fn string_map<'a>(entries: impl Iterator<Item = (&'a String, &'a String)>) -> Map {
    entries
        .map(|(k, v)| (k.as_str().into(), Dynamic::from(v.clone())))
        .collect()
}

fn headers_map(headers: &[(String, String)]) -> Map {
    headers
        .iter()
        .map(|(k, v)| (k.as_str().into(), Dynamic::from(v.clone())))
        .collect()
}

fn optional(value: Option<String>) -> Dynamic {
    value.map(Dynamic::from).unwrap_or(Dynamic::UNIT)
}

impl VariablesApi {
    fn target(&self) -> VariableScope {
        self.scope.unwrap_or(VariableScope::Runtime)
    }

    fn get(&mut self, key: &str) -> Dynamic {
        let state = self.state.borrow();
        let value = match self.scope {
            Some(scope) => state.chain.scope(scope).get(key).map(str::to_string),
            None => state
                .row
                .get(key)
                .cloned()
                .or_else(|| state.chain.lookup(key, Utc::now())),
        };
        optional(value)
    }

    fn set(&mut self, key: &str, value: Dynamic) {
        let mutation = VariableMutation::set(self.target(), key, to_text(&value));
        self.state.borrow_mut().write(mutation);
    }

    fn unset(&mut self, key: &str) {
        let mutation = VariableMutation::unset(self.target(), key);
        self.state.borrow_mut().write(mutation);
    }

    fn has(&mut self, key: &str) -> bool {
        !self.get(key).is_unit()
    }

    fn to_map(&mut self) -> Map {
        let state = self.state.borrow();
        match self.scope {
            Some(scope) => string_map(state.chain.scope(scope).iter()),
            None => {
                let mut merged = state.chain.effective(Utc::now());
                merged.extend(state.row.clone());
                string_map(merged.iter())
            }
        }
    }
}

impl RequestApi {
    fn ensure_mutable(&self) -> ApiResult<()> {
        if self.state.borrow().phase == ScriptPhase::PostResponse {
            Err("pm.request is read-only in post-response scripts".into())
        } else {
            Ok(())
        }
    }

    fn method(&mut self) -> String {
        self.state.borrow().request.method.to_string()
    }

    fn set_method(&mut self, method: String) -> ApiResult<()> {
        self.ensure_mutable()?;
        let method = Method::parse(&method).map_err(|e| e.to_string())?;
        self.state.borrow_mut().request.method = method;
        Ok(())
    }

    fn url(&mut self) -> String {
        self.state.borrow().request.url.clone()
    }

    fn set_url(&mut self, url: String) -> ApiResult<()> {
        self.ensure_mutable()?;
        self.state.borrow_mut().request.url = url;
        Ok(())
    }

    fn body(&mut self) -> Dynamic {
        optional(self.state.borrow().request.body.clone())
    }

    fn set_body(&mut self, body: Dynamic) -> ApiResult<()> {
        self.ensure_mutable()?;
        let body = if body.is_unit() {
            None
        } else {
            Some(to_text(&body))
        };
        self.state.borrow_mut().request.body = body;
        Ok(())
    }

    fn headers(&mut self) -> Map {
        headers_map(&self.state.borrow().request.headers)
    }

    fn header(&mut self, name: &str) -> Dynamic {
        optional(self.state.borrow().request.header(name).map(str::to_string))
    }

    fn set_header(&mut self, name: &str, value: Dynamic) -> ApiResult<()> {
        self.ensure_mutable()?;
        self.state
            .borrow_mut()
            .request
            .set_header(name, to_text(&value));
        Ok(())
    }

    fn remove_header(&mut self, name: &str) -> ApiResult<bool> {
        self.ensure_mutable()?;
        Ok(self.state.borrow_mut().request.remove_header(name))
    }
}

impl ResponseApi {
    fn with<T>(&self, f: impl FnOnce(&Response) -> T) -> ApiResult<T> {
        let state = self.state.borrow();
        state
            .response
            .as_ref()
            .map(f)
            .ok_or_else(|| "pm.response is not available in pre-request scripts".into())
    }

    fn code(&mut self) -> ApiResult<INT> {
        self.with(|r| r.status as INT)
    }

    fn status(&mut self) -> ApiResult<String> {
        self.with(|r| r.status_text.clone())
    }

    fn headers(&mut self) -> ApiResult<Map> {
        self.with(|r| headers_map(&r.headers))
    }

    fn header(&mut self, name: &str) -> ApiResult<Dynamic> {
        self.with(|r| optional(r.header(name).map(str::to_string)))
    }

    fn text(&mut self) -> ApiResult<String> {
        self.with(|r| r.body.clone())
    }

    fn time(&mut self) -> ApiResult<INT> {
        self.with(|r| r.time as INT)
    }

    fn size(&mut self) -> ApiResult<INT> {
        self.with(|r| r.size as INT)
    }

    fn json(&mut self) -> ApiResult<Dynamic> {
        let parsed = self.with(|r| r.json())?;
        let value = parsed.map_err(|e| format!("response body is not valid JSON: {}", e))?;
        rhai::serde::to_dynamic(value)
    }
}

impl PmApi {
    fn variables(&mut self, scope: Option<VariableScope>) -> VariablesApi {
        VariablesApi {
            state: Rc::clone(&self.state),
            scope,
        }
    }

    fn response(&mut self) -> ApiResult<ResponseApi> {
        if self.state.borrow().response.is_none() {
            return Err("pm.response is not available in pre-request scripts".into());
        }
        Ok(ResponseApi {
            state: Rc::clone(&self.state),
        })
    }

    fn iteration_data(&mut self) -> Map {
        string_map(self.state.borrow().row.iter())
    }

    fn info(&mut self) -> Map {
        let state = self.state.borrow();
        let mut info = Map::new();
        info.insert("request_id".into(), Dynamic::from(state.request_id.clone()));
        info.insert("request_name".into(), Dynamic::from(state.request_name.clone()));
        info.insert("iteration".into(), Dynamic::from(state.iteration as INT));
        info.insert("phase".into(), Dynamic::from(state.phase.to_string()));
        info
    }

    /// 登记测试；回调在脚本主体执行完后依次运行
    fn test(&mut self, name: &str, callback: FnPtr) {
        self.state
            .borrow_mut()
            .pending_tests
            .push((name.to_string(), callback));
    }
}

fn register_api(engine: &mut Engine) {
    expect::register(engine);

    engine
        .register_type_with_name::<PmApi>("Pm")
        .register_get("globals", |pm: &mut PmApi| pm.variables(Some(VariableScope::Global)))
        .register_get("environment", |pm: &mut PmApi| {
            pm.variables(Some(VariableScope::Environment))
        })
        .register_get("collection_variables", |pm: &mut PmApi| {
            pm.variables(Some(VariableScope::Collection))
        })
        .register_get("request_variables", |pm: &mut PmApi| {
            pm.variables(Some(VariableScope::Request))
        })
        .register_get("runtime", |pm: &mut PmApi| pm.variables(Some(VariableScope::Runtime)))
        .register_get("variables", |pm: &mut PmApi| pm.variables(None))
        .register_get("request", |pm: &mut PmApi| RequestApi {
            state: Rc::clone(&pm.state),
        })
        .register_get("response", PmApi::response)
        .register_get("iteration_data", PmApi::iteration_data)
        .register_get("info", PmApi::info)
        .register_fn("test", PmApi::test)
        .register_fn("expect", |_pm: &mut PmApi, value: Dynamic| Expectation::new(value));

    engine
        .register_type_with_name::<VariablesApi>("Variables")
        .register_fn("get", VariablesApi::get)
        .register_fn("set", VariablesApi::set)
        .register_fn("unset", VariablesApi::unset)
        .register_fn("has", VariablesApi::has)
        .register_fn("to_map", VariablesApi::to_map);

    engine
        .register_type_with_name::<RequestApi>("Request")
        .register_get_set("method", RequestApi::method, RequestApi::set_method)
        .register_get_set("url", RequestApi::url, RequestApi::set_url)
        .register_get_set("body", RequestApi::body, RequestApi::set_body)
        .register_get("headers", RequestApi::headers)
        .register_fn("header", RequestApi::header)
        .register_fn("set_header", RequestApi::set_header)
        .register_fn("remove_header", RequestApi::remove_header);

    engine
        .register_type_with_name::<ResponseApi>("Response")
        .register_get("code", ResponseApi::code)
        .register_get("status", ResponseApi::status)
        .register_get("headers", ResponseApi::headers)
        .register_get("body", ResponseApi::text)
        .register_get("time", ResponseApi::time)
        .register_get("size", ResponseApi::size)
        .register_fn("header", ResponseApi::header)
        .register_fn("text", ResponseApi::text)
        .register_fn("json", ResponseApi::json);
}

/// 脚本沙箱
///
/// 每个阶段新建一个受限引擎，脚本只能通过 `pm` 与 `expect` 访问请求、响应和变量。
/// 引擎不跨 await 持有。
#[derive(Debug, Clone, Default)]
pub struct ScriptSandbox {
    limits: ScriptLimits,
}

impl ScriptSandbox {
    pub fn new(limits: ScriptLimits) -> Self {
        Self { limits }
    }

    /// 前置脚本：集合 → 文件夹（外到内）→ 请求；任一失败即中止
    pub fn run_pre_request(
        &self,
        scripts: &[ScriptSource],
        request: &Request,
        ctx: &ScriptContext<'_>,
    ) -> ScriptOutcome {
        self.run_phase(ScriptPhase::PreRequest, scripts, request, None, ctx)
    }

    /// 后置脚本：顺序同前置；失败记为失败测试，后续脚本继续执行
    pub fn run_post_response(
        &self,
        scripts: &[ScriptSource],
        request: &Request,
        response: &Response,
        ctx: &ScriptContext<'_>,
    ) -> ScriptOutcome {
        self.run_phase(
            ScriptPhase::PostResponse,
            scripts,
            request,
            Some(response.clone()),
            ctx,
        )
    }

    fn run_phase(
        &self,
        phase: ScriptPhase,
        scripts: &[ScriptSource],
        request: &Request,
        response: Option<Response>,
        ctx: &ScriptContext<'_>,
    ) -> ScriptOutcome {
        let scripts: Vec<&ScriptSource> = scripts.iter().filter(|s| !s.is_blank()).collect();
        if scripts.is_empty() {
            return ScriptOutcome {
                request: Some(request.clone()),
                ..ScriptOutcome::default()
            };
        }

        let state: SharedState = Rc::new(RefCell::new(SandboxState {
            phase,
            script: String::new(),
            request: request.clone(),
            response,
            chain: ctx.chain.clone(),
            row: ctx.row.clone(),
            iteration: ctx.iteration,
            request_id: ctx.request_id.to_string(),
            request_name: ctx.request_name.to_string(),
            mutations: Vec::new(),
            logs: Vec::new(),
            tests: Vec::new(),
            pending_tests: Vec::new(),
        }));

        let mut engine = build_engine(&self.limits);
        let deadline = Deadline::new(self.limits.timeout_ms);
        deadline.install(&mut engine);

        let print_state = Rc::clone(&state);
        engine.on_print(move |text| print_state.borrow_mut().log(LogLevel::Info, text));
        let debug_state = Rc::clone(&state);
        engine.on_debug(move |text, _source, _pos| {
            debug_state.borrow_mut().log(LogLevel::Debug, text)
        });
        register_api(&mut engine);

        let mut first_error: Option<String> = None;

        for script in scripts {
            state.borrow_mut().script = script.name.clone();
            deadline.reset();
            let started = Instant::now();

            match run_script(&engine, script, &state) {
                Ok(()) => {
                    let elapsed = started.elapsed().as_millis();
                    state
                        .borrow_mut()
                        .log(LogLevel::Info, format!("Completed in {}ms", elapsed));
                }
                Err(message) => {
                    let mut s = state.borrow_mut();
                    s.log(LogLevel::Error, message.clone());
                    s.tests.push(AssertionResult::synthetic(
                        format!("Script error in {}", script.name),
                        false,
                        message.clone(),
                    ));
                    first_error.get_or_insert(message);
                    if phase == ScriptPhase::PreRequest {
                        break;
                    }
                }
            }
        }

        drop(engine);
        // 清空待执行测试以释放闭包中捕获的 `pm`
        let mut state = state.borrow_mut();
        state.pending_tests.clear();

        ScriptOutcome {
            tests: std::mem::take(&mut state.tests),
            logs: std::mem::take(&mut state.logs),
            mutations: std::mem::take(&mut state.mutations),
            error: first_error,
            request: Some(state.request.clone()),
        }
    }
}

/// 执行一段脚本及其登记的测试
fn run_script(engine: &Engine, script: &ScriptSource, state: &SharedState) -> Result<(), String> {
    let ast = engine
        .compile(&script.code)
        .map_err(|e| format!("Syntax error: {}", e))?;

    let mut scope = Scope::new();
    scope.push(
        "pm",
        PmApi {
            state: Rc::clone(state),
        },
    );

    engine
        .run_ast_with_scope(&mut scope, &ast)
        .map_err(|e| error_message(&e))?;

    let pending = std::mem::take(&mut state.borrow_mut().pending_tests);
    for (name, callback) in pending {
        match callback.call::<Dynamic>(engine, &ast, ()) {
            Ok(_) => {
                let mut s = state.borrow_mut();
                s.log(LogLevel::Info, format!("Test passed: {}", name));
                s.tests.push(AssertionResult::synthetic(name, true, "passed"));
            }
            Err(e) if is_fatal(&e) => return Err(error_message(&e)),
            Err(e) => {
                let message = error_message(&e);
                let mut s = state.borrow_mut();
                s.log(LogLevel::Warn, format!("Test failed: {}: {}", name, message));
                s.tests.push(AssertionResult::synthetic(name, false, message));
            }
        }
    }
    Ok(())
}
