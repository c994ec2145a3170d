use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::assertion::{AssertionDef, AssertionResult, evaluate_assertions};
use crate::baseline::{BaselineStore, contract_key, load_as, performance_key, save_as};
use crate::chaos::{self, ChaosCase};
use crate::collection::{Collection, PlannedRequest, RequestDefinition};
use crate::contract::{ContractBaseline, ContractGuard, ContractReport, merge_baseline};
use crate::flow::{FlowGate, GateDecision};
use crate::http::{Response, Transport, TransportHints};
use crate::perf::{PerformanceBaseline, PerformanceLab, PerformanceReport};
use crate::runner::types::{
    CancelHandle, ExecutionResult, RunMode, RunOptions, RunProgress, RunResult, RunSummary,
};
use crate::script::{ScriptContext, ScriptLogEntry, ScriptSandbox, ScriptSource};
use crate::payload::PayloadBuilder;
use crate::variable::{
    DataRow, ScopeChain, VariableContext, VariableMutation, VariableResolver, VariableScope,
};

/// 进度回调：每次发送完成后调用
pub type ProgressCallback = Arc<dyn Fn(RunProgress<'_>) + Send + Sync>;

/// 发送一个请求所需的共享依赖
#[derive(Clone)]
struct Dispatcher {
    transport: Arc<dyn Transport>,
    sandbox: ScriptSandbox,
    defaults: TransportHints,
}

/// 一次发送：请求定义、脚本链与该请求的作用域快照
struct Job {
    definition: RequestDefinition,
    pre_scripts: Vec<ScriptSource>,
    post_scripts: Vec<ScriptSource>,
    chain: ScopeChain,
    row: DataRow,
    iteration: usize,
    chaos: Option<ChaosCase>,
}

struct JobOutput {
    result: ExecutionResult,
    /// 需要回写到运行级作用域的变量修改（不含 request 作用域）
    mutations: Vec<VariableMutation>,
}

impl Job {
    fn new(
        collection: &Collection,
        planned: &PlannedRequest<'_>,
        run_chain: &ScopeChain,
        row: &DataRow,
        iteration: usize,
        chaos: Option<ChaosCase>,
    ) -> Self {
        let folders = planned
            .folder_variables()
            .into_iter()
            .map(VariableContext::from_key_values)
            .collect();
        let request_vars = VariableContext::from_key_values(&planned.request.variables);
        let (pre_scripts, post_scripts) = script_chain(collection, planned);

        Self {
            definition: planned.request.clone(),
            pre_scripts,
            post_scripts,
            chain: run_chain.for_request(folders, request_vars),
            row: row.clone(),
            iteration,
            chaos,
        }
    }

    fn outcome(
        &self,
        method: String,
        url: String,
        response: Response,
        assertions: Vec<AssertionResult>,
        duration_ms: u64,
        logs: Vec<ScriptLogEntry>,
    ) -> ExecutionResult {
        ExecutionResult {
            request_id: self.definition.id.clone(),
            request_name: self.definition.display_name().to_string(),
            method,
            url,
            response,
            assertions,
            iteration: self.iteration,
            data_row: self.row.clone(),
            duration_ms,
            skipped: false,
            skip_reason: None,
            chaos_case: self.chaos,
            logs,
        }
    }

    fn script_context<'a>(&'a self, chain: &'a ScopeChain) -> ScriptContext<'a> {
        ScriptContext {
            chain,
            row: &self.row,
            iteration: self.iteration,
            request_id: &self.definition.id,
            request_name: self.definition.display_name(),
        }
    }

    /// 构建失败或前置脚本失败：不发送，生成 status 0 的伪响应
    fn aborted(
        &self,
        status_text: &str,
        message: String,
        failure: AssertionResult,
        logs: Vec<ScriptLogEntry>,
    ) -> JobOutput {
        warn!("{} not dispatched: {}", self.definition.display_name(), message);
        JobOutput {
            result: self.outcome(
                self.definition.method.to_string(),
                self.definition.url.clone(),
                Response::pseudo(status_text, message),
                vec![failure],
                0,
                logs,
            ),
            mutations: Vec::new(),
        }
    }

    async fn run(self, dispatcher: &Dispatcher) -> JobOutput {
        let name = self.definition.display_name().to_string();

        let prepared = {
            let builder = PayloadBuilder::new(&self.chain, &self.row)
                .with_defaults(dispatcher.defaults.clone());
            match builder.prepare(&self.definition) {
                Ok(request) => request,
                Err(e) => {
                    let message = format!("Failed to build request: {}", e);
                    let failure = AssertionResult::synthetic("Request build", false, message.clone());
                    return self.aborted("Build Error", message, failure, Vec::new());
                }
            }
        };

        let pre = dispatcher
            .sandbox
            .run_pre_request(&self.pre_scripts, &prepared, &self.script_context(&self.chain));
        let mut logs = pre.logs;
        if let Some(error) = pre.error {
            let failure = pre
                .tests
                .into_iter()
                .rev()
                .find(|t| !t.passed)
                .unwrap_or_else(|| AssertionResult::synthetic("Pre-request script", false, error.clone()));
            return self.aborted("Script Error", error, failure, logs);
        }

        let pre_tests = pre.tests;
        let mut mutations = pre.mutations;
        let mut chain = self.chain.clone();
        chain.apply_all(&mutations);

        let mut request = pre.request.unwrap_or(prepared);
        {
            let builder =
                PayloadBuilder::new(&chain, &self.row).with_defaults(dispatcher.defaults.clone());
            builder.re_resolve(&mut request, self.definition.body.is_resolvable());
            if let Err(e) = builder.finalize_url(&mut request) {
                let message = format!("Failed to build request: {}", e);
                let failure = AssertionResult::synthetic("Request build", false, message.clone());
                return self.aborted("Build Error", message, failure, logs);
            }
            if let Err(e) = builder.authorize(&self.definition, &mut request) {
                let message = format!("Failed to apply auth: {}", e);
                let failure = AssertionResult::synthetic("Request build", false, message.clone());
                return self.aborted("Build Error", message, failure, logs);
            }
        }

        if let Some(case) = self.chaos {
            request = chaos::mutate(&request, case);
        }

        debug!("Dispatching {} {} ({})", request.method, request.url, name);
        let sent = Instant::now();
        let response = dispatcher.transport.send(&request).await;
        let duration_ms = sent.elapsed().as_millis() as u64;

        let post = dispatcher
            .sandbox
            .run_post_response(
                &self.post_scripts,
                &request,
                &response,
                &self.script_context(&chain),
            );
        logs.extend(post.logs);
        chain.apply_all(&post.mutations);
        mutations.extend(post.mutations);

        let definitions: Vec<AssertionDef> = self
            .definition
            .assertions
            .iter()
            .map(|a| AssertionDef {
                property: VariableResolver::resolve_with_row(&a.property, &chain, &self.row),
                expected: VariableResolver::resolve_with_row(&a.expected, &chain, &self.row),
                ..a.clone()
            })
            .collect();
        let mut assertions = pre_tests;
        assertions.extend(evaluate_assertions(&definitions, &response));
        assertions.extend(post.tests);

        mutations.retain(|m| m.scope != VariableScope::Request);
        JobOutput {
            result: self.outcome(
                request.method.to_string(),
                request.url.clone(),
                response,
                assertions,
                duration_ms,
                logs,
            ),
            mutations,
        }
    }
}

/// 集合 → 文件夹（外到内）→ 请求
fn script_chain(
    collection: &Collection,
    planned: &PlannedRequest<'_>,
) -> (Vec<ScriptSource>, Vec<ScriptSource>) {
    let request_label = format!("request:{}", planned.request.display_name());
    let mut pre = vec![ScriptSource::new("collection", &collection.pre_request_script)];
    let mut post = vec![ScriptSource::new("collection", &collection.post_response_script)];

    for folder in &planned.ancestors {
        let label = format!("folder:{}", folder.name);
        pre.push(ScriptSource::new(label.clone(), &folder.pre_request_script));
        post.push(ScriptSource::new(label, &folder.post_response_script));
    }

    pre.push(ScriptSource::new(request_label.clone(), &planned.request.pre_request_script));
    post.push(ScriptSource::new(request_label, &planned.request.post_response_script));

    (pre, post)
}

/// 集合运行器
pub struct CollectionRunner {
    transport: Arc<dyn Transport>,
    options: RunOptions,
    cancel: CancelHandle,
    progress: Option<ProgressCallback>,
    baselines: Option<Arc<dyn BaselineStore>>,
}

impl CollectionRunner {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            options: RunOptions::default(),
            cancel: CancelHandle::new(),
            progress: None,
            baselines: None,
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_baseline_store(mut self, store: Arc<dyn BaselineStore>) -> Self {
        self.baselines = Some(store);
        self
    }

    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            transport: Arc::clone(&self.transport),
            sandbox: ScriptSandbox::new(self.options.scripts.clone()),
            defaults: self.options.transport.clone(),
        }
    }

    fn report_progress(&self, completed: usize, total: usize, latest: &ExecutionResult) {
        if let Some(callback) = &self.progress {
            callback(RunProgress {
                completed,
                total,
                latest,
            });
        }
    }

    /// 执行整个集合
    ///
    /// `scopes` 为运行开始时的作用域快照；`rows` 为空时按一行空数据处理。
    pub async fn run(
        &self,
        collection: &Collection,
        scopes: ScopeChain,
        rows: Vec<DataRow>,
    ) -> RunResult {
        let started_at = Utc::now();
        let rows = if rows.is_empty() {
            vec![DataRow::new()]
        } else {
            rows
        };
        let iterations = self.options.iterations.unwrap_or(rows.len()).max(1);

        let mode = if self.options.mode == RunMode::Parallel && collection.has_flow_control() {
            warn!("Collection uses flow control; running serially instead of in parallel");
            RunMode::Serial
        } else {
            self.options.mode
        };

        let plan = collection.plan();
        let cases = self.options.chaos_cases();
        let total = iterations * plan.len() * (1 + cases.len());
        info!(
            "Running {} ({} requests × {} iterations, {:?})",
            collection.name,
            plan.len(),
            iterations,
            mode
        );

        let mut chain = scopes;
        let mut authored = VariableContext::from_key_values(&collection.variables);
        authored.extend(chain.collection.to_map());
        chain.collection = authored;

        let mut results: Vec<ExecutionResult> = Vec::with_capacity(total);
        let mut completed = 0;
        let dispatcher = self.dispatcher();

        for iteration in 0..iterations {
            if self.cancel.is_cancelled() {
                break;
            }
            let row = &rows[iteration % rows.len()];
            let purged = chain.vault.purge_expired(Utc::now());
            if purged > 0 {
                debug!("Purged {} expired vault entries", purged);
            }

            let stop = match mode {
                RunMode::Serial => {
                    self.run_serial_iteration(
                        collection,
                        &plan,
                        &dispatcher,
                        &mut chain,
                        row,
                        iteration,
                        &mut results,
                        &mut completed,
                        total,
                    )
                    .await
                }
                RunMode::Parallel => {
                    self.run_parallel_iteration(
                        collection,
                        &plan,
                        &dispatcher,
                        &mut chain,
                        row,
                        iteration,
                        &mut results,
                        &mut completed,
                        total,
                    )
                    .await
                }
            };
            if stop {
                break;
            }
        }

        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            warn!("Run cancelled after {} of {} dispatches", completed, total);
        }

        let contract = self
            .options
            .contract
            .then(|| self.check_contract(collection, &results, cancelled));
        let performance = self
            .options
            .performance
            .then(|| self.check_performance(collection, &results, cancelled));

        let summary = RunSummary::from_results(&results);
        info!(
            "Finished {}: {} passed, {} failed, {} skipped",
            collection.name, summary.passed_requests, summary.failed_requests, summary.skipped_requests
        );

        RunResult {
            collection_id: collection.id.clone(),
            collection_name: collection.name.clone(),
            started_at,
            finished_at: Utc::now(),
            mode,
            iterations,
            cancelled,
            results,
            summary,
            contract,
            performance,
        }
    }

    /// 串行：按遍历顺序逐个发送，结果对流程门禁可见；返回 true 表示停止运行
    #[allow(clippy::too_many_arguments)]
    async fn run_serial_iteration(
        &self,
        collection: &Collection,
        plan: &[PlannedRequest<'_>],
        dispatcher: &Dispatcher,
        chain: &mut ScopeChain,
        row: &DataRow,
        iteration: usize,
        results: &mut Vec<ExecutionResult>,
        completed: &mut usize,
        total: usize,
    ) -> bool {
        let gate = FlowGate::new(self.options.scripts.clone());
        let cases = self.options.chaos_cases();
        let iteration_start = results.len();
        let delay = Duration::from_millis(self.options.delay_ms);

        for planned in plan {
            let variants = std::iter::once(None).chain(cases.iter().copied().map(Some));

            if planned.request.has_flow_control() {
                let decision = gate.evaluate(
                    planned.request,
                    iteration,
                    row,
                    &results[iteration_start..],
                    &results[..],
                );
                if let GateDecision::Skip(reason) = decision {
                    info!("Skipping {}: {}", planned.request.display_name(), reason);
                    let skipped = ExecutionResult::skipped(
                        &planned.request.id,
                        planned.request.display_name(),
                        planned.request.method.to_string(),
                        planned.request.url.clone(),
                        iteration,
                        row.clone(),
                        reason,
                    );
                    *completed += 1 + cases.len();
                    self.report_progress(*completed, total, &skipped);
                    results.push(skipped);
                    continue;
                }
            }

            for chaos_case in variants {
                if self.cancel.is_cancelled() {
                    return true;
                }
                if !delay.is_zero() && *completed > 0 {
                    tokio::time::sleep(delay).await;
                }

                let job = Job::new(collection, planned, chain, row, iteration, chaos_case);
                let output = job.run(dispatcher).await;
                if chaos_case.is_none() {
                    chain.apply_all(&output.mutations);
                }

                *completed += 1;
                self.report_progress(*completed, total, &output.result);
                let failed = chaos_case.is_none() && !output.result.is_successful();
                results.push(output.result);

                if failed && self.options.stop_on_failure {
                    warn!("Stopping run: {} failed", planned.request.display_name());
                    return true;
                }
            }
        }
        false
    }

    /// 并行：同一迭代的所有任务并发执行，全部完成后按遍历顺序写回
    #[allow(clippy::too_many_arguments)]
    async fn run_parallel_iteration(
        &self,
        collection: &Collection,
        plan: &[PlannedRequest<'_>],
        dispatcher: &Dispatcher,
        chain: &mut ScopeChain,
        row: &DataRow,
        iteration: usize,
        results: &mut Vec<ExecutionResult>,
        completed: &mut usize,
        total: usize,
    ) -> bool {
        let cases = self.options.chaos_cases();
        let variants: Vec<Option<ChaosCase>> = std::iter::once(None)
            .chain(cases.iter().copied().map(Some))
            .collect();

        let mut slots: Vec<Option<JobOutput>> = Vec::new();
        let mut tasks = JoinSet::new();

        'spawn: for planned in plan {
            for &chaos_case in &variants {
                if self.cancel.is_cancelled() {
                    break 'spawn;
                }
                let slot = slots.len();
                slots.push(None);

                let job = Job::new(collection, planned, chain, row, iteration, chaos_case);
                let dispatcher = dispatcher.clone();
                tasks.spawn(async move { (slot, job.run(&dispatcher).await) });
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, output)) => {
                    *completed += 1;
                    self.report_progress(*completed, total, &output.result);
                    slots[slot] = Some(output);
                }
                Err(e) => error!("Request task failed: {}", e),
            }
        }

        let mut failed = false;
        for output in slots.into_iter().flatten() {
            if output.result.chaos_case.is_none() {
                chain.apply_all(&output.mutations);
                failed |= !output.result.is_successful();
            }
            results.push(output.result);
        }

        if failed && self.options.stop_on_failure {
            warn!("Stopping run after iteration {}: failures detected", iteration + 1);
            return true;
        }
        self.cancel.is_cancelled()
    }

    fn check_contract(
        &self,
        collection: &Collection,
        results: &[ExecutionResult],
        cancelled: bool,
    ) -> ContractReport {
        let key = contract_key(&collection.id);
        let baseline: ContractBaseline = self
            .baselines
            .as_deref()
            .and_then(|store| match load_as(store, &key) {
                Ok(found) => found,
                Err(e) => {
                    warn!("Failed to load contract baseline: {}", e);
                    None
                }
            })
            .unwrap_or_default();

        let current = ContractGuard::snapshot(collection, results);
        let mut report =
            ContractGuard::new(self.options.strict_contract).evaluate(collection, &baseline, &current);

        if self.options.update_contract
            && !cancelled
            && let Some(store) = self.baselines.as_deref()
        {
            match save_as(store, &key, &merge_baseline(baseline, &current)) {
                Ok(()) => {
                    info!("Updated contract baseline for {}", collection.id);
                    report.baseline_updated = true;
                }
                Err(e) => warn!("Failed to save contract baseline: {}", e),
            }
        }
        report
    }

    fn check_performance(
        &self,
        collection: &Collection,
        results: &[ExecutionResult],
        cancelled: bool,
    ) -> PerformanceReport {
        let key = performance_key(&collection.id);
        let baseline: Option<PerformanceBaseline> =
            self.baselines
                .as_deref()
                .and_then(|store| match load_as(store, &key) {
                    Ok(found) => found,
                    Err(e) => {
                        warn!("Failed to load performance baseline: {}", e);
                        None
                    }
                });

        let lab = PerformanceLab::new(self.options.perf_threshold);
        let metrics = lab.measure(results);
        let mut report = lab.compare(metrics, baseline);

        if self.options.update_performance
            && !cancelled
            && report.metrics.samples > 0
            && let Some(store) = self.baselines.as_deref()
        {
            let fresh = PerformanceBaseline::from_metrics(&report.metrics, Utc::now());
            match save_as(store, &key, &fresh) {
                Ok(()) => {
                    info!("Updated performance baseline for {}", collection.id);
                    report.baseline_updated = true;
                }
                Err(e) => warn!("Failed to save performance baseline: {}", e),
            }
        }
        report
    }
}
