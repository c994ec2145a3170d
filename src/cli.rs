use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing::{info, warn};

use ruman::baseline::{BaselineStore, FileBaselineStore};
use ruman::chaos::ChaosLevel;
use ruman::collection::Collection;
use ruman::http::ReqwestTransport;
use ruman::runner::{CollectionRunner, RunMode, RunOptions, RunProgress, TestReporter};
use ruman::variable::{ConfigLoader, DataSource, VariableConfig};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 运行集合
    Run(RunArgs),
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ChaosArg {
    Light,
    Aggressive,
}

impl From<ChaosArg> for ChaosLevel {
    fn from(arg: ChaosArg) -> Self {
        match arg {
            ChaosArg::Light => ChaosLevel::Light,
            ChaosArg::Aggressive => ChaosLevel::Aggressive,
        }
    }
}

#[derive(Args)]
pub struct RunArgs {
    /// 集合 JSON 文件
    pub collection: PathBuf,

    /// 配置文件，默认自动查找 ruman.toml
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// 环境名称
    #[arg(short, long)]
    pub env: Option<String>,

    /// 变量覆盖 key=value，可重复
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,

    /// 数据文件（.csv 或 .json）
    #[arg(short, long)]
    pub data: Option<PathBuf>,

    #[arg(short = 'n', long)]
    pub iterations: Option<usize>,

    #[arg(long)]
    pub parallel: bool,

    /// 串行发送间隔（毫秒）
    #[arg(long, value_name = "MS")]
    pub delay: Option<u64>,

    #[arg(long)]
    pub stop_on_failure: bool,

    #[arg(long, value_enum)]
    pub chaos: Option<ChaosArg>,

    /// 比对契约基线
    #[arg(long)]
    pub contract: bool,

    /// 用本次结果更新契约基线
    #[arg(long)]
    pub update_contract: bool,

    /// 任何契约变化都视为失败
    #[arg(long)]
    pub strict_contract: bool,

    /// 比对性能基线
    #[arg(long)]
    pub perf: bool,

    /// p95 回归阈值（百分比）
    #[arg(long, value_name = "PCT")]
    pub perf_threshold: Option<f64>,

    #[arg(long)]
    pub update_perf: bool,

    /// 基线文件，默认 .ruman/baselines.json
    #[arg(long)]
    pub baseline_file: Option<PathBuf>,

    /// 输出 JSON 报告
    #[arg(long)]
    pub json: bool,

    /// 报告写入文件
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    #[arg(short, long)]
    pub verbose: bool,
}

impl RunArgs {
    /// 命令行参数覆盖配置文件中的 [runner]
    fn options(&self, mut options: RunOptions) -> RunOptions {
        if let Some(n) = self.iterations {
            options.iterations = Some(n);
        }
        if self.parallel {
            options.mode = RunMode::Parallel;
        }
        if let Some(delay) = self.delay {
            options.delay_ms = delay;
        }
        if let Some(chaos) = self.chaos {
            options.chaos = Some(chaos.into());
        }
        if let Some(threshold) = self.perf_threshold {
            options.perf_threshold = threshold;
        }
        options.stop_on_failure |= self.stop_on_failure;
        options.contract |= self.contract || self.update_contract || self.strict_contract;
        options.update_contract |= self.update_contract;
        options.strict_contract |= self.strict_contract;
        options.performance |= self.perf || self.update_perf;
        options.update_performance |= self.update_perf;
        options
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<VariableConfig> {
    match path {
        Some(path) => ConfigLoader::load_from_path(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(ConfigLoader::find_and_load().unwrap_or_default()),
    }
}

/// 执行 `run` 命令，返回进程退出码
pub async fn run(args: RunArgs) -> Result<i32> {
    let config = load_config(args.config.as_ref())?;
    let options = args.options(config.runner.clone());

    let text = std::fs::read_to_string(&args.collection)
        .with_context(|| format!("Failed to read {}", args.collection.display()))?;
    let collection = Collection::from_json(&text)
        .with_context(|| format!("Invalid collection {}", args.collection.display()))?;

    let mut cli_vars = Vec::new();
    for raw in &args.vars {
        match ConfigLoader::parse_cli_var(raw) {
            Some(pair) => cli_vars.push(pair),
            None => warn!("Ignoring malformed --var `{}` (expected key=value)", raw),
        }
    }
    let scopes = ConfigLoader::build_scope_chain(&config, args.env.as_deref(), &cli_vars);

    let rows = match &args.data {
        Some(path) => DataSource::from_path(path)?.parse_rows(),
        None => Vec::new(),
    };

    let transport = Arc::new(ReqwestTransport::with_hints(options.transport.clone())?);
    let store: Arc<dyn BaselineStore> = Arc::new(match &args.baseline_file {
        Some(path) => FileBaselineStore::with_path(path),
        None => FileBaselineStore::new(),
    });

    let reporter = Arc::new(TestReporter::new(args.verbose));
    let streaming = !args.json && args.out.is_none();
    let mut runner = CollectionRunner::new(transport)
        .with_options(options)
        .with_baseline_store(store);
    if streaming {
        let printer = Arc::clone(&reporter);
        runner = runner.on_progress(Arc::new(move |progress: RunProgress<'_>| {
            printer.print_result(progress.latest);
        }));
    }

    let cancel = runner.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Cancelling after the current request...".yellow());
            cancel.cancel();
        }
    });

    if streaming {
        reporter.print_header(&collection.name, collection.plan().len());
    }
    let result = runner.run(&collection, scopes, rows).await;

    let report = if args.json {
        TestReporter::to_json(&result)?
    } else if args.out.is_some() {
        TestReporter::new(args.verbose).plain().render(&result)
    } else {
        reporter.render_summary(&result)
    };

    match &args.out {
        Some(path) => {
            std::fs::write(path, &report)
                .with_context(|| format!("Failed to write report {}", path.display()))?;
            info!("Report written to {}", path.display());
            println!("Exit code: {}", result.exit_code());
        }
        None => print!("{}", report),
    }

    Ok(result.exit_code())
}
