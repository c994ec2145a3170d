use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_DIRECTIVE: &str = "info";
const VERBOSE_DIRECTIVE: &str = "info,ruman::script=debug";

/// 未设置 RUST_LOG 时使用的过滤指令
///
/// 脚本日志以 target `ruman::script` 输出为 debug 事件，verbose 时打开。
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        VERBOSE_DIRECTIVE
    } else {
        DEFAULT_DIRECTIVE
    }
}

/// 初始化日志系统，输出到 stderr，stdout 留给报告
///
/// 示例:
/// - RUST_LOG=debug ruman run collection.json
/// - RUST_LOG=ruman::runner=debug ruman run collection.json
pub fn init_logger(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();

    if installed.is_ok() {
        tracing::debug!("Logger initialized");
    }
}
