/// 运行模块 - 调度、结果聚合与报告
pub mod executor;
pub mod reporter;
pub mod types;

pub use executor::{CollectionRunner, ProgressCallback};
pub use reporter::TestReporter;
pub use types::{
    CancelHandle, ExecutionResult, RunMode, RunOptions, RunProgress, RunResult, RunSummary,
};
