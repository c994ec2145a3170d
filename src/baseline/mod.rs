/// 基线模块 - 契约与性能基线的持久化
pub mod storage;

pub use storage::{
    BaselineStore, FileBaselineStore, MemoryBaselineStore, contract_key, load_as,
    performance_key, save_as,
};
