/// 脚本模块 - rhai 沙箱中的前置与后置脚本
pub mod engine;
pub mod expect;
pub mod sandbox;
pub mod types;

pub use sandbox::{ScriptContext, ScriptSandbox};
pub use types::{
    LogLevel, ScriptLimits, ScriptLogEntry, ScriptOutcome, ScriptPhase, ScriptSource,
};
