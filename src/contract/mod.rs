/// 契约模块 - 响应形状指纹与基线比对
pub mod guard;
pub mod signature;

pub use guard::{
    ContractBaseline, ContractFinding, ContractGuard, ContractReport, ContractSnapshot,
    FindingKind, merge_baseline,
};
pub use signature::{ContractSignature, infer_schema, normalize_content_type, required_params};
