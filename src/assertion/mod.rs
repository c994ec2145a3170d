mod evaluator;
mod extractor;
/// 断言模块 - 提供 API 响应断言能力
mod types;

pub use evaluator::{compare, evaluate_assertion, evaluate_assertions};
pub use extractor::{extract_from_body, extract_json_path, json_to_string};
pub use types::{AssertError, AssertionDef, AssertionKind, AssertionResult, CompareOp};
