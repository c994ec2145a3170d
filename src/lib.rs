pub mod assertion;
pub mod baseline;
pub mod chaos;
pub mod collection;
pub mod contract;
pub mod error;
pub mod flow;
pub mod http;
pub mod logger;
pub mod payload;
pub mod perf;
pub mod runner;
pub mod script;
pub mod utils;
pub mod variable;

// Re-export commonly used types
pub use error::{Result, RumanError};
