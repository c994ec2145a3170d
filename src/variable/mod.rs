pub mod config;
pub mod data;
pub mod resolver;
pub mod types;

pub use config::{ConfigLoader, VariableConfig};
pub use data::{DataFormat, DataRow, DataSource};
pub use resolver::VariableResolver;
pub use types::{
    Environment, ScopeChain, Vault, VaultEntry, VariableContext, VariableMutation, VariableScope,
};
