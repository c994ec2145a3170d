/// 请求构建模块 - 变量解析、请求体与认证物化
pub mod auth;
pub mod builder;
pub mod sigv4;

pub use auth::{apply_auth, resolve_auth};
pub use builder::{BuiltBody, PayloadBuilder};
pub use sigv4::AwsCredentials;
