use thiserror::Error;

#[derive(Error, Debug)]
pub enum RumanError {
    #[error("解析错误: {0}")]
    ParseError(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("无效的 URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP 请求失败: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON 解析错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("URL 解析错误: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("脚本错误: {0}")]
    ScriptError(String),

    #[error("基线存储错误: {0}")]
    BaselineError(String),

    #[error("{0}")]
    Other(String),
}

// Add conversion from anyhow::Error
impl From<anyhow::Error> for RumanError {
    fn from(err: anyhow::Error) -> Self {
        RumanError::Other(err.to_string())
    }
}

impl From<toml::de::Error> for RumanError {
    fn from(err: toml::de::Error) -> Self {
        RumanError::ConfigError(err.to_string())
    }
}

/// Result type for ruman crate
pub type Result<T> = std::result::Result<T, RumanError>;
