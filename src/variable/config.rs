use crate::runner::RunOptions;
use crate::variable::resolver::VariableResolver;
use crate::variable::types::{Environment, ScopeChain, VariableContext};
use crate::{Result, RumanError};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// 完整的配置文件 (ruman.toml)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct VariableConfig {
    /// 全局变量
    #[serde(default)]
    pub globals: HashMap<String, String>,

    /// 所有环境配置
    #[serde(default)]
    pub environments: HashMap<String, Environment>,

    /// 运行器默认选项
    #[serde(default)]
    pub runner: RunOptions,
}

impl VariableConfig {
    /// 获取指定环境的变量
    pub fn get_environment(&self, env_name: &str) -> Option<&Environment> {
        self.environments.get(env_name)
    }
}

/// 配置文件加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 配置文件名
    const CONFIG_FILE: &'static str = "ruman.toml";

    /// 从指定路径加载配置文件
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<VariableConfig> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| RumanError::ConfigError(format!("Failed to read config file: {}", e)))?;

        Ok(toml::from_str(&content)?)
    }

    /// 查找并加载配置文件
    /// 查找顺序：
    /// 1. 当前目录及其父目录
    /// 2. 用户配置目录 ~/.config/ruman/
    pub fn find_and_load() -> Option<VariableConfig> {
        Self::try_load_from_current_dir().or_else(Self::try_load_from_user_dir)
    }

    /// 尝试从当前目录及其父目录加载
    fn try_load_from_current_dir() -> Option<VariableConfig> {
        let mut current = std::env::current_dir().ok()?;

        loop {
            let config_path = current.join(Self::CONFIG_FILE);
            if config_path.exists() {
                return Self::load_logged(&config_path);
            }

            // 尝试父目录
            if !current.pop() {
                break;
            }
        }

        None
    }

    /// 尝试从用户配置目录加载
    fn try_load_from_user_dir() -> Option<VariableConfig> {
        let home = dirs::home_dir()?;
        let config_path = home.join(".config").join("ruman").join(Self::CONFIG_FILE);

        if config_path.exists() {
            Self::load_logged(&config_path)
        } else {
            None
        }
    }

    fn load_logged(path: &Path) -> Option<VariableConfig> {
        match Self::load_from_path(path) {
            Ok(config) => {
                tracing::debug!("Loaded config from {}", path.display());
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Ignoring {}: {}", path.display(), e);
                None
            }
        }
    }

    /// 构建运行级作用域链
    /// env_name: 环境名称（如 "dev", "prod"）
    /// cli_vars: CLI 传入的变量覆盖（--var key=value），写入 runtime 作用域
    pub fn build_scope_chain(
        config: &VariableConfig,
        env_name: Option<&str>,
        cli_vars: &[(String, String)],
    ) -> ScopeChain {
        let mut chain = ScopeChain::new();
        chain.global = Self::expand(&config.globals);

        if let Some(env) = env_name.and_then(|name| config.get_environment(name)) {
            chain.environment = Self::expand(&env.variables);
        } else if let Some(name) = env_name {
            tracing::warn!("Environment `{}` not found in config", name);
        }

        for (key, value) in cli_vars {
            chain.runtime.insert(key.clone(), value.clone());
        }

        chain
    }

    /// 解析系统环境变量 ${VAR}
    fn expand(vars: &HashMap<String, String>) -> VariableContext {
        let mut context = VariableContext::new();
        for (key, value) in vars {
            context.insert(key.clone(), VariableResolver::resolve_env_vars(value));
        }
        context
    }

    /// 解析 CLI 变量参数 "key=value"
    pub fn parse_cli_var(s: &str) -> Option<(String, String)> {
        s.split_once('=')
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RunMode;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_from_path() {
        let config_content = r#"
[globals]
user_agent = "ruman"

[environments.dev]
base_url = "http://localhost:8080"
api_key = "dev-key"

[runner]
iterations = 3
mode = "parallel"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(config_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = ConfigLoader::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.environments.len(), 1);
        assert!(config.get_environment("dev").is_some());
        assert_eq!(config.runner.iterations, Some(3));
        assert_eq!(config.runner.mode, RunMode::Parallel);
    }

    #[test]
    fn test_build_scope_chain() {
        let config_content = r#"
[globals]
base_url = "http://global"

[environments.dev]
base_url = "http://localhost:8080"
token = "dev-token"

[environments.prod]
base_url = "https://api.example.com"
token = "${PROD_TOKEN}"
"#;

        let config: VariableConfig = toml::from_str(config_content).unwrap();

        let chain = ConfigLoader::build_scope_chain(&config, Some("dev"), &[]);
        assert_eq!(chain.global.get("base_url"), Some("http://global"));
        assert_eq!(chain.environment.get("token"), Some("dev-token"));

        // CLI 覆盖进入 runtime 作用域
        let cli_vars = vec![("token".to_string(), "custom-token".to_string())];
        let chain = ConfigLoader::build_scope_chain(&config, Some("dev"), &cli_vars);
        assert_eq!(
            chain.lookup("token", chrono::Utc::now()),
            Some("custom-token".to_string())
        );
    }

    #[test]
    fn test_invalid_config_is_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[runner\niterations = ").unwrap();
        temp_file.flush().unwrap();

        let err = ConfigLoader::load_from_path(temp_file.path()).unwrap_err();
        assert!(matches!(err, RumanError::ConfigError(_)));
    }

    #[test]
    fn test_parse_cli_var() {
        assert_eq!(
            ConfigLoader::parse_cli_var("key=value"),
            Some(("key".to_string(), "value".to_string()))
        );

        assert_eq!(
            ConfigLoader::parse_cli_var("url=https://example.com?a=b"),
            Some(("url".to_string(), "https://example.com?a=b".to_string()))
        );

        assert_eq!(ConfigLoader::parse_cli_var("invalid"), None);
    }
}
