//! Runtime settings loaded once from `config.yaml`.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Token values shipped in the sample config; treated as "no token".
const PLACEHOLDER_TOKENS: &[&str] = &["PUT_YOUR_TOKEN", "input your api code here"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParserMode {
    /// LLM when an API key is configured, fixed defaults otherwise
    #[default]
    Auto,
    Llm,
    Keywords,
    Defaults,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PriceMode {
    #[default]
    Yahoo,
    Static,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub team_api_code: String,
    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,
    #[serde(default)]
    pub context_parser: ParserMode,
    #[serde(default)]
    pub price_source: PriceMode,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

fn default_server_host() -> String {
    "www.prism-challenge.com".to_string()
}

fn default_server_port() -> u16 {
    8082
}

fn default_request_timeout_secs() -> u64 {
    8
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileError(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let token = self.team_api_code.trim();
        if token.is_empty() || PLACEHOLDER_TOKENS.iter().any(|p| token.contains(p)) {
            return Err(ConfigError::MissingToken);
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL of the challenge server, e.g. `http://www.prism-challenge.com:8082`.
    pub fn base_url(&self) -> String {
        let host = self.server_host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}:{}", host, self.server_port)
        } else {
            format!("http://{}:{}", host, self.server_port)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The LLM key, if one is set and non-blank.
    pub fn llm_key(&self) -> Option<&str> {
        self.llm_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file error: {0}")]
    FileError(String),
    #[error("config parse error: {0}")]
    ParseError(String),
    #[error("add your real API token to the config under 'team_api_code'")]
    MissingToken,
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = Config::from_yaml("team_api_code: abc123\n").unwrap();
        assert_eq!(config.server_host, "www.prism-challenge.com");
        assert_eq!(config.server_port, 8082);
        assert_eq!(config.request_timeout(), Duration::from_secs(8));
        assert_eq!(config.context_parser, ParserMode::Auto);
        assert_eq!(config.price_source, PriceMode::Yahoo);
        assert!(config.llm_key().is_none());
        assert_eq!(config.base_url(), "http://www.prism-challenge.com:8082");
    }

    #[test]
    fn test_load_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
team_api_code: "d3e6"
server_host: "https://localhost/"
server_port: 9000
llm_api_key: "  sk-test  "
context_parser: keywords
price_source: static
log_level: debug
"#
        )
        .unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.base_url(), "https://localhost:9000");
        assert_eq!(config.llm_key(), Some("sk-test"));
        assert_eq!(config.context_parser, ParserMode::Keywords);
        assert_eq!(config.price_source, PriceMode::Static);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_placeholder_token_rejected() {
        let err = Config::from_yaml("team_api_code: PUT_YOUR_TOKEN_HERE\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingToken));

        let err = Config::from_yaml("team_api_code: '   '\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingToken));
    }

    #[test]
    fn test_example_config_needs_real_token() {
        let example = include_str!("../config.example.yaml");
        let err = Config::from_yaml(example).unwrap_err();
        assert!(matches!(err, ConfigError::MissingToken));

        let filled = example.replace("PUT_YOUR_TOKEN_HERE", "d3e63892");
        let config = Config::from_yaml(&filled).unwrap();
        assert_eq!(config.base_url(), "http://www.prism-challenge.com:8082");
    }

    #[test]
    fn test_missing_token_is_parse_error() {
        let err = Config::from_yaml("server_port: 8082\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load("/nonexistent/config.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileError(_)));
    }
}
