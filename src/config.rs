//! Configuration for the relay.
//!
//! Everything comes from the environment. `.env.local` and `.env` are loaded
//! first; variables already set in the process win over both.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::agent::OrchestratorConfig;
use crate::error::ConfigError;
use crate::tools::builtin::HelperCommand;

/// Main configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: AnthropicConfig,
    pub tools: ToolsConfig,
    pub agent: AgentConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Anthropic Messages API settings.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: Option<SecretString>,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

/// Builtin tool settings.
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    pub command_timeout: Duration,
    pub command_max_timeout: Duration,
    pub search_helper: HelperCommand,
    pub extract_helper: HelperCommand,
    pub helper_timeout: Duration,
}

/// Conversation and workspace settings.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub workspace_dir: PathBuf,
    /// Pending tool calls older than this are abandoned.
    pub pending_ttl: Duration,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub debug: bool,
    pub format: LogFormat,
}

impl LoggingConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub fn default_filter(&self) -> &'static str {
        if self.debug {
            "agent_relay=debug,tower_http=debug"
        } else {
            "agent_relay=info,tower_http=info"
        }
    }
}

impl Config {
    /// Load configuration from dotenv files and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::from_filename(".env.local").ok();
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let server = ServerConfig {
            host: var("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&var, "API_PORT", 8000)?,
        };

        let llm = AnthropicConfig {
            api_key: var("ANTHROPIC_API_KEY").map(SecretString::from),
            model: var("CLAUDE_MODEL").unwrap_or_else(|| "claude-3-7-sonnet-20250219".to_string()),
            base_url: var("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|| "https://api.anthropic.com".to_string()),
            max_tokens: parse_or(&var, "LLM_MAX_TOKENS", 4000)?,
            temperature: parse_or(&var, "LLM_TEMPERATURE", 0.7)?,
            timeout: secs_or(&var, "LLM_TIMEOUT_SECS", 120)?,
        };

        let tools = ToolsConfig {
            command_timeout: secs_or(&var, "COMMAND_TIMEOUT_SECS", 30)?,
            command_max_timeout: secs_or(&var, "COMMAND_MAX_TIMEOUT_SECS", 300)?,
            search_helper: helper_or(&var, "SEARCH_HELPER", "python3 tools/search_engine.py")?,
            extract_helper: helper_or(&var, "EXTRACT_HELPER", "python3 tools/web_scraper.py")?,
            helper_timeout: secs_or(&var, "HELPER_TIMEOUT_SECS", 60)?,
        };

        let agent = AgentConfig {
            workspace_dir: var("WORKSPACE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("runs")),
            pending_ttl: secs_or(&var, "PENDING_TOOL_CALL_TTL_SECS", 1800)?,
            sweep_interval: secs_or(&var, "PENDING_SWEEP_INTERVAL_SECS", 60)?,
        };

        let logging = LoggingConfig {
            debug: var("DEBUG")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false),
            format: match var("LOG_FORMAT").map(|v| v.to_ascii_lowercase()).as_deref() {
                None | Some("pretty") => LogFormat::Pretty,
                Some("json") => LogFormat::Json,
                Some(other) => {
                    return Err(ConfigError::Invalid {
                        key: "LOG_FORMAT".to_string(),
                        message: format!("expected 'pretty' or 'json', got '{}'", other),
                    });
                }
            },
        };

        if agent.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "PENDING_SWEEP_INTERVAL_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            server,
            llm,
            tools,
            agent,
            logging,
        })
    }

    /// Orchestrator timing derived from the gateway timeout.
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig::default().with_gateway_timeout(self.llm.timeout)
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn secs_or<F>(var: &F, key: &str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(var, key, default).map(Duration::from_secs)
}

fn helper_or<F>(var: &F, key: &str, default: &str) -> Result<HelperCommand, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let line = var(key).unwrap_or_else(|| default.to_string());
    HelperCommand::parse(&line).ok_or_else(|| ConfigError::Invalid {
        key: key.to_string(),
        message: "empty command line".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert!(config.llm.api_key.is_none());
        assert_eq!(config.llm.model, "claude-3-7-sonnet-20250219");
        assert_eq!(config.llm.max_tokens, 4000);
        assert_eq!(config.tools.command_timeout, Duration::from_secs(30));
        assert_eq!(config.tools.command_max_timeout, Duration::from_secs(300));
        assert_eq!(
            config.tools.search_helper,
            HelperCommand::new("python3").arg("tools/search_engine.py")
        );
        assert_eq!(config.agent.workspace_dir, PathBuf::from("runs"));
        assert_eq!(config.agent.pending_ttl, Duration::from_secs(1800));
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.logging.default_filter(), "agent_relay=info,tower_http=info");
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("API_PORT", "9000"),
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("DEBUG", "True"),
            ("LOG_FORMAT", "json"),
            ("WORKSPACE_DIR", "/tmp/relay"),
            ("SEARCH_HELPER", "  ./search.sh  --fast "),
            ("COMMAND_TIMEOUT_SECS", "5"),
        ])
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(
            config.llm.api_key.as_ref().map(|k| k.expose_secret().to_string()),
            Some("sk-test".to_string())
        );
        assert!(config.logging.debug);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.agent.workspace_dir, PathBuf::from("/tmp/relay"));
        assert_eq!(
            config.tools.search_helper,
            HelperCommand::new("./search.sh").arg("--fast")
        );
        assert_eq!(config.tools.command_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_empty_values_fall_back_to_defaults() {
        let config = config(&[("API_PORT", ""), ("ANTHROPIC_API_KEY", "  ")]).unwrap();
        assert_eq!(config.server.port, 8000);
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let err = config(&[("API_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "API_PORT"));

        let err = config(&[("LOG_FORMAT", "xml")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "LOG_FORMAT"));

        let err = config(&[("PENDING_SWEEP_INTERVAL_SECS", "0")]).unwrap_err();
        assert!(
            matches!(err, ConfigError::Invalid { ref key, .. } if key == "PENDING_SWEEP_INTERVAL_SECS")
        );
    }
}
