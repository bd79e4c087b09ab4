//! Configuration file support

use serde::{Deserialize, Serialize};
use sleuth_agent::{DrainMode, DriverConfig, RoutingPolicy, WorkflowConfig};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "llama3.2";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";

/// Upper bound on research passes per query
const MAX_RESEARCH_PASSES: u32 = 3;

/// Configuration for sleuth
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model id as the endpoint knows it
    pub model: Option<String>,
    /// Base URL of the OpenAI-compatible endpoint
    pub base_url: Option<String>,
    /// Where markdown reports are written
    pub output_dir: Option<String>,
    /// Where checkpoints and long-term memory live
    pub data_dir: Option<String>,
    /// Confidence needed to skip clarification and to stop researching
    pub confidence_threshold: Option<f64>,
    /// Research passes per query
    pub max_iterations: Option<u32>,
    /// Token budget per query
    pub budget_limit: Option<u64>,
    /// Stop researching once the token budget is spent
    pub stop_on_budget: Option<bool>,
    /// How often the console drains streamed tokens
    pub poll_interval_ms: Option<u64>,
    /// How long to wait for the worker after it reports completion
    pub join_timeout_ms: Option<u64>,
    /// "poll" or "wait"
    pub drain_mode: Option<String>,
    /// API keys (alternative to environment variables)
    #[serde(default)]
    pub api_keys: ApiKeys,
}

/// API key configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub openai: Option<String>,
    pub tavily: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sleuth")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("SLEUTH_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Write the commented example config if no config file exists
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, example_config())?;
        Ok(path)
    }

    /// Get an API key for a service, checking config then env
    pub fn get_api_key(&self, service: &str) -> Option<String> {
        let from_config = match service {
            "openai" => self.api_keys.openai.clone(),
            "tavily" => self.api_keys.tavily.clone(),
            _ => None,
        };
        if let Some(key) = from_config.filter(|k| !k.trim().is_empty()) {
            return Some(key);
        }

        let env_var = match service {
            "openai" => "OPENAI_API_KEY",
            "tavily" => "TAVILY_API_KEY",
            _ => return None,
        };
        std::env::var(env_var).ok().filter(|k| !k.trim().is_empty())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.as_ref().map(PathBuf::from).unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("sleuth")
        })
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("research_outputs"))
    }

    pub fn workflow_config(&self) -> WorkflowConfig {
        let defaults = WorkflowConfig::default();
        WorkflowConfig {
            policy: RoutingPolicy {
                confidence_threshold: self
                    .confidence_threshold
                    .filter(|t| t.is_finite())
                    .map(|t| clamped("confidence_threshold", t, 0.0, 1.0))
                    .unwrap_or(defaults.policy.confidence_threshold),
                max_iterations: self
                    .max_iterations
                    .map(|n| clamped("max_iterations", n, 1, MAX_RESEARCH_PASSES))
                    .unwrap_or(defaults.policy.max_iterations),
                stop_on_budget: self.stop_on_budget.unwrap_or(defaults.policy.stop_on_budget),
            },
            budget_limit: self.budget_limit.unwrap_or(defaults.budget_limit),
            ..defaults
        }
    }

    pub fn driver_config(&self) -> DriverConfig {
        let defaults = DriverConfig::default();
        DriverConfig {
            poll_interval: self
                .poll_interval_ms
                .map(|ms| Duration::from_millis(clamped("poll_interval_ms", ms, 1, u64::MAX)))
                .unwrap_or(defaults.poll_interval),
            join_timeout: self
                .join_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.join_timeout),
            drain_mode: self
                .drain_mode
                .as_deref()
                .map(parse_drain_mode)
                .unwrap_or(defaults.drain_mode),
        }
    }
}

/// Clamp a configured value into range, warning when it had to change
fn clamped<T: PartialOrd + Copy + std::fmt::Display>(key: &str, value: T, min: T, max: T) -> T {
    let bounded = if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    };
    if bounded != value {
        tracing::warn!("{} = {} is out of range, using {}", key, value, bounded);
    }
    bounded
}

pub fn parse_drain_mode(s: &str) -> DrainMode {
    match s.to_lowercase().as_str() {
        "wait" | "park" => DrainMode::Wait,
        _ => DrainMode::Poll,
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# sleuth configuration file
# Place at ~/.config/sleuth/config.toml (Linux) or set SLEUTH_CONFIG_PATH

# Model id and OpenAI-compatible endpoint (Ollama by default)
model = "llama3.2"
base_url = "http://localhost:11434/v1"

# Where reports are written, and where checkpoints and memory are kept
# output_dir = "research_outputs"
# data_dir = "~/.local/share/sleuth"

# Routing thresholds
confidence_threshold = 0.8
max_iterations = 3
budget_limit = 5000
# stop_on_budget = false

# Console streaming: "poll" drains every poll_interval_ms, "wait" parks until tokens arrive
poll_interval_ms = 50
join_timeout_ms = 5000
drain_mode = "poll"

# API keys (optional - can also use OPENAI_API_KEY / TAVILY_API_KEY)
[api_keys]
# openai = "sk-..."
# tavily = "tvly-..."
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(config.model.as_deref(), Some(DEFAULT_MODEL));
        assert_eq!(config.base_url.as_deref(), Some(DEFAULT_BASE_URL));
        assert_eq!(config.driver_config().drain_mode, DrainMode::Poll);
        assert_eq!(config.workflow_config().policy.max_iterations, 3);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: Config = toml::from_str("confidence_threshold = 0.6\ndrain_mode = \"wait\"").unwrap();
        let workflow = config.workflow_config();
        assert_eq!(workflow.policy.confidence_threshold, 0.6);
        assert_eq!(workflow.budget_limit, 5000);

        let driver = config.driver_config();
        assert_eq!(driver.drain_mode, DrainMode::Wait);
        assert_eq!(driver.poll_interval, Duration::from_millis(50));
        assert_eq!(driver.join_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let config: Config = toml::from_str(
            "confidence_threshold = 1.5\nmax_iterations = 10\npoll_interval_ms = 0",
        )
        .unwrap();
        let workflow = config.workflow_config();
        assert_eq!(workflow.policy.confidence_threshold, 1.0);
        assert_eq!(workflow.policy.max_iterations, 3);
        assert!(!workflow.policy.stop_on_budget);
        assert_eq!(config.driver_config().poll_interval, Duration::from_millis(1));

        let config: Config =
            toml::from_str("confidence_threshold = -0.2\nmax_iterations = 0\nstop_on_budget = true").unwrap();
        let workflow = config.workflow_config();
        assert_eq!(workflow.policy.confidence_threshold, 0.0);
        assert_eq!(workflow.policy.max_iterations, 1);
        assert!(workflow.policy.stop_on_budget);
    }

    #[test]
    fn test_configured_key_wins() {
        let config = Config {
            api_keys: ApiKeys {
                openai: Some("sk-config".into()),
                tavily: None,
            },
            ..Default::default()
        };
        assert_eq!(config.get_api_key("openai").as_deref(), Some("sk-config"));
        assert_eq!(config.get_api_key("unknown"), None);
    }
}
