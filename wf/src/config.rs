//! Workfabric configuration types and loading
//!
//! Config files are JSON; all durations are strings like `"120s"` or
//! `"5m"`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Parse a duration string: `500ms`, `120s`, `5m`, `2h`
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration {s:?} is missing a unit (ms/s/m/h)"))?;
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits.parse().map_err(|_| format!("invalid duration value in {s:?}"))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(format!("unknown duration unit {unit:?} in {s:?}")),
    }
}

/// Render a duration back to its string form
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if d.subsec_millis() != 0 {
        return format!("{}ms", d.as_millis());
    }
    if secs > 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// Serde adapter for duration strings
pub mod duration_str {
    use super::*;
    use serde::{Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(D::Error::custom)
    }
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub llm: LlmConfig,
    pub repo: RepoConfig,
    pub graph: GraphConfig,

    /// Identifier stamped onto published envelopes
    pub source: String,

    /// Per-worker overrides; anything absent is derived from the broker
    /// and LLM sections
    pub workers: BTreeMap<String, WorkerConfig>,
}

impl Config {
    /// Load configuration with fallback chain: explicit path, then
    /// `.workfabric.json`, then the user config dir, then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".workfabric.json");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("workfabric").join("workfabric.json");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_json::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// The effective config for one worker: the explicit entry when
    /// present, otherwise derived defaults.
    pub fn worker(&self, name: &str) -> WorkerConfig {
        if let Some(explicit) = self.workers.get(name) {
            return explicit.clone();
        }
        WorkerConfig {
            stream_name: self.broker.stream_name.clone(),
            consumer_name: name.to_string(),
            trigger_subject: crate::fabric::subjects::trigger_subject(name),
            result_subject_prefix: "workflow.result".to_string(),
            state_bucket: self.broker.state_bucket.clone(),
            llm_timeout: self.llm.timeout,
            default_capability: self.llm.default_capability.clone(),
            context_subject_prefix: "workflow.context".to_string(),
            context_response_bucket: "context-responses".to_string(),
            context_timeout: Duration::from_secs(30),
            ports: None,
        }
    }
}

/// Broker connection and stream naming
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub url: String,
    pub stream_name: String,
    pub state_bucket: String,

    /// How long one fetch blocks waiting for a message
    #[serde(with = "duration_str")]
    pub fetch_max_wait: Duration,

    /// Redelivery ceiling per message
    pub max_deliver: i64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            stream_name: "WORKFLOW".to_string(),
            state_bucket: "workflow-state".to_string(),
            fetch_max_wait: Duration::from_secs(5),
            max_deliver: 3,
        }
    }
}

/// One capability's model binding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityConfig {
    pub model: String,

    /// Endpoint override; falls back to the shared LLM endpoint
    pub endpoint: Option<String>,

    /// Token budget the context builder fills for this capability
    pub token_budget: usize,

    pub temperature: Option<f32>,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            model: "qwen2.5-coder:32b".to_string(),
            endpoint: None,
            token_budget: 16_000,
            temperature: None,
        }
    }
}

/// LLM endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the chat-completions service
    pub endpoint: String,

    /// Environment variable holding the API key, if any
    pub api_key_env: Option<String>,

    #[serde(with = "duration_str")]
    pub timeout: Duration,

    pub temperature: f32,

    /// Ceiling on response tokens per call
    pub max_tokens: u32,

    pub default_capability: String,

    /// Capability label -> model binding
    pub capabilities: BTreeMap<String, CapabilityConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let mut capabilities = BTreeMap::new();
        capabilities.insert("planning".to_string(), CapabilityConfig::default());
        capabilities.insert("reviewing".to_string(), CapabilityConfig::default());
        capabilities.insert("coding".to_string(), CapabilityConfig::default());
        Self {
            endpoint: "http://127.0.0.1:11434/v1".to_string(),
            api_key_env: None,
            timeout: Duration::from_secs(120),
            temperature: 0.2,
            max_tokens: 8192,
            default_capability: "planning".to_string(),
            capabilities,
        }
    }
}

/// Repository layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Root of the repository the pipeline works on
    pub root: PathBuf,

    /// Where plan documents are written, relative to the root
    pub plans_dir: String,

    /// Directory holding `checklist.json`, relative to the root
    pub checklist_dir: String,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            plans_dir: ".workfabric/plans".to_string(),
            checklist_dir: ".workfabric".to_string(),
        }
    }
}

/// Graph gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Base URL; SOP gathering is skipped when unset
    pub url: Option<String>,

    /// Readiness probes before giving up at startup
    pub wait_attempts: u32,
}

/// Per-worker configuration (the JSON shape every worker accepts)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub stream_name: String,
    pub consumer_name: String,
    pub trigger_subject: String,
    pub result_subject_prefix: String,
    pub state_bucket: String,

    #[serde(with = "duration_str")]
    pub llm_timeout: Duration,

    pub default_capability: String,

    pub context_subject_prefix: String,
    pub context_response_bucket: String,

    #[serde(with = "duration_str")]
    pub context_timeout: Duration,

    /// Optional explicit input/output subject bindings
    pub ports: Option<PortsConfig>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            stream_name: "WORKFLOW".to_string(),
            consumer_name: String::new(),
            trigger_subject: String::new(),
            result_subject_prefix: "workflow.result".to_string(),
            state_bucket: "workflow-state".to_string(),
            llm_timeout: Duration::from_secs(120),
            default_capability: "planning".to_string(),
            context_subject_prefix: "workflow.context".to_string(),
            context_response_bucket: "context-responses".to_string(),
            context_timeout: Duration::from_secs(30),
            ports: None,
        }
    }
}

impl WorkerConfig {
    /// Ack wait must outlast the slowest LLM call plus slack
    pub fn ack_wait(&self) -> Duration {
        self.llm_timeout + Duration::from_secs(30)
    }
}

/// Named input/output subject bindings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    pub inputs: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("120s").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_parse_duration_rejects() {
        assert!(parse_duration("120").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_format_duration_round_trips() {
        for s in ["120s", "5m", "2h", "500ms"] {
            let d = parse_duration(s).unwrap();
            assert_eq!(format_duration(d), s);
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.broker.stream_name, "WORKFLOW");
        assert_eq!(config.broker.max_deliver, 3);
        assert_eq!(config.llm.timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_worker_config_derived() {
        let config = Config::default();
        let planner = config.worker("planner");
        assert_eq!(planner.consumer_name, "planner");
        assert_eq!(planner.trigger_subject, "workflow.trigger.planner");
        assert_eq!(planner.state_bucket, "workflow-state");
        assert_eq!(planner.ack_wait(), Duration::from_secs(150));
    }

    #[test]
    fn test_worker_config_explicit_override() {
        let mut config = Config::default();
        let mut custom = WorkerConfig {
            consumer_name: "planner-b".to_string(),
            trigger_subject: "workflow.trigger.planner".to_string(),
            ..Default::default()
        };
        custom.llm_timeout = Duration::from_secs(60);
        config.workers.insert("planner".to_string(), custom);

        let planner = config.worker("planner");
        assert_eq!(planner.consumer_name, "planner-b");
        assert_eq!(planner.llm_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_deserialize_config_with_duration_strings() {
        let json = r#"{
            "broker": { "url": "nats://broker:4222", "fetch_max_wait": "10s" },
            "llm": {
                "endpoint": "http://llm:8000/v1",
                "timeout": "5m",
                "capabilities": {
                    "reviewing": { "model": "qwen3:30b", "token_budget": 24000 }
                }
            }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.broker.url, "nats://broker:4222");
        assert_eq!(config.broker.fetch_max_wait, Duration::from_secs(10));
        assert_eq!(config.llm.timeout, Duration::from_secs(300));
        assert_eq!(config.llm.capabilities["reviewing"].token_budget, 24_000);
        // Unspecified sections fall back to defaults
        assert_eq!(config.broker.max_deliver, 3);
    }
}
