//! Loader for workspace configuration with YAML + environment overlays.
//!
//! Sources are merged in the order they are attached, with `BACKPOCKET__`
//! prefixed environment variables layered on top (`__` separates nested keys,
//! e.g. `BACKPOCKET__FETCH__TIMEOUT_SECS=5`). After merging, `${VAR}`
//! placeholders inside string values are expanded from the process
//! environment. Every section has defaults, so an empty document is valid.
//!
//! ```yaml
//! version: "1"
//! database:
//!   url: "sqlite://backpocket.db"
//! fetch:
//!   timeout_secs: 15
//!   allow_private_networks: false
//! quota:
//!   daily_limit: 50
//! logging:
//!   format: json
//!   stderr: true
//! ```
pub use backpocket_common::observability::{LogFormat, LoggingConfig};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

const MAXIMUM_ENV_EXPANSION_DEPTH: usize = 8;
const ENV_PREFIX: &str = "BACKPOCKET";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackpocketConfig {
    #[serde(deserialize_with = "string_or_number")]
    pub version: Option<String>,
    pub database: DatabaseConfig,
    pub fetch: FetchConfig,
    pub extract: ExtractConfig,
    pub quota: QuotaConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://backpocket.db".into(),
            max_connections: 5,
        }
    }
}

/// Network policy for snapshot fetches.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_body_bytes: u64,
    pub max_redirects: usize,
    /// Skip the private-network guard. Only meant for local development.
    pub allow_private_networks: bool,
    /// Resolve hostnames and refuse private addresses before connecting.
    pub resolve_dns: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (compatible; BackpocketBot/1.0; +https://backpocket.my/bot)"
                .into(),
            accept: "text/html,application/xhtml+xml;q=0.9,*/*;q=0.1".into(),
            accept_language: "en-US,en;q=0.9".into(),
            timeout_secs: 15,
            connect_timeout_secs: 5,
            max_body_bytes: 5 * 1024 * 1024,
            max_redirects: 10,
            allow_private_networks: false,
            resolve_dns: true,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Minimum text length before the extractor falls back to the whole body.
    pub char_threshold: usize,
    pub max_text_chars: usize,
    pub excerpt_chars: usize,
    /// Pages nesting elements deeper than this are refused as unparseable.
    pub max_nesting_depth: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            char_threshold: 500,
            max_text_chars: 500_000,
            excerpt_chars: 500,
            max_nesting_depth: 256,
        }
    }
}

/// Manual refresh quota.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub daily_limit: u32,
    pub window_secs: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: 50,
            window_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub max_concurrent_runs: usize,
    pub mailbox_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 4,
            mailbox_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub thread_name: String,
    pub worker_threads: Option<usize>,
    pub shutdown_grace_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thread_name: "backpocket".into(),
            worker_threads: None,
            shutdown_grace_secs: 5,
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

fn expand_env_in_value(v: &mut Value) {
    match v {
        Value::String(s) => {
            if s.contains('$') {
                let mut cur = std::mem::take(s);
                for _ in 0..MAXIMUM_ENV_EXPANSION_DEPTH {
                    let expanded = match shellexpand::env(&cur) {
                        Ok(cow) => cow.into_owned(),
                        Err(_) => cur.clone(),
                    };
                    if expanded == cur {
                        break;
                    }
                    cur = expanded;
                }
                *s = cur;
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(expand_env_in_value),
        Value::Object(obj) => obj.values_mut().for_each(expand_env_in_value),
        _ => {}
    }
}

fn validate(cfg: &BackpocketConfig) -> Result<(), ConfigError> {
    if cfg.fetch.timeout_secs == 0 {
        return Err(ConfigError::Message(
            "fetch.timeout_secs must be greater than zero".into(),
        ));
    }
    if cfg.fetch.max_body_bytes == 0 {
        return Err(ConfigError::Message(
            "fetch.max_body_bytes must be greater than zero".into(),
        ));
    }
    if cfg.quota.window_secs == 0 {
        return Err(ConfigError::Message(
            "quota.window_secs must be greater than zero".into(),
        ));
    }
    if cfg.worker.max_concurrent_runs == 0 || cfg.worker.mailbox_capacity == 0 {
        return Err(ConfigError::Message(
            "worker.max_concurrent_runs and worker.mailbox_capacity must be greater than zero"
                .into(),
        ));
    }
    Ok(())
}

/// Builder hides the `config` crate wiring (YAML + env overrides).
pub struct BackpocketConfigLoader {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
}

impl Default for BackpocketConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl BackpocketConfigLoader {
    /// Start with defaults; `BACKPOCKET__` env overrides are always applied last.
    ///
    /// ```
    /// use backpocket_config::BackpocketConfigLoader;
    ///
    /// let config = BackpocketConfigLoader::new()
    ///     .with_yaml_str("version: '1'")
    ///     .load()
    ///     .expect("valid config");
    ///
    /// assert_eq!(config.version.as_deref(), Some("1"));
    /// assert_eq!(config.quota.daily_limit, 50);
    /// assert_eq!(config.fetch.timeout_secs, 15);
    /// ```
    pub fn new() -> Self {
        Self {
            builder: Config::builder(),
        }
    }

    /// Attach a YAML/TOML/JSON file; the `config` crate infers format by suffix.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(true));
        self
    }

    /// Attach a file that may be absent, for environment-only deployments.
    pub fn with_optional_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(false));
        self
    }

    /// Allow tests/CLI to merge inline YAML snippets.
    ///
    /// ```
    /// use backpocket_config::BackpocketConfigLoader;
    ///
    /// let cfg = BackpocketConfigLoader::new()
    ///     .with_yaml_str(
    ///         r#"
    /// fetch:
    ///   timeout_secs: 3
    ///   allow_private_networks: true
    /// quota:
    ///   daily_limit: 5
    /// "#,
    ///     )
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(cfg.fetch.timeout_secs, 3);
    /// assert!(cfg.fetch.allow_private_networks);
    /// assert_eq!(cfg.quota.daily_limit, 5);
    /// assert_eq!(cfg.fetch.max_body_bytes, 5 * 1024 * 1024);
    /// ```
    pub fn with_yaml_str(mut self, yaml: &str) -> Self {
        self.builder = self
            .builder
            .add_source(File::from_str(yaml, config::FileFormat::Yaml));
        self
    }

    /// Consume the builder and deserialize the merged sources into strongly typed config.
    ///
    /// ```
    /// use backpocket_config::BackpocketConfigLoader;
    ///
    /// unsafe { std::env::set_var("BP_DOCTEST_DB", "sqlite://from-env.db"); }
    ///
    /// let config = BackpocketConfigLoader::new()
    ///     .with_yaml_str(r#"
    /// database:
    ///   url: "${BP_DOCTEST_DB}"
    /// "#)
    ///     .load()
    ///     .expect("valid configuration");
    ///
    /// assert_eq!(config.database.url, "sqlite://from-env.db");
    ///
    /// unsafe { std::env::remove_var("BP_DOCTEST_DB"); }
    /// ```
    pub fn load(self) -> Result<BackpocketConfig, ConfigError> {
        let cfg = self
            .builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut v: Value = cfg.try_deserialize()?;
        expand_env_in_value(&mut v);

        let typed: BackpocketConfig =
            serde_json::from_value(v).map_err(|e| ConfigError::Message(e.to_string()))?;
        validate(&typed)?;

        Ok(typed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expands_simple_string() {
        temp_env::with_var("FOO", Some("bar"), || {
            let mut v = json!("prefix-${FOO}-suffix");
            expand_env_in_value(&mut v);
            assert_eq!(v, json!("prefix-bar-suffix"));
        });
    }

    #[test]
    fn expands_in_array_and_object() {
        temp_env::with_vars([("CITY", Some("Winston")), ("STATE", Some("NC"))], || {
            let mut v = json!([
                "hello-$CITY",
                { "loc": "${CITY}-${STATE}" },
                42,
                true,
                null
            ]);
            expand_env_in_value(&mut v);
            assert_eq!(
                v,
                json!(["hello-Winston", { "loc": "Winston-NC" }, 42, true, null])
            );
        });
    }

    #[test]
    fn stops_on_cycles() {
        temp_env::with_vars([("A", Some("${B}")), ("B", Some("${A}"))], || {
            let mut v = json!("x=${A}-y");
            expand_env_in_value(&mut v);
            let s = v.as_str().unwrap();
            assert!(s.starts_with("x=") && s.ends_with("-y"));
            assert!(s.contains("${"));
        });
    }

    #[test]
    fn unknown_vars_are_left_as_is() {
        let mut v = json!("hi-${DOES_NOT_EXIST}");
        expand_env_in_value(&mut v);
        assert_eq!(v, json!("hi-${DOES_NOT_EXIST}"));
    }

    #[test]
    fn numeric_version_is_kept_as_text() {
        let v: BackpocketConfig = serde_json::from_value(json!({ "version": 0.1 })).unwrap();
        assert_eq!(v.version.as_deref(), Some("0.1"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut cfg = BackpocketConfig::default();
        cfg.fetch.timeout_secs = 0;
        assert!(validate(&cfg).is_err());
    }
}
