//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! API keys are loaded from the GEMINI_API_KEYS env var or credentials_file,
//! never stored in the TOML directly to avoid leaking secrets.

use common::Secret;
use key_pool::{RateLimits, RetryPolicy};
use provider::ModelId;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Env var holding comma or newline separated API keys.
pub const CREDENTIALS_ENV: &str = "GEMINI_API_KEYS";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    /// File with one API key per line (alternative to GEMINI_API_KEYS)
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(skip)]
    pub credentials: Vec<Secret<String>>,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Credential management listener, kept off the public address
    #[serde(default = "default_admin_listen_addr")]
    pub admin_listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Request body cap; inline images make bodies large
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Upstream generative API settings
#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_requests_per_window")]
    pub default_requests_per_window: u32,
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,
    #[serde(default = "default_floor_delay_ms")]
    pub floor_delay_ms: u64,
    #[serde(default)]
    pub models: Vec<ModelLimit>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            default_requests_per_window: default_requests_per_window(),
            safety_margin: default_safety_margin(),
            floor_delay_ms: default_floor_delay_ms(),
            models: Vec::new(),
        }
    }
}

/// Per-model override of the request ceiling
#[derive(Debug, Clone, Deserialize)]
pub struct ModelLimit {
    pub model: ModelId,
    pub requests_per_window: u32,
}

#[derive(Debug, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries_per_credential: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_quota_cooldown_secs")]
    pub quota_cooldown_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries_per_credential: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            quota_cooldown_secs: default_quota_cooldown_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_tasks: default_max_tasks(),
        }
    }
}

fn default_admin_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_max_connections() -> usize {
    64
}

fn default_max_body_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_base_url() -> String {
    provider::gemini::DEFAULT_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_window_secs() -> u64 {
    60
}

fn default_requests_per_window() -> u32 {
    key_pool::profile::DEFAULT_REQUESTS_PER_WINDOW
}

fn default_safety_margin() -> f64 {
    key_pool::profile::DEFAULT_SAFETY_MARGIN
}

fn default_floor_delay_ms() -> u64 {
    key_pool::profile::DEFAULT_FLOOR_DELAY.as_millis() as u64
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    15_000
}

fn default_quota_cooldown_secs() -> u64 {
    60
}

fn default_max_tasks() -> usize {
    4
}

/// Split a key list on commas and newlines, dropping blanks and `#` comments.
pub fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(['\n', ','])
        .map(str::trim)
        .filter(|key| !key.is_empty() && !key.starts_with('#'))
        .map(str::to_owned)
        .collect()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Credential resolution order:
    /// 1. GEMINI_API_KEYS env var
    /// 2. credentials_file path from config
    ///
    /// No credentials is not an error; keys can be loaded later through the
    /// admin listener.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        let raw = match std::env::var(CREDENTIALS_ENV) {
            Ok(value) => Some(value),
            Err(_) => match config.credentials_file {
                Some(ref file) => Some(std::fs::read_to_string(file).map_err(|e| {
                    common::Error::Credentials(format!(
                        "failed to read credentials_file {}: {e}",
                        file.display()
                    ))
                })?),
                None => None,
            },
        };

        if let Some(raw) = raw {
            config.credentials = parse_key_list(&raw).into_iter().map(Secret::new).collect();
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.upstream.base_url.starts_with("http://")
            && !self.upstream.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.upstream.base_url
            )));
        }

        if self.upstream.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.rate_limit.window_secs == 0 {
            return Err(common::Error::Config(
                "window_secs must be greater than 0".into(),
            ));
        }

        if self.rate_limit.default_requests_per_window == 0 {
            return Err(common::Error::Config(
                "default_requests_per_window must be greater than 0".into(),
            ));
        }

        if let Some(limit) = self
            .rate_limit
            .models
            .iter()
            .find(|limit| limit.requests_per_window == 0)
        {
            return Err(common::Error::Config(format!(
                "requests_per_window for {} must be greater than 0",
                limit.model
            )));
        }

        let margin = self.rate_limit.safety_margin;
        if !(margin > 0.0 && margin <= 1.0) {
            return Err(common::Error::Config(format!(
                "safety_margin must be in (0, 1], got: {margin}"
            )));
        }

        if self.batch.max_tasks == 0 {
            return Err(common::Error::Config(
                "max_tasks must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Rate limits for the session built from `[rate_limit]`.
    pub fn rate_limits(&self) -> RateLimits {
        let section = &self.rate_limit;
        section.models.iter().fold(
            RateLimits::new(
                Duration::from_secs(section.window_secs),
                section.default_requests_per_window,
            )
            .with_safety_margin(section.safety_margin)
            .with_floor_delay(Duration::from_millis(section.floor_delay_ms)),
            |limits, limit| limits.with_model(limit.model, limit.requests_per_window),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries_per_credential: self.retry.max_retries_per_credential,
            base_backoff: Duration::from_millis(self.retry.base_backoff_ms),
            quota_cooldown: Duration::from_secs(self.retry.quota_cooldown_secs),
        }
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("studio-gateway.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    /// Serializes tests that touch GEMINI_API_KEYS or CONFIG_PATH.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const MINIMAL: &str = r#"
[server]
listen_addr = "127.0.0.1:8080"
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(CREDENTIALS_ENV) };
        let file = write_config(MINIMAL);

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.max_connections, 64);
        assert_eq!(config.server.admin_listen_addr.port(), 9090);
        assert_eq!(config.upstream.base_url, provider::gemini::DEFAULT_BASE_URL);
        assert_eq!(config.upstream.timeout_secs, 120);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.rate_limit.default_requests_per_window, 15);
        assert_eq!(config.rate_limit.floor_delay_ms, 4_000);
        assert_eq!(config.batch.max_tasks, 4);
        assert!(config.credentials.is_empty());

        let policy = config.retry_policy();
        assert_eq!(policy.max_retries_per_credential, 3);
        assert_eq!(policy.base_backoff, Duration::from_secs(15));
        assert_eq!(policy.quota_cooldown, Duration::from_secs(60));
    }

    #[test]
    fn full_config_builds_rate_limits() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(CREDENTIALS_ENV) };
        let file = write_config(
            r#"
[server]
listen_addr = "0.0.0.0:8080"
admin_listen_addr = "127.0.0.1:9191"
max_connections = 8

[upstream]
base_url = "http://127.0.0.1:9999"
timeout_secs = 30

[rate_limit]
window_secs = 30
default_requests_per_window = 10
safety_margin = 0.5
floor_delay_ms = 1000

[[rate_limit.models]]
model = "gemini-2.0-flash"
requests_per_window = 40

[retry]
max_retries_per_credential = 2
base_backoff_ms = 500
quota_cooldown_secs = 10

[batch]
max_tasks = 8
"#,
        );

        let config = Config::load(file.path()).unwrap();
        let limits = config.rate_limits();
        assert_eq!(limits.window, Duration::from_secs(30));
        assert_eq!(limits.safety_margin, 0.5);
        assert_eq!(limits.floor_delay, Duration::from_secs(1));
        assert_eq!(limits.ceiling_for(ModelId::Gemini20Flash), 40);
        assert_eq!(limits.ceiling_for(ModelId::Gemini20FlashExp), 10);
        assert_eq!(config.retry_policy().backoff(1), Duration::from_millis(1_000));
        assert_eq!(config.batch.max_tasks, 8);
        assert_eq!(config.server.admin_listen_addr.port(), 9191);
    }

    #[test]
    fn load_missing_file_fails() {
        assert!(Config::load(Path::new("/nonexistent/path/config.toml")).is_err());
    }

    #[test]
    fn load_invalid_toml_fails() {
        let file = write_config("not valid {{{{ toml");
        assert!(matches!(
            Config::load(file.path()),
            Err(common::Error::Toml(_))
        ));
    }

    #[test]
    fn unknown_model_override_is_rejected() {
        let file = write_config(
            r#"
[server]
listen_addr = "127.0.0.1:8080"

[[rate_limit.models]]
model = "gemini-ultra-9"
requests_per_window = 5
"#,
        );
        assert!(Config::load(file.path()).is_err());
    }

    fn assert_rejected(extra: &str, expected: &str) {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(CREDENTIALS_ENV) };
        let file = write_config(&format!("{MINIMAL}\n{extra}"));
        let err = Config::load(file.path()).unwrap_err().to_string();
        assert!(err.contains(expected), "expected {expected:?} in: {err}");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert_rejected("[upstream]\nbase_url = \"example.com\"", "base_url must start with http");
        assert_rejected("[upstream]\ntimeout_secs = 0", "timeout_secs");
        assert_rejected("[rate_limit]\nwindow_secs = 0", "window_secs");
        assert_rejected(
            "[rate_limit]\ndefault_requests_per_window = 0",
            "default_requests_per_window",
        );
        assert_rejected("[rate_limit]\nsafety_margin = 0.0", "safety_margin");
        assert_rejected("[rate_limit]\nsafety_margin = 1.5", "safety_margin");
        assert_rejected("[batch]\nmax_tasks = 0", "max_tasks");
        assert_rejected(
            "[[rate_limit.models]]\nmodel = \"gemini-2.0-flash\"\nrequests_per_window = 0",
            "gemini-2.0-flash",
        );
    }

    #[test]
    fn max_connections_zero_rejected() {
        let file = write_config(
            r#"
[server]
listen_addr = "127.0.0.1:8080"
max_connections = 0
"#,
        );
        let err = Config::load(file.path()).unwrap_err().to_string();
        assert!(err.contains("max_connections"), "got: {err}");
    }

    #[test]
    fn credentials_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let file = write_config(MINIMAL);
        unsafe { set_env(CREDENTIALS_ENV, "AIza-one, AIza-two\nAIza-three,,") };

        let config = Config::load(file.path()).unwrap();
        unsafe { remove_env(CREDENTIALS_ENV) };

        let keys: Vec<&str> = config
            .credentials
            .iter()
            .map(|k| k.expose().as_str())
            .collect();
        assert_eq!(keys, vec!["AIza-one", "AIza-two", "AIza-three"]);
    }

    #[test]
    fn credentials_from_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(CREDENTIALS_ENV) };
        let keys = write_config("# team keys\nAIza-file-1\n\n  AIza-file-2  \n");
        let file = write_config(&format!(
            "credentials_file = \"{}\"\n{MINIMAL}",
            keys.path().display()
        ));

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.credentials.len(), 2);
        assert_eq!(config.credentials[1].expose(), "AIza-file-2");
    }

    #[test]
    fn env_credentials_override_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let keys = write_config("AIza-file\n");
        let file = write_config(&format!(
            "credentials_file = \"{}\"\n{MINIMAL}",
            keys.path().display()
        ));
        unsafe { set_env(CREDENTIALS_ENV, "AIza-env") };

        let config = Config::load(file.path()).unwrap();
        unsafe { remove_env(CREDENTIALS_ENV) };

        assert_eq!(config.credentials.len(), 1);
        assert_eq!(config.credentials[0].expose(), "AIza-env");
    }

    #[test]
    fn missing_credentials_file_is_a_credentials_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(CREDENTIALS_ENV) };
        let file = write_config(&format!(
            "credentials_file = \"/nonexistent/keys.txt\"\n{MINIMAL}"
        ));

        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, common::Error::Credentials(_)), "got: {err}");
    }

    #[test]
    fn parse_key_list_skips_blanks_and_comments() {
        assert_eq!(
            parse_key_list(" a ,b\n# note\n\nc"),
            vec!["a".to_string(), "b".into(), "c".into()]
        );
        assert!(parse_key_list(" , \n ").is_empty());
    }

    #[test]
    fn resolve_path_precedence() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        assert_eq!(
            Config::resolve_path(Some("/cli/wins.toml")),
            PathBuf::from("/cli/wins.toml")
        );
        assert_eq!(Config::resolve_path(None), PathBuf::from("/env/path.toml"));
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(
            Config::resolve_path(None),
            PathBuf::from("studio-gateway.toml")
        );
    }
}
