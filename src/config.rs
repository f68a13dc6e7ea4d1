use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from hfbt.toml.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub peer: PeerConfig,
    pub webseed: WebseedConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

/// Which peer implementation backs the catalog's local peer endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PeerImpl {
    /// Report a statically configured, externally managed endpoint.
    #[default]
    #[serde(alias = "jetty")]
    External,
    /// Launch and supervise the sidecar script locally.
    #[serde(alias = "aioquic")]
    Sidecar,
}

impl std::fmt::Display for PeerImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerImpl::External => write!(f, "external"),
            PeerImpl::Sidecar => write!(f, "sidecar"),
        }
    }
}

impl std::str::FromStr for PeerImpl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "external" | "jetty" => Ok(PeerImpl::External),
            "sidecar" | "aioquic" => Ok(PeerImpl::Sidecar),
            other => Err(format!("unknown peer implementation: {other}")),
        }
    }
}

/// Settings for the local peer, both the static endpoint and the sidecar launcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub enabled: bool,
    /// Externally managed endpoint, also the fallback advertised in bootstrap responses.
    pub url: Option<String>,
    #[serde(rename = "impl")]
    pub implementation: PeerImpl,
    pub host: String,
    /// Fixed sidecar port; an ephemeral one is allocated per launch when unset.
    pub port: Option<u16>,
    pub script_path: PathBuf,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    /// Interpreter used to run `script_path`.
    pub command: String,
    pub start_retries: u32,
    pub start_backoff_ms: u64,
    pub ready_timeout_ms: u64,
    pub ready_marker: String,
    pub stop_grace_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebseedConfig {
    /// Upstream hosting base URL. Blank disables proxying.
    pub base_url: String,
    pub timeout_ms: u64,
    pub user_agent: String,
}

/// Errors raised while loading the configuration file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl AppConfig {
    /// Load config from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        Self::parse(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}

impl PeerConfig {
    /// Launch attempts per `start()`; never less than one.
    pub fn max_attempts(&self) -> u32 {
        self.start_retries.max(1)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.start_backoff_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Host the sidecar binds to, defaulting to loopback when blank.
    pub fn effective_host(&self) -> &str {
        let host = self.host.trim();
        if host.is_empty() {
            "127.0.0.1"
        } else {
            host
        }
    }

    /// The static endpoint, ignoring blank values.
    pub fn static_url(&self) -> Option<&str> {
        self.url.as_deref().filter(|u| !u.trim().is_empty())
    }
}

impl WebseedConfig {
    pub fn is_enabled(&self) -> bool {
        !self.base_url.trim().is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// --- Default implementations ---

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            implementation: PeerImpl::External,
            host: "127.0.0.1".to_string(),
            port: None,
            script_path: PathBuf::from("scripts/peer_sidecar.py"),
            cert_path: None,
            key_path: None,
            command: "python3".to_string(),
            start_retries: 3,
            start_backoff_ms: 1_000,
            ready_timeout_ms: 5_000,
            ready_marker: "Listening on https://".to_string(),
            stop_grace_ms: 2_000,
        }
    }
}

impl Default for WebseedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://huggingface.co".to_string(),
            timeout_ms: 10_000,
            user_agent: "hf-bt-webseed-proxy/1.0".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert!(!config.peer.enabled);
        assert_eq!(config.peer.implementation, PeerImpl::External);
        assert_eq!(config.peer.command, "python3");
        assert_eq!(config.peer.max_attempts(), 3);
        assert_eq!(config.peer.ready_timeout(), Duration::from_secs(5));
        assert!(config.webseed.is_enabled());
    }

    #[test]
    fn test_parse_sidecar_section() {
        let config = AppConfig::parse(
            r#"
[peer]
enabled = true
impl = "sidecar"
port = 4443
script_path = "/opt/peer/run.py"
start_retries = 5
start_backoff_ms = 250
"#,
        )
        .unwrap();
        assert!(config.peer.enabled);
        assert_eq!(config.peer.implementation, PeerImpl::Sidecar);
        assert_eq!(config.peer.port, Some(4443));
        assert_eq!(config.peer.script_path, PathBuf::from("/opt/peer/run.py"));
        assert_eq!(config.peer.max_attempts(), 5);
        assert_eq!(config.peer.backoff_base(), Duration::from_millis(250));
        // Unspecified fields keep their defaults
        assert_eq!(config.peer.host, "127.0.0.1");
        assert_eq!(config.server.bind, "127.0.0.1");
    }

    #[test]
    fn test_parse_legacy_impl_aliases() {
        let config = AppConfig::parse("[peer]\nimpl = \"aioquic\"\n").unwrap();
        assert_eq!(config.peer.implementation, PeerImpl::Sidecar);
        let config = AppConfig::parse("[peer]\nimpl = \"jetty\"\n").unwrap();
        assert_eq!(config.peer.implementation, PeerImpl::External);
    }

    #[test]
    fn test_parse_rejects_unknown_impl() {
        assert!(AppConfig::parse("[peer]\nimpl = \"quantum\"\n").is_err());
    }

    #[test]
    fn test_zero_retries_coerced_to_one_attempt() {
        let peer = PeerConfig {
            start_retries: 0,
            ..Default::default()
        };
        assert_eq!(peer.max_attempts(), 1);
    }

    #[test]
    fn test_blank_host_defaults_to_loopback() {
        let peer = PeerConfig {
            host: "  ".to_string(),
            ..Default::default()
        };
        assert_eq!(peer.effective_host(), "127.0.0.1");
    }

    #[test]
    fn test_blank_static_url_is_none() {
        let peer = PeerConfig {
            url: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(peer.static_url(), None);
    }

    #[test]
    fn test_blank_base_url_disables_webseed() {
        let config = AppConfig::parse("[webseed]\nbase_url = \"\"\n").unwrap();
        assert!(!config.webseed.is_enabled());
    }

    #[test]
    fn test_peer_impl_from_str() {
        assert_eq!("Sidecar".parse::<PeerImpl>().unwrap(), PeerImpl::Sidecar);
        assert_eq!("external".parse::<PeerImpl>().unwrap(), PeerImpl::External);
        assert!("other".parse::<PeerImpl>().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_load_malformed_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hfbt.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse config"));
    }
}
