//! Configuration loading and validation for the health-check daemon.

use balancer::{Backend, BackendState, Server};
use healthcheck::probe::SourceBinding;
use healthcheck::types::CheckSpec;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub metrics: MetricsSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub backends: Vec<BackendSettings>,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.engine.validate()?;
        for backend in &self.backends {
            backend.validate()?;
            for server in &backend.servers {
                server.validate()?;
            }
        }
        Ok(())
    }
}

/// Metrics endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSettings {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    #[serde(default = "default_metrics_addr")]
    pub listen_addr: String,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: Option<String>,
    /// "text" (default) or "json"
    pub format: Option<String>,
}

/// Engine-wide settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EngineSettings {
    /// Cap on concurrently open probe sockets. Ticks that find the cap
    /// exhausted skip their probe and retry next interval.
    #[serde(default = "default_max_probe_sockets")]
    #[validate(range(min = 1, max = 65536))]
    pub max_probe_sockets: usize,
}

/// One backend and its servers
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BackendSettings {
    #[validate(length(min = 1))]
    pub name: String,

    /// Allow moving queued sessions off a server that goes down.
    #[serde(default)]
    pub redispatch: bool,

    #[serde(default)]
    pub check: CheckSettings,

    /// Backend-level outbound binding for probes.
    #[serde(default)]
    pub source: Option<SocketAddrV4>,

    /// Spoofed source for transparent probing.
    #[serde(default)]
    pub transparent: Option<SocketAddrV4>,

    /// Session count at which minconn-scaled servers reach full allowance.
    #[serde(default)]
    pub fullconn: u32,

    #[validate(length(min = 1))]
    pub servers: Vec<ServerSettings>,
}

/// Probe protocol selection and payload knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum CheckSettings {
    Tcp,
    Http {
        #[serde(default = "default_http_uri")]
        uri: String,
        #[serde(default = "default_http_version")]
        version: String,
    },
    Ssl3,
    Smtp {
        #[serde(default = "default_smtp_hello")]
        hello: String,
    },
}

impl Default for CheckSettings {
    fn default() -> Self {
        CheckSettings::Tcp
    }
}

impl CheckSettings {
    /// Render the probe payload for this protocol.
    pub fn to_spec(&self) -> CheckSpec {
        match self {
            CheckSettings::Tcp => CheckSpec::tcp(),
            CheckSettings::Http { uri, version } => CheckSpec::http(uri, version),
            CheckSettings::Ssl3 => CheckSpec::ssl3(),
            CheckSettings::Smtp { hello } => CheckSpec::smtp(hello),
        }
    }
}

/// One server declaration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerSettings {
    #[validate(length(min = 1))]
    pub name: String,

    /// Serving address, e.g. "10.0.0.1:80".
    pub addr: SocketAddrV4,

    /// Probe address override.
    #[serde(default)]
    pub check_addr: Option<Ipv4Addr>,

    /// Probe port; defaults to the serving port.
    #[serde(default)]
    pub check_port: Option<u16>,

    /// Probe interval, also the per-probe deadline.
    #[serde(default = "default_inter", with = "humantime_serde")]
    #[validate(custom = "validate_inter")]
    pub inter: Duration,

    #[serde(default = "default_rise")]
    #[validate(range(min = 1, max = 1000))]
    pub rise: u32,

    #[serde(default = "default_fall")]
    #[validate(range(min = 1, max = 1000))]
    pub fall: u32,

    #[serde(default = "default_weight")]
    #[validate(range(min = 1, max = 256))]
    pub weight: u32,

    #[serde(default)]
    pub backup: bool,

    #[serde(default)]
    pub maxconn: u32,

    #[serde(default)]
    pub minconn: u32,

    /// Server-level outbound binding for probes.
    #[serde(default)]
    pub source: Option<SocketAddrV4>,

    /// Spoofed source for transparent probing.
    #[serde(default)]
    pub transparent: Option<SocketAddrV4>,

    /// Disable to keep the server in the backend without probing it.
    #[serde(default = "default_checked")]
    pub checked: bool,
}

// Defaults

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_addr() -> String {
    "127.0.0.1:9105".to_string()
}

fn default_max_probe_sockets() -> usize {
    1024
}

fn default_http_uri() -> String {
    "/".to_string()
}

fn default_http_version() -> String {
    "HTTP/1.0".to_string()
}

fn default_smtp_hello() -> String {
    "HELO localhost".to_string()
}

fn default_inter() -> Duration {
    Duration::from_secs(2)
}

fn default_rise() -> u32 {
    2
}

fn default_fall() -> u32 {
    3
}

fn default_weight() -> u32 {
    1
}

fn default_checked() -> bool {
    true
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: default_metrics_enabled(), listen_addr: default_metrics_addr() }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { max_probe_sockets: default_max_probe_sockets() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metrics: MetricsSettings::default(),
            logging: LoggingSettings::default(),
            engine: EngineSettings::default(),
            backends: Vec::new(),
        }
    }
}

// Custom validators

fn validate_inter(inter: &Duration) -> Result<(), ValidationError> {
    let millis = inter.as_millis();
    if !(10..=60_000).contains(&millis) {
        return Err(ValidationError::new("inter_out_of_range"));
    }
    Ok(())
}

// Configuration loading

impl Config {
    /// Load configuration from the default search paths, falling back to
    /// defaults when no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/checkd/checkd.yaml")];

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config/checkd/checkd.yaml"));
        }

        paths.push(PathBuf::from("./checkd.yaml"));

        paths.into_iter().find(|p: &PathBuf| p.exists() && p.is_file())
    }

    /// Materialize the configured backends and their probe specs.
    pub fn build_backends(&self) -> Vec<(Arc<Backend>, CheckSpec)> {
        self.backends
            .iter()
            .map(|settings| {
                let servers = settings.servers.iter().map(build_server).collect();
                let mut state = BackendState::new(&settings.name, servers);
                state.redispatch = settings.redispatch;
                state.fullconn = settings.fullconn;
                state.source = source_binding(settings.source, settings.transparent);
                (Backend::new(state), settings.check.to_spec())
            })
            .collect()
    }
}

fn build_server(settings: &ServerSettings) -> Server {
    let mut srv = Server::new(&settings.name, settings.addr);
    srv.check_addr = settings.check_addr;
    if let Some(port) = settings.check_port {
        srv.check_port = port;
    }
    srv.inter = settings.inter;
    srv.rise = settings.rise;
    srv.fall = settings.fall;
    srv.weight = settings.weight;
    srv.backup = settings.backup;
    srv.maxconn = settings.maxconn;
    srv.minconn = settings.minconn;
    srv.checked = settings.checked;
    srv.source = source_binding(settings.source, settings.transparent);
    srv
}

fn source_binding(
    source: Option<SocketAddrV4>,
    transparent: Option<SocketAddrV4>,
) -> Option<SourceBinding> {
    match (source, transparent) {
        (None, None) => None,
        (addr, transparent) => Some(SourceBinding {
            addr: addr.unwrap_or_else(|| SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)),
            transparent,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healthcheck::types::{CheckProtocol, DEF_HTTP_CHECK_REQ};

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn full_yaml_parses() {
        let yaml = r#"
metrics:
  listen_addr: "127.0.0.1:9200"

engine:
  max_probe_sockets: 256

backends:
  - name: web
    redispatch: true
    check:
      protocol: http
      uri: /health
    fullconn: 1000
    servers:
      - name: web1
        addr: "10.0.0.1:80"
        inter: 2s
        rise: 2
        fall: 3
        weight: 4
      - name: web2
        addr: "10.0.0.2:80"
        check_port: 8080
        backup: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.metrics.listen_addr, "127.0.0.1:9200");
        assert_eq!(config.engine.max_probe_sockets, 256);

        let backend = &config.backends[0];
        assert!(backend.redispatch);
        assert_eq!(
            backend.check,
            CheckSettings::Http { uri: "/health".into(), version: "HTTP/1.0".into() }
        );
        assert_eq!(backend.servers[0].inter, Duration::from_secs(2));
        assert_eq!(backend.servers[0].weight, 4);
        assert!(backend.servers[1].backup);
        assert_eq!(backend.servers[1].check_port, Some(8080));
    }

    #[test]
    fn minimal_server_uses_defaults() {
        let yaml = r#"
backends:
  - name: web
    servers:
      - name: web1
        addr: "10.0.0.1:80"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        let srv = &config.backends[0].servers[0];
        assert_eq!(srv.inter, Duration::from_secs(2));
        assert_eq!((srv.rise, srv.fall, srv.weight), (2, 3, 1));
        assert!(srv.checked);
        assert_eq!(config.backends[0].check, CheckSettings::Tcp);
    }

    #[test]
    fn backend_without_servers_is_rejected() {
        let yaml = r#"
backends:
  - name: web
    servers: []
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_inter_is_rejected() {
        let yaml = r#"
backends:
  - name: web
    servers:
      - name: web1
        addr: "10.0.0.1:80"
        inter: 5ms
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_rise_is_rejected() {
        let yaml = r#"
backends:
  - name: web
    servers:
      - name: web1
        addr: "10.0.0.1:80"
        rise: 0
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn smtp_check_renders_the_hello() {
        let yaml = r#"
backends:
  - name: mail
    check:
      protocol: smtp
      hello: "HELO probe.local"
    servers:
      - name: mx1
        addr: "10.0.0.1:25"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let spec = config.backends[0].check.to_spec();
        assert_eq!(spec.protocol, CheckProtocol::Smtp);
        assert_eq!(spec.request, b"HELO probe.local\r\n");
    }

    #[test]
    fn built_backends_carry_the_settings() {
        let yaml = r#"
backends:
  - name: web
    redispatch: true
    check:
      protocol: http
    source: "10.1.0.1:0"
    servers:
      - name: web1
        addr: "10.0.0.1:80"
        check_addr: "10.0.9.1"
        check_port: 8080
        source: "10.1.0.2:0"
        transparent: "192.0.2.7:0"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let built = config.build_backends();
        assert_eq!(built.len(), 1);
        let (backend, spec) = &built[0];
        assert_eq!(spec.request, DEF_HTTP_CHECK_REQ.as_bytes());

        let st = backend.state();
        assert!(st.redispatch);
        assert_eq!(st.servers[0].check_dest(), "10.0.9.1:8080".parse().unwrap());
        // server-level binding wins over the backend-level one
        let target = st.probe_target(0);
        let source = target.source.unwrap();
        assert_eq!(source.addr, "10.1.0.2:0".parse().unwrap());
        assert_eq!(source.transparent, Some("192.0.2.7:0".parse().unwrap()));
    }

    #[test]
    fn humantime_intervals_parse() {
        let yaml = r#"
backends:
  - name: web
    servers:
      - name: web1
        addr: "10.0.0.1:80"
        inter: 250ms
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.backends[0].servers[0].inter, Duration::from_millis(250));
    }
}
