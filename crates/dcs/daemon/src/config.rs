//! Configuration for dcs-daemon

use dcs_authz::roles;
use dcs_workflow::EngineConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DcsConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Approver roles and the retry, compliance and re-sign policies
    #[serde(default)]
    pub engine: EngineConfig,

    /// Technical bounds on collaborator calls made while signing
    #[serde(default)]
    pub timeouts: SigningTimeoutConfig,

    #[serde(default)]
    pub authz: AuthzConfig,

    #[serde(default)]
    pub credentials: CredentialsConfig,

    #[serde(default)]
    pub revocation: RevocationConfig,

    #[serde(default)]
    pub target: TargetConfig,

    #[serde(default)]
    pub sweeper: SweeperConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8480)),
            enable_cors: true,
            request_timeout_secs: default_request_timeout(),
            max_body_size: default_max_body_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningTimeoutConfig {
    pub credential_verify_ms: u64,
    pub credential_fetch_ms: u64,
    pub wallet_ms: u64,
    pub timestamp_ms: u64,
}

impl Default for SigningTimeoutConfig {
    fn default() -> Self {
        Self {
            credential_verify_ms: 2_000,
            credential_fetch_ms: 5_000,
            wallet_ms: 10_000,
            timestamp_ms: 5_000,
        }
    }
}

impl SigningTimeoutConfig {
    pub fn credential_verify(&self) -> Duration {
        Duration::from_millis(self.credential_verify_ms)
    }

    pub fn signature(&self) -> dcs_signature::SignatureTimeouts {
        dcs_signature::SignatureTimeouts {
            credential_fetch: Duration::from_millis(self.credential_fetch_ms),
            wallet: Duration::from_millis(self.wallet_ms),
            timestamp: Duration::from_millis(self.timestamp_ms),
        }
    }
}

/// One bootstrap role assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub actor: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthzConfig {
    /// Permission cache TTL; capped at the gate's hard maximum.
    pub permission_ttl_ms: u64,
    pub assignments: Vec<RoleAssignment>,
    /// Roles held by the engine's own identity (sweepers, reactor).
    pub engine_roles: Vec<String>,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            permission_ttl_ms: 1_000,
            assignments: Vec::new(),
            engine_roles: vec![
                roles::SECURITY_ADMINISTRATOR.to_string(),
                roles::COMPLIANCE_OFFICER.to_string(),
            ],
        }
    }
}

impl AuthzConfig {
    pub fn permission_ttl(&self) -> Duration {
        Duration::from_millis(self.permission_ttl_ms)
    }
}

/// A trusted root issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustAnchor {
    pub issuer: String,
    /// Hex ed25519 verifying key.
    pub public_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub trust_anchors: Vec<TrustAnchor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RevocationConfig {
    /// Registry cache TTL; capped at the registry's hard maximum.
    pub cache_ttl_ms: u64,
    pub queue_capacity: usize,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 2_000,
            queue_capacity: 256,
        }
    }
}

impl RevocationConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

/// Where signed contracts are deployed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TargetConfig {
    /// In-process target (for development/testing)
    Memory { name: String },

    /// Remote target reached over HTTP
    Http {
        name: String,
        url: String,
        #[serde(default = "default_request_timeout")]
        timeout_secs: u64,
    },
}

impl Default for TargetConfig {
    fn default() -> Self {
        TargetConfig::Memory {
            name: "memory".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_body_size() -> usize {
    2 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DcsConfig {
    /// Defaults, then the optional file, then `DCS__`-separated environment
    /// variables (`DCS_SERVER__LISTEN_ADDR`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DcsConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("DCS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
