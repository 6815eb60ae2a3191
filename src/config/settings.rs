use serde::Deserialize;

/// Top-level configuration for the load balancer and the dead-letter exchange.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub registry: RegistrySettings,
    pub dlx: DlxSettings,
    pub ledger: LedgerSettings,
    pub balancer: BalancerSettings,
    pub log: LogSettings,
}

/// Listener addresses.
///
/// `registration_port` is where brokers announce themselves; it defaults to
/// the client port plus one. `max_frame_bytes` caps a single MQTT frame on
/// client and broker connections.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub registration_port: u16,
    pub max_frame_bytes: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RegistrySettings {
    pub refresh_interval_secs: u64,
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DlxSettings {
    pub timeout_secs: u64,
}

/// Ledger location and the bounds applied to every call made against it.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LedgerSettings {
    pub path: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BalancerSettings {
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial settings as read from files or the environment.
///
/// Every field is optional; `load_config` fills the gaps from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub registry: Option<PartialRegistrySettings>,
    pub dlx: Option<PartialDlxSettings>,
    pub ledger: Option<PartialLedgerSettings>,
    pub balancer: Option<PartialBalancerSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub registration_port: Option<u16>,
    pub max_frame_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialRegistrySettings {
    pub refresh_interval_secs: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialDlxSettings {
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLedgerSettings {
    pub path: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBalancerSettings {
    pub enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 1883,
                registration_port: 1884,
                max_frame_bytes: 1024 * 1024,
            },
            registry: RegistrySettings {
                refresh_interval_secs: 60,
                connect_timeout_ms: 3000,
            },
            dlx: DlxSettings { timeout_secs: 10 },
            ledger: LedgerSettings {
                path: "zilmqtt_ledger".to_string(),
                timeout_ms: 5000,
                max_retries: 3,
                backoff_ms: 200,
            },
            balancer: BalancerSettings { enabled: true },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Overlay the values that were provided onto `default`.
    pub fn merge_onto(self, default: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let registry = self.registry.unwrap_or_default();
        let dlx = self.dlx.unwrap_or_default();
        let ledger = self.ledger.unwrap_or_default();
        let balancer = self.balancer.unwrap_or_default();
        let log = self.log.unwrap_or_default();

        let port = server.port.unwrap_or(default.server.port);

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port,
                registration_port: server
                    .registration_port
                    .unwrap_or_else(|| port.saturating_add(1)),
                max_frame_bytes: server
                    .max_frame_bytes
                    .unwrap_or(default.server.max_frame_bytes),
            },
            registry: RegistrySettings {
                refresh_interval_secs: registry
                    .refresh_interval_secs
                    .unwrap_or(default.registry.refresh_interval_secs),
                connect_timeout_ms: registry
                    .connect_timeout_ms
                    .unwrap_or(default.registry.connect_timeout_ms),
            },
            dlx: DlxSettings {
                timeout_secs: dlx.timeout_secs.unwrap_or(default.dlx.timeout_secs),
            },
            ledger: LedgerSettings {
                path: ledger.path.unwrap_or(default.ledger.path),
                timeout_ms: ledger.timeout_ms.unwrap_or(default.ledger.timeout_ms),
                max_retries: ledger.max_retries.unwrap_or(default.ledger.max_retries),
                backoff_ms: ledger.backoff_ms.unwrap_or(default.ledger.backoff_ms),
            },
            balancer: BalancerSettings {
                enabled: balancer.enabled.unwrap_or(default.balancer.enabled),
            },
            log: LogSettings {
                level: log.level.unwrap_or(default.log.level),
            },
        }
    }
}
