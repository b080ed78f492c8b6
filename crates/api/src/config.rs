use std::net::SocketAddr;

use anyhow::Context;

use haas_infra::LedgerConfig;
use haas_observability::LogFormat;

/// Process configuration for the API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// `None` falls back to an insecure development secret.
    pub jwt_secret: Option<String>,
    pub log_format: LogFormat,
    pub ledger: LedgerConfig,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bind_addr: SocketAddr = lookup("HAAS_BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse()
            .context("invalid HAAS_BIND_ADDR")?;

        let log_format: LogFormat = match lookup("HAAS_LOG_FORMAT") {
            Some(raw) => raw.parse().context("invalid HAAS_LOG_FORMAT")?,
            None => LogFormat::default(),
        };

        let jwt_secret = lookup("JWT_SECRET").filter(|s| !s.is_empty());
        let ledger = LedgerConfig::from_lookup(&lookup)?;

        Ok(Self {
            bind_addr,
            jwt_secret,
            log_format,
            ledger,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> anyhow::Result<ServerConfig> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        ServerConfig::from_lookup(|key| map.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn defaults() {
        let cfg = from(&[]).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert!(cfg.jwt_secret.is_none());
        assert_eq!(cfg.ledger, LedgerConfig::default());
    }

    #[test]
    fn overrides() {
        let cfg = from(&[
            ("HAAS_BIND_ADDR", "127.0.0.1:9000"),
            ("HAAS_LOG_FORMAT", "pretty"),
            ("JWT_SECRET", "s3cret"),
            ("HAAS_DATABASE_URL", "sqlite::memory:"),
        ])
        .unwrap();
        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        assert_eq!(cfg.jwt_secret.as_deref(), Some("s3cret"));
        assert_eq!(cfg.ledger.database_url.as_deref(), Some("sqlite::memory:"));
    }

    #[test]
    fn bad_bind_addr_fails() {
        assert!(from(&[("HAAS_BIND_ADDR", "not-an-addr")]).is_err());
    }
}
