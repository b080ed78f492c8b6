use anyhow::{bail, Context};

use haas_core::HardwareKindId;
use haas_hardware::HardwareKind;

/// Storage settings for the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// Register the default hardware kinds at startup.
    pub seed_defaults: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            seed_defaults: true,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("HAAS_DATABASE_URL").filter(|v| !v.trim().is_empty());
        if let Some(url) = &database_url {
            if !url.starts_with("sqlite:") {
                bail!("HAAS_DATABASE_URL must be a sqlite: URL, got '{url}'");
            }
        }

        let seed_defaults = match lookup("HAAS_SEED_DEFAULTS") {
            Some(raw) => parse_bool(&raw).context("invalid HAAS_SEED_DEFAULTS")?,
            None => true,
        };

        Ok(Self {
            database_url,
            seed_defaults,
        })
    }
}

/// The kinds a fresh installation starts with.
pub fn default_kinds() -> anyhow::Result<Vec<HardwareKind>> {
    [("hwset1", "HWSet1", 10), ("hwset2", "HWSet2", 20)]
        .into_iter()
        .map(|(id, name, total)| -> anyhow::Result<HardwareKind> {
            let id = HardwareKindId::new(id)?;
            Ok(HardwareKind::new(id, name, total)?)
        })
        .collect()
}

fn parse_bool(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got '{other}'"),
    }
}
