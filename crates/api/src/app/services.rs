use anyhow::Context;

use haas_infra::{default_kinds, AnyLedgerStore, AnyProjectDirectory, HardwareLedger, LedgerConfig};

/// Shared application services, injected into handlers as an `Extension`.
#[derive(Debug)]
pub struct AppServices {
    pub ledger: HardwareLedger<AnyLedgerStore>,
    pub projects: AnyProjectDirectory,
}

impl AppServices {
    /// Open the configured store and the project directory beside it,
    /// reconcile the ledger and seed the default kinds.
    pub async fn build(config: &LedgerConfig) -> anyhow::Result<Self> {
        let store = AnyLedgerStore::open(config.database_url.as_deref())
            .await
            .context("failed to open ledger store")?;
        tracing::info!(backend = store.backend_name(), "ledger store opened");

        let projects = AnyProjectDirectory::for_store(&store)
            .await
            .context("failed to open project directory")?;

        let ledger = HardwareLedger::open(store)
            .await
            .context("failed to open hardware ledger")?;

        if config.seed_defaults {
            for kind in default_kinds()? {
                ledger
                    .register_kind(kind)
                    .await
                    .context("failed to seed hardware kinds")?;
            }
        }

        Ok(Self { ledger, projects })
    }
}
