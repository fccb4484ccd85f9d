//! Environment-driven wiring of stores, engine, and coordinator.
//!
//! | variable | default |
//! |---|---|
//! | `USE_PERSISTENT_STORES` | `false` (in-memory) |
//! | `DATABASE_URL` | required when persistent |
//! | `STOCKLEDGER_DB_MAX_CONNECTIONS` | `10` |
//! | `STOCKLEDGER_DEFAULT_CURRENCY` | `USD` |
//! | `STOCKLEDGER_PUBLISH_LEDGER` | `false` |

use std::sync::Arc;

use anyhow::{Context, bail};
use serde_json::Value as JsonValue;

use stockledger_events::{EventEnvelope, InMemoryEventBus};

use crate::allocations::{AllocationStore, InMemoryAllocationStore, PostgresAllocationStore};
use crate::fulfillment::OrderFulfillmentCoordinator;
use crate::reservation::{DEFAULT_CURRENCY, EngineSettings, ReservationEngine};
use crate::store::{
    InMemoryInventoryStore, InventoryStore, PostgresInventoryStore, PublishingInventoryStore,
};

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    InMemory,
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub backend: StoreBackend,
    pub default_currency: String,
    /// Wrap the store so committed entries are published on the ledger bus.
    pub publish_ledger: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::InMemory,
            default_currency: DEFAULT_CURRENCY.to_string(),
            publish_ledger: false,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from any variable source (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let use_persistent = parse_bool(&lookup, "USE_PERSISTENT_STORES")?.unwrap_or(false);
        let backend = if use_persistent {
            let database_url = lookup("DATABASE_URL")
                .filter(|url| !url.trim().is_empty())
                .context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;
            let max_connections = match lookup("STOCKLEDGER_DB_MAX_CONNECTIONS") {
                Some(raw) => raw.trim().parse::<u32>().with_context(|| {
                    format!("STOCKLEDGER_DB_MAX_CONNECTIONS must be a positive integer, got '{raw}'")
                })?,
                None => DEFAULT_MAX_CONNECTIONS,
            };
            if max_connections == 0 {
                bail!("STOCKLEDGER_DB_MAX_CONNECTIONS must be at least 1");
            }
            StoreBackend::Postgres {
                database_url,
                max_connections,
            }
        } else {
            StoreBackend::InMemory
        };

        let default_currency = match lookup("STOCKLEDGER_DEFAULT_CURRENCY") {
            Some(raw) => {
                let code = raw.trim().to_ascii_uppercase();
                if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                    bail!("STOCKLEDGER_DEFAULT_CURRENCY must be a 3-letter ISO code, got '{raw}'");
                }
                code
            }
            None => DEFAULT_CURRENCY.to_string(),
        };

        let publish_ledger = parse_bool(&lookup, "STOCKLEDGER_PUBLISH_LEDGER")?.unwrap_or(false);

        Ok(Self {
            backend,
            default_currency,
            publish_ledger,
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            default_currency: self.default_currency.clone(),
        }
    }
}

fn parse_bool<F>(lookup: &F, name: &str) -> anyhow::Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .to_ascii_lowercase()
                .parse::<bool>()
                .with_context(|| format!("{name} must be 'true' or 'false', got '{raw}'"))
        })
        .transpose()
}

pub type SharedInventoryStore = Arc<dyn InventoryStore>;
pub type SharedAllocationStore = Arc<dyn AllocationStore>;
pub type LedgerBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

/// Everything an outer layer needs to drive the ledger.
pub struct LedgerServices {
    pub engine: ReservationEngine<SharedInventoryStore>,
    pub coordinator: OrderFulfillmentCoordinator<SharedInventoryStore, SharedAllocationStore>,
    /// Committed ledger entries, when `publish_ledger` is set.
    pub bus: LedgerBus,
}

/// Wire the services described by `config`.
///
/// The Postgres store drives its queries with `block_in_place`, so callers on
/// that backend must run inside a multi-thread tokio runtime.
pub async fn build_services(config: &LedgerConfig) -> anyhow::Result<LedgerServices> {
    let (store, allocations) = match &config.backend {
        StoreBackend::InMemory => {
            let store: SharedInventoryStore = Arc::new(InMemoryInventoryStore::new());
            let allocations: SharedAllocationStore = Arc::new(InMemoryAllocationStore::new());
            (store, allocations)
        }
        StoreBackend::Postgres {
            database_url,
            max_connections,
        } => {
            let postgres = PostgresInventoryStore::connect(database_url, *max_connections)
                .await
                .context("failed to connect to Postgres and prepare the ledger schema")?;
            let links = PostgresAllocationStore::new(postgres.pool());
            links
                .ensure_schema()
                .await
                .context("failed to prepare the allocations schema")?;
            let store: SharedInventoryStore = Arc::new(postgres);
            let allocations: SharedAllocationStore = Arc::new(links);
            (store, allocations)
        }
    };

    let bus: LedgerBus = Arc::new(InMemoryEventBus::new());
    let store: SharedInventoryStore = if config.publish_ledger {
        Arc::new(PublishingInventoryStore::new(store, Arc::clone(&bus)))
    } else {
        store
    };

    let backend = match config.backend {
        StoreBackend::InMemory => "in_memory",
        StoreBackend::Postgres { .. } => "postgres",
    };
    tracing::info!(
        backend,
        publish_ledger = config.publish_ledger,
        default_currency = %config.default_currency,
        "stock ledger services ready"
    );

    let engine = ReservationEngine::with_settings(store, config.engine_settings());
    let coordinator = OrderFulfillmentCoordinator::new(engine.clone(), allocations);

    Ok(LedgerServices {
        engine,
        coordinator,
        bus,
    })
}
