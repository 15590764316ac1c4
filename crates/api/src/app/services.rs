//! Infrastructure wiring: store, catalog, event bus and the transfer service.
//!
//! Committed transfer events are logged by a background subscriber
//! (`depot.events` target); other in-process observers subscribe through
//! `TransferService::bus`.

use std::sync::Arc;

use depot_events::EventBus;
use depot_infra::{DepotStore, InMemoryCatalog, InMemoryDepotStore, JsonEventBus, PostgresDepotStore, TransferService};

use crate::config::{AppConfig, StoreConfig};

/// Shared handles for request handlers.
///
/// The catalog stays in-memory for both backends; it is an external
/// collaborator seeded through the `/catalog` routes.
#[derive(Clone)]
pub struct AppServices {
    pub transfers: Arc<TransferService>,
    pub catalog: Arc<InMemoryCatalog>,
    pub backend: StoreBackend,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    InMemory,
    Postgres,
}

impl StoreBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreBackend::InMemory => "in_memory",
            StoreBackend::Postgres => "postgres",
        }
    }
}

/// Build services from config. `USE_PERSISTENT_STORES` selects Postgres.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let (store, backend): (Arc<dyn DepotStore>, StoreBackend) = match &config.store {
        StoreConfig::InMemory => (Arc::new(InMemoryDepotStore::new()), StoreBackend::InMemory),
        StoreConfig::Postgres { database_url } => {
            let store = PostgresDepotStore::connect(database_url).await?;
            (Arc::new(store), StoreBackend::Postgres)
        }
    };

    tracing::info!(backend = backend.as_str(), "depot store ready");
    Ok(with_store(store, backend))
}

/// Wire services around an already-built store.
pub fn with_store(store: Arc<dyn DepotStore>, backend: StoreBackend) -> AppServices {
    let catalog = Arc::new(InMemoryCatalog::new());
    let bus = Arc::new(JsonEventBus::new());
    spawn_event_log(&bus);
    let transfers = Arc::new(TransferService::new(store, catalog.clone(), bus));

    AppServices {
        transfers,
        catalog,
        backend,
    }
}

/// Log every published envelope. The thread exits once the bus is dropped.
fn spawn_event_log(bus: &JsonEventBus) {
    let subscription = bus.subscribe();
    let spawned = std::thread::Builder::new()
        .name("depot-event-log".into())
        .spawn(move || {
            while let Ok(envelope) = subscription.recv() {
                tracing::info!(
                    target: "depot.events",
                    event_id = %envelope.event_id(),
                    event_type = envelope.event_type(),
                    aggregate_id = %envelope.aggregate_id(),
                    sequence = envelope.sequence_number(),
                    "transfer event committed"
                );
            }
        });

    if let Err(e) = spawned {
        tracing::warn!(error = %e, "event log subscriber not started");
    }
}
