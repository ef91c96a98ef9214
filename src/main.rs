use std::sync::Arc;

use anyhow::Result;

use openship::core::config::Config;
use openship::core::events::EventLog;
use openship::core::events::stream::StreamDispatcher;
use openship::core::graph::{InMemoryActionStore, InMemoryGraphStore, StaticAccessResolver};
use openship::core::runs::RunCoordinator;
use openship::core::runs::reconcile::Reconciler;
use openship::core::store::RunStore;
use openship::interfaces::web::{self, AppState};
use openship::logging;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let config_path = std::env::var("OPENSHIP_CONFIG").ok();
    let config = Config::load(config_path.as_deref())?;

    let store = Arc::new(RunStore::open(config.database_path())?);
    let events = EventLog::new(store.clone());
    let graph = Arc::new(InMemoryGraphStore::new());
    let actions = Arc::new(InMemoryActionStore::new());
    let access = Arc::new(StaticAccessResolver::permissive("default", "default"));

    let reconciler = Reconciler::new(graph, actions, events.clone());
    let coordinator = Arc::new(RunCoordinator::new(store, events.clone(), reconciler));
    let dispatcher = StreamDispatcher::new(events.clone());

    let state = AppState {
        coordinator,
        events,
        dispatcher,
        access,
    };
    web::serve(state, config.bind_addr()?).await
}
