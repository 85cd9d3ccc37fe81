//! LexiLens core.
//!
//! Engine behind the LexiLens vocabulary-capture app: a local-first learning
//! record store with eventually-consistent cloud reconciliation, a sync
//! health monitor, and a tiered local recognition-model selector. All UI,
//! camera capture, and the remote recognition client live elsewhere and talk
//! to these services.

pub mod model;
pub mod records;
pub mod settings;
pub mod sync;

use std::sync::Arc;
use std::time::Duration;

pub use model::{ModelPaths, ModelSelection, ModelSelector, ModelTier};
pub use records::{LearningRecord, RecordStore, StoreConfig, StoreError};
pub use settings::{SettingsError, UserSettings};
pub use sync::gateway::{AccountProbe, GatewayError, HttpRecordGateway, RecordGateway};
pub use sync::{AccountState, SyncMonitor, SyncState, SyncStatus};

const CLOUD_BASE_URL: &str = "https://records.lexilens.app/v1";
const NETWORK_PROBE_ADDR: &str = "records.lexilens.app:443";
const NETWORK_PROBE_INTERVAL: Duration = Duration::from_secs(15);

/// Everything a frontend needs, constructed once at startup and shared by
/// reference.
pub struct AppServices {
    pub settings: UserSettings,
    pub monitor: Arc<SyncMonitor>,
    pub store: Arc<RecordStore>,
    pub models: Arc<ModelSelector>,
}

/// Builds the service graph: settings, cloud gateway, sync monitor with its
/// network watcher, the record store (with its one startup pull-merge when
/// sync was left enabled), and the model selector.
pub async fn initialize() -> Result<AppServices, GatewayError> {
    let _ = env_logger::try_init();

    let settings = settings::load_settings().unwrap_or_default();
    let api_key = settings::get_api_key().unwrap_or_default();

    let gateway = Arc::new(HttpRecordGateway::new(CLOUD_BASE_URL, &api_key)?);
    let monitor = SyncMonitor::new(gateway.clone() as Arc<dyn AccountProbe>);
    monitor.start_network_watcher(NETWORK_PROBE_ADDR.to_string(), NETWORK_PROBE_INTERVAL);

    let store = Arc::new(RecordStore::open(
        StoreConfig::default(),
        gateway,
        Arc::clone(&monitor),
        settings.cloud.sync_enabled,
    ));
    store.bootstrap().await;

    let models = Arc::new(ModelSelector::new(ModelPaths::default()));

    Ok(AppServices {
        settings,
        monitor,
        store,
        models,
    })
}
