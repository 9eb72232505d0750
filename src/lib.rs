//! Lifecycle management for leased phone numbers: who owns each number, which ones are
//! orphaned, what they cost, and the reclamation actions that move them between owners
//! or hand them back to the carrier.

pub mod costs;
pub mod db;
pub mod error;
pub mod history;
pub mod lifecycle;
pub mod orphans;
pub mod provider;
pub mod settings;
pub mod signals;
pub mod sweeper;
mod utils;

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use log::{info, warn};

pub use costs::{CostAggregator, CostSummary, OrgCost};
pub use db::{AssignmentEvent, Database, EventType, HistoryEntry, NewPhoneNumber, NumberState, PhoneNumber};
pub use error::{LifecycleError, LifecycleResult};
pub use history::{AssignmentHistory, HistoryPage, HistoryQuery};
pub use lifecycle::{ActionExecutor, ActionRequest, ActionResult};
pub use orphans::{OrphanCategory, OrphanClassifier, OrphanReport, OrphanSignal};
pub use provider::{ProviderError, TelephonyProvider};
pub use settings::{LifecycleSettings, SettingsStore};
pub use signals::{AgentDirectory, OrganizationDirectory};
pub use sweeper::SweeperController;

/// The wired-up service: one ledger database shared by the executor and every read model.
#[derive(Clone)]
pub struct LifecycleService {
    pub db: Database,
    pub executor: ActionExecutor,
    pub classifier: OrphanClassifier,
    pub costs: CostAggregator,
    pub history: AssignmentHistory,
    pub settings: LifecycleSettings,
}

impl LifecycleService {
    /// Opens the ledger at `db_path`, using its own organization and agent tables as the
    /// directories, and clears release reservations abandoned by a previous crash.
    pub async fn open(
        db_path: PathBuf,
        settings: LifecycleSettings,
        provider: Arc<dyn TelephonyProvider>,
    ) -> Result<Self> {
        settings.validate()?;
        let db = Database::new(db_path)?;
        let directory = Arc::new(db.clone());
        let service = Self::with_directories(db, settings, provider, directory.clone(), directory);

        match service.executor.recover_stale_reservations().await {
            Ok(0) => {}
            Ok(count) => warn!("Cleared {count} abandoned release reservation(s) at startup"),
            Err(err) => warn!("Could not check for abandoned release reservations: {err}"),
        }

        info!("Lifecycle service ready ({})", service.db.path().display());
        Ok(service)
    }

    pub fn with_directories(
        db: Database,
        settings: LifecycleSettings,
        provider: Arc<dyn TelephonyProvider>,
        organizations: Arc<dyn OrganizationDirectory>,
        agents: Arc<dyn AgentDirectory>,
    ) -> Self {
        let executor = ActionExecutor::new(
            db.clone(),
            provider,
            organizations.clone(),
            settings.reclamation.clone(),
        );
        let classifier = OrphanClassifier::new(
            db.clone(),
            organizations.clone(),
            agents,
            settings.classifier.clone(),
        );
        let costs = CostAggregator::new(db.clone(), organizations, classifier.clone());
        let history = AssignmentHistory::new(db.clone());

        Self {
            db,
            executor,
            classifier,
            costs,
            history,
            settings,
        }
    }

    pub fn start_sweeper(&self, controller: &mut SweeperController) -> Result<()> {
        controller.start(
            self.executor.clone(),
            self.db.clone(),
            self.settings.sweeper.clone(),
        )
    }
}
