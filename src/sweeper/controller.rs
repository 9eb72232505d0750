use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{db::Database, lifecycle::ActionExecutor, settings::SweeperSettings};

use super::loop_worker::sweeper_loop;

/// Owns the background sweep task. At most one sweeper runs per controller.
pub struct SweeperController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl Default for SweeperController {
    fn default() -> Self {
        Self::new()
    }
}

impl SweeperController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(
        &mut self,
        executor: ActionExecutor,
        db: Database,
        settings: SweeperSettings,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("grace sweeper already running");
        }
        if !settings.enabled {
            info!("grace sweeper disabled in settings");
            return Ok(());
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(sweeper_loop(executor, db, settings, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("grace sweeper task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}
