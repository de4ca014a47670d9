//! Chain-tip driven scheduling of consolidation runs.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ConsolidationConfig;
use crate::consolidation::{ConsolidationContext, SaplingConsolidation};
use crate::{ConsolidationError, Result};

/// An operation started by the scheduler.
pub struct ScheduledRun {
    pub operation: Arc<SaplingConsolidation>,
    pub handle: JoinHandle<()>,
}

/// Starts a consolidation every `interval` blocks, one at a time.
pub struct ConsolidationScheduler {
    config: ConsolidationConfig,
    ctx: ConsolidationContext,
    current: Mutex<Option<Arc<SaplingConsolidation>>>,
}

impl ConsolidationScheduler {
    pub fn new(config: ConsolidationConfig, ctx: ConsolidationContext) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ctx,
            current: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    /// Whether a tip at `height` is a consolidation height.
    pub fn is_due(&self, height: u32) -> bool {
        self.config.enabled && height % self.config.interval == 0
    }

    /// Most recently started operation, finished or not.
    pub fn current(&self) -> Option<Arc<SaplingConsolidation>> {
        self.current.lock().expect("scheduler lock poisoned").clone()
    }

    /// React to a new chain tip.
    ///
    /// Spawns an operation targeting `height + 1` when the height is due and
    /// the previous operation has finished. Must be called from within a Tokio
    /// runtime.
    pub fn on_new_tip(&self, height: u32) -> Result<Option<ScheduledRun>> {
        if !self.is_due(height) {
            return Ok(None);
        }

        let mut current = self.current.lock().expect("scheduler lock poisoned");
        if let Some(running) = current.as_ref() {
            if !running.state().is_terminal() {
                debug!(
                    op_id = %running.id(),
                    height,
                    "previous consolidation still running, not starting another"
                );
                return Ok(None);
            }
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ConsolidationError::Runtime(format!("no Tokio runtime: {e}")))?;

        let operation = Arc::new(SaplingConsolidation::new(
            height.saturating_add(1),
            self.ctx.clone(),
            &self.config,
        ));
        info!(
            op_id = %operation.id(),
            target_height = operation.target_height(),
            "starting Sapling consolidation"
        );

        let worker = Arc::clone(&operation);
        let handle = runtime.spawn_blocking(move || worker.start());
        *current = Some(Arc::clone(&operation));

        Ok(Some(ScheduledRun { operation, handle }))
    }

    /// Cancel the running operation, if any.
    pub fn cancel_current(&self) {
        if let Some(op) = self.current() {
            op.cancel();
        }
    }

    /// Consume chain tips until the channel closes or `shutdown` fires; the
    /// running operation is cancelled on shutdown.
    pub async fn run(
        self: Arc<Self>,
        mut tips: mpsc::Receiver<u32>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("consolidation scheduler shutting down");
                    self.cancel_current();
                    return Ok(());
                }
                tip = tips.recv() => {
                    let Some(height) = tip else {
                        debug!("chain tip channel closed");
                        return Ok(());
                    };
                    self.on_new_tip(height)?;
                }
            }
        }
    }
}
