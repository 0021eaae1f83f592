//! Dispatch cell
//!
//! [`DispatchCell`] ties the pieces together for one cell: the registry and
//! protocol engine that process envelopes, the monitor, the wait queue
//! timeout task and the one-shot initialization sequence.

use crate::engine::ProtocolEngine;
use crate::error::{InitError, ProtocolViolation};
use crate::lifecycle::{InitState, LifecycleController};
use crate::monitor::MessageProcessingMonitor;
use crate::registry::{DispatchRegistry, MessageReceiver};
use crate::scheduler::{panic_message, CellTimer, TimeoutTask};
use cell_config::CellSettings;
use cell_network::{CellNucleus, Mailbox};
use cell_types::CellMessage;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, Instrument};

struct CellCore {
    nucleus: Arc<dyn CellNucleus>,
    settings: CellSettings,
    engine: ProtocolEngine,
    timer: Arc<CellTimer>,
    timeout_task: TimeoutTask,
    lifecycle: LifecycleController,
    own_handler: Mutex<Option<Arc<dyn MessageReceiver>>>,
}

impl CellCore {
    /// Bind settings to the cell's collaborators
    fn configure(&self) -> Result<(), InitError> {
        self.settings.validate()?;
        self.settings.log_values();

        self.engine.monitor().set_enabled(self.settings.monitor);
        if let Some(class) = &self.settings.cell_class {
            self.nucleus.set_cell_class(class);
        }
        if let Some(handler) = self.own_handler.lock().clone() {
            self.engine.registry().register(handler);
        }
        Ok(())
    }

    fn run_init<F>(&self, init: F) -> Result<(), InitError>
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        self.configure()?;
        self.lifecycle.transition(InitState::UserInit);

        if let Some(setup) = &self.settings.defined_setup {
            self.nucleus
                .execute_domain_context(setup)
                .map_err(InitError::DefinedSetup)?;
        }
        init().map_err(InitError::Failed)?;

        self.timeout_task
            .start(&self.timer, Arc::clone(&self.nucleus), &self.settings.timeout)?;
        Ok(())
    }

    /// Enable delivery so the cell can be torn down, then kill it
    fn abort_init(&self, state: InitState) {
        self.nucleus.start();
        self.nucleus.kill();
        self.timeout_task.cancel();
        self.lifecycle.transition(state);
    }
}

/// A cell built on the dispatch core
#[derive(Clone)]
pub struct DispatchCell {
    inner: Arc<CellCore>,
}

impl DispatchCell {
    pub fn new(nucleus: Arc<dyn CellNucleus>, settings: CellSettings, timer: Arc<CellTimer>) -> Self {
        let engine = ProtocolEngine::new(
            Arc::new(DispatchRegistry::new()),
            Arc::new(MessageProcessingMonitor::new()),
            nucleus.endpoint(),
        );
        Self {
            inner: Arc::new(CellCore {
                nucleus,
                settings,
                engine,
                timer,
                timeout_task: TimeoutTask::new(),
                lifecycle: LifecycleController::new(),
                own_handler: Mutex::new(None),
            }),
        }
    }

    /// Handler registered automatically while options are configured
    pub fn set_own_handler(&self, handler: Arc<dyn MessageReceiver>) {
        *self.inner.own_handler.lock() = Some(handler);
    }

    pub fn register(&self, handler: Arc<dyn MessageReceiver>) -> bool {
        self.inner.engine.registry().register(handler)
    }

    pub fn unregister(&self, handler: &Arc<dyn MessageReceiver>) -> bool {
        self.inner.engine.registry().unregister(handler)
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.inner.engine.registry().handler_names()
    }

    pub fn on_arrived(&self, envelope: CellMessage) -> Result<(), ProtocolViolation> {
        self.inner.engine.on_arrived(envelope)
    }

    pub fn on_to_forward(&self, envelope: CellMessage) -> Result<(), ProtocolViolation> {
        self.inner.engine.on_to_forward(envelope)
    }

    /// Route a received envelope to the arrived or the forward entry point
    pub fn deliver(&self, envelope: CellMessage) -> Result<(), ProtocolViolation> {
        if envelope.header().is_final_destination() {
            self.on_arrived(envelope)
        } else {
            self.on_to_forward(envelope)
        }
    }

    /// Deliver envelopes from `mailbox` until the cell is killed.
    ///
    /// A protocol violation only affects its own envelope.
    pub async fn serve(&self, mut mailbox: Mailbox) {
        let span = self.inner.nucleus.diagnostic_span();
        async move {
            while let Some(envelope) = mailbox.recv().await {
                if let Err(violation) = self.deliver(envelope) {
                    error!(violation = violation.category(), "{}", violation);
                }
            }
            debug!("Mailbox closed, delivery loop finished");
        }
        .instrument(span)
        .await
    }

    /// Run the initialization sequence on a dedicated worker thread.
    ///
    /// On success message delivery is enabled. On failure delivery is
    /// enabled, the cell is killed and the original error is returned.
    pub fn do_init<F>(&self, init: F) -> Result<(), InitError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.inner.lifecycle.begin()?;

        let (result_tx, result_rx) = std::sync::mpsc::channel();
        let core = Arc::clone(&self.inner);
        let worker = self.inner.nucleus.new_thread(
            "init",
            Box::new(move || {
                let result = catch_unwind(AssertUnwindSafe(|| core.run_init(init)));
                let _ = result_tx.send(result);
            }),
        );

        let worker = match worker {
            Ok(worker) => worker,
            Err(e) => {
                error!(error = e.category(), "Failed to start init thread: {}", e);
                self.inner.abort_init(InitState::Failed);
                return Err(InitError::Spawn(e));
            }
        };
        let result = result_rx.recv();
        let _ = worker.join();

        let _entered = self.inner.nucleus.diagnostic_span().entered();
        match result {
            Ok(Ok(Ok(()))) => {
                self.inner.nucleus.start();
                self.inner.lifecycle.transition(InitState::DeliveryEnabled);
                info!("Cell initialized");
                Ok(())
            }
            Ok(Ok(Err(err))) => {
                match err.transport_error() {
                    Some(source) => error!(error = source.category(), "{}", err),
                    None => error!("{}", err),
                }
                self.inner.abort_init(InitState::Failed);
                Err(err)
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                error!("Cell initialisation was interrupted: {}", message);
                self.inner.abort_init(InitState::Killed);
                Err(InitError::Interrupted(message))
            }
            Err(_) => {
                error!("Cell initialisation was interrupted");
                self.inner.abort_init(InitState::Killed);
                Err(InitError::Interrupted("init thread terminated".to_string()))
            }
        }
    }

    /// Stop background work owned by the cell
    pub fn clean_up(&self) {
        if self.inner.timeout_task.cancel() {
            debug!(cell = %self.inner.nucleus.cell_name(), "Wait queue timeout task cancelled");
        }
    }

    pub fn state(&self) -> InitState {
        self.inner.lifecycle.state()
    }

    pub fn nucleus(&self) -> &Arc<dyn CellNucleus> {
        &self.inner.nucleus
    }

    pub fn settings(&self) -> &CellSettings {
        &self.inner.settings
    }

    pub fn engine(&self) -> &ProtocolEngine {
        &self.inner.engine
    }

    pub fn registry(&self) -> &Arc<DispatchRegistry> {
        self.inner.engine.registry()
    }

    pub fn monitor(&self) -> &Arc<MessageProcessingMonitor> {
        self.inner.engine.monitor()
    }

    pub fn timeout_task(&self) -> &TimeoutTask {
        &self.inner.timeout_task
    }
}

impl std::fmt::Debug for DispatchCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchCell")
            .field("cell", &self.inner.nucleus.cell_name())
            .field("state", &self.state())
            .field("engine", &self.inner.engine)
            .finish()
    }
}
