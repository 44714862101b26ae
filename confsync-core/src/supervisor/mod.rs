//! # Processor supervision
//!
//! Decides between a one-shot render and continuous processing, then owns
//! the continuous processor for its whole life: it logs processor errors,
//! turns the first shutdown signal into cancellation, and waits for the
//! processor to drain before stopping the admin server.

pub mod signals;
pub mod state;

pub use signals::{ShutdownSignal, listen_for_signals};
pub use state::SupervisorState;

use crate::admin::{self, AdminAuth, AdminConfig, AdminState};
use crate::backend::{BackendCapabilities, SharedStore};
use crate::config::ConfsyncConfig;
use crate::error::{ConfsyncError, TemplateError};
use crate::template::{
    IntervalProcessor, Processor, ProcessorHandle, TemplateEngine, WatchProcessor,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How templates will be processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    OneShot,
    Watch,
    Interval(Duration),
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::OneShot => write!(f, "onetime"),
            RunMode::Watch => write!(f, "watch"),
            RunMode::Interval(d) => write!(f, "interval ({}s)", d.as_secs()),
        }
    }
}

/// Pick the run mode. Watch mode falls back to interval when the backend
/// cannot deliver change notifications.
pub fn select_mode(config: &ConfsyncConfig, capabilities: BackendCapabilities) -> RunMode {
    if config.onetime {
        return RunMode::OneShot;
    }
    if config.watch {
        if capabilities.supports_watch {
            return RunMode::Watch;
        }
        warn!(
            interval_secs = config.interval_secs,
            "Backend does not support watch, falling back to interval mode"
        );
    }
    RunMode::Interval(config.interval())
}

/// Build the processor for a continuous mode.
pub fn build_processor(mode: RunMode, engine: Arc<TemplateEngine>) -> Option<Box<dyn Processor>> {
    match mode {
        RunMode::OneShot => None,
        RunMode::Watch => Some(Box::new(WatchProcessor::new(engine))),
        RunMode::Interval(interval) => Some(Box::new(IntervalProcessor::new(engine, interval))),
    }
}

/// Render every resource exactly once.
pub async fn run_once(engine: &TemplateEngine) -> Result<(), TemplateError> {
    let report = engine.process_all().await;
    info!(
        written = report.written,
        unchanged = report.unchanged,
        skipped = report.skipped,
        failed = report.errors.len(),
        "One-shot render complete"
    );
    match report.errors.into_iter().next() {
        Some(first) => Err(first),
        None => Ok(()),
    }
}

/// Counters describing a finished continuous run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processor_errors: usize,
    pub signals: usize,
}

/// Supervises one continuous processor and the admin server.
pub struct Supervisor {
    state: SupervisorState,
    admin_cancel: CancellationToken,
    admin: Option<JoinHandle<()>>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            state: SupervisorState::Initializing,
            admin_cancel: CancellationToken::new(),
            admin: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    fn transition(&mut self, next: SupervisorState) {
        if !self.state.can_transition_to(next) {
            debug!(from = %self.state, to = %next, "Ignoring invalid transition");
            return;
        }
        info!(from = %self.state, to = %next, "Supervisor state change");
        self.state = next;
    }

    /// Start the admin server in the background. A bind failure is logged
    /// and does not stop processing.
    pub fn spawn_admin(&mut self, config: AdminConfig, store: SharedStore) {
        let state = AdminState::shared(store, AdminAuth::from_config(&config));
        let cancel = self.admin_cancel.clone();
        self.admin = Some(tokio::spawn(async move {
            if let Err(e) = admin::run(&config, state, cancel).await {
                error!(addr = %config.bind_address(), error = %e, "Admin server failed");
            }
        }));
    }

    /// Wait on processor errors, shutdown signals and processor completion
    /// until the processor has finished.
    pub async fn run_continuous(
        &mut self,
        handle: ProcessorHandle,
        mut signals: mpsc::Receiver<ShutdownSignal>,
    ) -> RunSummary {
        let ProcessorHandle {
            name,
            cancel,
            mut errors,
            mut join,
        } = handle;
        let mut summary = RunSummary::default();
        let mut errors_open = true;
        let mut signals_open = true;

        self.transition(SupervisorState::Running);
        info!(processor = name, "Processor running");

        loop {
            tokio::select! {
                received = errors.recv(), if errors_open => match received {
                    Some(e) => {
                        summary.processor_errors += 1;
                        error!(processor = name, error = %e, "Processor reported an error");
                    }
                    None => errors_open = false,
                },
                received = signals.recv(), if signals_open => match received {
                    Some(signal) => {
                        summary.signals += 1;
                        if self.state == SupervisorState::Draining {
                            warn!(signal = %signal, "Already draining, ignoring signal");
                        } else {
                            info!(signal = %signal, "Shutdown requested, stopping processor");
                            cancel.cancel();
                            self.transition(SupervisorState::Draining);
                        }
                    }
                    None => signals_open = false,
                },
                finished = &mut join => {
                    if let Err(e) = finished {
                        error!(processor = name, error = %e, "Processor task failed");
                    }
                    break;
                }
            }
        }

        // Flush anything reported during the drain.
        while let Ok(e) = errors.try_recv() {
            summary.processor_errors += 1;
            error!(processor = name, error = %e, "Processor reported an error");
        }

        self.admin_cancel.cancel();
        if let Some(admin) = self.admin.take() {
            if let Err(e) = admin.await {
                warn!(error = %e, "Admin server task failed");
            }
        }
        self.transition(SupervisorState::Terminated);
        summary
    }
}

/// Run confsync against `store` according to `config`.
///
/// Returns once a one-shot render completes or, in continuous mode, after
/// a shutdown signal has drained the processor.
pub async fn run(config: &ConfsyncConfig, store: SharedStore) -> Result<RunSummary, ConfsyncError> {
    let engine = Arc::new(TemplateEngine::from_config(store.clone(), &config.template)?);
    let mode = select_mode(config, store.capabilities());
    info!(mode = %mode, backend = store.name(), "Starting");

    let Some(processor) = build_processor(mode, engine.clone()) else {
        run_once(&engine).await?;
        return Ok(RunSummary::default());
    };

    let signals = listen_for_signals()?;
    let mut supervisor = Supervisor::new();
    if config.admin.enabled {
        supervisor.spawn_admin(config.admin.clone(), store);
    }
    let handle = ProcessorHandle::spawn(processor);
    Ok(supervisor.run_continuous(handle, signals).await)
}
