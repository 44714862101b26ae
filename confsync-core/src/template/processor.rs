//! Continuous template processors.
//!
//! A processor runs until its cancellation token fires, rendering resources
//! and reporting failures on a bounded error channel. [`ProcessorHandle`]
//! bundles the token, the receiving end of that channel and the task's join
//! handle so a supervisor can observe errors, request shutdown and wait for
//! the drain to finish.

use super::render::TemplateEngine;
use crate::error::TemplateError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of a processor's error channel.
pub const ERROR_CHANNEL_CAPACITY: usize = 10;

/// Pause after a failed watch before retrying.
pub const WATCH_RETRY_DELAY: Duration = Duration::from_secs(2);

/// A long-running render loop.
#[async_trait]
pub trait Processor: Send {
    fn name(&self) -> &'static str;

    /// Run until `cancel` fires. Failures go to `errors` and never end the loop.
    async fn run(self: Box<Self>, cancel: CancellationToken, errors: mpsc::Sender<TemplateError>);
}

/// Hand an error to the supervisor without blocking the processor.
fn report_error(errors: &mpsc::Sender<TemplateError>, error: TemplateError) {
    match errors.try_send(error) {
        Ok(()) => {}
        Err(TrySendError::Full(error)) => {
            warn!(error = %error, "Error channel full, dropping report");
        }
        Err(TrySendError::Closed(error)) => {
            debug!(error = %error, "Error channel closed");
        }
    }
}

/// Renders every resource, then sleeps for a fixed period.
pub struct IntervalProcessor {
    engine: Arc<TemplateEngine>,
    interval: Duration,
}

impl IntervalProcessor {
    pub fn new(engine: Arc<TemplateEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }
}

#[async_trait]
impl Processor for IntervalProcessor {
    fn name(&self) -> &'static str {
        "interval"
    }

    async fn run(self: Box<Self>, cancel: CancellationToken, errors: mpsc::Sender<TemplateError>) {
        info!(interval_secs = self.interval.as_secs(), "Interval processor started");
        while !cancel.is_cancelled() {
            let report = self.engine.process_all().await;
            debug!(
                written = report.written,
                unchanged = report.unchanged,
                failed = report.errors.len(),
                "Render pass complete"
            );
            for error in report.errors {
                report_error(&errors, error);
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("Interval processor stopped");
    }
}

/// Renders each resource whenever its keys change in the store.
pub struct WatchProcessor {
    engine: Arc<TemplateEngine>,
}

impl WatchProcessor {
    pub fn new(engine: Arc<TemplateEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Processor for WatchProcessor {
    fn name(&self) -> &'static str {
        "watch"
    }

    async fn run(self: Box<Self>, cancel: CancellationToken, errors: mpsc::Sender<TemplateError>) {
        let count = self.engine.resources().len();
        info!(resources = count, "Watch processor started");

        let watchers: Vec<_> = (0..count)
            .map(|index| {
                let engine = self.engine.clone();
                let cancel = cancel.clone();
                let errors = errors.clone();
                tokio::spawn(async move { watch_resource(engine, index, cancel, errors).await })
            })
            .collect();

        for result in futures::future::join_all(watchers).await {
            if let Err(e) = result {
                warn!(error = %e, "Resource watcher panicked");
            }
        }
        info!("Watch processor stopped");
    }
}

async fn watch_resource(
    engine: Arc<TemplateEngine>,
    index: usize,
    cancel: CancellationToken,
    errors: mpsc::Sender<TemplateError>,
) {
    let resource = &engine.resources()[index];
    let mut wait_index = 0;

    while !cancel.is_cancelled() {
        let watched = engine
            .store()
            .watch_prefix(resource.watch_prefix(), &resource.keys, wait_index, &cancel)
            .await;
        match watched {
            Ok(next) => {
                if cancel.is_cancelled() {
                    break;
                }
                debug!(resource = %resource.name, index = next, "Change observed");
                wait_index = next;
                if let Err(e) = engine.process(resource).await {
                    report_error(&errors, e);
                }
            }
            Err(source) => {
                report_error(
                    &errors,
                    TemplateError::Watch {
                        prefix: resource.watch_prefix().to_string(),
                        source,
                    },
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(WATCH_RETRY_DELAY) => {}
                }
            }
        }
    }
    debug!(resource = %resource.name, "Resource watcher stopped");
}

/// A spawned processor and the channels used to supervise it.
pub struct ProcessorHandle {
    pub name: &'static str,
    pub cancel: CancellationToken,
    pub errors: mpsc::Receiver<TemplateError>,
    /// Completes once the processor has drained.
    pub join: JoinHandle<()>,
}

impl ProcessorHandle {
    /// Spawn `processor` onto the runtime with a fresh token and error channel.
    pub fn spawn(processor: Box<dyn Processor>) -> Self {
        let name = processor.name();
        let cancel = CancellationToken::new();
        let (tx, errors) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let token = cancel.clone();
        let join = tokio::spawn(async move { processor.run(token, tx).await });
        Self {
            name,
            cancel,
            errors,
            join,
        }
    }
}
