//! Processor Controller
//!
//! Owns the stopped/running lifecycle. While running, a background task
//! fires one dispatch pass per poll interval until it is cancelled.
//!
//! ```text
//!            start()                 stop()
//! Stopped ───────────▶ Running ───────────▶ Stopped
//! ```
//!
//! Calling `start` while running or `stop` while stopped only logs a
//! warning. `stop` never waits for the background task; an in-flight pass
//! runs to completion. A later `start` waits for that task to finish
//! before ticking, so two passes never overlap.
//!
//! Each pass runs in its own task. A pass that panics is logged and the
//! loop keeps ticking, so the processor never reports running while no
//! loop is alive.

use std::sync::Arc;
use std::time::Duration;

use ms_common::{Message, MessageStatus};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::pipeline::DispatchPipeline;

/// Processor configuration
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Time between dispatch passes; the first pass runs one interval after start
    pub poll_interval: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(120),
        }
    }
}

struct ActiveRun {
    run_id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct ProcessorState {
    next_run_id: u64,
    active: Option<ActiveRun>,
    /// Task of the last stopped run, possibly still finishing its pass
    draining: Option<JoinHandle<()>>,
}

pub struct MessageProcessor {
    pipeline: Arc<DispatchPipeline>,
    config: ProcessorConfig,
    state: Mutex<ProcessorState>,
}

impl MessageProcessor {
    pub fn new(pipeline: Arc<DispatchPipeline>, config: ProcessorConfig) -> Self {
        Self {
            pipeline,
            config,
            state: Mutex::new(ProcessorState::default()),
        }
    }

    /// Start periodic dispatching.
    ///
    /// Returns `false` (and does nothing) if already running. Must be called
    /// from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut state = self.state.lock();
        if state.active.is_some() {
            warn!("Processor already running");
            return false;
        }

        state.next_run_id += 1;
        let run_id = state.next_run_id;
        let cancel = CancellationToken::new();
        let previous = state.draining.take();

        let handle = tokio::spawn(run_loop(
            self.pipeline.clone(),
            self.config.poll_interval,
            cancel.clone(),
            previous,
            run_id,
        ));

        state.active = Some(ActiveRun {
            run_id,
            cancel,
            handle,
        });

        info!(
            run_id,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.pipeline.config().batch_size,
            "Processor started"
        );
        true
    }

    /// Stop periodic dispatching without waiting for the background task.
    ///
    /// Returns `false` (and does nothing) if not running.
    pub fn stop(&self) -> bool {
        let mut state = self.state.lock();
        let Some(run) = state.active.take() else {
            warn!("Processor is not running");
            return false;
        };

        run.cancel.cancel();
        state.draining = Some(run.handle);

        info!(run_id = run.run_id, "Processor stopped");
        true
    }

    /// Stop (if running) and wait for the background task to finish
    pub async fn shutdown(&self) {
        let handle = {
            let mut state = self.state.lock();
            match state.active.take() {
                Some(run) => {
                    run.cancel.cancel();
                    info!(run_id = run.run_id, "Processor shutting down");
                    Some(run.handle)
                }
                None => state.draining.take(),
            }
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Processor task terminated abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().active.is_some()
    }

    /// Sent messages, oldest first, bounded by `limit`. Store errors are
    /// returned unchanged.
    pub async fn get_sent_messages(&self, limit: u32) -> anyhow::Result<Vec<Message>> {
        self.pipeline
            .repository()
            .fetch_by_status(MessageStatus::Sent, limit)
            .await
    }
}

impl Drop for MessageProcessor {
    fn drop(&mut self) {
        if let Some(run) = self.state.get_mut().active.take() {
            run.cancel.cancel();
        }
    }
}

async fn run_loop(
    pipeline: Arc<DispatchPipeline>,
    poll_interval: Duration,
    cancel: CancellationToken,
    previous: Option<JoinHandle<()>>,
    run_id: u64,
) {
    if let Some(previous) = previous {
        debug!(run_id, "Waiting for previous run to finish");
        if let Err(e) = previous.await {
            error!(run_id, error = %e, "Previous processor task terminated abnormally");
        }
    }

    let mut ticker = interval_at(Instant::now() + poll_interval, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(run_id, "Processor loop cancelled");
                break;
            }
            _ = ticker.tick() => {
                let pipeline = pipeline.clone();
                let pass = tokio::spawn(async move { pipeline.run_pass().await });
                match pass.await {
                    Ok(Ok(summary)) => debug!(run_id, ?summary, "Dispatch pass finished"),
                    Ok(Err(e)) => error!(run_id, error = %e, "Dispatch pass failed"),
                    Err(e) if e.is_panic() => {
                        metrics::counter!("dispatch.pass_panics_total").increment(1);
                        error!(run_id, error = %e, "Dispatch pass panicked");
                    }
                    Err(e) => error!(run_id, error = %e, "Dispatch pass task failed"),
                }
            }
        }
    }
}
