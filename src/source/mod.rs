//! Managed external source
//!
//! An [`ExternalSource`] keeps one remote stream connected for as long as it
//! lives. A supervisor task dials the remote through a [`Transport`], hands
//! the negotiated tracks to its [`SourceParent`], relays every frame and, when
//! anything fails, cools down and dials again. Every blocking step is raced
//! against the lifecycle token and the losing task is always joined.

pub mod health;
pub mod state;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;

pub use health::{HealthSummary, SourceHealth};
pub use state::{Readiness, ReadinessTracker, SourceState};
pub use stats::SourceStats;

use crate::assets::LOG_PREFIX;
use crate::config::SourceConfig;
use crate::error::{Result, SourceError};
use crate::net::{ConnectRequest, Frame, Session, StreamType, TrackDescriptor, Transport};
use bytes::Bytes;
use log::Level;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Receiver of everything a source produces.
///
/// Callbacks run on the supervisor and read tasks and must not block.
pub trait SourceParent: Send + Sync + 'static {
    /// The source is connected; `tracks` describes the negotiated media.
    fn on_source_ready(&self, tracks: Vec<TrackDescriptor>);

    /// The session that was announced ready is gone.
    fn on_source_not_ready(&self);

    fn on_source_frame(&self, track_id: usize, stream_type: StreamType, payload: Bytes);

    /// Called after each failed attempt with the number of failures since
    /// the last established session. Retrying continues regardless.
    fn on_source_failure(&self, _consecutive: u64, _error: &SourceError) {}

    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        log::log!(target: "pullcast::source", level, "{}", args);
    }
}

/// Handle to a running source.
///
/// Dropping the handle without [`ExternalSource::stop`] cancels the
/// supervisor but does not wait for it.
pub struct ExternalSource {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    state_rx: watch::Receiver<SourceState>,
    health: Arc<SourceHealth>,
    stats: Arc<SourceStats>,
    parent: Arc<dyn SourceParent>,
}

impl ExternalSource {
    /// Start supervising `config`. Must be called within a tokio runtime.
    ///
    /// The source stops when `parent_token` or the source itself is
    /// cancelled. Failures are never returned, only logged and retried.
    pub fn start(
        config: SourceConfig,
        parent_token: &CancellationToken,
        transport: Arc<dyn Transport>,
        parent: Arc<dyn SourceParent>,
    ) -> Self {
        Self::start_with_stats(config, parent_token, transport, parent, SourceStats::global())
    }

    /// Same as [`ExternalSource::start`], counting into `stats`.
    pub fn start_with_stats(
        config: SourceConfig,
        parent_token: &CancellationToken,
        transport: Arc<dyn Transport>,
        parent: Arc<dyn SourceParent>,
        stats: Arc<SourceStats>,
    ) -> Self {
        let cancel = parent_token.child_token();
        let (state_tx, state_rx) = watch::channel(SourceState::Idle);
        let health = Arc::new(SourceHealth::new());

        stats.source_started();
        parent.log(Level::Info, format_args!("{}started", LOG_PREFIX));

        let runner = Runner {
            request: ConnectRequest::from_config(&config),
            config,
            cancel: cancel.clone(),
            transport,
            parent: Arc::clone(&parent),
            health: Arc::clone(&health),
            state_tx,
            readiness: ReadinessTracker::new(),
        };
        let handle = tokio::spawn(runner.run());

        ExternalSource {
            cancel,
            handle: Some(handle),
            state_rx,
            health,
            stats,
            parent,
        }
    }

    /// Cancel the source and wait until the supervisor, and any dial or
    /// read it was running, has exited. Calling it again does nothing.
    pub async fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.cancel.cancel();
        if let Err(e) = handle.await {
            self.parent.log(
                Level::Warn,
                format_args!("{}supervisor task failed: {}", LOG_PREFIX, e),
            );
        }

        self.stats.source_stopped();
        self.parent.log(Level::Info, format_args!("{}stopped", LOG_PREFIX));
    }

    pub fn is_stopped(&self) -> bool {
        self.handle.is_none()
    }

    pub fn state(&self) -> SourceState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SourceState> {
        self.state_rx.clone()
    }

    pub fn health(&self) -> &Arc<SourceHealth> {
        &self.health
    }
}

impl Drop for ExternalSource {
    fn drop(&mut self) {
        if self.handle.take().is_some() {
            self.cancel.cancel();
            self.stats.source_stopped();
        }
    }
}

enum AttemptOutcome {
    Cancelled,
    Failed,
}

/// State owned by the supervisor task.
struct Runner {
    config: SourceConfig,
    request: ConnectRequest,
    cancel: CancellationToken,
    transport: Arc<dyn Transport>,
    parent: Arc<dyn SourceParent>,
    health: Arc<SourceHealth>,
    state_tx: watch::Sender<SourceState>,
    readiness: ReadinessTracker,
}

impl Runner {
    async fn run(mut self) {
        loop {
            if let AttemptOutcome::Cancelled = self.run_inner().await {
                break;
            }

            self.set_state(SourceState::CoolingDown);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.retry_pause()) => {}
            }
        }

        self.set_state(SourceState::Stopped);
    }

    /// One connect-and-stream attempt.
    async fn run_inner(&mut self) -> AttemptOutcome {
        if self.cancel.is_cancelled() {
            return AttemptOutcome::Cancelled;
        }

        self.set_state(SourceState::Connecting);
        self.health.record_attempt();
        self.log(Level::Debug, format_args!("connecting to {}", self.config.url()));

        let session = match self.dial().await {
            Ok(session) => session,
            Err(e) if e.is_cancelled() && self.cancel.is_cancelled() => {
                return AttemptOutcome::Cancelled;
            }
            Err(e) => {
                let streak = self.health.record_connect_failure();
                self.report_failure(streak, &e);
                return AttemptOutcome::Failed;
            }
        };

        self.log(Level::Info, format_args!("ready"));
        self.health.record_session();
        self.set_state(SourceState::Streaming {
            since: Instant::now(),
        });
        if self.readiness.mark_ready() {
            self.parent.on_source_ready(session.tracks().to_vec());
        }

        let outcome = self.read(session).await;

        if self.readiness.mark_not_ready() {
            self.parent.on_source_not_ready();
        }
        outcome
    }

    /// Run the dial on its own sub-scope, raced against the lifecycle token.
    async fn dial(&self) -> Result<Arc<dyn Session>> {
        let dial_token = CancellationToken::new();

        let transport = Arc::clone(&self.transport);
        let request = self.request.clone();
        let token = dial_token.clone();
        let mut dial = tokio::spawn(async move { transport.connect(request, token).await });

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                dial_token.cancel();
                // a dial that won the race anyway still owns a connection
                if let Ok(Ok(session)) = dial.await {
                    session.close();
                }
                Err(SourceError::Cancelled)
            }
            res = &mut dial => {
                dial_token.cancel();
                match res {
                    Ok(result) => result,
                    Err(e) => Err(SourceError::Io(e.into())),
                }
            }
        }
    }

    /// Relay frames until the session fails or the source is cancelled.
    async fn read(&self, session: Arc<dyn Session>) -> AttemptOutcome {
        let reader = Arc::clone(&session);
        let parent = Arc::clone(&self.parent);
        let health = Arc::clone(&self.health);
        let mut read = tokio::spawn(async move {
            let mut on_frame = |frame: Frame| {
                health.record_frame(frame.payload.len());
                parent.on_source_frame(frame.track_id, frame.stream_type, frame.payload);
            };
            reader.read_frames(&mut on_frame).await
        });

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                session.close();
                if let Err(e) = read.await {
                    self.log(Level::Warn, format_args!("read task failed: {}", e));
                }
                AttemptOutcome::Cancelled
            }
            res = &mut read => {
                session.close();
                let err = match res {
                    Ok(Ok(())) => SourceError::Closed,
                    Ok(Err(e)) => e,
                    Err(e) => SourceError::Io(e.into()),
                };
                let streak = self.health.record_read_failure();
                self.report_failure(streak, &err);
                AttemptOutcome::Failed
            }
        }
    }

    fn report_failure(&self, streak: u64, err: &SourceError) {
        self.log(Level::Info, format_args!("ERR: {}", err));
        self.log(Level::Debug, format_args!("{}", self.health.summary()));
        self.parent.on_source_failure(streak, err);
    }

    fn set_state(&self, next: SourceState) {
        let current = *self.state_tx.borrow();
        if !current.can_transition_to(&next) {
            self.log(
                Level::Warn,
                format_args!("ignoring state change {} -> {}", current, next),
            );
            return;
        }
        self.state_tx.send_replace(next);
    }

    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        self.parent.log(level, format_args!("{}{}", LOG_PREFIX, args));
    }
}
