//! Scripted transport and recording parent for connector tests

use super::SourceParent;
use crate::error::{Result, SourceError};
use crate::net::{ConnectRequest, Frame, MediaKind, Session, StreamType, TrackDescriptor, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How a scripted session ends once its frames are delivered.
#[derive(Debug, Clone)]
pub enum SessionEnd {
    Error(String),
    /// Block until closed
    Hang,
}

/// Outcome of one scripted dial.
#[derive(Debug, Clone)]
pub enum Step {
    Fail(String),
    Mismatch { expected: String, actual: String },
    /// Block until the dial is cancelled
    Hang,
    Session {
        tracks: usize,
        frames: usize,
        end: SessionEnd,
    },
}

impl Step {
    pub fn session(tracks: usize, frames: usize, end: SessionEnd) -> Self {
        Step::Session { tracks, frames, end }
    }
}

#[derive(Default)]
struct Probe {
    dials_in_flight: AtomicUsize,
    dials_cancelled: AtomicUsize,
    reads_in_flight: AtomicUsize,
    closes: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        InFlight(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Plays back a list of dial outcomes, then repeats `fallback` forever.
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    attempts: watch::Sender<usize>,
    attempt_times: Mutex<Vec<Instant>>,
    probe: Arc<Probe>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Self::with_fallback(steps, Step::Fail("script exhausted".into()))
    }

    pub fn with_fallback(steps: Vec<Step>, fallback: Step) -> Arc<Self> {
        Arc::new(ScriptedTransport {
            steps: Mutex::new(steps.into()),
            fallback,
            attempts: watch::Sender::new(0),
            attempt_times: Mutex::new(Vec::new()),
            probe: Arc::new(Probe::default()),
        })
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.borrow()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempt_times.lock().unwrap().clone()
    }

    pub fn dials_in_flight(&self) -> usize {
        self.probe.dials_in_flight.load(Ordering::SeqCst)
    }

    pub fn dials_cancelled(&self) -> usize {
        self.probe.dials_cancelled.load(Ordering::SeqCst)
    }

    pub fn reads_in_flight(&self) -> usize {
        self.probe.reads_in_flight.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.probe.closes.load(Ordering::SeqCst)
    }

    pub async fn wait_attempts(&self, n: usize) {
        let mut rx = self.attempts.subscribe();
        assert!(rx.wait_for(|count| *count >= n).await.is_ok());
    }

    fn next_step(&self) -> Step {
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, _request: ConnectRequest, cancel: CancellationToken) -> Result<Arc<dyn Session>> {
        self.attempt_times.lock().unwrap().push(Instant::now());
        self.attempts.send_modify(|count| *count += 1);
        let _guard = InFlight::enter(&self.probe.dials_in_flight);

        match self.next_step() {
            Step::Fail(reason) => Err(SourceError::Protocol(reason)),
            Step::Mismatch { expected, actual } => Err(SourceError::FingerprintMismatch { expected, actual }),
            Step::Hang => {
                cancel.cancelled().await;
                self.probe.dials_cancelled.fetch_add(1, Ordering::SeqCst);
                Err(SourceError::Cancelled)
            }
            Step::Session { tracks, frames, end } => {
                let tracks = (0..tracks)
                    .map(|i| TrackDescriptor {
                        kind: if i == 0 { MediaKind::Video } else { MediaKind::Audio },
                        codec: if i == 0 { "H264".into() } else { "opus".into() },
                        clock_rate: if i == 0 { 90000 } else { 48000 },
                    })
                    .collect();
                Ok(Arc::new(ScriptedSession {
                    tracks,
                    frames,
                    end,
                    closed: CancellationToken::new(),
                    probe: Arc::clone(&self.probe),
                }))
            }
        }
    }
}

struct ScriptedSession {
    tracks: Vec<TrackDescriptor>,
    frames: usize,
    end: SessionEnd,
    closed: CancellationToken,
    probe: Arc<Probe>,
}

#[async_trait]
impl Session for ScriptedSession {
    fn tracks(&self) -> &[TrackDescriptor] {
        &self.tracks
    }

    async fn read_frames(&self, on_frame: &mut (dyn FnMut(Frame) + Send)) -> Result<()> {
        let _guard = InFlight::enter(&self.probe.reads_in_flight);

        for i in 0..self.frames {
            if self.closed.is_cancelled() {
                return Err(SourceError::Closed);
            }
            on_frame(Frame {
                track_id: i % self.tracks.len().max(1),
                stream_type: StreamType::Rtp,
                payload: Bytes::from(vec![i as u8; 4]),
            });
            tokio::task::yield_now().await;
        }

        match &self.end {
            SessionEnd::Error(reason) => Err(SourceError::Protocol(reason.clone())),
            SessionEnd::Hang => {
                self.closed.cancelled().await;
                Err(SourceError::Closed)
            }
        }
    }

    fn close(&self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.cancel();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Ready(usize),
    NotReady,
    Frame(usize, StreamType, Bytes),
    Failure(u64, String),
}

/// Parent that records every notification in order.
pub struct RecordingParent {
    events: watch::Sender<Vec<Event>>,
}

impl RecordingParent {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingParent {
            events: watch::Sender::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    /// Ready / not-ready notifications only
    pub fn readiness(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Event::Ready(_) | Event::NotReady))
            .collect()
    }

    pub fn failures(&self) -> Vec<(u64, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Failure(streak, reason) => Some((streak, reason)),
                _ => None,
            })
            .collect()
    }

    pub async fn wait_for(&self, mut done: impl FnMut(&[Event]) -> bool) {
        let mut rx = self.events.subscribe();
        assert!(rx.wait_for(|events| done(events)).await.is_ok());
    }

    pub async fn wait_count(&self, n: usize, mut matches: impl FnMut(&Event) -> bool) {
        self.wait_for(|events| events.iter().filter(|e| matches(e)).count() >= n)
            .await
    }

    fn push(&self, event: Event) {
        self.events.send_modify(|events| events.push(event));
    }
}

impl SourceParent for RecordingParent {
    fn on_source_ready(&self, tracks: Vec<TrackDescriptor>) {
        self.push(Event::Ready(tracks.len()));
    }

    fn on_source_not_ready(&self) {
        self.push(Event::NotReady);
    }

    fn on_source_frame(&self, track_id: usize, stream_type: StreamType, payload: Bytes) {
        self.push(Event::Frame(track_id, stream_type, payload));
    }

    fn on_source_failure(&self, consecutive: u64, error: &SourceError) {
        self.push(Event::Failure(consecutive, error.to_string()));
    }
}
