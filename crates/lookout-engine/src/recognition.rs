//! Recognition loop: periodic frame analysis against a gallery snapshot.
//!
//! `start()` builds the gallery from the store, opens the video source and
//! spawns a ticker task. Every tick samples the current frame, detects and
//! matches all faces, and publishes the annotated result list, replacing the
//! previous one. The ticker stops when the source pauses or ends, or when
//! `stop()` is called.

use crate::config::ConfigError;
use crate::source::{PlaybackStatus, VideoSource};
use lookout_core::{
    build_gallery, AnalyzerError, BoundingBox, FaceAnalyzer, FaceMatcher, Frame, GalleryEntry,
    GalleryStore, MatchLabel,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Loop timing and matching parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    pub tick_interval: Duration,
    pub match_threshold: f32,
}

impl LoopSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.match_threshold.is_finite() || self.match_threshold <= 0.0 {
            return Err(ConfigError::InvalidThreshold(self.match_threshold));
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroTickInterval);
        }
        Ok(())
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(250),
            match_threshold: lookout_core::DEFAULT_MATCH_THRESHOLD,
        }
    }
}

/// Why a session ended in [`LoopStatus::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    CameraUnavailable,
    ModelUnavailable,
}

/// Loop state, published to the rendering side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum LoopStatus {
    Idle,
    Preparing,
    CameraStarting,
    Running,
    Stopped,
    NoGallery,
    Failed { reason: FailureReason, message: String },
}

impl LoopStatus {
    /// Coarse display status.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStatus::Idle => "idle",
            LoopStatus::Preparing => "preparing",
            LoopStatus::CameraStarting => "camera-starting",
            LoopStatus::Running => "running",
            LoopStatus::Stopped => "stopped",
            LoopStatus::NoGallery => "no-gallery",
            LoopStatus::Failed { .. } => "failed",
        }
    }
}

/// One recognized (or rejected) face in a frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub bbox: BoundingBox,
    pub label: MatchLabel,
    pub confidence_percent: Option<u8>,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No running session.
    Inactive,
    /// Source paused or ended; previous results left untouched.
    SourceNotPlaying,
    /// Previous tick still in flight; this one was dropped.
    Busy,
    /// Source has not produced a frame yet.
    NoFrame,
    /// Analysis failed; previous results left untouched.
    AnalysisFailed,
    /// Results replaced with this many annotations.
    Published(usize),
}

/// Per-session state shared by the ticker and manual ticks.
#[derive(Clone)]
struct TickContext {
    session: u64,
    matcher: Arc<FaceMatcher>,
    cancel: CancellationToken,
    busy: Arc<AtomicBool>,
}

struct Session {
    ctx: TickContext,
    ticker: JoinHandle<()>,
    tracker: TaskTracker,
}

struct Inner {
    store: Arc<GalleryStore>,
    analyzer: Arc<dyn FaceAnalyzer>,
    source: Arc<dyn VideoSource>,
    settings: LoopSettings,
    status: watch::Sender<LoopStatus>,
    results: watch::Sender<Arc<Vec<Annotation>>>,
    session: Mutex<Option<Session>>,
    next_session: AtomicU64,
}

/// Drives recognition of a live video source against the stored gallery.
pub struct RecognitionLoop {
    inner: Arc<Inner>,
}

impl RecognitionLoop {
    pub fn new(
        store: Arc<GalleryStore>,
        analyzer: Arc<dyn FaceAnalyzer>,
        source: Arc<dyn VideoSource>,
        settings: LoopSettings,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;

        let (status, _) = watch::channel(LoopStatus::Idle);
        let (results, _) = watch::channel(Arc::new(Vec::new()));

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                analyzer,
                source,
                settings,
                status,
                results,
                session: Mutex::new(None),
                next_session: AtomicU64::new(1),
            }),
        })
    }

    pub fn status(&self) -> LoopStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<LoopStatus> {
        self.inner.status.subscribe()
    }

    /// Annotations from the most recent completed tick.
    pub fn results(&self) -> Arc<Vec<Annotation>> {
        self.inner.results.borrow().clone()
    }

    pub fn subscribe_results(&self) -> watch::Receiver<Arc<Vec<Annotation>>> {
        self.inner.results.subscribe()
    }

    /// Start a recognition session and return the state it settled in.
    ///
    /// Builds a fresh gallery snapshot; store changes made while the session
    /// runs are picked up by the next `start()`. An empty gallery ends in
    /// `NoGallery` without touching the camera. Calling `start()` on a running
    /// loop leaves the current session alone.
    pub async fn start(&self) -> LoopStatus {
        let inner = &self.inner;
        let mut slot = inner.session.lock().await;
        if slot.is_some() {
            tracing::warn!("start requested while a session is running; ignoring");
            return self.status();
        }

        inner.set_status(LoopStatus::Preparing);

        let gallery = match inner.prepare_gallery().await {
            Ok(gallery) => gallery,
            Err(message) => {
                return inner.set_status(LoopStatus::Failed {
                    reason: FailureReason::ModelUnavailable,
                    message,
                });
            }
        };

        if gallery.is_empty() {
            tracing::warn!("no usable faces in the gallery; upload labeled images first");
            return inner.set_status(LoopStatus::NoGallery);
        }

        let matcher = match FaceMatcher::new(&gallery, inner.settings.match_threshold) {
            Ok(matcher) => Arc::new(matcher),
            Err(e) => {
                return inner.set_status(LoopStatus::Failed {
                    reason: FailureReason::ModelUnavailable,
                    message: e.to_string(),
                });
            }
        };

        inner.set_status(LoopStatus::CameraStarting);
        // Subscribe before starting so a pause or end during startup is not missed.
        let playback = inner.source.subscribe();
        if let Err(e) = inner.source.start().await {
            tracing::error!(error = %e, "video source unavailable");
            return inner.set_status(LoopStatus::Failed {
                reason: FailureReason::CameraUnavailable,
                message: e.to_string(),
            });
        }

        let ctx = TickContext {
            session: inner.next_session.fetch_add(1, Ordering::Relaxed),
            matcher,
            cancel: CancellationToken::new(),
            busy: Arc::new(AtomicBool::new(false)),
        };
        let tracker = TaskTracker::new();
        let ticker = tokio::spawn(run_ticker(inner.clone(), ctx.clone(), tracker.clone(), playback));

        tracing::info!(
            session = ctx.session,
            identities = gallery.len(),
            embeddings = ctx.matcher.len(),
            threshold = ctx.matcher.threshold(),
            interval_ms = inner.settings.tick_interval.as_millis() as u64,
            "recognition session started"
        );

        inner.results.send_replace(Arc::new(Vec::new()));
        *slot = Some(Session {
            ctx,
            ticker,
            tracker,
        });
        inner.set_status(LoopStatus::Running)
    }

    /// Run one tick immediately, outside the periodic schedule.
    pub async fn tick(&self) -> TickOutcome {
        let ctx = match self.inner.session.lock().await.as_ref() {
            Some(session) => session.ctx.clone(),
            None => return TickOutcome::Inactive,
        };
        self.inner.run_tick(&ctx).await
    }

    /// Cancel the running session. Returns `false` if nothing was running.
    ///
    /// When this returns, the ticker has exited and no tick it started is
    /// still in flight.
    pub async fn stop(&self) -> bool {
        let session = self.inner.session.lock().await.take();
        match session {
            Some(session) => {
                self.inner.finish(session, true).await;
                true
            }
            None => false,
        }
    }
}

impl Drop for RecognitionLoop {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.inner.session.try_lock() {
            if let Some(session) = slot.take() {
                session.ctx.cancel.cancel();
            }
        }
    }
}

impl Inner {
    fn set_status(&self, next: LoopStatus) -> LoopStatus {
        let prev = self.status.send_replace(next.clone());
        match &next {
            LoopStatus::Failed { reason, message } => {
                tracing::error!(from = prev.as_str(), ?reason, %message, "recognition failed");
            }
            _ => tracing::info!(from = prev.as_str(), to = next.as_str(), "recognition status"),
        }
        next
    }

    /// Load the analyzer and build the gallery on the blocking pool.
    async fn prepare_gallery(&self) -> Result<Vec<GalleryEntry>, String> {
        let analyzer = self.analyzer.clone();
        let store = self.store.clone();

        let built = tokio::task::spawn_blocking(move || -> Result<Vec<GalleryEntry>, AnalyzerError> {
            analyzer.prepare()?;
            let identities = store.load();
            Ok(build_gallery(&identities, analyzer.as_ref()))
        })
        .await;

        match built {
            Ok(Ok(gallery)) => Ok(gallery),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("gallery build task failed: {e}")),
        }
    }

    async fn run_tick(&self, ctx: &TickContext) -> TickOutcome {
        if ctx.cancel.is_cancelled() {
            return TickOutcome::Inactive;
        }

        let playback = self.source.status();
        if playback != PlaybackStatus::Playing {
            tracing::trace!(?playback, "source not playing; tick skipped");
            return TickOutcome::SourceNotPlaying;
        }

        let Some(_permit) = BusyPermit::acquire(&ctx.busy) else {
            tracing::debug!(session = ctx.session, "previous tick still running; tick dropped");
            return TickOutcome::Busy;
        };

        let Some(frame) = self.source.current_frame() else {
            return TickOutcome::NoFrame;
        };

        let analyzer = self.analyzer.clone();
        let matcher = ctx.matcher.clone();
        let annotated =
            tokio::task::spawn_blocking(move || annotate(analyzer.as_ref(), &matcher, &frame)).await;

        let annotations = match annotated {
            Ok(Ok(annotations)) => annotations,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "frame analysis failed; keeping previous results");
                return TickOutcome::AnalysisFailed;
            }
            Err(e) => {
                tracing::warn!(error = %e, "frame analysis task failed; keeping previous results");
                return TickOutcome::AnalysisFailed;
            }
        };

        if ctx.cancel.is_cancelled() {
            return TickOutcome::Inactive;
        }

        let count = annotations.len();
        let known = annotations.iter().filter(|a| a.label.is_known()).count();
        tracing::debug!(session = ctx.session, faces = count, known, "tick results published");
        self.results.send_replace(Arc::new(annotations));
        TickOutcome::Published(count)
    }

    /// Stop the session triggered by the source pausing, if it is still current.
    async fn halt(&self, session_id: u64) {
        let mut slot = self.session.lock().await;
        let current = slot.as_ref().map(|s| s.ctx.session);
        if current != Some(session_id) {
            return;
        }
        let session = slot.take();
        drop(slot);

        if let Some(session) = session {
            self.finish(session, false).await;
        }
    }

    /// Cancel the ticker, wait for in-flight ticks, and mark the loop stopped.
    /// `join_ticker` must be false when called from the ticker task itself.
    async fn finish(&self, session: Session, join_ticker: bool) {
        let Session {
            ctx,
            ticker,
            tracker,
        } = session;

        ctx.cancel.cancel();
        if join_ticker {
            if let Err(e) = ticker.await {
                tracing::warn!(error = %e, "ticker task ended abnormally");
            }
        }
        tracker.close();
        tracker.wait().await;

        tracing::info!(session = ctx.session, "recognition session stopped");
        self.set_status(LoopStatus::Stopped);
    }
}

/// Fires ticks on the configured interval until cancelled or the source
/// stops playing. Tick work runs in tracked tasks so a slow tick never
/// delays the schedule; the busy flag keeps at most one in flight.
async fn run_ticker(
    inner: Arc<Inner>,
    ctx: TickContext,
    tracker: TaskTracker,
    mut playback: watch::Receiver<PlaybackStatus>,
) {
    let status = *playback.borrow_and_update();
    if status != PlaybackStatus::Playing {
        tracing::info!(session = ctx.session, ?status, "video source stopped playing during startup");
        inner.halt(ctx.session).await;
        return;
    }

    let period = inner.settings.tick_interval;
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            changed = playback.changed() => {
                let status = match changed {
                    Ok(()) => *playback.borrow_and_update(),
                    Err(_) => PlaybackStatus::Ended,
                };
                if status != PlaybackStatus::Playing {
                    tracing::info!(session = ctx.session, ?status, "video source stopped playing");
                    inner.halt(ctx.session).await;
                    break;
                }
            }
            _ = interval.tick() => {
                let inner = inner.clone();
                let ctx = ctx.clone();
                tracker.spawn(async move {
                    inner.run_tick(&ctx).await;
                });
            }
        }
    }
}

/// Detect and classify every face in `frame`.
fn annotate(
    analyzer: &dyn FaceAnalyzer,
    matcher: &FaceMatcher,
    frame: &Frame,
) -> Result<Vec<Annotation>, AnalyzerError> {
    if !frame.is_well_formed() {
        return Err(AnalyzerError::InvalidFrame(format!(
            "{}x{} frame with {} bytes",
            frame.width,
            frame.height,
            frame.data.len()
        )));
    }
    let faces = analyzer.analyze(frame)?;
    let mut annotations = Vec::with_capacity(faces.len());

    for face in faces {
        match matcher.best_match(&face.embedding) {
            Ok(result) => annotations.push(Annotation {
                bbox: face.bbox,
                label: result.label,
                confidence_percent: result.confidence_percent,
            }),
            Err(e) => tracing::warn!(error = %e, "dropping face with incompatible embedding"),
        }
    }

    Ok(annotations)
}

/// Single-slot admission gate; released on drop.
struct BusyPermit<'a>(&'a AtomicBool);

impl<'a> BusyPermit<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyPermit<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
