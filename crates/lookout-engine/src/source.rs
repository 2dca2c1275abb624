//! Video capture collaborator.

use async_trait::async_trait;
use lookout_core::Frame;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("no capture device: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

/// Playback state reported by a video source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Ended,
}

/// A live frame source the recognition loop samples from.
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Request the stream and begin playback.
    async fn start(&self) -> Result<(), CaptureError>;

    fn status(&self) -> PlaybackStatus;

    /// Most recent frame, if one has arrived.
    fn current_frame(&self) -> Option<Frame>;

    /// Playback status changes. The loop stops when playback pauses or ends.
    fn subscribe(&self) -> watch::Receiver<PlaybackStatus>;
}

/// Push-driven video source: a capture backend feeds frames in, the loop
/// samples the latest one on each tick.
pub struct FrameFeed {
    status: watch::Sender<PlaybackStatus>,
    frame: Mutex<Option<Frame>>,
}

impl FrameFeed {
    /// A feed that is paused until [`VideoSource::start`] is called.
    pub fn new() -> Self {
        let (status, _) = watch::channel(PlaybackStatus::Paused);
        Self {
            status,
            frame: Mutex::new(None),
        }
    }

    /// Replace the current frame.
    pub fn push_frame(&self, frame: Frame) {
        *self.frame.lock() = Some(frame);
    }

    pub fn pause(&self) {
        self.set_status(PlaybackStatus::Paused);
    }

    pub fn resume(&self) {
        self.set_status(PlaybackStatus::Playing);
    }

    /// Mark the stream finished and drop the last frame.
    pub fn end(&self) {
        self.frame.lock().take();
        self.set_status(PlaybackStatus::Ended);
    }

    fn set_status(&self, status: PlaybackStatus) {
        let prev = self.status.send_replace(status);
        if prev != status {
            tracing::debug!(?prev, ?status, "frame feed status changed");
        }
    }
}

impl Default for FrameFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VideoSource for FrameFeed {
    async fn start(&self) -> Result<(), CaptureError> {
        self.set_status(PlaybackStatus::Playing);
        Ok(())
    }

    fn status(&self) -> PlaybackStatus {
        *self.status.borrow()
    }

    fn current_frame(&self) -> Option<Frame> {
        self.frame.lock().clone()
    }

    fn subscribe(&self) -> watch::Receiver<PlaybackStatus> {
        self.status.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_feed_lifecycle() {
        let feed = FrameFeed::new();
        assert_eq!(feed.status(), PlaybackStatus::Paused);
        assert!(feed.current_frame().is_none());

        feed.start().await.unwrap();
        assert_eq!(feed.status(), PlaybackStatus::Playing);

        feed.push_frame(Frame::new(vec![1, 2, 3], 1, 1));
        assert_eq!(feed.current_frame().unwrap().data, vec![1, 2, 3]);

        feed.end();
        assert_eq!(feed.status(), PlaybackStatus::Ended);
        assert!(feed.current_frame().is_none());
    }

    #[tokio::test]
    async fn test_feed_notifies_subscribers() {
        let feed = FrameFeed::new();
        feed.start().await.unwrap();
        let mut rx = feed.subscribe();

        feed.pause();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), PlaybackStatus::Paused);

        feed.resume();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), PlaybackStatus::Playing);
    }
}
