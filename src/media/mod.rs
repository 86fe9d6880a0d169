//! Media boundaries: capture sources, rendering sinks, stream handles
//!
//! Capturing pixels and presenting frames are not this crate's business.
//! `MediaSource` and `TrackSink` are the seams where an embedder plugs in a
//! real screen grabber and renderer; the session core only moves the
//! resulting track handles around.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::config::CaptureConfig;
use crate::Result;

/// Provider of capturable media streams (the screen, in practice).
///
/// `is_available` is probed before `capture` so an unsupported environment
/// surfaces as a clean [`crate::Error::CapabilityUnavailable`] instead of a
/// failed request.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Whether this environment can capture at all
    fn is_available(&self) -> bool;

    /// Request a capture stream. The user (or platform) may reject the
    /// request; that failure aborts the start attempt only.
    async fn capture(&self, config: &CaptureConfig) -> Result<CaptureStream>;
}

/// Consumer of a received stream.
///
/// `render(None)` clears the sink. The return value is of no interest to
/// the session core.
pub trait TrackSink: Send + Sync {
    /// Bind a received stream for playback, or clear the binding
    fn render(&self, stream: Option<RemoteStream>);
}

type StopHook = Box<dyn Fn() + Send + Sync>;

/// One outbound track owned by a capture stream.
///
/// Stopping is idempotent: the stop hook runs at most once no matter how
/// many teardown paths reach it.
pub struct CaptureTrack {
    local: Arc<TrackLocalStaticSample>,
    stopped: AtomicBool,
    on_stop: Option<StopHook>,
}

impl CaptureTrack {
    /// Create a track with no stop hook
    pub fn new(local: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            local,
            stopped: AtomicBool::new(false),
            on_stop: None,
        }
    }

    /// Create a track whose hook is invoked when the track is stopped.
    ///
    /// The hook is where a source halts its sample producer.
    pub fn with_stop_hook(local: Arc<TrackLocalStaticSample>, hook: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            local,
            stopped: AtomicBool::new(false),
            on_stop: Some(Box::new(hook)),
        }
    }

    /// The underlying webrtc-rs track handle
    pub fn local(&self) -> &Arc<TrackLocalStaticSample> {
        &self.local
    }

    /// Stop the track. Returns whether this call performed the stop.
    pub fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(hook) = &self.on_stop {
            hook();
        }
        true
    }

    /// Whether the track has been stopped
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for CaptureTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureTrack")
            .field("id", &self.local.id())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// A capture stream: the tracks a media source produced for one capture
/// request, plus the signal that capture ended outside our control (the
/// user hit the platform's own "stop sharing" affordance).
///
/// Owned by the push role while active; attached to at most one sending
/// endpoint at a time.
#[derive(Debug)]
pub struct CaptureStream {
    stream_id: String,
    tracks: Vec<CaptureTrack>,
    ended: watch::Receiver<bool>,
}

/// Source-side handle for the external "capture ended" signal
#[derive(Debug, Clone)]
pub struct EndedHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl EndedHandle {
    /// Signal that capture ended externally
    pub fn signal(&self) {
        self.tx.send_replace(true);
    }
}

impl CaptureStream {
    /// Build a capture stream from the tracks a source produced.
    ///
    /// Returns the stream and the handle the source keeps to signal an
    /// external end of capture.
    pub fn new(stream_id: impl Into<String>, tracks: Vec<CaptureTrack>) -> (Self, EndedHandle) {
        let (tx, ended) = watch::channel(false);
        (
            Self {
                stream_id: stream_id.into(),
                tracks,
                ended,
            },
            EndedHandle { tx: Arc::new(tx) },
        )
    }

    /// The stream id shared by all tracks of this capture
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// The owned tracks
    pub fn tracks(&self) -> &[CaptureTrack] {
        &self.tracks
    }

    /// Observe the external capture-ended signal
    pub fn ended(&self) -> watch::Receiver<bool> {
        self.ended.clone()
    }

    /// Stop every owned track. Each track stops at most once; returns how
    /// many tracks this call actually stopped.
    pub fn stop(&self) -> usize {
        self.tracks.iter().filter(|t| t.stop()).count()
    }
}

/// A stream received from the peer: remote tracks grouped by the stream id
/// the sender attached them under. Handed to the [`TrackSink`] by
/// reference (`Arc` tracks), never copied.
#[derive(Clone)]
pub struct RemoteStream {
    /// Stream id announced by the sending side
    pub stream_id: String,

    /// Received tracks belonging to this stream
    pub tracks: Vec<Arc<TrackRemote>>,
}

impl std::fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStream")
            .field("stream_id", &self.stream_id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use webrtc::api::media_engine::MIME_TYPE_VP8;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

    fn video_track(stream_id: &str) -> Arc<TrackLocalStaticSample> {
        Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
            "video-0".to_owned(),
            stream_id.to_owned(),
        ))
    }

    #[test]
    fn test_track_stops_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let hook_count = Arc::clone(&count);
        let track = CaptureTrack::with_stop_hook(video_track("s"), move || {
            hook_count.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!track.is_stopped());
        assert!(track.stop());
        assert!(!track.stop());
        assert!(track.is_stopped());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stream_stop_counts_performed_stops() {
        let (stream, _ended) = CaptureStream::new(
            "screen-1",
            vec![
                CaptureTrack::new(video_track("screen-1")),
                CaptureTrack::new(video_track("screen-1")),
            ],
        );

        assert_eq!(stream.stop(), 2);
        assert_eq!(stream.stop(), 0);
    }

    #[tokio::test]
    async fn test_ended_signal_observed() {
        let (stream, ended) = CaptureStream::new("screen-1", Vec::new());
        let mut rx = stream.ended();
        assert!(!*rx.borrow_and_update());

        ended.signal();
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
    }
}
