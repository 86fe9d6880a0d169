//! Shared test support: a synthetic screen source and a collecting sink

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;
use webrtc::api::media_engine::MIME_TYPE_VP8;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use loopshare::{
    CaptureConfig, CaptureStream, CaptureTrack, EndedHandle, MediaSource, RemoteStream, Result,
    TrackSink,
};

/// Initialize test logging (call once per test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,loopshare=debug")
        .try_init();
}

struct CaptureRecord {
    stream_id: String,
    stops: Arc<AtomicUsize>,
    ended: EndedHandle,
}

/// Synthetic screen source. Every capture serves one VP8 track fed dummy
/// frames until its stop hook fires, and records what the tests want to
/// assert on: the stream id, how often the track was stopped, and the
/// handle for the external capture-ended signal.
pub struct TestScreenSource {
    available: AtomicBool,
    captures: parking_lot::Mutex<Vec<CaptureRecord>>,
}

impl TestScreenSource {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            captures: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn capture_count(&self) -> usize {
        self.captures.lock().len()
    }

    pub fn stream_id(&self, capture_index: usize) -> String {
        self.captures.lock()[capture_index].stream_id.clone()
    }

    pub fn stop_count(&self, capture_index: usize) -> usize {
        self.captures.lock()[capture_index]
            .stops
            .load(Ordering::SeqCst)
    }

    /// Fire the external "user stopped sharing" signal for a capture
    pub fn signal_ended(&self, capture_index: usize) {
        self.captures.lock()[capture_index].ended.signal();
    }
}

#[async_trait]
impl MediaSource for TestScreenSource {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn capture(&self, _config: &CaptureConfig) -> Result<CaptureStream> {
        let stream_id = format!("screen-{}", uuid::Uuid::new_v4());

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
            "video-0".to_owned(),
            stream_id.clone(),
        ));

        // Feed dummy frames so the receiving side actually sees media
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let writer = Arc::clone(&track);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(33));
            let frame = Bytes::from(vec![0u8; 1200]);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let sample = Sample {
                            data: frame.clone(),
                            duration: Duration::from_millis(33),
                            ..Default::default()
                        };
                        if writer.write_sample(&sample).await.is_err() {
                            break;
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });

        let stops = Arc::new(AtomicUsize::new(0));
        let hook_stops = Arc::clone(&stops);
        let capture_track = CaptureTrack::with_stop_hook(track, move || {
            hook_stops.fetch_add(1, Ordering::SeqCst);
            let _ = stop_tx.send(true);
        });

        let (stream, ended) = CaptureStream::new(stream_id.clone(), vec![capture_track]);
        self.captures.lock().push(CaptureRecord {
            stream_id,
            stops,
            ended,
        });
        Ok(stream)
    }
}

/// Sink publishing every render call into a watch channel the tests can
/// await on
pub struct CollectSink {
    tx: watch::Sender<Option<RemoteStream>>,
}

impl CollectSink {
    pub fn new() -> (Arc<Self>, watch::Receiver<Option<RemoteStream>>) {
        let (tx, rx) = watch::channel(None);
        (Arc::new(Self { tx }), rx)
    }
}

impl TrackSink for CollectSink {
    fn render(&self, stream: Option<RemoteStream>) {
        self.tx.send_replace(stream);
    }
}
