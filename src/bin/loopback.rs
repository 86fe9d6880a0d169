//! Loopback demo: push a synthetic screen capture and pull it back
//!
//! Stands in for the button surface of a real embedding — start push,
//! start pull, watch the receiving side connect, stop both. The "screen"
//! is a test-pattern source so the demo runs anywhere.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;
use tracing::info;
use webrtc::api::media_engine::MIME_TYPE_VP8;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use loopshare::{
    CaptureConfig, CaptureStream, CaptureTrack, MediaSource, RemoteStream, Result, SessionConfig,
    SessionManager, TrackSink,
};

/// Synthetic screen source: one VP8 video track fed dummy frames at ~30fps
/// until its stop hook fires.
struct TestPatternSource;

#[async_trait]
impl MediaSource for TestPatternSource {
    fn is_available(&self) -> bool {
        true
    }

    async fn capture(&self, config: &CaptureConfig) -> Result<CaptureStream> {
        info!(cursor = ?config.cursor, audio = config.capture_audio, "capture requested");

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
            info!("test pattern writer stopped");
        });

        let capture_track = CaptureTrack::with_stop_hook(track, move || {
            let _ = stop_tx.send(true);
        });

        let (stream, _ended) = CaptureStream::new(stream_id, vec![capture_track]);
        Ok(stream)
    }
}

/// Sink that just reports what it was handed
struct LogSink;

impl TrackSink for LogSink {
    fn render(&self, stream: Option<RemoteStream>) {
        match stream {
            Some(stream) => info!(
                stream_id = %stream.stream_id,
                tracks = stream.tracks.len(),
                "sink bound to remote stream"
            ),
            None => info!("sink cleared"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,loopshare=debug".into()),
        )
        .init();

    info!(version = loopshare::version(), "loopshare loopback demo");

    let manager = SessionManager::new(
        SessionConfig::default(),
        Arc::new(TestPatternSource),
        Arc::new(LogSink),
    )
    .await?;

    manager.start_push().await?;
    manager.start_pull().await?;

    // Watch the receiving side come up
    let mut connectivity = manager.pull_connectivity().await;
    let connected = tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let state = *connectivity.borrow_and_update();
            info!(%state, "receiver connectivity");
            if state.is_established() {
                break;
            }
            if connectivity.changed().await.is_err() {
                break;
            }
        }
    })
    .await;

    match connected {
        Ok(()) => info!("loopback established"),
        Err(_) => anyhow::bail!("receiver never connected"),
    }

    // Let a little media flow before tearing down
    tokio::time::sleep(Duration::from_secs(2)).await;

    manager.stop_pull().await?;
    manager.stop_push().await?;
    info!("session stopped, both roles idle");

    Ok(())
}
