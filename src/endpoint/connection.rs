//! Peer connection endpoint wrapper
//!
//! Wraps a webrtc-rs `RTCPeerConnection` with the pieces the loopback
//! session needs on top of it: a role tag instead of identity-by-reference,
//! a generation counter so stale completions can be recognized, buffering
//! for candidates that arrive ahead of the remote description, and a
//! watchable connectivity state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::TrackLocal;

use crate::config::SessionConfig;
use crate::media::{CaptureStream, RemoteStream};
use crate::{Error, Result};

/// Which side of the session an endpoint is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Captures and offers (push side)
    Sender,
    /// Answers and renders (pull side)
    Receiver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sender => write!(f, "sender"),
            Role::Receiver => write!(f, "receiver"),
        }
    }
}

/// Connectivity state of an endpoint, mirroring the ICE connection states.
///
/// `Disconnected` and `Failed` mean the session is lost: the owning role
/// tears down and replaces the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    /// Initial state
    New,
    /// Connectivity checks in progress
    Checking,
    /// A usable path was found
    Connected,
    /// Checking finished, best path selected
    Completed,
    /// The path was lost; treated as terminal
    Disconnected,
    /// No path could be established; terminal
    Failed,
    /// The endpoint was closed
    Closed,
}

impl ConnectivityState {
    /// Whether this state means the session is lost and the owning role
    /// must tear down
    pub fn is_lost(&self) -> bool {
        matches!(self, ConnectivityState::Disconnected | ConnectivityState::Failed)
    }

    /// Whether a usable path is established
    pub fn is_established(&self) -> bool {
        matches!(self, ConnectivityState::Connected | ConnectivityState::Completed)
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectivityState::New => "new",
            ConnectivityState::Checking => "checking",
            ConnectivityState::Connected => "connected",
            ConnectivityState::Completed => "completed",
            ConnectivityState::Disconnected => "disconnected",
            ConnectivityState::Failed => "failed",
            ConnectivityState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

fn map_ice_state(state: RTCIceConnectionState) -> Option<ConnectivityState> {
    match state {
        RTCIceConnectionState::New => Some(ConnectivityState::New),
        RTCIceConnectionState::Checking => Some(ConnectivityState::Checking),
        RTCIceConnectionState::Connected => Some(ConnectivityState::Connected),
        RTCIceConnectionState::Completed => Some(ConnectivityState::Completed),
        RTCIceConnectionState::Disconnected => Some(ConnectivityState::Disconnected),
        RTCIceConnectionState::Failed => Some(ConnectivityState::Failed),
        RTCIceConnectionState::Closed => Some(ConnectivityState::Closed),
        RTCIceConnectionState::Unspecified => None,
    }
}

/// One side of the in-process peer session.
///
/// Exclusively owned by the session lifecycle manager for its role; the
/// negotiation coordinator only borrows endpoints for the duration of one
/// attempt. After [`Endpoint::close`] every operation fails with
/// [`Error::EndpointClosed`] and the owner must construct a replacement.
pub struct Endpoint {
    role: Role,
    generation: u64,
    endpoint_id: String,
    pc: Arc<RTCPeerConnection>,
    closed: AtomicBool,

    /// Set once the remote description committed; gates direct candidate
    /// addition (webrtc-rs rejects candidates added before it).
    remote_description_set: AtomicBool,
    /// Candidates relayed ahead of the remote description, in arrival
    /// order. Flushed right after the remote description commits.
    pending_candidates: parking_lot::Mutex<Vec<RTCIceCandidateInit>>,
    /// End-of-candidates marker received from the peer
    remote_candidates_done: AtomicBool,

    /// Serializes local description commits: never two in flight
    local_commit: tokio::sync::Mutex<()>,

    connectivity_tx: Arc<watch::Sender<ConnectivityState>>,
    _connectivity_rx: watch::Receiver<ConnectivityState>,

    /// Receiver role only: remote tracks assembled into a stream as they
    /// arrive. Stays `None` on the sender.
    remote_stream_tx: Arc<watch::Sender<Option<RemoteStream>>>,
    _remote_stream_rx: watch::Receiver<Option<RemoteStream>>,
}

impl Endpoint {
    /// Create a fresh endpoint for a role.
    ///
    /// `generation` is assigned by the owner and increases with every
    /// replacement of this role's endpoint.
    pub async fn new(role: Role, generation: u64, config: &SessionConfig) -> Result<Self> {
        let endpoint_id = uuid::Uuid::new_v4().to_string();

        info!(%role, generation, endpoint_id = %endpoint_id, "creating endpoint");

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtc(format!("Failed to register codecs: {}", e)))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| Error::WebRtc(format!("Failed to register interceptors: {}", e)))?;

        let mut setting_engine = SettingEngine::default();
        if config.include_loopback_candidates {
            setting_engine.set_include_loopback_candidate(true);
        }

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_setting_engine(setting_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| Error::WebRtc(format!("Failed to create peer connection: {}", e)))?,
        );

        let (connectivity_tx, connectivity_rx) = watch::channel(ConnectivityState::New);
        let connectivity_tx = Arc::new(connectivity_tx);

        let state_tx = Arc::clone(&connectivity_tx);
        let state_role = role;
        pc.on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
            let state_tx = Arc::clone(&state_tx);
            Box::pin(async move {
                if let Some(mapped) = map_ice_state(s) {
                    debug!(role = %state_role, state = %mapped, "connectivity state change");
                    state_tx.send_replace(mapped);
                }
            })
        }));

        let (remote_stream_tx, remote_stream_rx) = watch::channel(None);
        let remote_stream_tx = Arc::new(remote_stream_tx);

        if role == Role::Receiver {
            let stream_tx = Arc::clone(&remote_stream_tx);
            let assembly: Arc<parking_lot::Mutex<Option<RemoteStream>>> =
                Arc::new(parking_lot::Mutex::new(None));
            pc.on_track(Box::new(move |track, _receiver, _transceiver| {
                let stream_tx = Arc::clone(&stream_tx);
                let assembly = Arc::clone(&assembly);
                Box::pin(async move {
                    let stream_id = track.stream_id();
                    info!(%stream_id, kind = %track.kind(), "remote track added");

                    let snapshot = {
                        let mut current = assembly.lock();
                        match current.as_mut() {
                            Some(stream) if stream.stream_id == stream_id => {
                                stream.tracks.push(track);
                            }
                            Some(stream) => {
                                warn!(
                                    existing = %stream.stream_id,
                                    %stream_id,
                                    "track for a different stream, replacing"
                                );
                                *stream = RemoteStream {
                                    stream_id,
                                    tracks: vec![track],
                                };
                            }
                            None => {
                                *current = Some(RemoteStream {
                                    stream_id,
                                    tracks: vec![track],
                                });
                            }
                        }
                        current.clone()
                    };
                    stream_tx.send_replace(snapshot);
                })
            }));
        }

        Ok(Self {
            role,
            generation,
            endpoint_id,
            pc,
            closed: AtomicBool::new(false),
            remote_description_set: AtomicBool::new(false),
            pending_candidates: parking_lot::Mutex::new(Vec::new()),
            remote_candidates_done: AtomicBool::new(false),
            local_commit: tokio::sync::Mutex::new(()),
            connectivity_tx,
            _connectivity_rx: connectivity_rx,
            remote_stream_tx,
            _remote_stream_rx: remote_stream_rx,
        })
    }

    /// The endpoint's role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Generation assigned by the owner; bumps with every replacement
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the endpoint has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::EndpointClosed(format!(
                "{} endpoint (generation {})",
                self.role, self.generation
            )));
        }
        Ok(())
    }

    /// Attach a capture stream's tracks for sending.
    ///
    /// Each track joins via a send-only transceiver, so the offer this
    /// endpoint creates requests no media back.
    pub async fn attach_stream(&self, stream: &CaptureStream) -> Result<()> {
        self.ensure_open()?;
        if self.role != Role::Sender {
            return Err(Error::Session(format!(
                "{} endpoint cannot attach a capture stream",
                self.role
            )));
        }

        for track in stream.tracks() {
            let local = Arc::clone(track.local()) as Arc<dyn TrackLocal + Send + Sync>;
            self.pc
                .add_transceiver_from_track(
                    local,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Sendonly,
                        send_encodings: Vec::new(),
                    }),
                )
                .await
                .map_err(|e| Error::MediaTrack(format!("Failed to attach track: {}", e)))?;
        }

        debug!(
            role = %self.role,
            stream_id = %stream.stream_id(),
            tracks = stream.tracks().len(),
            "capture stream attached"
        );

        Ok(())
    }

    /// Create an offer (sender only)
    pub async fn create_offer(&self) -> Result<RTCSessionDescription> {
        self.ensure_open()?;
        if self.role != Role::Sender {
            return Err(Error::Session(format!(
                "{} endpoint cannot create an offer",
                self.role
            )));
        }

        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::DescriptionCreation(format!("Failed to create offer: {}", e)))?;

        debug!(role = %self.role, "created offer");
        Ok(offer)
    }

    /// Create an answer (receiver only, after the remote offer committed)
    pub async fn create_answer(&self) -> Result<RTCSessionDescription> {
        self.ensure_open()?;
        if self.role != Role::Receiver {
            return Err(Error::Session(format!(
                "{} endpoint cannot create an answer",
                self.role
            )));
        }

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::DescriptionCreation(format!("Failed to create answer: {}", e)))?;

        debug!(role = %self.role, "created answer");
        Ok(answer)
    }

    /// Commit the endpoint's own description.
    ///
    /// Commits are serialized per endpoint; a retry of the same description
    /// waits for the previous commit instead of racing it.
    pub async fn set_local_description(&self, desc: RTCSessionDescription) -> Result<()> {
        self.ensure_open()?;
        let _commit = self.local_commit.lock().await;
        self.ensure_open()?;

        self.pc
            .set_local_description(desc)
            .await
            .map_err(|e| {
                Error::SessionDescription(format!("Failed to set local description: {}", e))
            })?;

        debug!(role = %self.role, "local description set");
        Ok(())
    }

    /// Commit the peer's description and flush any candidates that arrived
    /// ahead of it.
    pub async fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<()> {
        self.ensure_open()?;

        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| {
                Error::SessionDescription(format!("Failed to set remote description: {}", e))
            })?;

        debug!(role = %self.role, "remote description set");

        self.remote_description_set.store(true, Ordering::Release);
        let buffered: Vec<RTCIceCandidateInit> = {
            let mut pending = self.pending_candidates.lock();
            pending.drain(..).collect()
        };

        for init in buffered {
            if let Err(e) = self.add_candidate_now(init).await {
                // Trickled candidates are independent; a bad one is
                // reported and the rest still go through.
                warn!(role = %self.role, error = %e, "buffered candidate rejected");
            }
        }

        Ok(())
    }

    /// Accept a candidate relayed from the peer. `None` is the
    /// end-of-candidates marker.
    ///
    /// Candidates arriving before the remote description are buffered in
    /// order and flushed by [`Endpoint::set_remote_description`]; nothing
    /// is dropped.
    pub async fn add_remote_candidate(&self, candidate: Option<RTCIceCandidateInit>) -> Result<()> {
        self.ensure_open()?;

        let Some(init) = candidate else {
            self.remote_candidates_done.store(true, Ordering::SeqCst);
            debug!(role = %self.role, "peer signalled end of candidates");
            return Ok(());
        };

        {
            let mut pending = self.pending_candidates.lock();
            if !self.remote_description_set.load(Ordering::Acquire) {
                debug!(
                    role = %self.role,
                    buffered = pending.len() + 1,
                    "buffering candidate until remote description is set"
                );
                pending.push(init);
                return Ok(());
            }
        }

        self.add_candidate_now(init).await
    }

    async fn add_candidate_now(&self, init: RTCIceCandidateInit) -> Result<()> {
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::Candidate(format!("Failed to add candidate: {}", e)))?;

        debug!(role = %self.role, "remote candidate added");
        Ok(())
    }

    /// Whether the peer already signalled end-of-candidates
    pub fn remote_candidates_done(&self) -> bool {
        self.remote_candidates_done.load(Ordering::SeqCst)
    }

    /// Register the handler for locally discovered candidates. The final
    /// `None` marks the end of discovery. Fires until the endpoint closes.
    pub fn on_local_candidate<F>(&self, handler: F)
    where
        F: Fn(Option<RTCIceCandidateInit>) + Send + Sync + 'static,
    {
        let role = self.role;
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                match candidate {
                    Some(c) => match c.to_json() {
                        Ok(init) => {
                            debug!(%role, candidate = %init.candidate, "local candidate discovered");
                            handler(Some(init));
                        }
                        Err(e) => warn!(%role, error = %e, "failed to serialize candidate"),
                    },
                    None => {
                        debug!(%role, "local candidate discovery finished");
                        handler(None);
                    }
                }
                Box::pin(async {})
            }));
    }

    /// Observe connectivity state transitions. Each call returns a fresh
    /// receiver positioned at the current state.
    pub fn connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.connectivity_tx.subscribe()
    }

    /// Observe the remote stream as its tracks arrive (receiver role; the
    /// sender's channel never leaves `None`).
    pub fn remote_streams(&self) -> watch::Receiver<Option<RemoteStream>> {
        self.remote_stream_tx.subscribe()
    }

    /// The remote stream received so far, if any
    pub fn current_remote_stream(&self) -> Option<RemoteStream> {
        self.remote_stream_tx.borrow().clone()
    }

    /// Close the endpoint and release its resources. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!(role = %self.role, generation = self.generation, "closing endpoint");
        self.connectivity_tx.send_replace(ConnectivityState::Closed);

        self.pc
            .close()
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to close connection: {}", e)))?;

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn publish_connectivity(&self, state: ConnectivityState) {
        self.connectivity_tx.send_replace(state);
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("role", &self.role)
            .field("generation", &self.generation)
            .field("endpoint_id", &self.endpoint_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
