//! Start/stop semantics for the push and pull roles
//!
//! Each role runs the same small machine: `Idle → Starting → Active →
//! Stopping → Idle`. Leaving `Active` (explicit stop, external capture end,
//! or connectivity loss) always stops owned tracks exactly once, clears the
//! sink, closes the role's endpoint, and installs a fresh replacement so
//! the next start needs no extra setup.
//!
//! Every start attempt and watcher task carries the generation it observed
//! when it began; a teardown bumps the generation, so settlements and
//! events belonging to a replaced endpoint reduce to no-ops.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::endpoint::{ConnectivityState, Endpoint, Role};
use crate::media::{CaptureStream, MediaSource, TrackSink};
use crate::negotiation;
use crate::{Error, Result};

/// Lifecycle state of one role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleState {
    /// Nothing running; the role's endpoint is fresh
    Idle,
    /// A start request is in flight
    Starting,
    /// The role's session is established
    Active,
    /// Teardown in progress
    Stopping,
}

impl fmt::Display for RoleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoleState::Idle => "idle",
            RoleState::Starting => "starting",
            RoleState::Active => "active",
            RoleState::Stopping => "stopping",
        };
        write!(f, "{}", s)
    }
}

struct RoleSlot {
    endpoint: Arc<Endpoint>,
    state: RoleState,
    generation: u64,
    /// Push role only: the capture stream owned while active
    stream: Option<CaptureStream>,
}

/// Owns the two endpoints and the start/stop lifecycle of both roles.
///
/// Cheap to clone; clones share the same session state.
#[derive(Clone)]
pub struct SessionManager {
    config: SessionConfig,
    source: Arc<dyn MediaSource>,
    sink: Arc<dyn TrackSink>,
    push: Arc<Mutex<RoleSlot>>,
    pull: Arc<Mutex<RoleSlot>>,
}

impl SessionManager {
    /// Create a manager with both role endpoints constructed up front.
    pub async fn new(
        config: SessionConfig,
        source: Arc<dyn MediaSource>,
        sink: Arc<dyn TrackSink>,
    ) -> Result<Self> {
        config.validate()?;

        let push_endpoint = Endpoint::new(Role::Sender, 1, &config).await?;
        let pull_endpoint = Endpoint::new(Role::Receiver, 1, &config).await?;

        Ok(Self {
            config,
            source,
            sink,
            push: Arc::new(Mutex::new(RoleSlot {
                endpoint: Arc::new(push_endpoint),
                state: RoleState::Idle,
                generation: 1,
                stream: None,
            })),
            pull: Arc::new(Mutex::new(RoleSlot {
                endpoint: Arc::new(pull_endpoint),
                state: RoleState::Idle,
                generation: 1,
                stream: None,
            })),
        })
    }

    /// Current state of the push role
    pub async fn push_state(&self) -> RoleState {
        self.push.lock().await.state
    }

    /// Current state of the pull role
    pub async fn pull_state(&self) -> RoleState {
        self.pull.lock().await.state
    }

    /// Generation of the push role's endpoint (bumps on every replacement)
    pub async fn push_generation(&self) -> u64 {
        self.push.lock().await.generation
    }

    /// Generation of the pull role's endpoint
    pub async fn pull_generation(&self) -> u64 {
        self.pull.lock().await.generation
    }

    /// Observe the push endpoint's connectivity
    pub async fn push_connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.push.lock().await.endpoint.connectivity()
    }

    /// Observe the pull endpoint's connectivity
    pub async fn pull_connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.pull.lock().await.endpoint.connectivity()
    }

    /// Start pushing: request capture, attach the stream to the sender
    /// endpoint, and drive the offer handshake.
    ///
    /// A start while the role is already `Active` stops the running
    /// session first and then starts fresh; a start while `Starting` or
    /// `Stopping` is rejected.
    pub async fn start_push(&self) -> Result<()> {
        // Detect the capability before touching anything, so an
        // unsupported environment surfaces a clean message and the role
        // (and any running session) is left exactly as it was.
        if !self.source.is_available() {
            warn!("screen capture capability missing, cannot start push");
            return Err(Error::CapabilityUnavailable(
                "the media source reports no screen capture support".to_string(),
            ));
        }

        loop {
            let needs_stop = {
                let mut slot = self.push.lock().await;
                match slot.state {
                    RoleState::Idle => {
                        slot.state = RoleState::Starting;
                        false
                    }
                    RoleState::Active => true,
                    other => {
                        return Err(Error::Session(format!(
                            "cannot start push while {}",
                            other
                        )))
                    }
                }
            };
            if !needs_stop {
                break;
            }
            info!("push already active, stopping before restart");
            self.stop_push().await?;
        }

        let (sender, generation) = {
            let slot = self.push.lock().await;
            (Arc::clone(&slot.endpoint), slot.generation)
        };

        // Capture before touching the endpoint: a rejected request returns
        // the role to idle with the endpoint untouched.
        let stream = match self.source.capture(&self.config.capture).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "capture request failed");
                self.push.lock().await.state = RoleState::Idle;
                return Err(e);
            }
        };
        info!(stream_id = %stream.stream_id(), "capture stream acquired");

        match self.negotiate_push(&sender, &stream).await {
            Ok(()) => {
                let mut slot = self.push.lock().await;
                if slot.generation != generation {
                    // The role was reset while this start was in flight;
                    // discard the stale settlement.
                    stream.stop();
                    return Err(Error::Session(
                        "push role was reset during start".to_string(),
                    ));
                }
                self.spawn_capture_ended_watcher(stream.ended(), generation);
                self.spawn_connectivity_watcher(&sender, generation);
                slot.stream = Some(stream);
                slot.state = RoleState::Active;
                info!("push role active");
                Ok(())
            }
            Err(e) => {
                stream.stop();
                if self.push.lock().await.generation != generation {
                    return Err(Error::Session(
                        "push role was reset during start".to_string(),
                    ));
                }
                warn!(error = %e, "push negotiation failed, returning role to idle");
                if let Err(teardown) = self.retire_push(generation).await {
                    warn!(error = %teardown, "teardown after failed push start also failed");
                }
                Err(e)
            }
        }
    }

    /// Start pulling: hand the received stream to the sink and drive the
    /// answer handshake that completes the session.
    pub async fn start_pull(&self) -> Result<()> {
        loop {
            let needs_stop = {
                let mut slot = self.pull.lock().await;
                match slot.state {
                    RoleState::Idle => {
                        slot.state = RoleState::Starting;
                        false
                    }
                    RoleState::Active => true,
                    other => {
                        return Err(Error::Session(format!(
                            "cannot start pull while {}",
                            other
                        )))
                    }
                }
            };
            if !needs_stop {
                break;
            }
            info!("pull already active, stopping before restart");
            self.stop_pull().await?;
        }

        let (receiver, generation) = {
            let slot = self.pull.lock().await;
            (Arc::clone(&slot.endpoint), slot.generation)
        };

        // Hand over whatever already arrived; tracks that land later
        // follow through the watcher. Media only flows once connectivity
        // is up, so the stream routinely lags the handshake.
        if let Some(stream) = receiver.current_remote_stream() {
            info!(stream_id = %stream.stream_id, "rendering remote stream");
            self.sink.render(Some(stream));
        }
        self.spawn_remote_stream_watcher(&receiver, generation);

        let sender = Arc::clone(&self.push.lock().await.endpoint);
        match negotiation::complete_pull(&sender, &receiver).await {
            Ok(()) => {
                let mut slot = self.pull.lock().await;
                if slot.generation != generation {
                    return Err(Error::Session(
                        "pull role was reset during start".to_string(),
                    ));
                }
                self.spawn_connectivity_watcher(&receiver, generation);
                slot.state = RoleState::Active;
                info!("pull role active");
                Ok(())
            }
            Err(e) => {
                if self.pull.lock().await.generation != generation {
                    return Err(Error::Session(
                        "pull role was reset during start".to_string(),
                    ));
                }
                warn!(error = %e, "pull negotiation failed, returning role to idle");
                if let Err(teardown) = self.retire_pull(generation).await {
                    warn!(error = %teardown, "teardown after failed pull start also failed");
                }
                Err(e)
            }
        }
    }

    /// Stop the push role. A no-op when already idle.
    pub async fn stop_push(&self) -> Result<()> {
        let generation = {
            let slot = self.push.lock().await;
            if slot.state == RoleState::Idle {
                debug!("push role already idle");
                return Ok(());
            }
            slot.generation
        };
        self.retire_push(generation).await
    }

    /// Stop the pull role. A no-op when already idle.
    pub async fn stop_pull(&self) -> Result<()> {
        let generation = {
            let slot = self.pull.lock().await;
            if slot.state == RoleState::Idle {
                debug!("pull role already idle");
                return Ok(());
            }
            slot.generation
        };
        self.retire_pull(generation).await
    }

    async fn negotiate_push(&self, sender: &Arc<Endpoint>, stream: &CaptureStream) -> Result<()> {
        sender.attach_stream(stream).await?;
        let receiver = Arc::clone(&self.pull.lock().await.endpoint);
        negotiation::establish_push(sender, &receiver).await
    }

    /// Return the push role to idle: stop owned tracks once, close the
    /// endpoint, install its replacement.
    async fn retire_push(&self, generation: u64) -> Result<()> {
        let mut slot = self.push.lock().await;
        if slot.generation != generation {
            debug!(generation, current = slot.generation, "stale push teardown ignored");
            return Ok(());
        }
        slot.state = RoleState::Stopping;

        if let Some(stream) = slot.stream.take() {
            let stopped = stream.stop();
            debug!(stopped, stream_id = %stream.stream_id(), "capture tracks stopped");
        }

        if let Err(e) = slot.endpoint.close().await {
            warn!(error = %e, "error closing sender endpoint");
        }

        slot.generation += 1;
        let replacement = Endpoint::new(Role::Sender, slot.generation, &self.config).await;
        slot.state = RoleState::Idle;
        match replacement {
            Ok(endpoint) => {
                slot.endpoint = Arc::new(endpoint);
                info!(generation = slot.generation, "push role idle, endpoint replaced");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Return the pull role to idle: clear the sink, close the endpoint,
    /// install its replacement.
    async fn retire_pull(&self, generation: u64) -> Result<()> {
        let mut slot = self.pull.lock().await;
        if slot.generation != generation {
            debug!(generation, current = slot.generation, "stale pull teardown ignored");
            return Ok(());
        }
        slot.state = RoleState::Stopping;

        self.sink.render(None);

        if let Err(e) = slot.endpoint.close().await {
            warn!(error = %e, "error closing receiver endpoint");
        }

        slot.generation += 1;
        let replacement = Endpoint::new(Role::Receiver, slot.generation, &self.config).await;
        slot.state = RoleState::Idle;
        match replacement {
            Ok(endpoint) => {
                slot.endpoint = Arc::new(endpoint);
                info!(generation = slot.generation, "pull role idle, endpoint replaced");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Watch a role's connectivity; `disconnected`/`failed` tears the role
    /// down without an explicit stop call.
    fn spawn_connectivity_watcher(&self, endpoint: &Arc<Endpoint>, generation: u64) {
        let mut rx = endpoint.connectivity();
        let role = endpoint.role();
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                let state = *rx.borrow_and_update();
                if state.is_lost() {
                    warn!(%role, %state, "connectivity lost, tearing down role");
                    let result = match role {
                        Role::Sender => manager.retire_push(generation).await,
                        Role::Receiver => manager.retire_pull(generation).await,
                    };
                    if let Err(e) = result {
                        warn!(%role, error = %e, "teardown after connectivity loss failed");
                    }
                    break;
                }
                if state == ConnectivityState::Closed {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });
    }

    /// Watch the external capture-ended signal; the platform's own "stop
    /// sharing" ends the push session just like an explicit stop.
    fn spawn_capture_ended_watcher(&self, mut ended: watch::Receiver<bool>, generation: u64) {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                if *ended.borrow_and_update() {
                    info!("capture ended externally, stopping push");
                    if let Err(e) = manager.retire_push(generation).await {
                        warn!(error = %e, "teardown after capture end failed");
                    }
                    break;
                }
                if ended.changed().await.is_err() {
                    break;
                }
            }
        });
    }

    /// Forward remote-stream arrivals to the sink while the pull role's
    /// endpoint is still the one this watcher was spawned for.
    fn spawn_remote_stream_watcher(&self, endpoint: &Arc<Endpoint>, generation: u64) {
        let mut rx = endpoint.remote_streams();
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                if rx.changed().await.is_err() {
                    break;
                }
                let stream = rx.borrow_and_update().clone();
                {
                    let slot = manager.pull.lock().await;
                    if slot.generation != generation {
                        break;
                    }
                }
                if let Some(stream) = stream {
                    info!(stream_id = %stream.stream_id, "remote stream arrived");
                    manager.sink.render(Some(stream));
                }
            }
        });
    }
}
