//! The single push/pull handshake and candidate relay
//!
//! Fixed order, both endpoints in the same process:
//! 1. the sender creates the offer,
//! 2. the sender's local commit and the receiver's remote commit run
//!    concurrently on the same offer object (the in-process handoff that
//!    replaces a signaling round trip),
//! 3. candidate relays are wired before the handoff so discoveries on
//!    either side reach the other,
//! 4. on pull, the receiver creates the answer,
//! 5. the answer's local commit (receiver) and remote commit (sender) run
//!    concurrently the same way.
//!
//! A failed step aborts that attempt only; both roles stay usable after
//! their endpoints are reconstructed.

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

use crate::endpoint::Endpoint;
use crate::Result;

/// Wire the bidirectional trickle relay between the two endpoints.
///
/// Attached before the offer is handed over, so every candidate either
/// side discovers afterwards is forwarded to the other side's intake in
/// discovery order, end-of-candidates marker included. The forwarder holds
/// only a `Weak` reference: once an endpoint is replaced, its relay runs
/// dry instead of feeding the replacement.
pub fn wire_candidate_relay(sender: &Arc<Endpoint>, receiver: &Arc<Endpoint>) {
    relay_direction(sender, receiver);
    relay_direction(receiver, sender);
}

fn relay_direction(from: &Arc<Endpoint>, to: &Arc<Endpoint>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Option<RTCIceCandidateInit>>();

    from.on_local_candidate(move |init| {
        let _ = tx.send(init);
    });

    let from_role = from.role();
    let target: Weak<Endpoint> = Arc::downgrade(to);
    tokio::spawn(async move {
        while let Some(init) = rx.recv().await {
            let Some(target) = target.upgrade() else {
                break;
            };
            if target.is_closed() {
                break;
            }
            let done = init.is_none();
            match target.add_remote_candidate(init).await {
                Ok(()) => debug!(from = %from_role, to = %target.role(), "candidate relayed"),
                // An individual candidate failing does not abort the
                // negotiation; the remaining ones still flow.
                Err(e) => warn!(from = %from_role, to = %target.role(), error = %e, "candidate relay failed"),
            }
            if done {
                break;
            }
        }
        debug!(from = %from_role, "candidate relay finished");
    });
}

/// Steps 1–3: create the offer on the sender and commit it on both sides.
///
/// The receiver's remote commit deliberately does not wait for the
/// sender's local commit to settle; there is no network latency to hide,
/// and both commits tolerate being in flight together.
pub async fn establish_push(sender: &Arc<Endpoint>, receiver: &Arc<Endpoint>) -> Result<()> {
    wire_candidate_relay(sender, receiver);

    let offer = sender.create_offer().await?;
    info!(role = %sender.role(), "offer created");

    let (local, remote) = tokio::join!(
        sender.set_local_description(offer.clone()),
        receiver.set_remote_description(offer),
    );
    merge_commits(local, remote)?;

    info!("offer committed on both endpoints");
    Ok(())
}

/// Steps 4–5: create the answer on the receiver and commit it on both
/// sides, completing the handshake.
pub async fn complete_pull(sender: &Arc<Endpoint>, receiver: &Arc<Endpoint>) -> Result<()> {
    let answer = receiver.create_answer().await?;
    info!(role = %receiver.role(), "answer created");

    let (local, remote) = tokio::join!(
        receiver.set_local_description(answer.clone()),
        sender.set_remote_description(answer),
    );
    merge_commits(local, remote)?;

    info!("answer committed on both endpoints, handshake complete");
    Ok(())
}

fn merge_commits(local: Result<()>, remote: Result<()>) -> Result<()> {
    match (local, remote) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Err(local), Err(remote)) => {
            warn!(error = %remote, "remote commit failed alongside local commit");
            Err(local)
        }
    }
}
