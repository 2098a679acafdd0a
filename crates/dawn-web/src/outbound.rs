//! Outbound dispatcher and periodic session sweep.
//!
//! The dispatcher is the single consumer of the response queue. Each
//! iteration moves exactly one envelope toward its connection: resolve the
//! target session, drop the envelope if the session is disconnected or has
//! no connection link, otherwise hand it to the connection's egress channel
//! (which writes exactly one frame per envelope). The hand-off never
//! blocks: a connection that has fallen behind its bounded egress depth
//! sheds this envelope instead of stalling delivery to every other
//! session. Per-session ordering is enqueue order end to end.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::bootstrap::ServerContext;

/// Run the dispatch loop forever. Spawned once at startup.
pub async fn dispatch_loop(ctx: Arc<ServerContext>) {
    info!("outbound dispatcher started");
    loop {
        let entry = ctx.queue.recv().await;

        // Suppression at dequeue time: a disconnected session's envelopes
        // are freed, not delivered.
        if entry.session.is_disconnected() {
            debug!(
                session_id = entry.session.id(),
                tag = entry.envelope.tag(),
                "dropping envelope for disconnected session"
            );
            continue;
        }
        let Some(tx) = entry.session.outbound() else {
            debug!(
                session_id = entry.session.id(),
                tag = entry.envelope.tag(),
                "dropping envelope, no connection bound"
            );
            continue;
        };

        match tx.try_send(entry.envelope) {
            Ok(()) => {}
            // Overflow: drop this envelope so one stalled client cannot
            // head-of-line-block the rest.
            Err(TrySendError::Full(envelope)) => {
                warn!(
                    session_id = entry.session.id(),
                    tag = envelope.tag(),
                    "egress channel full, dropping envelope for slow client"
                );
            }
            // The connection died between lookup and send.
            Err(TrySendError::Closed(_)) => {
                entry.session.detach_outbound();
            }
        }
    }
}

/// Periodic expiry sweep for idle disconnected sessions.
pub async fn sweep_loop(ctx: Arc<ServerContext>) {
    let timeout = ctx.config.session_idle_timeout_secs;
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    loop {
        ticker.tick().await;
        for id in ctx.sessions.sweep_idle(timeout) {
            ctx.reconnect_tokens.forget_session(id);
        }
    }
}
