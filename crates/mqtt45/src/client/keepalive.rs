//! Keep-alive pinger.
//!
//! Wakes every keep-alive interval and sends PINGREQ only when nothing
//! was written since the previous wake; any outbound byte resets the
//! idle clock. A missing PINGRESP within the ping timeout tears the
//! session down with `pingTimeout`. The task holds a weak session
//! reference so a dropped session ends the timer on its next tick.

use crate::client::session::{SessionInner, TeardownSource};
use crate::client::state::CloseReason;
use mqtt45_protocol::Packet;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub(crate) fn spawn_pinger(inner: &Arc<SessionInner>) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        tracing::debug!("keep-alive pinger started");
        loop {
            // Re-read the interval every cycle so runtime keep-alive
            // mutations take effect on the next wake.
            let (interval, ping_timeout) = {
                let Some(inner) = weak.upgrade() else { return };
                let options = inner.options.lock();
                (options.config.keep_alive, options.config.ping_timeout)
            };

            tokio::time::sleep(interval).await;

            let Some(inner) = weak.upgrade() else { return };
            if !inner.status.lock().is_opened() {
                return;
            }

            let idle = inner.last_activity.lock().elapsed() >= interval;
            if !idle {
                continue;
            }

            let completion = inner.pending.register_ping();
            if let Err(e) = inner.send_packet(&Packet::PingReq).await {
                tracing::warn!(error = %e, "failed to send PINGREQ");
                inner.pending.cancel_ping();
                continue;
            }
            tracing::debug!("PINGREQ sent");

            match tokio::time::timeout(ping_timeout, completion).await {
                Ok(Ok(Ok(_))) => {
                    tracing::trace!("PINGRESP received");
                }
                // Resolved with the close error, or slot superseded: the
                // session is going away underneath us either way.
                Ok(Ok(Err(_)) | Err(_)) => return,
                Err(_) => {
                    tracing::warn!("PINGRESP deadline missed");
                    inner
                        .teardown(CloseReason::PingTimeout, TeardownSource::Pinger)
                        .await;
                    return;
                }
            }
        }
    })
}
