//! Network reachability monitor.
//!
//! Wraps whatever OS-level feed the embedder has (netlink, SystemConfiguration,
//! a stub in tests) behind a watch channel. The session consumes only the
//! transitions; the monitor is optional, and without one the session never
//! suppresses retries for availability reasons.

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    /// The network can carry traffic.
    Satisfied,
    /// No usable path.
    Unsatisfied,
    /// A path exists but needs a connection to be established first
    /// (VPN, captive portal).
    RequiresConnection,
}

impl Reachability {
    #[must_use]
    pub fn is_available(self) -> bool {
        matches!(self, Reachability::Satisfied)
    }
}

/// Feed side, driven by the OS integration.
#[derive(Clone)]
pub struct ReachabilityFeed {
    tx: watch::Sender<Reachability>,
}

impl ReachabilityFeed {
    /// Publishes a new status. Consumers only observe actual
    /// transitions; repeats are absorbed by the watch channel.
    pub fn set(&self, status: Reachability) {
        self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

/// Consumer side owned by the session.
pub struct ReachabilityMonitor {
    rx: watch::Receiver<Reachability>,
}

impl ReachabilityMonitor {
    /// Builds a monitor pair starting from `initial`.
    #[must_use]
    pub fn channel(initial: Reachability) -> (ReachabilityFeed, ReachabilityMonitor) {
        let (tx, rx) = watch::channel(initial);
        (ReachabilityFeed { tx }, ReachabilityMonitor { rx })
    }

    #[must_use]
    pub fn current(&self) -> Reachability {
        *self.rx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Reachability> {
        self.rx.clone()
    }
}
