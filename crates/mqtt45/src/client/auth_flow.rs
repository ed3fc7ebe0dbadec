//! Enhanced-authentication callback.
//!
//! The session calls the flow with every AUTH the broker sends while a
//! handshake is in progress; the flow returns the AUTH to send back.
//! Modelled as a function object rather than a trait hierarchy so a
//! closure over the handshake state is enough.

use crate::error::Result;
use mqtt45_protocol::packet::AuthPacket;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type AuthFlowFuture = Pin<Box<dyn Future<Output = Result<AuthPacket>> + Send>>;

/// `AUTH in -> AUTH out`, invoked once per broker challenge.
pub type AuthFlow = Arc<dyn Fn(AuthPacket) -> AuthFlowFuture + Send + Sync>;

/// Wraps an async closure into an [`AuthFlow`].
pub fn auth_flow<F, Fut>(f: F) -> AuthFlow
where
    F: Fn(AuthPacket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AuthPacket>> + Send + 'static,
{
    Arc::new(move |packet| Box::pin(f(packet)))
}
