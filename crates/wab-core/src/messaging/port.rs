use async_trait::async_trait;

use crate::{domain::Jid, Result};

/// Outbound transport seam.
///
/// The wire protocol (session state, encryption, reconnects) lives behind
/// this port in an adapter crate; the core only ever sends text and never
/// assumes delivery confirmation beyond a successful call.
#[async_trait]
pub trait TransportPort: Send + Sync {
    async fn send_text(&self, to: &Jid, text: &str) -> Result<()>;
}
