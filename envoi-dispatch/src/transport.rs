use async_trait::async_trait;
use envoi_common::{SendOutcome, SendUnit};

/// The client that performs one send against the remote messaging service.
///
/// Called once per attempt. Implementations must not retry, rate-limit or
/// time out on their own: the scheduler owns all three. The unit carries the
/// recipient, the rendered content and the optional attachment.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn send(&self, unit: &SendUnit) -> SendOutcome;
}
