use async_trait::async_trait;

use crate::{OutboundSignal, Result};

/// Abstraction over whatever consumes strategy signals downstream.
///
/// `LogSink` in `crates/engine` implements this by logging. Broker
/// integrations live outside this workspace and plug in here.
#[async_trait]
pub trait OrderSink: Send + Sync {
    /// Hand one signal to the sink. Holds are filtered out before this call.
    async fn submit(&self, signal: &OutboundSignal) -> Result<()>;
}
