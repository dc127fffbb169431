use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use common::{OrderSink, OutboundSignal, Pop, QueueReceiver, Result, StopFlag};

/// Sink that only logs. Stands in for a broker integration.
pub struct LogSink;

#[async_trait]
impl OrderSink for LogSink {
    async fn submit(&self, out: &OutboundSignal) -> Result<()> {
        let s = &out.signal;
        info!(
            id = %out.id,
            symbol = %out.symbol,
            strategy = %out.strategy,
            action = %s.action,
            confidence = s.confidence,
            ts = %out.snapshot_ts,
            reason = %s.reason,
            entry_price = ?s.entry_price(),
            "Order signal"
        );
        Ok(())
    }
}

/// Receives strategy output and hands every non-hold signal to the sink.
///
/// This is the only place that calls [`OrderSink::submit`].
pub struct SignalDispatcher {
    sink: Arc<dyn OrderSink>,
    submitted: u64,
}

impl SignalDispatcher {
    pub fn new(sink: Arc<dyn OrderSink>) -> Self {
        Self { sink, submitted: 0 }
    }

    /// Returns whether the signal reached the sink.
    pub async fn dispatch(&mut self, out: &OutboundSignal) -> bool {
        if out.signal.is_hold() {
            return false;
        }
        match self.sink.submit(out).await {
            Ok(()) => {
                self.submitted += 1;
                true
            }
            Err(e) => {
                error!(
                    id = %out.id,
                    symbol = %out.symbol,
                    action = %out.signal.action,
                    ts = %out.snapshot_ts,
                    error = %e,
                    "Signal submission failed"
                );
                false
            }
        }
    }

    /// Run the dispatch loop. Call from `tokio::spawn`.
    pub async fn run(mut self, mut input: QueueReceiver<OutboundSignal>, stop: StopFlag, poll: Duration) {
        info!("SignalDispatcher running");
        loop {
            if stop.is_stopped() {
                info!(submitted = self.submitted, "SignalDispatcher stopping");
                return;
            }
            match input.pop(poll).await {
                Pop::Item(out) => {
                    self.dispatch(&out).await;
                }
                Pop::Idle => {}
                Pop::Closed => {
                    warn!(queue = input.name(), submitted = self.submitted, "Signal queue closed");
                    return;
                }
            }
        }
    }
}
