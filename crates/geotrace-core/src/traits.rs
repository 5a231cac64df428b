//! Core traits for probing engine implementations.

use crate::{HopEvent, TraceError, TraceRequest};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Channel end an engine delivers hops on.
pub type HopSender = mpsc::Sender<HopEvent>;

/// Producer of hop events for one target.
///
/// Implementations send every discovered hop, in whatever order they learn
/// about it, and return once the trace is over. A failed send means nobody
/// is listening any more; the engine must stop probing and return
/// [`TraceError::Cancelled`].
#[async_trait]
pub trait ProbeEngine: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Runs one trace to completion.
    async fn run_trace(&self, request: TraceRequest, hops: HopSender) -> Result<(), TraceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HopReply, RawHop};
    use std::time::Duration;

    struct TwoHops;

    #[async_trait]
    impl ProbeEngine for TwoHops {
        fn name(&self) -> &'static str {
            "two-hops"
        }

        async fn run_trace(
            &self,
            _request: TraceRequest,
            hops: HopSender,
        ) -> Result<(), TraceError> {
            for ttl in 1..=2 {
                let hop = RawHop::replied(
                    ttl,
                    HopReply {
                        addr: "10.0.0.1".parse().unwrap(),
                        rtt: Duration::from_millis(1),
                        host: String::new(),
                    },
                );
                hops.send(HopEvent { hop, round: 0 })
                    .await
                    .map_err(|_| TraceError::Cancelled)?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_closed_receiver_cancels() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let request = TraceRequest::new("10.0.0.1", Duration::from_secs(1), 2);
        let result = TwoHops.run_trace(request, tx).await;
        assert!(matches!(result, Err(TraceError::Cancelled)));
    }
}
