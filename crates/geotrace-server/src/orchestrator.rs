//! Runs one trace: engine output in, enriched frames out.

use crate::stream::HopSink;
use geotrace_core::{transform, ProbeEngine, TraceError, TraceRequest, TraceSummary};
use geotrace_geo::GeoResolver;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Hops the engine may get ahead of enrichment.
const HOP_CHANNEL_CAPACITY: usize = 8;

/// How a trace ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceOutcome {
    /// The engine finished and the completion frame was written.
    Completed(TraceSummary),
    /// The engine failed; the message was written as the error frame.
    Failed(String),
    /// The client went away and the engine was stopped.
    Cancelled,
}

/// Couples a probing engine to the geolocation tiers.
pub struct TraceOrchestrator {
    engine: Arc<dyn ProbeEngine>,
    geo: Arc<GeoResolver>,
}

impl TraceOrchestrator {
    pub fn new(engine: Arc<dyn ProbeEngine>, geo: Arc<GeoResolver>) -> Self {
        Self { engine, geo }
    }

    /// Runs `request` to the end, writing every answered hop to `sink` in
    /// the order the engine reports it.
    pub async fn run<S>(&self, request: TraceRequest, sink: &mut S) -> TraceOutcome
    where
        S: HopSink + ?Sized,
    {
        let span = info_span!(
            "trace",
            trace_id = %Uuid::new_v4(),
            target = %request.target,
            engine = self.engine.name(),
        );
        self.drive(request, sink).instrument(span).await
    }

    async fn drive<S>(&self, request: TraceRequest, sink: &mut S) -> TraceOutcome
    where
        S: HopSink + ?Sized,
    {
        info!(max_ttl = request.max_ttl, timeout = ?request.probe_timeout, "Starting trace");

        let (tx, mut rx) = mpsc::channel(HOP_CHANNEL_CAPACITY);
        let engine = Arc::clone(&self.engine);
        let task =
            tokio::spawn(async move { engine.run_trace(request, tx).await }.in_current_span());

        let mut session = self.geo.session();
        let mut summary = TraceSummary::default();

        loop {
            let event = tokio::select! {
                biased;
                _ = sink.closed() => {
                    task.abort();
                    info!(
                        hops = summary.hops,
                        dropped = summary.dropped,
                        "Client went away, trace cancelled"
                    );
                    return TraceOutcome::Cancelled;
                }
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let ttl = event.hop.ttl;
            let reply = match event.hop.reply {
                Ok(reply) => reply,
                Err(e) => {
                    debug!(ttl = ttl, round = event.round, error = %e, "Dropping unanswered hop");
                    summary.dropped += 1;
                    continue;
                }
            };

            let location = session.resolve(reply.addr).await;
            let record = transform(&reply, &location, summary.hops + 1);
            debug!(
                ttl = ttl,
                number = record.number,
                ip = %record.ip,
                location = %record.location,
                "Emitting hop"
            );

            if let Err(e) = sink.emit(&record).await {
                task.abort();
                info!(error = %e, hops = summary.hops, "Client went away, trace cancelled");
                return TraceOutcome::Cancelled;
            }
            summary.hops += 1;
        }

        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(TraceError::Internal(format!("Engine task failed: {}", e))),
        };

        match result {
            Ok(()) => {
                if let Err(e) = sink.finish(summary).await {
                    info!(error = %e, "Client went away before completion frame");
                    return TraceOutcome::Cancelled;
                }
                info!(
                    hops = summary.hops,
                    dropped = summary.dropped,
                    lookups = session.cached(),
                    "Trace completed"
                );
                TraceOutcome::Completed(summary)
            }
            Err(TraceError::Cancelled) => TraceOutcome::Cancelled,
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, hops = summary.hops, "Trace failed");
                if let Err(e) = sink.emit_error(&message).await {
                    info!(error = %e, "Client went away before error frame");
                    return TraceOutcome::Cancelled;
                }
                TraceOutcome::Failed(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{sse_channel, StreamError};
    use async_trait::async_trait;
    use geotrace_core::{
        Coordinates, HopEvent, HopRecord, HopReply, HopSender, ProbeError, RawHop,
    };
    use geotrace_geo::{CityRecord, GeoError, LocalGeoDb, RemoteGeoApi, RemoteLocation};
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Engine replaying a fixed list of hops, optionally failing afterwards.
    struct ScriptedEngine {
        hops: Vec<RawHop>,
        fail_with: Option<&'static str>,
    }

    #[async_trait]
    impl ProbeEngine for ScriptedEngine {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn run_trace(&self, _request: TraceRequest, hops: HopSender) -> Result<(), TraceError> {
            for hop in &self.hops {
                hops.send(HopEvent {
                    hop: hop.clone(),
                    round: 0,
                })
                .await
                .map_err(|_| TraceError::Cancelled)?;
            }
            match self.fail_with {
                Some(reason) => Err(TraceError::Internal(reason.to_string())),
                None => Ok(()),
            }
        }
    }

    /// Knows 10.0.0.2 completely and nothing else; counts lookups.
    #[derive(Default)]
    struct CountingLocal {
        lookups: AtomicUsize,
    }

    impl LocalGeoDb for CountingLocal {
        fn lookup_city(&self, ip: IpAddr) -> Option<CityRecord> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            (ip == addr(2)).then(|| CityRecord {
                country: "United States".to_string(),
                city: "Dallas".to_string(),
                coordinates: Some(Coordinates {
                    latitude: 32.7831,
                    longitude: -96.8067,
                }),
            })
        }
    }

    #[derive(Default)]
    struct CountingRemote {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteGeoApi for CountingRemote {
        async fn lookup(&self, _ip: IpAddr) -> Result<RemoteLocation, GeoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RemoteLocation {
                city: "Paris".to_string(),
                country: "FR".to_string(),
                loc: "48.8534,2.3488".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        frames: Vec<String>,
        records: Vec<HopRecord>,
        fail_emit: bool,
    }

    #[async_trait]
    impl HopSink for RecordingSink {
        async fn emit(&mut self, record: &HopRecord) -> Result<(), StreamError> {
            if self.fail_emit {
                return Err(StreamError::Disconnected);
            }
            self.frames.push("hop".to_string());
            self.records.push(record.clone());
            Ok(())
        }

        async fn emit_error(&mut self, message: &str) -> Result<(), StreamError> {
            self.frames.push(format!("error: {}", message));
            Ok(())
        }

        async fn finish(&mut self, summary: TraceSummary) -> Result<(), StreamError> {
            self.frames.push(format!("done: {}/{}", summary.hops, summary.dropped));
            Ok(())
        }
    }

    fn addr(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    fn replied(ttl: u8, last: u8) -> RawHop {
        RawHop::replied(
            ttl,
            HopReply {
                addr: addr(last),
                rtt: Duration::from_micros(12_346),
                host: format!("hop{}.example.net.", last),
            },
        )
    }

    fn timed_out(ttl: u8) -> RawHop {
        RawHop::failed(ttl, ProbeError::Timeout(Duration::from_secs(5)))
    }

    struct Harness {
        orchestrator: TraceOrchestrator,
        local: Arc<CountingLocal>,
        remote: Arc<CountingRemote>,
    }

    fn harness(hops: Vec<RawHop>, fail_with: Option<&'static str>) -> Harness {
        let local = Arc::new(CountingLocal::default());
        let remote = Arc::new(CountingRemote::default());
        let geo = GeoResolver::new(local.clone(), remote.clone());
        let engine = ScriptedEngine { hops, fail_with };
        Harness {
            orchestrator: TraceOrchestrator::new(Arc::new(engine), Arc::new(geo)),
            local,
            remote,
        }
    }

    fn request() -> TraceRequest {
        TraceRequest::new("10.0.0.3", Duration::from_secs(5), 30)
    }

    #[tokio::test]
    async fn test_errored_hop_is_skipped_and_ordinals_stay_dense() {
        let h = harness(vec![timed_out(1), replied(2, 2), replied(3, 3)], None);
        let mut sink = RecordingSink::default();

        let outcome = h.orchestrator.run(request(), &mut sink).await;

        assert_eq!(
            outcome,
            TraceOutcome::Completed(TraceSummary {
                hops: 2,
                dropped: 1
            })
        );
        assert_eq!(sink.frames, vec!["hop", "hop", "done: 2/1"]);

        let first = &sink.records[0];
        assert_eq!(first.number, 1);
        assert_eq!(first.ip, "10.0.0.2");
        assert_eq!(first.host, "hop2.example.net");
        assert_eq!(first.rtt, "12.346");
        assert_eq!(first.location, "United States/Dallas");
        assert_eq!(first.coordinates, "32.7831, -96.8067");

        let second = &sink.records[1];
        assert_eq!(second.number, 2);
        assert_eq!(second.location, "FR/Paris");
        assert_eq!(second.coordinates, "48.8534, 2.3488");

        // Only the hop without complete local data went remote.
        assert_eq!(h.remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_engine_failure_after_two_hops() {
        let h = harness(vec![replied(1, 2), replied(2, 3)], Some("socket closed"));
        let mut sink = RecordingSink::default();

        let outcome = h.orchestrator.run(request(), &mut sink).await;

        assert_eq!(
            outcome,
            TraceOutcome::Failed("Internal error: socket closed".to_string())
        );
        assert_eq!(
            sink.frames,
            vec!["hop", "hop", "error: Internal error: socket closed"]
        );
    }

    #[tokio::test]
    async fn test_sink_failure_cancels_trace() {
        let h = harness(vec![replied(1, 2), replied(2, 3), replied(3, 4)], None);
        let mut sink = RecordingSink {
            fail_emit: true,
            ..Default::default()
        };

        let outcome = h.orchestrator.run(request(), &mut sink).await;

        assert_eq!(outcome, TraceOutcome::Cancelled);
        assert!(sink.frames.is_empty());
        assert_eq!(h.local.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(h.remote.calls.load(Ordering::SeqCst), 0);
    }

    /// Sends timed-out hops slowly and counts how many went out.
    struct SlowTimeouts {
        sent: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ProbeEngine for SlowTimeouts {
        fn name(&self) -> &'static str {
            "slow-timeouts"
        }

        async fn run_trace(&self, _request: TraceRequest, hops: HopSender) -> Result<(), TraceError> {
            for ttl in 1..=20 {
                tokio::time::sleep(Duration::from_millis(50)).await;
                self.sent.fetch_add(1, Ordering::SeqCst);
                hops.send(HopEvent {
                    hop: timed_out(ttl),
                    round: 0,
                })
                .await
                .map_err(|_| TraceError::Cancelled)?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_disconnect_stops_engine_during_timeouts() {
        let sent = Arc::new(AtomicUsize::new(0));
        let geo = GeoResolver::new(
            Arc::new(CountingLocal::default()),
            Arc::new(CountingRemote::default()),
        );
        let orchestrator = TraceOrchestrator::new(
            Arc::new(SlowTimeouts { sent: sent.clone() }),
            Arc::new(geo),
        );

        let (mut sink, response) = sse_channel();
        drop(response);

        let started = std::time::Instant::now();
        let outcome = orchestrator.run(request(), &mut sink).await;
        assert_eq!(outcome, TraceOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_millis(500));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(sent.load(Ordering::SeqCst) <= 1);
    }

    #[tokio::test]
    async fn test_delivery_order_is_preserved() {
        let h = harness(vec![replied(3, 7), replied(1, 5), replied(2, 6)], None);
        let mut sink = RecordingSink::default();

        h.orchestrator.run(request(), &mut sink).await;

        let ips: Vec<_> = sink.records.iter().map(|r| r.ip.as_str()).collect();
        let numbers: Vec<_> = sink.records.iter().map(|r| r.number).collect();
        assert_eq!(ips, vec!["10.0.0.7", "10.0.0.5", "10.0.0.6"]);
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_repeated_address_is_looked_up_once() {
        let h = harness(vec![replied(1, 9), replied(2, 9)], None);
        let mut sink = RecordingSink::default();

        h.orchestrator.run(request(), &mut sink).await;

        assert_eq!(sink.records.len(), 2);
        assert_eq!(h.remote.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.records[1].location, sink.records[0].location);
    }

    #[tokio::test]
    async fn test_empty_trace_completes() {
        let h = harness(vec![timed_out(1), timed_out(2)], None);
        let mut sink = RecordingSink::default();

        let outcome = h.orchestrator.run(request(), &mut sink).await;

        assert_eq!(
            outcome,
            TraceOutcome::Completed(TraceSummary {
                hops: 0,
                dropped: 2
            })
        );
        assert_eq!(sink.frames, vec!["done: 0/2"]);
        assert_eq!(h.local.lookups.load(Ordering::SeqCst), 0);
    }
}
