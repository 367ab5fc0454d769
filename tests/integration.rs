//! Integration tests for the round→merge→snapshot pipeline
//!
//! These tests drive the orchestrator through deterministic fake transports,
//! without requiring network access or raw socket privileges.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use hopstat::config::Config;
use hopstat::export::TraceReport;
use hopstat::probe::{ProbeOutcome, ProbeTransport};
use hopstat::trace::Tracer;

const DEST: &str = "198.51.100.7";

/// Succeeds for every TTL with a fixed per-TTL latency; answers as the
/// destination itself from `dest_ttl` on.
struct FakeTransport {
    dest_ttl: u8,
}

impl FakeTransport {
    fn outcome(&self, ttl: u8, ident: u16, seq: u16) -> ProbeOutcome {
        let (addr, at) = if ttl >= self.dest_ttl {
            (DEST.to_string(), self.dest_ttl)
        } else {
            (format!("203.0.113.{}", ttl), ttl)
        };
        ProbeOutcome {
            success: true,
            elapsed: Duration::from_millis(u64::from(at) * 10),
            addr,
            ident,
            seq,
        }
    }
}

impl ProbeTransport for FakeTransport {
    fn probe_v4(
        &self,
        _source: IpAddr,
        _dest: IpAddr,
        ttl: u8,
        ident: u16,
        _timeout: Duration,
        seq: u16,
    ) -> Result<ProbeOutcome> {
        Ok(self.outcome(ttl, ident, seq))
    }

    fn probe_v6(
        &self,
        _source: IpAddr,
        _dest: IpAddr,
        ttl: u8,
        ident: u16,
        _timeout: Duration,
        seq: u16,
    ) -> Result<ProbeOutcome> {
        Ok(self.outcome(ttl, ident, seq))
    }
}

/// Never gets an answer.
struct SilentTransport;

impl ProbeTransport for SilentTransport {
    fn probe_v4(
        &self,
        _source: IpAddr,
        _dest: IpAddr,
        _ttl: u8,
        ident: u16,
        _timeout: Duration,
        seq: u16,
    ) -> Result<ProbeOutcome> {
        Ok(ProbeOutcome::failure(ident, seq))
    }

    fn probe_v6(
        &self,
        _source: IpAddr,
        _dest: IpAddr,
        _ttl: u8,
        ident: u16,
        _timeout: Duration,
        seq: u16,
    ) -> Result<ProbeOutcome> {
        Ok(ProbeOutcome::failure(ident, seq))
    }
}

/// The first probe issued across all rounds panics; everything else behaves
/// like [`FakeTransport`].
struct PanicOnceTransport {
    inner: FakeTransport,
    panicked: AtomicBool,
}

impl ProbeTransport for PanicOnceTransport {
    fn probe_v4(
        &self,
        source: IpAddr,
        dest: IpAddr,
        ttl: u8,
        ident: u16,
        timeout: Duration,
        seq: u16,
    ) -> Result<ProbeOutcome> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("transport blew up");
        }
        self.inner.probe_v4(source, dest, ttl, ident, timeout, seq)
    }

    fn probe_v6(
        &self,
        source: IpAddr,
        dest: IpAddr,
        ttl: u8,
        ident: u16,
        timeout: Duration,
        seq: u16,
    ) -> Result<ProbeOutcome> {
        self.inner.probe_v6(source, dest, ttl, ident, timeout, seq)
    }
}

fn test_config(count: usize, max_hops: u8, ring_size: usize) -> Config {
    Config {
        destination: DEST.to_string(),
        count,
        timeout: Duration::from_millis(10),
        hop_sleep: Duration::ZERO,
        max_hops,
        ring_size,
        ..Config::default()
    }
}

#[tokio::test]
async fn test_round_stops_at_destination() {
    let tracer = Tracer::with_transport(
        test_config(1, 10, 5),
        Arc::new(FakeTransport { dest_ttl: 4 }),
    )
    .unwrap();
    tracer.run().await.unwrap();

    let reports = tracer.reports();
    assert_eq!(reports.len(), 4);
    for (i, hop) in reports.iter().enumerate() {
        assert_eq!(hop.ttl, i as u8 + 1);
        assert_eq!(hop.sent, 1);
    }
    assert_eq!(reports[3].target, DEST);
}

#[tokio::test]
async fn test_concurrent_rounds_merge_without_loss() {
    let rounds = 8;
    let tracer = Tracer::with_transport(
        test_config(rounds, 30, 16),
        Arc::new(FakeTransport { dest_ttl: 6 }),
    )
    .unwrap();
    tracer.run().await.unwrap();

    let reports = tracer.reports();
    assert_eq!(reports.len(), 6);
    for hop in &reports {
        assert_eq!(hop.sent, rounds as u64, "ttl {}", hop.ttl);
        assert_eq!(hop.loss_percent, 0.0);

        // fixed fake latency: every sample agrees with the mean
        let expected_ms = f64::from(hop.ttl.min(6)) * 10.0;
        assert!((hop.avg_ms - expected_ms).abs() < 1e-9);
        assert!(hop.stdev_ms.abs() < 1e-9);
        assert_eq!(hop.best_ms, hop.worst_ms);

        let filled = hop
            .packet_list_ms
            .iter()
            .filter(|slot| slot.is_some())
            .count();
        assert_eq!(filled, rounds.min(hop.packet_buffer_size));
    }
}

#[tokio::test]
async fn test_silent_path_probes_up_to_max_hops() {
    let tracer =
        Tracer::with_transport(test_config(2, 5, 4), Arc::new(SilentTransport)).unwrap();
    tracer.run().await.unwrap();

    // TTLs 1..max_hops-1, never max_hops itself
    let reports = tracer.reports();
    assert_eq!(reports.len(), 4);
    for hop in &reports {
        assert_eq!(hop.sent, 2);
        assert_eq!(hop.loss_percent, 100.0);
        assert_eq!(hop.avg_ms, 0.0);
        assert_eq!(hop.target, "");
        for slot in hop.packet_list_ms.iter().flatten() {
            assert!(!slot.success);
        }
    }
}

#[tokio::test]
async fn test_panicking_round_does_not_poison_siblings() {
    let rounds = 4;
    let transport = Arc::new(PanicOnceTransport {
        inner: FakeTransport { dest_ttl: 3 },
        panicked: AtomicBool::new(false),
    });
    let tracer = Tracer::with_transport(test_config(rounds, 10, 8), transport).unwrap();

    let err = tracer.run().await.unwrap_err();
    assert!(err.to_string().contains("panicked"), "got: {}", err);

    // the panicking round died before its first merge; the other three
    // completed their sweeps untouched
    let reports = tracer.reports();
    assert_eq!(reports.len(), 3);
    for hop in &reports {
        assert_eq!(hop.sent, rounds as u64 - 1);
    }
}

#[tokio::test]
async fn test_trace_report_document_shape() {
    let tracer = Tracer::with_transport(
        test_config(2, 10, 7),
        Arc::new(FakeTransport { dest_ttl: 3 }),
    )
    .unwrap();
    tracer.run().await.unwrap();

    let value = serde_json::to_value(TraceReport::new(&tracer)).unwrap();
    assert_eq!(value["destination"], DEST);
    assert_eq!(value["source"], "0.0.0.0");

    let hops = value["hops"].as_array().unwrap();
    assert_eq!(hops.len(), 3);
    for (i, hop) in hops.iter().enumerate() {
        assert_eq!(hop["ttl"], i as u64 + 1);
        assert_eq!(hop["packet_buffer_size"], 7);
        assert_eq!(hop["packet_list_ms"].as_array().unwrap().len(), 7);
        for key in [
            "sent",
            "target",
            "last_ms",
            "best_ms",
            "worst_ms",
            "loss_percent",
            "avg_ms",
            "stdev_ms",
        ] {
            assert!(hop.get(key).is_some(), "missing key {}", key);
        }
    }
}

#[tokio::test]
async fn test_rerun_accumulates_history() {
    let tracer = Tracer::with_transport(
        test_config(2, 10, 4),
        Arc::new(FakeTransport { dest_ttl: 2 }),
    )
    .unwrap();

    tracer.run().await.unwrap();
    tracer.run().await.unwrap();

    for hop in tracer.reports() {
        assert_eq!(hop.sent, 4);
    }
}
