//! Scan engine behaviour against in-memory collaborators (no network access).

use async_trait::async_trait;
use lanscan_core::ScanError;
use lanscan_core::scanner::classify::{LABEL_GATEWAY, LABEL_HOST, LABEL_SELF};
use lanscan_core::scanner::{
    ExposureProbe, ExposureSummary, HostStatus, LinkLayerResolver, OsFamily, OsFingerprinter,
    ProbeReport, ReachabilityProbe, ScanEngine, ScanEvent, ScanOptions, ScanProgress, ScanReport,
    ScanSession, ScanState, UNKNOWN, VendorTable,
};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

fn ip(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 1, last)
}

#[derive(Default)]
struct FakeProbe {
    active: HashMap<Ipv4Addr, ProbeReport>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    /// Probes block on this until it is closed
    gate: Option<Arc<Semaphore>>,
    started: Arc<Notify>,
    delay: Duration,
}

impl FakeProbe {
    fn answering(hosts: &[u8]) -> Self {
        Self {
            active: hosts
                .iter()
                .map(|&h| (ip(h), ProbeReport::active(Some(1.5), Some(64))))
                .collect(),
            ..Default::default()
        }
    }

    fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReachabilityProbe for FakeProbe {
    async fn probe(&self, ip: Ipv4Addr, _timeout: Duration, _attempts: u32) -> ProbeReport {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.started.notify_one();

        if let Some(gate) = &self.gate {
            let _ = gate.acquire().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.active.get(&ip).copied().unwrap_or_else(ProbeReport::inactive)
    }
}

#[derive(Default)]
struct FakeResolver {
    macs: HashMap<Ipv4Addr, String>,
}

impl FakeResolver {
    fn with(pairs: &[(u8, &str)]) -> Self {
        Self {
            macs: pairs.iter().map(|(h, mac)| (ip(*h), mac.to_string())).collect(),
        }
    }
}

#[async_trait]
impl LinkLayerResolver for FakeResolver {
    async fn resolve(&self, ip: Ipv4Addr) -> Option<String> {
        self.macs.get(&ip).cloned()
    }
}

struct FakeFingerprinter {
    family: OsFamily,
    calls: AtomicUsize,
}

#[async_trait]
impl OsFingerprinter for FakeFingerprinter {
    async fn fingerprint(&self, _ip: Ipv4Addr, _probe: &ProbeReport) -> Option<OsFamily> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(self.family)
    }
}

struct FakeExposure;

#[async_trait]
impl ExposureProbe for FakeExposure {
    async fn scan(&self, _ip: Ipv4Addr, _ports: &[u16], _timeout: Duration) -> ExposureSummary {
        ExposureSummary::from_open_ports(vec![23, 80])
    }
}

fn vendors() -> VendorTable {
    VendorTable::from_entries([
        ("AA-BB-CC", "TP-LINK TECHNOLOGIES CO.,LTD."),
        ("F0-18-98", "Apple, Inc."),
    ])
}

async fn collect(mut session: ScanSession) -> (Vec<ScanProgress>, Vec<ScanReport>) {
    let mut progress = Vec::new();
    let mut finished = Vec::new();
    while let Some(event) = session.next_event().await {
        match event {
            ScanEvent::Progress(p) => progress.push(p),
            ScanEvent::Finished(report) => finished.push(report),
        }
    }
    (progress, finished)
}

#[tokio::test]
async fn test_scan_slash24_reports_active_hosts() {
    let probe = Arc::new(FakeProbe::answering(&[1, 50]));
    let resolver = Arc::new(FakeResolver::with(&[(1, "AA:BB:CC:00:00:01")]));
    let engine = ScanEngine::new(probe.clone(), resolver, vendors());

    let options = ScanOptions {
        local_mac: Some("3C:22:FB:9A:10:05".to_string()),
        ..Default::default()
    };
    let session = engine
        .start_scan_str("192.168.1.50", "255.255.255.0", options)
        .unwrap();
    let (progress, finished) = collect(session).await;

    assert_eq!(probe.calls(), 254);
    assert_eq!(progress.len(), 254);
    assert_eq!(finished.len(), 1);

    let percents: Vec<u8> = progress.iter().map(|p| p.percent).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(percents.iter().filter(|&&p| p == 100).count(), 1);
    assert_eq!(*percents.last().unwrap(), 100);
    assert!(progress.iter().all(|p| p.total == 254));

    let report = &finished[0];
    assert_eq!(report.state, ScanState::Completed);
    assert_eq!(report.network, "192.168.1.0/24");
    assert_eq!(report.gateway, ip(1));
    assert_eq!(report.hosts_scanned, 254);
    assert_eq!(report.results.len(), 2);

    let gateway = report.results.iter().find(|r| r.ip == ip(1)).unwrap();
    assert_eq!(gateway.status, HostStatus::Active);
    assert_eq!(gateway.mac, "AA:BB:CC:00:00:01");
    assert_eq!(gateway.vendor, "TP-LINK TECHNOLOGIES CO.,LTD.");
    assert_eq!(gateway.device_type, LABEL_GATEWAY);
    assert_eq!(gateway.response_time_ms, Some(1.5));

    let local = report.results.iter().find(|r| r.ip == ip(50)).unwrap();
    assert_eq!(local.mac, "3C:22:FB:9A:10:05");
    assert_eq!(local.device_type, LABEL_SELF);

    assert_eq!(engine.state(), ScanState::Completed);
}

#[tokio::test]
async fn test_invalid_range_probes_nothing() {
    let probe = Arc::new(FakeProbe::answering(&[1]));
    let engine = ScanEngine::new(probe.clone(), Arc::new(FakeResolver::default()), vendors());

    let err = engine
        .start_scan_str("999.0.0.0", "255.255.255.0", ScanOptions::default())
        .err()
        .unwrap();
    assert!(matches!(err, ScanError::InvalidRange(_)));

    let err = engine
        .start_scan_str("192.168.1.50", "255.0.255.0", ScanOptions::default())
        .err()
        .unwrap();
    assert!(matches!(err, ScanError::InvalidRange(_)));

    assert_eq!(probe.calls(), 0);
    assert_eq!(engine.state(), ScanState::Failed);

    // A failed start does not block the next one
    let session = engine
        .start_scan_str("192.168.1.50", "30", ScanOptions::default())
        .unwrap();
    let report = session.wait().await.unwrap();
    assert_eq!(report.state, ScanState::Completed);
}

#[tokio::test]
async fn test_oversized_range_is_refused_before_probing() {
    let probe = Arc::new(FakeProbe::answering(&[1]));
    let engine = ScanEngine::new(probe.clone(), Arc::new(FakeResolver::default()), vendors());

    for mask in ["0", "8", "255.255.0.0"] {
        let err = engine
            .start_scan_str("10.0.0.1", mask, ScanOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, ScanError::InvalidRange(_)), "mask {}", mask);
        assert_eq!(engine.state(), ScanState::Failed);
    }

    let range = lanscan_core::scanner::NetworkRange::parse("10.0.0.1", "16").unwrap();
    assert!(matches!(
        engine.start_scan(range, ScanOptions::default()),
        Err(ScanError::InvalidRange(_))
    ));
    assert_eq!(probe.calls(), 0);

    // A lowered cap applies to small ranges too
    let options = ScanOptions {
        max_hosts: 100,
        ..Default::default()
    };
    assert!(engine.start_scan_str("192.168.1.50", "24", options).is_err());
    assert_eq!(probe.calls(), 0);
}

#[tokio::test]
async fn test_missing_vendor_table_yields_unknown() {
    let probe = Arc::new(FakeProbe::answering(&[20]));
    let resolver = Arc::new(FakeResolver::with(&[(20, "F0:18:98:12:34:56")]));
    let missing = std::path::Path::new("/nonexistent/lanscan/oui.json");
    let engine = ScanEngine::new(probe, resolver, VendorTable::load_or_empty(Some(missing)));

    let session = engine
        .start_scan_str("192.168.1.50", "255.255.255.0", ScanOptions::default())
        .unwrap();
    let report = session.wait().await.unwrap();

    assert_eq!(report.results.len(), 1);
    let host = &report.results[0];
    assert_eq!(host.mac, "F0:18:98:12:34:56");
    assert_eq!(host.vendor, UNKNOWN);
    assert_eq!(host.device_type, LABEL_HOST);
}

#[tokio::test]
async fn test_unresolved_mac_is_unknown() {
    let probe = Arc::new(FakeProbe::answering(&[20]));
    let engine = ScanEngine::new(probe, Arc::new(FakeResolver::default()), vendors());

    let report = engine
        .start_scan_str("192.168.1.50", "24", ScanOptions::default())
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.results[0].mac, UNKNOWN);
    assert_eq!(report.results[0].vendor, UNKNOWN);
}

#[tokio::test]
async fn test_vendor_rule_beats_os_hint() {
    let probe = Arc::new(FakeProbe::answering(&[1, 20, 30, 50]));
    let resolver = Arc::new(FakeResolver::with(&[
        (1, "AA:BB:CC:00:00:01"),
        (20, "F0:18:98:12:34:56"),
        (30, "02:00:00:00:00:30"),
    ]));
    let fingerprinter = Arc::new(FakeFingerprinter {
        family: OsFamily::Windows,
        calls: AtomicUsize::new(0),
    });
    let engine =
        ScanEngine::new(probe, resolver, vendors()).with_fingerprinter(fingerprinter.clone());

    let report = engine
        .start_scan_str("192.168.1.50", "24", ScanOptions::default())
        .unwrap()
        .wait()
        .await
        .unwrap();

    let by_ip: HashMap<Ipv4Addr, _> = report.results.iter().map(|r| (r.ip, r)).collect();
    assert_eq!(by_ip[&ip(1)].device_type, LABEL_GATEWAY);
    assert_eq!(by_ip[&ip(20)].device_type, "Phone (Apple)");
    assert_eq!(by_ip[&ip(20)].os_hint, None);
    assert_eq!(by_ip[&ip(30)].device_type, OsFamily::Windows.device_label());
    assert_eq!(by_ip[&ip(30)].os_hint, Some(OsFamily::Windows));
    assert_eq!(by_ip[&ip(50)].device_type, LABEL_SELF);

    // Only the host with no address role and no vendor rule is fingerprinted
    assert_eq!(fingerprinter.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_exposure_attached_to_active_hosts() {
    let probe = Arc::new(FakeProbe::answering(&[20]));
    let engine = ScanEngine::new(probe, Arc::new(FakeResolver::default()), vendors())
        .with_exposure_probe(Arc::new(FakeExposure));

    let report = engine
        .start_scan_str("192.168.1.50", "24", ScanOptions::default())
        .unwrap()
        .wait()
        .await
        .unwrap();

    let exposure = report.results[0].exposure.as_ref().unwrap();
    assert_eq!(exposure.open_ports, vec![23, 80]);
    assert!(exposure.risks.iter().any(|r| r.port == 23));
}

#[tokio::test]
async fn test_second_start_while_running_is_rejected() {
    let gate = Arc::new(Semaphore::new(0));
    let probe = Arc::new(FakeProbe::answering(&[1]).gated(gate.clone()));
    let engine = ScanEngine::new(probe, Arc::new(FakeResolver::default()), vendors());

    let session = engine
        .start_scan_str("192.168.1.50", "24", ScanOptions::default())
        .unwrap();
    assert_eq!(engine.state(), ScanState::Running);

    let second = engine.start_scan_str("10.0.0.5", "24", ScanOptions::default());
    assert!(matches!(second, Err(ScanError::AlreadyRunning)));

    gate.close();
    let report = session.wait().await.unwrap();
    assert_eq!(report.state, ScanState::Completed);
    assert_eq!(engine.state(), ScanState::Completed);

    // Reusable once the first scan is over
    let again = engine
        .start_scan_str("192.168.1.50", "30", ScanOptions::default())
        .unwrap();
    assert_eq!(again.wait().await.unwrap().state, ScanState::Completed);
}

#[tokio::test]
async fn test_cancel_stops_dispatch() {
    let gate = Arc::new(Semaphore::new(0));
    let probe = Arc::new(FakeProbe::answering(&[1]).gated(gate.clone()));
    let started = probe.started.clone();
    let engine = ScanEngine::new(probe.clone(), Arc::new(FakeResolver::default()), vendors());

    let options = ScanOptions {
        concurrency: 1,
        ..Default::default()
    };
    let session = engine.start_scan_str("192.168.1.50", "24", options).unwrap();

    started.notified().await;
    session.cancel();
    session.cancel();
    assert!(session.is_cancelled());
    gate.close();

    let (progress, finished) = collect(session).await;
    assert_eq!(probe.calls(), 1);
    assert_eq!(progress.len(), 1);
    assert!(progress[0].percent < 100);

    let report = &finished[0];
    assert_eq!(report.state, ScanState::Cancelled);
    assert_eq!(report.hosts_scanned, 1);
    assert_eq!(report.results.len(), 1);
    assert_eq!(engine.state(), ScanState::Cancelled);
}

#[tokio::test]
async fn test_cancel_after_completion_is_noop() {
    let probe = Arc::new(FakeProbe::answering(&[]));
    let engine = ScanEngine::new(probe, Arc::new(FakeResolver::default()), vendors());

    let mut session = engine
        .start_scan_str("192.168.1.50", "30", ScanOptions::default())
        .unwrap();
    let mut report = None;
    while let Some(event) = session.next_event().await {
        if let ScanEvent::Finished(r) = event {
            report = Some(r);
        }
    }
    session.cancel();

    let report = report.unwrap();
    assert_eq!(report.state, ScanState::Completed);
    assert!(report.results.is_empty());
    assert_eq!(engine.state(), ScanState::Completed);
}

#[tokio::test]
async fn test_concurrency_bound_is_respected() {
    let probe = Arc::new(FakeProbe {
        delay: Duration::from_millis(5),
        ..Default::default()
    });
    let engine = ScanEngine::new(probe.clone(), Arc::new(FakeResolver::default()), vendors());

    let options = ScanOptions {
        concurrency: 4,
        ..Default::default()
    };
    let report = engine
        .start_scan_str("192.168.1.50", "26", options)
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.hosts_scanned, 62);
    let max = probe.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 4, "saw {} probes in flight", max);
    assert!(max >= 1);
}

#[tokio::test]
async fn test_shuffle_covers_every_host_once() {
    let probe = Arc::new(FakeProbe::answering(&[]));
    let engine = ScanEngine::new(probe, Arc::new(FakeResolver::default()), vendors());

    let options = ScanOptions {
        shuffle: true,
        ..Default::default()
    };
    let session = engine.start_scan_str("192.168.1.50", "24", options).unwrap();
    let (progress, _) = collect(session).await;

    let seen: HashSet<Ipv4Addr> = progress.iter().map(|p| p.ip).collect();
    assert_eq!(seen.len(), 254);
    assert!(!seen.contains(&Ipv4Addr::new(192, 168, 1, 0)));
    assert!(!seen.contains(&Ipv4Addr::new(192, 168, 1, 255)));
}

#[tokio::test]
async fn test_single_host_network() {
    let probe = Arc::new(FakeProbe::answering(&[50]));
    let engine = ScanEngine::new(probe.clone(), Arc::new(FakeResolver::default()), vendors());

    let session = engine
        .start_scan_str("192.168.1.50", "255.255.255.255", ScanOptions::default())
        .unwrap();
    let (progress, finished) = collect(session).await;

    assert_eq!(probe.calls(), 1);
    assert_eq!(progress.len(), 1);
    assert_eq!(progress[0].percent, 100);
    assert_eq!(finished[0].results[0].device_type, LABEL_SELF);
}
