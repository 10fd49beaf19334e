//! Scan orchestration
//!
//! One `ScanEngine` runs at most one session at a time. A session dispatches
//! one probe-and-classify task per candidate address under a semaphore
//! bound, aggregates finished hosts through a channel, and streams progress
//! events followed by a single `Finished` event.
//!
//! Cancellation is cooperative: the session's token is checked before every
//! dispatch, in-flight hosts run to completion, and nothing new is started
//! once the token fires. Each session gets a fresh token, so the engine is
//! reusable after a cancelled scan.

use super::arp::{LinkLayerResolver, NeighborTableResolver};
use super::classify::{DeviceClassifier, HostSignals};
use super::exposure::{DEFAULT_EXPOSURE_PORTS, ExposureProbe};
use super::fingerprint::OsFingerprinter;
use super::oui::VendorTable;
use super::ping::{ReachabilityProbe, SystemPing};
use super::range::NetworkRange;
use super::{HostStatus, ScanEvent, ScanProgress, ScanReport, ScanResult, ScanState, UNKNOWN};
use crate::error::ScanError;
use chrono::Utc;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

/// Default number of hosts probed concurrently
pub const DEFAULT_CONCURRENCY: usize = 50;

/// Default wait for an echo reply
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default number of echo attempts per host
pub const DEFAULT_PING_ATTEMPTS: u32 = 1;

/// Largest range a scan accepts unless raised explicitly
pub const DEFAULT_MAX_HOSTS: u64 = 4096;

/// Default per-port connect timeout for exposure checks
pub const DEFAULT_EXPOSURE_TIMEOUT: Duration = Duration::from_millis(300);

/// Per-scan tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOptions {
    pub concurrency: usize,
    pub ping_timeout: Duration,
    pub ping_attempts: u32,
    /// Probe candidates in random order instead of ascending
    pub shuffle: bool,
    /// Ranges with more usable hosts are refused before enumeration
    pub max_hosts: u64,
    pub exposure_ports: Vec<u16>,
    pub exposure_timeout: Duration,
    /// MAC of the scanning host, reported for its own entry
    pub local_mac: Option<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            ping_attempts: DEFAULT_PING_ATTEMPTS,
            shuffle: false,
            max_hosts: DEFAULT_MAX_HOSTS,
            exposure_ports: DEFAULT_EXPOSURE_PORTS.to_vec(),
            exposure_timeout: DEFAULT_EXPOSURE_TIMEOUT,
            local_mac: None,
        }
    }
}

pub struct ScanEngine {
    probe: Arc<dyn ReachabilityProbe>,
    resolver: Arc<dyn LinkLayerResolver>,
    vendors: Arc<VendorTable>,
    classifier: Arc<DeviceClassifier>,
    fingerprinter: Option<Arc<dyn OsFingerprinter>>,
    exposure: Option<Arc<dyn ExposureProbe>>,
    state: Arc<Mutex<ScanState>>,
}

impl ScanEngine {
    pub fn new(
        probe: Arc<dyn ReachabilityProbe>,
        resolver: Arc<dyn LinkLayerResolver>,
        vendors: VendorTable,
    ) -> Self {
        Self {
            probe,
            resolver,
            vendors: Arc::new(vendors),
            classifier: Arc::new(DeviceClassifier::default()),
            fingerprinter: None,
            exposure: None,
            state: Arc::new(Mutex::new(ScanState::Idle)),
        }
    }

    /// Engine backed by the system `ping` and neighbor table.
    pub fn system(vendors: VendorTable, refresh_timeout: Duration) -> Self {
        let probe: Arc<dyn ReachabilityProbe> = Arc::new(SystemPing);
        let resolver = Arc::new(NeighborTableResolver::new(probe.clone(), refresh_timeout));
        Self::new(probe, resolver, vendors)
    }

    pub fn with_classifier(mut self, classifier: DeviceClassifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn with_fingerprinter(mut self, fingerprinter: Arc<dyn OsFingerprinter>) -> Self {
        self.fingerprinter = Some(fingerprinter);
        self
    }

    pub fn with_exposure_probe(mut self, exposure: Arc<dyn ExposureProbe>) -> Self {
        self.exposure = Some(exposure);
        self
    }

    pub fn vendors(&self) -> &VendorTable {
        &self.vendors
    }

    pub fn state(&self) -> ScanState {
        *lock_state(&self.state)
    }

    /// Parse `address`/`mask` and start a scan. A malformed pair, or a range
    /// larger than `options.max_hosts`, fails with `InvalidRange` before
    /// anything is probed.
    pub fn start_scan_str(
        &self,
        address: &str,
        mask: &str,
        options: ScanOptions,
    ) -> Result<ScanSession, ScanError> {
        let mut state = lock_state(&self.state);
        if *state == ScanState::Running {
            return Err(ScanError::AlreadyRunning);
        }

        let checked = NetworkRange::parse(address, mask)
            .and_then(|range| check_host_limit(&range, &options).map(|_| range));
        match checked {
            Ok(range) => Ok(self.launch(&mut state, range, options)),
            Err(e) => {
                tracing::warn!("Refusing to scan {}/{}: {}", address, mask, e);
                *state = ScanState::Failed;
                Err(e)
            }
        }
    }

    /// Start scanning `range`. Must be called from within a Tokio runtime.
    pub fn start_scan(
        &self,
        range: NetworkRange,
        options: ScanOptions,
    ) -> Result<ScanSession, ScanError> {
        let mut state = lock_state(&self.state);
        if *state == ScanState::Running {
            return Err(ScanError::AlreadyRunning);
        }

        if let Err(e) = check_host_limit(&range, &options) {
            tracing::warn!("Refusing to scan {}: {}", range, e);
            *state = ScanState::Failed;
            return Err(e);
        }
        Ok(self.launch(&mut state, range, options))
    }

    fn launch(
        &self,
        state: &mut ScanState,
        range: NetworkRange,
        options: ScanOptions,
    ) -> ScanSession {
        *state = ScanState::Running;

        let token = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let candidates = range.candidates(options.shuffle);

        let pipeline = Arc::new(HostPipeline {
            probe: self.probe.clone(),
            resolver: self.resolver.clone(),
            vendors: self.vendors.clone(),
            classifier: self.classifier.clone(),
            fingerprinter: self.fingerprinter.clone(),
            exposure: self.exposure.clone(),
            local_address: range.local_address(),
            gateway: range.first_host(),
            options,
        });

        let guard = StateGuard {
            state: self.state.clone(),
            settled: false,
        };

        tokio::spawn(run_session(
            pipeline,
            range,
            candidates,
            token.clone(),
            events_tx,
            guard,
        ));

        ScanSession {
            token,
            events: events_rx,
        }
    }
}

/// Refuse ranges above the host cap while they are still just a prefix.
fn check_host_limit(range: &NetworkRange, options: &ScanOptions) -> Result<(), ScanError> {
    let hosts = range.host_count();
    if hosts > options.max_hosts {
        return Err(ScanError::InvalidRange(format!(
            "{} has {} hosts, more than the limit of {}",
            range, hosts, options.max_hosts
        )));
    }
    Ok(())
}

fn lock_state(state: &Mutex<ScanState>) -> std::sync::MutexGuard<'_, ScanState> {
    // The state is a plain enum; a poisoned lock still holds a valid value.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Moves the engine out of `Running` however the session ends.
struct StateGuard {
    state: Arc<Mutex<ScanState>>,
    settled: bool,
}

impl StateGuard {
    fn settle(&mut self, final_state: ScanState) {
        *lock_state(&self.state) = final_state;
        self.settled = true;
    }
}

impl Drop for StateGuard {
    fn drop(&mut self) {
        if !self.settled {
            *lock_state(&self.state) = ScanState::Failed;
        }
    }
}

/// Handle to a running scan: its event stream and its cancellation token.
pub struct ScanSession {
    token: CancellationToken,
    events: mpsc::UnboundedReceiver<ScanEvent>,
}

impl ScanSession {
    /// Request a cooperative stop. Idempotent, and harmless after the scan
    /// has finished.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Scan cancellation requested");
        }
        self.token.cancel();
    }

    /// Token that cancels this session, for use from another task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Next event, or `None` once the stream is exhausted.
    pub async fn next_event(&mut self) -> Option<ScanEvent> {
        self.events.recv().await
    }

    /// Drain the stream and return the final report.
    pub async fn wait(self) -> Option<ScanReport> {
        self.wait_with(|_| {}).await
    }

    /// Drain the stream, handing each progress event to `on_progress`.
    pub async fn wait_with<F>(mut self, mut on_progress: F) -> Option<ScanReport>
    where
        F: FnMut(&ScanProgress),
    {
        while let Some(event) = self.events.recv().await {
            match event {
                ScanEvent::Progress(progress) => on_progress(&progress),
                ScanEvent::Finished(report) => return Some(report),
            }
        }
        None
    }
}

/// Everything a per-host task needs, shared read-only across the session.
struct HostPipeline {
    probe: Arc<dyn ReachabilityProbe>,
    resolver: Arc<dyn LinkLayerResolver>,
    vendors: Arc<VendorTable>,
    classifier: Arc<DeviceClassifier>,
    fingerprinter: Option<Arc<dyn OsFingerprinter>>,
    exposure: Option<Arc<dyn ExposureProbe>>,
    local_address: Ipv4Addr,
    gateway: Ipv4Addr,
    options: ScanOptions,
}

impl HostPipeline {
    /// Probe, resolve, look up and classify one host. Never fails.
    async fn run(&self, ip: Ipv4Addr) -> ScanResult {
        let report = self
            .probe
            .probe(ip, self.options.ping_timeout, self.options.ping_attempts)
            .await;

        if !report.is_active() {
            tracing::trace!("{} inactive", ip);
            let device_type = self.classifier.classify(&HostSignals {
                ip,
                local_address: self.local_address,
                gateway: self.gateway,
                status: HostStatus::Inactive,
                vendor: UNKNOWN,
                os_hint: None,
            });
            return ScanResult {
                ip,
                status: HostStatus::Inactive,
                mac: UNKNOWN.to_string(),
                vendor: UNKNOWN.to_string(),
                device_type,
                response_time_ms: None,
                os_hint: None,
                exposure: None,
            };
        }

        let is_self = ip == self.local_address;
        let mac = match (is_self, &self.options.local_mac) {
            (true, Some(local_mac)) => Some(local_mac.clone()),
            _ => self.resolver.resolve(ip).await,
        }
        .unwrap_or_else(|| UNKNOWN.to_string());

        let vendor = self.vendors.lookup(&mac);

        // The hint only matters when address role and vendor rules are silent.
        let needs_hint = !is_self
            && ip != self.gateway
            && self.classifier.rules().match_vendor(&vendor).is_none();
        let os_hint = match (&self.fingerprinter, needs_hint) {
            (Some(fingerprinter), true) => fingerprinter.fingerprint(ip, &report).await,
            _ => None,
        };

        let exposure = match &self.exposure {
            Some(exposure) => Some(
                exposure
                    .scan(ip, &self.options.exposure_ports, self.options.exposure_timeout)
                    .await,
            ),
            None => None,
        };

        let device_type = self.classifier.classify(&HostSignals {
            ip,
            local_address: self.local_address,
            gateway: self.gateway,
            status: HostStatus::Active,
            vendor: &vendor,
            os_hint,
        });

        tracing::debug!("{} active: {} {} -> {}", ip, mac, vendor, device_type);

        ScanResult {
            ip,
            status: HostStatus::Active,
            mac,
            vendor,
            device_type,
            response_time_ms: report.response_time_ms,
            os_hint,
            exposure,
        }
    }
}

fn percent_complete(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((completed.min(total) * 100) / total) as u8
}

async fn run_session(
    pipeline: Arc<HostPipeline>,
    range: NetworkRange,
    candidates: Vec<Ipv4Addr>,
    token: CancellationToken,
    events: mpsc::UnboundedSender<ScanEvent>,
    mut guard: StateGuard,
) {
    let started_at = Utc::now();
    let scan_start = Instant::now();
    let total = candidates.len();
    let concurrency = pipeline.options.concurrency.max(1);

    tracing::info!(
        "Scanning {} hosts in {} (concurrency {}, local {})",
        total,
        range,
        concurrency,
        pipeline.local_address
    );

    let (result_tx, mut result_rx) = mpsc::unbounded_channel::<ScanResult>();
    let semaphore = Arc::new(Semaphore::new(concurrency));

    let dispatch = {
        let token = token.clone();
        let pipeline = pipeline.clone();
        async move {
            let mut dispatched = 0usize;

            for ip in candidates {
                let permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                if token.is_cancelled() {
                    break;
                }

                dispatched += 1;
                let pipeline = pipeline.clone();
                let result_tx = result_tx.clone();
                tokio::spawn(async move {
                    let result = pipeline.run(ip).await;
                    let _ = result_tx.send(result);
                    drop(permit);
                });
            }

            // Workers hold the remaining senders; the aggregator stops once they finish.
            drop(result_tx);
            dispatched
        }
    };

    let aggregate = {
        let events = &events;
        async move {
            let mut completed = 0usize;
            let mut results = Vec::new();

            while let Some(result) = result_rx.recv().await {
                completed += 1;
                let _ = events.send(ScanEvent::Progress(ScanProgress {
                    ip: result.ip,
                    status: result.status,
                    percent: percent_complete(completed, total),
                    completed,
                    total,
                }));
                if result.is_active() {
                    results.push(result);
                }
            }

            (completed, results)
        }
    };

    let (dispatched, (completed, results)) = tokio::join!(dispatch, aggregate);

    let final_state = if dispatched < total {
        tracing::info!(
            "Scan cancelled after {}/{} hosts, {} active",
            completed,
            total,
            results.len()
        );
        ScanState::Cancelled
    } else {
        tracing::info!(
            "Scan complete: {} active of {} hosts in {:.1}s",
            results.len(),
            total,
            scan_start.elapsed().as_secs_f64()
        );
        ScanState::Completed
    };

    let report = ScanReport {
        state: final_state,
        network: range.to_string(),
        local_address: range.local_address(),
        gateway: range.first_host(),
        hosts_total: total,
        hosts_scanned: completed,
        results,
        started_at,
        elapsed_secs: scan_start.elapsed().as_secs_f64(),
    };

    // Settle before announcing so a consumer can start the next scan at once.
    guard.settle(final_state);
    let _ = events.send(ScanEvent::Finished(report));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_complete() {
        assert_eq!(percent_complete(0, 254), 0);
        assert_eq!(percent_complete(127, 254), 50);
        assert_eq!(percent_complete(253, 254), 99);
        assert_eq!(percent_complete(254, 254), 100);
        assert_eq!(percent_complete(0, 0), 100);
    }

    #[test]
    fn test_default_options() {
        let options = ScanOptions::default();
        assert_eq!(options.concurrency, 50);
        assert_eq!(options.ping_timeout, Duration::from_secs(1));
        assert_eq!(options.ping_attempts, 1);
        assert!(!options.shuffle);
        assert_eq!(options.max_hosts, 4096);
    }

    #[test]
    fn test_host_limit() {
        let options = ScanOptions::default();
        let slash20 = NetworkRange::parse("10.0.0.1", "20").unwrap();
        let slash19 = NetworkRange::parse("10.0.0.1", "19").unwrap();
        let everything = NetworkRange::parse("10.0.0.1", "0").unwrap();

        assert!(check_host_limit(&slash20, &options).is_ok());
        assert!(matches!(
            check_host_limit(&slash19, &options),
            Err(ScanError::InvalidRange(_))
        ));
        assert!(check_host_limit(&everything, &options).is_err());

        let raised = ScanOptions {
            max_hosts: 8190,
            ..Default::default()
        };
        assert!(check_host_limit(&slash19, &raised).is_ok());
    }
}
