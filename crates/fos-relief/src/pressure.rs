//! Memory pressure state and the RSS monitor that drives it.
//!
//! Pressure levels, relative to the hard threshold:
//! - Low: < 50% (normal operation)
//! - Medium: 50-80%
//! - High: 80-100% (under memory pressure)
//! - Critical: >= 100% (critical relief, may be killed soon)

use crate::config::MonitorConfig;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use thiserror::Error;
use tracing::{info, warn};

/// Process-wide "are we under memory pressure" query.
pub trait MemoryPressureState: Send + Sync {
    fn is_under_memory_pressure(&self) -> bool;
}

/// A pressure flag set by whoever receives OS pressure notifications.
#[derive(Debug, Default)]
pub struct PressureFlag {
    under_pressure: AtomicBool,
}

impl PressureFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_under_memory_pressure(&self, under_pressure: bool) {
        self.under_pressure.store(under_pressure, Ordering::Relaxed);
    }
}

impl MemoryPressureState for PressureFlag {
    fn is_under_memory_pressure(&self) -> bool {
        self.under_pressure.load(Ordering::Relaxed)
    }
}

/// Errors from RSS monitoring
#[derive(Debug, Error)]
pub enum RssError {
    #[error("Failed to get process info")]
    ProcessNotFound,

    #[error("Monitor already running")]
    AlreadyRunning,

    #[error("Failed to spawn monitor thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Memory pressure levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressureLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl MemoryPressureLevel {
    /// Determine pressure level from RSS and threshold
    pub fn from_usage(current_rss: usize, threshold: usize) -> Self {
        let ratio = current_rss as f64 / threshold as f64;

        if ratio >= 1.0 {
            Self::Critical
        } else if ratio >= 0.8 {
            Self::High
        } else if ratio >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Low => "Low (normal operation)",
            Self::Medium => "Medium (watching)",
            Self::High => "High (noncritical relief)",
            Self::Critical => "Critical (critical relief)",
        }
    }

    fn to_usize(self) -> usize {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    fn from_usize(value: usize) -> Self {
        match value {
            0 => Self::Low,
            1 => Self::Medium,
            2 => Self::High,
            _ => Self::Critical,
        }
    }
}

/// Callback for when memory pressure changes
pub type PressureCallback = Arc<dyn Fn(MemoryPressureLevel, usize) + Send + Sync>;

/// Latest sample, shared with the sampling thread.
struct Samples {
    config: MonitorConfig,
    rss: AtomicUsize,
    level: AtomicUsize,
    running: AtomicBool,
}

impl Samples {
    fn record(&self, rss: usize) -> MemoryPressureLevel {
        let level = MemoryPressureLevel::from_usage(rss, self.config.hard_limit_bytes);
        self.rss.store(rss, Ordering::Relaxed);
        self.level.store(level.to_usize(), Ordering::Relaxed);
        level
    }

    fn level(&self) -> MemoryPressureLevel {
        MemoryPressureLevel::from_usize(self.level.load(Ordering::Relaxed))
    }
}

/// Watches process RSS and reports pressure level changes.
pub struct RssMonitor {
    samples: Arc<Samples>,
    callback: Option<PressureCallback>,
}

impl RssMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            samples: Arc::new(Samples {
                config,
                rss: AtomicUsize::new(0),
                level: AtomicUsize::new(0),
                running: AtomicBool::new(false),
            }),
            callback: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(MonitorConfig::default())
    }

    /// Set callback for pressure changes
    pub fn on_pressure_change<F>(&mut self, callback: F)
    where
        F: Fn(MemoryPressureLevel, usize) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
    }

    /// Last sampled RSS in bytes
    pub fn current_rss(&self) -> usize {
        self.samples.rss.load(Ordering::Relaxed)
    }

    pub fn current_pressure(&self) -> MemoryPressureLevel {
        self.samples.level()
    }

    /// Record a sample taken elsewhere and return the resulting level.
    pub fn record_sample(&self, rss: usize) -> MemoryPressureLevel {
        self.samples.record(rss)
    }

    /// Whether RSS is still above the critical limit.
    pub fn is_over_critical_limit(&self) -> bool {
        self.current_rss() >= self.samples.config.critical_limit_bytes
    }

    /// Resident set size of this process, in bytes.
    pub fn read_rss_sync() -> Result<usize, RssError> {
        let mut system = System::new_with_specifics(RefreshKind::nothing());
        let pid = Pid::from_u32(std::process::id());
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );

        system
            .process(pid)
            .map(|p| p.memory() as usize)
            .ok_or(RssError::ProcessNotFound)
    }

    /// Sample on a background thread until [`stop`](Self::stop).
    pub fn start(&self) -> Result<thread::JoinHandle<()>, RssError> {
        if self.samples.running.swap(true, Ordering::SeqCst) {
            return Err(RssError::AlreadyRunning);
        }

        let samples = self.samples.clone();
        let callback = self.callback.clone();
        thread::Builder::new()
            .name("rss-monitor".to_string())
            .spawn(move || sample_until_stopped(&samples, callback))
            .map_err(|e| {
                self.samples.running.store(false, Ordering::SeqCst);
                RssError::Spawn(e)
            })
    }

    pub fn stop(&self) {
        self.samples.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.samples.running.load(Ordering::Relaxed)
    }
}

fn sample_until_stopped(samples: &Samples, callback: Option<PressureCallback>) {
    let poll_interval = Duration::from_millis(samples.config.poll_interval_ms);
    let mut previous = samples.level();
    info!(?poll_interval, "RSS monitor started");

    while samples.running.load(Ordering::Relaxed) {
        match RssMonitor::read_rss_sync() {
            Ok(rss) => {
                let level = samples.record(rss);
                if level != previous {
                    info!(rss, from = ?previous, to = ?level, "Memory pressure level changed");
                    if let Some(callback) = &callback {
                        callback(level, rss);
                    }
                    previous = level;
                }
            }
            Err(e) => warn!("Skipping RSS sample: {}", e),
        }
        thread::sleep(poll_interval);
    }

    info!("RSS monitor stopped");
}

impl MemoryPressureState for RssMonitor {
    fn is_under_memory_pressure(&self) -> bool {
        self.current_pressure() >= MemoryPressureLevel::High
    }
}

impl Drop for RssMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pressure_levels() {
        let threshold = 1000;

        assert_eq!(MemoryPressureLevel::from_usage(400, threshold), MemoryPressureLevel::Low);
        assert_eq!(MemoryPressureLevel::from_usage(600, threshold), MemoryPressureLevel::Medium);
        assert_eq!(MemoryPressureLevel::from_usage(900, threshold), MemoryPressureLevel::High);
        assert_eq!(MemoryPressureLevel::from_usage(1100, threshold), MemoryPressureLevel::Critical);
    }

    #[test]
    fn test_read_rss() {
        let rss = RssMonitor::read_rss_sync().unwrap();
        assert!(rss > 0);
    }

    #[test]
    fn test_pressure_state_follows_samples() {
        let monitor = RssMonitor::new(MonitorConfig {
            poll_interval_ms: 10,
            hard_limit_bytes: 1000,
            critical_limit_bytes: 1500,
        });

        assert_eq!(monitor.record_sample(100), MemoryPressureLevel::Low);
        assert!(!monitor.is_under_memory_pressure());

        assert_eq!(monitor.record_sample(850), MemoryPressureLevel::High);
        assert!(monitor.is_under_memory_pressure());
        assert!(!monitor.is_over_critical_limit());

        monitor.record_sample(1600);
        assert_eq!(monitor.current_pressure(), MemoryPressureLevel::Critical);
        assert!(monitor.is_over_critical_limit());
    }

    #[test]
    fn test_start_twice_fails() {
        let monitor = RssMonitor::new(MonitorConfig {
            poll_interval_ms: 10,
            ..MonitorConfig::default()
        });

        let handle = monitor.start().unwrap();
        assert!(matches!(monitor.start(), Err(RssError::AlreadyRunning)));

        monitor.stop();
        handle.join().unwrap();
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_monitor_reports_level_change() {
        let mut monitor = RssMonitor::new(MonitorConfig {
            poll_interval_ms: 10,
            hard_limit_bytes: 1,
            critical_limit_bytes: 1,
        });
        let (tx, rx) = crossbeam_channel::unbounded();
        monitor.on_pressure_change(move |level, rss| {
            let _ = tx.send((level, rss));
        });

        let handle = monitor.start().unwrap();
        let (level, rss) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        monitor.stop();
        handle.join().unwrap();

        assert_eq!(level, MemoryPressureLevel::Critical);
        assert!(rss > 0);
        assert_eq!(monitor.current_rss(), rss);
        assert!(monitor.is_over_critical_limit());
    }

    #[test]
    fn test_pressure_flag() {
        let flag = PressureFlag::new();
        assert!(!flag.is_under_memory_pressure());
        flag.set_under_memory_pressure(true);
        assert!(flag.is_under_memory_pressure());
    }
}
