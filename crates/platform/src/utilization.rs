//! CPU utilization derived from procfs jiffy counters.
//!
//! [`UtilizationSampler`] compares the system-wide busy jiffies and this
//! process's busy jiffies against the jiffies the process has been alive,
//! and reports how much of that was spent by *other* work. Queries closer
//! together than the refresh interval return the cached result without
//! touching procfs.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, trace};

use crate::error::UtilizationError;

/// Minimum time between two procfs refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// Tick rate assumed when `sysconf(_SC_CLK_TCK)` is unavailable.
pub const FALLBACK_CLOCK_TICKS: u64 = 100;

const PROCFS_PATH: &str = "/proc";

pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A provider of the three procfs tables the sampler reads.
pub trait ProcSource {
    /// Contents of `/proc/<pid>/stat`.
    fn process_stat(&self) -> io::Result<String>;
    /// Contents of `/proc/uptime`.
    fn uptime(&self) -> io::Result<String>;
    /// Contents of `/proc/stat`.
    fn system_stat(&self) -> io::Result<String>;
}

/// procfs as mounted on the running system.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
    pid: u32,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::for_pid(std::process::id())
    }
}

impl ProcFs {
    pub fn for_pid(pid: u32) -> Self {
        Self {
            root: PathBuf::from(PROCFS_PATH),
            pid,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl ProcSource for ProcFs {
    fn process_stat(&self) -> io::Result<String> {
        fs::read_to_string(self.root.join(self.pid.to_string()).join("stat"))
    }

    fn uptime(&self) -> io::Result<String> {
        fs::read_to_string(self.root.join("uptime"))
    }

    fn system_stat(&self) -> io::Result<String> {
        fs::read_to_string(self.root.join("stat"))
    }
}

/// Clock ticks per second reported by the kernel.
pub fn clock_ticks() -> u64 {
    // SAFETY: sysconf only reads a configuration value.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as u64
    } else {
        FALLBACK_CLOCK_TICKS
    }
}

/// Accounting fields of `/proc/<pid>/stat`, in jiffies.
///
/// see `proc_pid_stat(5)` for the field layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessTimes {
    pub utime: i64,
    pub stime: i64,
    pub cutime: i64,
    pub cstime: i64,
    pub start_time: i64,
}

impl ProcessTimes {
    // Indices are relative to the first field after the command name, which
    // is field 3 (`state`) in the man page numbering.
    const UTIME: usize = 14 - 3;
    const STIME: usize = 15 - 3;
    const CUTIME: usize = 16 - 3;
    const CSTIME: usize = 17 - 3;
    const START_TIME: usize = 22 - 3;

    pub fn work(&self) -> i64 {
        self.utime + self.stime + self.cutime + self.cstime
    }
}

impl FromStr for ProcessTimes {
    type Err = UtilizationError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        const WHAT: &str = "process stat";

        // the command name may itself contain spaces and parentheses.
        let (_, rest) = line
            .rsplit_once(')')
            .ok_or_else(|| UtilizationError::parse(WHAT, "missing command name"))?;
        let fields: Vec<&str> = rest.split_whitespace().collect();

        let field = |index: usize, name: &str| -> Result<i64, UtilizationError> {
            let raw = fields
                .get(index)
                .ok_or_else(|| UtilizationError::parse(WHAT, format!("missing {name}")))?;
            raw.parse()
                .map_err(|_| UtilizationError::parse(WHAT, format!("bad {name}: {raw:?}")))
        };

        Ok(Self {
            utime: field(Self::UTIME, "utime")?,
            stime: field(Self::STIME, "stime")?,
            cutime: field(Self::CUTIME, "cutime")?,
            cstime: field(Self::CSTIME, "cstime")?,
            start_time: field(Self::START_TIME, "starttime")?,
        })
    }
}

/// Busy fields of the aggregate `cpu` line of `/proc/stat`, in jiffies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemTimes {
    pub user: i64,
    pub nice: i64,
    pub system: i64,
}

impl SystemTimes {
    pub fn work(&self) -> i64 {
        self.user + self.nice + self.system
    }
}

impl FromStr for SystemTimes {
    type Err = UtilizationError;

    fn from_str(table: &str) -> Result<Self, Self::Err> {
        const WHAT: &str = "system stat";

        let mut tokens = table
            .lines()
            .map(str::split_whitespace)
            .find_map(|mut tokens| (tokens.next() == Some("cpu")).then_some(tokens))
            .ok_or_else(|| UtilizationError::parse(WHAT, "missing aggregate cpu line"))?;

        let mut next = |name: &str| -> Result<i64, UtilizationError> {
            let raw = tokens
                .next()
                .ok_or_else(|| UtilizationError::parse(WHAT, format!("missing {name}")))?;
            raw.parse()
                .map_err(|_| UtilizationError::parse(WHAT, format!("bad {name}: {raw:?}")))
        };

        Ok(Self {
            user: next("user")?,
            nice: next("nice")?,
            system: next("system")?,
        })
    }
}

/// Converts the first field of `/proc/uptime` to jiffies without going
/// through floating point.
pub fn uptime_jiffies(uptime: &str, ticks: u64) -> Result<i64, UtilizationError> {
    const WHAT: &str = "uptime";

    let raw = uptime
        .split_whitespace()
        .next()
        .ok_or_else(|| UtilizationError::parse(WHAT, "empty"))?;
    let bad = || UtilizationError::parse(WHAT, format!("bad value: {raw:?}"));

    let (secs, frac) = raw.split_once('.').unwrap_or((raw, ""));
    let secs: u64 = secs.parse().map_err(|_| bad())?;
    if !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }

    // fractional seconds as nanoseconds, ignoring digits beyond nanosecond precision
    let nanos = frac
        .bytes()
        .chain(std::iter::repeat(b'0'))
        .take(9)
        .fold(0u64, |acc, digit| acc * 10 + u64::from(digit - b'0'));

    let duration = Duration::new(secs, nanos as u32);
    let jiffies = duration.as_nanos() * u128::from(ticks) / 1_000_000_000;
    i64::try_from(jiffies).map_err(|_| bad())
}

/// Utilization fractions from the most recent refresh.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct UtilizationReading {
    /// System-wide busy jiffies per elapsed jiffy.
    pub cpu_usage: f64,
    /// This process's busy jiffies per elapsed jiffy.
    pub process_usage: f64,
}

impl UtilizationReading {
    /// Utilization attributable to everything except this process.
    pub fn other_usage(&self) -> f64 {
        self.cpu_usage - self.process_usage
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Baseline {
    system_work: i64,
    process_total: i64,
    process_work: i64,
}

/// Rate-limited CPU utilization sampler.
///
/// Not synchronized: concurrent use of one instance needs external locking.
#[derive(Debug)]
pub struct UtilizationSampler<P = ProcFs, C = SystemClock> {
    source: P,
    clock: C,
    refresh_interval: Duration,
    ticks: u64,
    last_refresh: Option<Instant>,
    baseline: Baseline,
    cached: UtilizationReading,
}

impl UtilizationSampler {
    /// Sampler for the current process using the kernel's tick rate.
    pub fn new() -> Self {
        Self::with_source(ProcFs::default(), SystemClock, clock_ticks())
    }
}

impl Default for UtilizationSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ProcSource, C: Clock> UtilizationSampler<P, C> {
    pub fn with_source(source: P, clock: C, ticks: u64) -> Self {
        Self {
            source,
            clock,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            ticks: ticks.max(1),
            last_refresh: None,
            baseline: Baseline::default(),
            cached: UtilizationReading::default(),
        }
    }

    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// System-wide utilization minus this process's utilization.
    pub fn cpu_usage(&mut self) -> Result<f64, UtilizationError> {
        self.reading().map(|reading| reading.other_usage())
    }

    /// Both utilization fractions, refreshed if the interval has elapsed.
    pub fn reading(&mut self) -> Result<UtilizationReading, UtilizationError> {
        let now = self.clock.now();

        if let Some(last) = self.last_refresh {
            if now.saturating_duration_since(last) < self.refresh_interval {
                trace!("utilization throttled, returning cached reading");
                return Ok(self.cached);
            }
        }

        self.refresh(now)?;
        Ok(self.cached)
    }

    /// Forgets the baseline so the next query refreshes from zero.
    pub fn reset(&mut self) {
        self.last_refresh = None;
        self.baseline = Baseline::default();
        self.cached = UtilizationReading::default();
    }

    /// Records a baseline without reporting it. The first refresh spans the
    /// whole process lifetime, so readings taken before the next refresh
    /// are zero instead of that figure.
    pub fn prime(&mut self) -> Result<(), UtilizationError> {
        let now = self.clock.now();
        self.refresh(now)?;
        self.cached = UtilizationReading::default();
        Ok(())
    }

    fn refresh(&mut self, now: Instant) -> Result<(), UtilizationError> {
        let process: ProcessTimes = read(self.source.process_stat(), "process stat")?.parse()?;
        let uptime = uptime_jiffies(&read(self.source.uptime(), "uptime")?, self.ticks)?;
        let system: SystemTimes = read(self.source.system_stat(), "system stat")?.parse()?;

        let process_work = process.work();
        let process_total = uptime - process.start_time;
        let elapsed = (process_total - self.baseline.process_total).max(1);
        let system_work = system.work();

        let reading = UtilizationReading {
            cpu_usage: (system_work - self.baseline.system_work) as f64 / elapsed as f64,
            process_usage: (process_work - self.baseline.process_work) as f64 / elapsed as f64,
        };

        debug!(
            elapsed,
            cpu_usage = reading.cpu_usage,
            process_usage = reading.process_usage,
            "refreshed cpu utilization"
        );

        self.baseline = Baseline {
            system_work,
            process_total,
            process_work,
        };
        self.cached = reading;
        self.last_refresh = Some(now);
        Ok(())
    }
}

fn read(result: io::Result<String>, what: &'static str) -> Result<String, UtilizationError> {
    result.map_err(|source| UtilizationError::Io { what, source })
}
