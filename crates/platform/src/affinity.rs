//! Thread-to-CPU pinning through `sched_setaffinity(2)`.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use tracing::{debug, warn};

use crate::error::AffinityError;

/// Number of CPUs a `cpu_set_t` mask can describe.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub const MAX_CPUS: usize = libc::CPU_SETSIZE as usize;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub const MAX_CPUS: usize = 1024;

/// A set of logical processor ids.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CpuSet(BTreeSet<usize>);

impl CpuSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from up to three slots, where `0` in the second and
    /// third slot means the slot is unused. The first slot is always taken.
    pub fn from_slots(cpu1: usize, cpu2: usize, cpu3: usize) -> Self {
        let mut set = Self::new();
        set.insert(cpu1);
        for cpu in [cpu2, cpu3] {
            if cpu != 0 {
                set.insert(cpu);
            }
        }
        set
    }

    pub fn insert(&mut self, cpu: usize) -> bool {
        self.0.insert(cpu)
    }

    pub fn contains(&self, cpu: usize) -> bool {
        self.0.contains(&cpu)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<usize> {
        self.0.first().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<usize> for CpuSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Parses the kernel's cpu list syntax, e.g. `0,2,4-6`.
impl FromStr for CpuSet {
    type Err = AffinityError;

    fn from_str(list: &str) -> Result<Self, Self::Err> {
        let invalid = || AffinityError::InvalidCpuList(list.to_string());
        let in_range = |cpu: usize| {
            if cpu >= MAX_CPUS {
                Err(AffinityError::CpuOutOfRange { cpu, max: MAX_CPUS })
            } else {
                Ok(cpu)
            }
        };
        let mut set = CpuSet::new();

        for part in list.split(',').map(str::trim) {
            match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo: usize = lo.trim().parse().map_err(|_| invalid())?;
                    let hi: usize = hi.trim().parse().map_err(|_| invalid())?;
                    if lo > hi {
                        return Err(invalid());
                    }
                    set.0.extend(lo..=in_range(hi)?);
                }
                None => {
                    set.insert(in_range(part.parse().map_err(|_| invalid())?)?);
                }
            }
        }

        Ok(set)
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for cpu in self.iter() {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}", cpu)?;
            first = false;
        }
        Ok(())
    }
}

/// Restricts the calling thread to `cpu1` plus the non-zero of `cpu2`/`cpu3`.
pub fn pin_thread_to_cpus(cpu1: usize, cpu2: usize, cpu3: usize) -> Result<(), AffinityError> {
    pin_current_thread(&CpuSet::from_slots(cpu1, cpu2, cpu3))
}

pub fn pin_current_thread(cpus: &CpuSet) -> Result<(), AffinityError> {
    pin_thread(0, cpus)
}

/// Restricts the thread `tid` to `cpus`. A `tid` of `0` is the calling
/// thread. Failures are logged and returned.
pub fn pin_thread(tid: i32, cpus: &CpuSet) -> Result<(), AffinityError> {
    match sys::set_affinity(tid, cpus) {
        Ok(()) => {
            debug!(tid, cpus = %cpus, "pinned thread");
            Ok(())
        }
        Err(e) => {
            warn!(tid, cpus = %cpus, error = %e, "failed to pin thread");
            Err(e)
        }
    }
}

/// CPUs the calling thread may currently run on.
pub fn current_affinity() -> Result<CpuSet, AffinityError> {
    sys::get_affinity(0)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
mod sys {
    use std::io;
    use std::mem;

    use super::{CpuSet, MAX_CPUS};
    use crate::error::AffinityError;

    pub(super) fn to_raw(cpus: &CpuSet) -> Result<libc::cpu_set_t, AffinityError> {
        if cpus.is_empty() {
            return Err(AffinityError::EmptySet);
        }

        // SAFETY: cpu_set_t is a plain bitmask; all zeroes is the empty set.
        let mut raw: libc::cpu_set_t = unsafe { mem::zeroed() };
        for cpu in cpus.iter() {
            if cpu >= MAX_CPUS {
                return Err(AffinityError::CpuOutOfRange { cpu, max: MAX_CPUS });
            }
            // SAFETY: cpu is within the mask bounds checked above.
            unsafe { libc::CPU_SET(cpu, &mut raw) };
        }
        Ok(raw)
    }

    pub(super) fn from_raw(raw: &libc::cpu_set_t) -> CpuSet {
        // SAFETY: every index is below CPU_SETSIZE.
        (0..MAX_CPUS)
            .filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, raw) })
            .collect()
    }

    pub(super) fn set_affinity(tid: i32, cpus: &CpuSet) -> Result<(), AffinityError> {
        let raw = to_raw(cpus)?;
        // SAFETY: raw is a valid cpu_set_t of the size passed in.
        let result =
            unsafe { libc::sched_setaffinity(tid, mem::size_of::<libc::cpu_set_t>(), &raw) };
        if result != 0 {
            return Err(AffinityError::SetAffinity(io::Error::last_os_error()));
        }
        Ok(())
    }

    pub(super) fn get_affinity(tid: i32) -> Result<CpuSet, AffinityError> {
        // SAFETY: see to_raw.
        let mut raw: libc::cpu_set_t = unsafe { mem::zeroed() };
        // SAFETY: raw is writable and sized as passed.
        let result =
            unsafe { libc::sched_getaffinity(tid, mem::size_of::<libc::cpu_set_t>(), &mut raw) };
        if result != 0 {
            return Err(AffinityError::GetAffinity(io::Error::last_os_error()));
        }
        Ok(from_raw(&raw))
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
mod sys {
    use super::CpuSet;
    use crate::error::AffinityError;

    pub(super) fn set_affinity(_tid: i32, _cpus: &CpuSet) -> Result<(), AffinityError> {
        Err(AffinityError::Unsupported)
    }

    pub(super) fn get_affinity(_tid: i32) -> Result<CpuSet, AffinityError> {
        Err(AffinityError::Unsupported)
    }
}
