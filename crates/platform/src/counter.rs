//! Single numeric counters exposed by the kernel as pseudo-files.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

use crate::error::CounterError;

/// Location of one counter, with at most one alternate location for the same
/// physical quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterPath {
    primary: PathBuf,
    fallback: Option<PathBuf>,
}

impl CounterPath {
    pub fn new(primary: impl Into<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            fallback: None,
        }
    }

    /// Location read when the primary is missing or empty.
    pub fn with_fallback(mut self, fallback: impl Into<PathBuf>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    pub fn primary(&self) -> &Path {
        &self.primary
    }

    pub fn fallback(&self) -> Option<&Path> {
        self.fallback.as_deref()
    }
}

/// A provider of raw counter contents.
///
/// Implementations are shared with the sampler thread, so they must be
/// `Send + Sync`.
pub trait CounterSource: Send + Sync {
    /// Returns the full text stored at `path`.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
}

impl<T: CounterSource + ?Sized> CounterSource for Arc<T> {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        (**self).read_to_string(path)
    }
}

/// Counters backed by the real filesystem (`/sys`, `/proc`).
#[derive(Debug, Default, Clone, Copy)]
pub struct SysfsSource;

impl CounterSource for SysfsSource {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }
}

/// Counters backed by an in-memory table.
///
/// Values can be replaced at any time, including while a sampler thread is
/// reading them. Paths that were never set read as missing.
#[derive(Debug, Default)]
pub struct StaticCounterSource {
    values: Mutex<HashMap<PathBuf, String>>,
}

impl StaticCounterSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), content.into());
    }

    pub fn remove(&self, path: impl AsRef<Path>) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path.as_ref());
    }
}

impl CounterSource for StaticCounterSource {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }
}

/// Reads the first whitespace-delimited token at `counter` as an integer.
///
/// A missing or empty primary is retried once at the fallback location; the
/// fallback itself is never followed further.
pub fn read_counter<S>(source: &S, counter: &CounterPath) -> Result<i64, CounterError>
where
    S: CounterSource + ?Sized,
{
    if let Some(token) = read_token(source, &counter.primary)? {
        return parse_token(&counter.primary, token);
    }

    let Some(fallback) = counter.fallback.as_deref() else {
        return Err(CounterError::Unavailable {
            path: counter.primary.clone(),
        });
    };

    trace!(
        primary = %counter.primary.display(),
        fallback = %fallback.display(),
        "primary counter empty, reading fallback"
    );

    match read_token(source, fallback)? {
        Some(token) => parse_token(fallback, token),
        None => Err(CounterError::Unavailable {
            path: fallback.to_path_buf(),
        }),
    }
}

/// `Ok(None)` means the location exists but holds nothing, or does not exist.
fn read_token<S>(source: &S, path: &Path) -> Result<Option<String>, CounterError>
where
    S: CounterSource + ?Sized,
{
    match source.read_to_string(path) {
        Ok(content) => Ok(content.split_whitespace().next().map(str::to_owned)),
        Err(e) if is_unpopulated(&e) => Ok(None),
        Err(source) => Err(CounterError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

// Some power-supply drivers answer reads of an unpopulated node with ENODATA.
fn is_unpopulated(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(libc::ENODATA)
}

fn parse_token(path: &Path, token: String) -> Result<i64, CounterError> {
    token.parse::<i64>().map_err(|_| CounterError::Parse {
        path: path.to_path_buf(),
        content: token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIMARY: &str = "/sys/class/power_supply/usb/current_now";
    const FALLBACK: &str = "/sys/class/power_supply/usb/input_current_now";

    fn usb_current() -> CounterPath {
        CounterPath::new(PRIMARY).with_fallback(FALLBACK)
    }

    #[test]
    fn test_reads_first_token() {
        let source = StaticCounterSource::new();
        source.set(PRIMARY, "  1500000\n");

        assert_eq!(read_counter(&source, &usb_current()).unwrap(), 1_500_000);
    }

    #[test]
    fn test_negative_values_parse() {
        let source = StaticCounterSource::new();
        source.set(PRIMARY, "-420000\n");

        assert_eq!(read_counter(&source, &usb_current()).unwrap(), -420_000);
    }

    #[test]
    fn test_empty_primary_uses_fallback() {
        let source = StaticCounterSource::new();
        source.set(PRIMARY, "\n");
        source.set(FALLBACK, "900000\n");

        assert_eq!(read_counter(&source, &usb_current()).unwrap(), 900_000);
    }

    #[test]
    fn test_missing_primary_uses_fallback() {
        let source = StaticCounterSource::new();
        source.set(FALLBACK, "900000");

        assert_eq!(read_counter(&source, &usb_current()).unwrap(), 900_000);
    }

    #[test]
    fn test_empty_fallback_is_unavailable() {
        let source = StaticCounterSource::new();
        source.set(PRIMARY, "");
        source.set(FALLBACK, "   ");

        let err = read_counter(&source, &usb_current()).unwrap_err();
        assert!(matches!(err, CounterError::Unavailable { .. }));
        assert_eq!(err.path(), Path::new(FALLBACK));
    }

    #[test]
    fn test_no_fallback_is_unavailable() {
        let source = StaticCounterSource::new();
        let counter = CounterPath::new("/sys/class/power_supply/battery/voltage_now");

        let err = read_counter(&source, &counter).unwrap_err();
        assert!(matches!(err, CounterError::Unavailable { .. }));
        assert_eq!(err.path(), counter.primary());
    }

    #[test]
    fn test_malformed_primary_does_not_fall_back() {
        let source = StaticCounterSource::new();
        source.set(PRIMARY, "12ab");
        source.set(FALLBACK, "900000");

        let err = read_counter(&source, &usb_current()).unwrap_err();
        match err {
            CounterError::Parse { path, content } => {
                assert_eq!(path, Path::new(PRIMARY));
                assert_eq!(content, "12ab");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_fallback_is_parse_error() {
        let source = StaticCounterSource::new();
        source.set(FALLBACK, "n/a");

        let err = read_counter(&source, &usb_current()).unwrap_err();
        assert!(matches!(err, CounterError::Parse { .. }));
    }

    #[test]
    fn test_sysfs_source_reads_real_file() {
        let dir = std::env::temp_dir().join(format!("voltprobe-counter-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let primary = dir.join("current_now");
        let fallback = dir.join("input_current_now");
        fs::write(&primary, "").unwrap();
        fs::write(&fallback, "250000\n").unwrap();

        let counter = CounterPath::new(&primary).with_fallback(&fallback);
        let value = read_counter(&SysfsSource, &counter);
        fs::remove_dir_all(&dir).unwrap();

        assert_eq!(value.unwrap(), 250_000);
    }
}
