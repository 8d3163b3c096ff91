//! Stall diagnostics
//!
//! A timed zone acquisition that gives up is not an error, but it usually
//! means a thread is sitting on a zone for too long. Each stall produces a
//! [`StallReport`] handed to the manager's [`StallObserver`].

use std::backtrace::Backtrace;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;

use crate::thread::ThreadToken;
use crate::zone::ZoneId;

/// Details of one failed timed acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StallReport {
    pub zone: ZoneId,
    /// Thread that gave up
    pub waiter: ThreadToken,
    /// Owner of the zone when the waiter gave up
    pub holder: Option<ThreadToken>,
    pub waited: Duration,
    /// Releases of the zone observed during the wait
    pub releases: u64,
    /// The zone was already marked stalled so no wait was attempted
    pub fast_fail: bool,
}

/// Receives stall reports
#[cfg_attr(test, mockall::automock)]
pub trait StallObserver: Send + Sync {
    fn on_stall(&self, report: &StallReport);
}

/// Default observer: a warning per stall, plus a backtrace dump when
/// configured with a file.
pub struct LogStallObserver {
    dumper: Option<BacktraceDumper>,
}

impl LogStallObserver {
    pub fn new(backtrace_file: Option<PathBuf>) -> Self {
        Self {
            dumper: backtrace_file.map(BacktraceDumper::new),
        }
    }
}

impl StallObserver for LogStallObserver {
    fn on_stall(&self, report: &StallReport) {
        if report.fast_fail {
            log::warn!(
                "Zone {} still stalled, thread {} gave up immediately (holder {:?})",
                report.zone,
                report.waiter,
                report.holder
            );
        } else {
            log::warn!(
                "Zone {} stalled: thread {} waited {:?} for holder {:?} ({} releases seen)",
                report.zone,
                report.waiter,
                report.waited,
                report.holder,
                report.releases
            );
        }

        if let Some(dumper) = &self.dumper {
            if let Err(e) = dumper.dump(report.waiter, "STALL") {
                log::warn!("Failed to write backtrace to {}: {}", dumper.path().display(), e);
            }
        }
    }
}

/// Appends captured backtraces to a file shared by all threads.
/// The file is truncated when the first backtrace is written.
pub struct BacktraceDumper {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl BacktraceDumper {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the calling thread's backtrace under a `BACKTRACE THREAD` header
    pub fn dump(&self, thread: ThreadToken, label: &str) -> io::Result<()> {
        let backtrace = Backtrace::force_capture();

        let mut file = self.file.lock();
        if file.is_none() {
            *file = Some(File::create(&self.path)?);
        }
        let Some(out) = file.as_mut() else {
            return Ok(());
        };

        writeln!(out, "\nBACKTRACE THREAD {} {}", thread, label)?;
        writeln!(out, "{}", backtrace)?;
        out.flush()
    }
}
