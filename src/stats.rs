//! Query counters and the per-query audit trail.
//!
//! Counters are plain atomics so the hot path never takes a lock; every
//! increment is mirrored to the `metrics` facade, which is a no-op unless the
//! Prometheus exporter was installed.

use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use chrono::Local;
use metrics::counter;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{info, warn};

use crate::config::AuditConfig;
use crate::verdict::Verdict;

/// How a decoded query was finally answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Answered with a null address.
    Blocked,
    /// Forwarded and relayed.
    Allowed,
    /// Dropped as malformed or answered with a DNS failure code.
    Errored,
}

impl Outcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Blocked => "blocked",
            Self::Allowed => "allowed",
            Self::Errored => "errored",
        }
    }

    const fn tag(self) -> &'static str {
        match self {
            Self::Blocked => "BLOCK",
            Self::Allowed => "ALLOW",
            Self::Errored => "ERROR",
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub seen: u64,
    pub blocked: u64,
    pub allowed: u64,
    pub errored: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl StatsSnapshot {
    /// Share of seen queries that were blocked, in percent.
    pub fn block_rate(&self) -> f64 {
        percent(self.blocked, self.seen)
    }

    pub fn cache_hit_rate(&self) -> f64 {
        percent(self.cache_hits, self.cache_hits + self.cache_misses)
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

/// Monotonic query counters.
///
/// Once every in-flight query has finished, `seen == blocked + allowed + errored`.
#[derive(Debug, Default)]
pub struct Stats {
    seen: AtomicU64,
    blocked: AtomicU64,
    allowed: AtomicU64,
    errored: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one finished query.
    pub fn record(&self, outcome: Outcome) {
        self.seen.fetch_add(1, Ordering::Relaxed);
        let bucket = match outcome {
            Outcome::Blocked => &self.blocked,
            Outcome::Allowed => &self.allowed,
            Outcome::Errored => &self.errored,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
        counter!("sinkhole_queries_total", "outcome" => outcome.as_str()).increment(1);
    }

    pub fn record_cache(&self, hit: bool) {
        let (bucket, result) = if hit {
            (&self.cache_hits, "hit")
        } else {
            (&self.cache_misses, "miss")
        };
        bucket.fetch_add(1, Ordering::Relaxed);
        counter!("sinkhole_cache_total", "result" => result).increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            seen: self.seen.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            allowed: self.allowed.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }

    /// Emit the totals, usually once at shutdown.
    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            seen = s.seen,
            blocked = s.blocked,
            allowed = s.allowed,
            errored = s.errored,
            block_rate = format!("{:.1}%", s.block_rate()),
            cache_hit_rate = format!("{:.1}%", s.cache_hit_rate()),
            "query summary"
        );
    }
}

/// Receives one record per answered query.
pub trait AuditSink: Send + Sync + 'static {
    fn record(&self, verdict: &Verdict, outcome: Outcome);
}

/// Score with at most three decimals and no trailing zeros.
pub fn format_score(score: f64) -> String {
    let fixed = format!("{score:.3}");
    fixed.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// `BLOCK 0.994 | domain`, without the timestamp.
pub fn audit_entry(verdict: &Verdict, outcome: Outcome) -> String {
    format!(
        "{} {} | {}",
        outcome.tag(),
        format_score(verdict.score()),
        verdict.domain()
    )
}

fn audit_line(time: impl Display, verdict: &Verdict, outcome: Outcome) -> String {
    format!("[{time}] {}", audit_entry(verdict, outcome))
}

/// Lines queued for the audit file before new ones are dropped.
const AUDIT_QUEUE: usize = 4096;

/// Audit sink writing to the log and, optionally, to an append-only file.
///
/// File appends run on a dedicated thread so a slow disk never stalls the
/// runtime workers answering queries. Dropping the log drains the queue.
#[derive(Debug, Default)]
pub struct AuditLog {
    writer: Option<AuditWriter>,
}

#[derive(Debug)]
struct AuditWriter {
    lines: Option<mpsc::Sender<String>>,
    thread: Option<JoinHandle<()>>,
}

impl AuditWriter {
    fn spawn(mut file: File) -> io::Result<Self> {
        let (tx, mut rx) = mpsc::channel::<String>(AUDIT_QUEUE);
        let thread = thread::Builder::new()
            .name("sinkhole-audit".into())
            .spawn(move || {
                while let Some(line) = rx.blocking_recv() {
                    if let Err(err) = writeln!(file, "{line}") {
                        warn!("failed to write audit line: {err}");
                    }
                }
            })?;
        Ok(Self {
            lines: Some(tx),
            thread: Some(thread),
        })
    }

    fn push(&self, line: String) {
        let Some(lines) = &self.lines else { return };
        match lines.try_send(line) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("audit queue full, dropping line"),
            Err(TrySendError::Closed(_)) => warn!("audit writer stopped, dropping line"),
        }
    }
}

impl Drop for AuditWriter {
    fn drop(&mut self) {
        // Closing the channel ends the writer loop once the queue is drained.
        self.lines.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("audit writer thread panicked");
        }
    }
}

impl AuditLog {
    /// Audit through `tracing` only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Audit through `tracing` and append every line to `path`.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        let writer = AuditWriter::spawn(file)?;
        info!(path = %path.as_ref().display(), "audit log opened");
        Ok(Self {
            writer: Some(writer),
        })
    }

    pub fn from_config(config: &AuditConfig) -> io::Result<Self> {
        match &config.log_path {
            Some(path) => Self::open(path),
            None => Ok(Self::new()),
        }
    }
}

impl AuditSink for AuditLog {
    fn record(&self, verdict: &Verdict, outcome: Outcome) {
        let line = audit_line(Local::now().format("%H:%M:%S"), verdict, outcome);
        info!(target: "sinkhole::audit", source = %verdict.source(), "{line}");

        if let Some(writer) = &self.writer {
            writer.push(line);
        }
    }
}
