//! Event reporter: one text line per reported decision.
//!
//! ```text
//! fsfault: inj_id=0 pid=4242 comm=server symbol=readlink old_ret=6 new_ret=-13 ts_ns=1700000000000000000 aggressive=1 decision=override
//! ```
//!
//! The line is a diagnostic contract consumed as text, not a wire protocol.
//! Records are formatted into a stack buffer and handed to an [`EventSink`];
//! sinks are best-effort and silently drop what they cannot take.

use std::fmt::{self, Write as _};
use std::fs::OpenOptions;
use std::io;
use std::os::fd::{IntoRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::context::Outcome;

pub const RECORD_PREFIX: &str = "fsfault:";

/// Stack buffer size for one record; bounded fields keep every record inside it.
pub const RECORD_CAPACITY: usize = 512;

/// One reported decision, borrowing from the firing's stack.
#[derive(Debug, Clone, Copy)]
pub struct EventRecord<'a> {
    pub id: u64,
    pub pid: u32,
    pub label: &'a str,
    pub target: &'a str,
    pub natural: Outcome,
    pub replaced: Option<Outcome>,
    pub timestamp_ns: u64,
    pub aggressive: bool,
    pub decision: &'a str,
}

impl EventRecord<'_> {
    pub fn write_to<W: fmt::Write>(&self, w: &mut W) -> fmt::Result {
        write!(w, "{} inj_id={} pid={} comm=", RECORD_PREFIX, self.id, self.pid)?;
        write_token(w, self.label)?;
        w.write_str(" symbol=")?;
        write_token(w, self.target)?;
        write!(w, " old_ret={} new_ret=", self.natural)?;
        match self.replaced {
            Some(outcome) => write!(w, "{}", outcome)?,
            None => w.write_char('-')?,
        }
        writeln!(
            w,
            " ts_ns={} aggressive={} decision={}",
            self.timestamp_ns,
            u8::from(self.aggressive),
            self.decision
        )
    }
}

/// Keeps free-form fields as a single `key=value` token.
fn write_token<W: fmt::Write>(w: &mut W, s: &str) -> fmt::Result {
    if s.is_empty() {
        return w.write_char('?');
    }
    for c in s.chars() {
        if c.is_whitespace() || c == '=' || c.is_control() {
            w.write_char('_')?;
        } else {
            w.write_char(c)?;
        }
    }
    Ok(())
}

/// Owned form of a record read back from a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
    pub id: u64,
    pub pid: u32,
    pub label: String,
    pub target: String,
    pub old_ret: i64,
    pub new_ret: Option<i64>,
    pub timestamp_ns: u64,
    pub aggressive: bool,
    pub decision: String,
}

impl ParsedEvent {
    /// Parses one record line; anything that is not a complete record is `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.trim().strip_prefix(RECORD_PREFIX)?;

        let mut id = None;
        let mut pid = None;
        let mut label = None;
        let mut target = None;
        let mut old_ret = None;
        let mut new_ret = None;
        let mut timestamp_ns = None;
        let mut aggressive = None;
        let mut decision = None;

        for token in rest.split_whitespace() {
            let (key, value) = token.split_once('=')?;
            match key {
                "inj_id" => id = value.parse().ok(),
                "pid" => pid = value.parse().ok(),
                "comm" => label = Some(value.to_string()),
                "symbol" => target = Some(value.to_string()),
                "old_ret" => old_ret = value.parse().ok(),
                "new_ret" => {
                    new_ret = Some(if value == "-" {
                        None
                    } else {
                        Some(value.parse().ok()?)
                    })
                }
                "ts_ns" => timestamp_ns = value.parse().ok(),
                "aggressive" => aggressive = Some(value == "1"),
                "decision" => decision = Some(value.to_string()),
                _ => {}
            }
        }

        Some(Self {
            id: id?,
            pid: pid?,
            label: label?,
            target: target?,
            old_ret: old_ret?,
            new_ret: new_ret?,
            timestamp_ns: timestamp_ns?,
            aggressive: aggressive?,
            decision: decision?,
        })
    }

    pub fn is_override(&self) -> bool {
        self.decision == "override"
    }
}

/// Destination for event records. `emit` must not block and must not fail:
/// a sink that cannot accept a record drops it.
pub trait EventSink: Send + Sync {
    fn emit(&self, record: &[u8]);
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _record: &[u8]) {}
}

/// Writes records to a file descriptor with a single `write(2)`. Short writes,
/// `EAGAIN` and closed descriptors lose the record.
#[derive(Debug)]
pub struct FdSink {
    fd: RawFd,
    owned: bool,
}

impl FdSink {
    pub fn stderr() -> Self {
        Self {
            fd: libc::STDERR_FILENO,
            owned: false,
        }
    }

    /// Opens `path` for appending in non-blocking mode.
    pub fn append(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o644)
            .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
            .open(path)?;
        Ok(Self {
            fd: file.into_raw_fd(),
            owned: true,
        })
    }
}

impl EventSink for FdSink {
    fn emit(&self, record: &[u8]) {
        // Safety: the pointer/length pair describes a live slice.
        let _ = unsafe { libc::write(self.fd, record.as_ptr().cast(), record.len()) };
    }
}

impl Drop for FdSink {
    fn drop(&mut self) {
        if self.owned {
            // Safety: we own this descriptor and nothing else closes it.
            unsafe { libc::close(self.fd) };
        }
    }
}

/// Fixed-size in-memory ring of recent record bytes.
///
/// Writers reserve disjoint byte ranges with one `fetch_add`; once the ring
/// wraps, the oldest bytes are overwritten.
pub struct RingSink {
    buffer: Box<[AtomicU8]>,
    head: AtomicUsize,
}

impl RingSink {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: (0..capacity).map(|_| AtomicU8::new(0)).collect(),
            head: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes ever written, including overwritten ones.
    pub fn written(&self) -> usize {
        self.head.load(Ordering::Acquire)
    }

    /// Oldest-to-newest copy of the retained bytes.
    pub fn contents(&self) -> Vec<u8> {
        let head = self.head.load(Ordering::Acquire);
        let cap = self.capacity();
        let start = head.saturating_sub(cap);
        (start..head)
            .map(|i| self.buffer[i % cap].load(Ordering::Relaxed))
            .collect()
    }

    /// Complete record lines currently retained.
    pub fn lines(&self) -> Vec<String> {
        let head = self.head.load(Ordering::Acquire);
        let bytes = self.contents();
        let text = String::from_utf8_lossy(&bytes);
        let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
        // After a wrap the first retained line is usually partial.
        if head > self.capacity() && !lines.is_empty() {
            lines.remove(0);
        }
        lines
    }
}

impl EventSink for RingSink {
    fn emit(&self, record: &[u8]) {
        let cap = self.capacity();
        if record.len() > cap {
            return;
        }
        let start = self.head.fetch_add(record.len(), Ordering::AcqRel);
        for (i, byte) in record.iter().enumerate() {
            self.buffer[(start + i) % cap].store(*byte, Ordering::Relaxed);
        }
    }
}
