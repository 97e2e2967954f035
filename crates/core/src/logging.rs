//! Logging for the interpreter core.
//!
//! The core does not depend on a logging backend. Messages go through one
//! global, atomically configured [`LogConfig`] and are written to stderr, or
//! appended to a file once [`LogConfig::set_log_file`] has been called.
//!
//! - **LogLevel**: Off < Error < Warn < Info < Debug < Trace
//! - **LogCategory**: CPU (instruction trace), Bus (memory faults), IO (port
//!   traffic), Stubs (unimplemented opcodes and addressing modes)
//! - **log()**: lazily formatted, level checked and rate limited output
//!
//! # Usage
//!
//! ```rust
//! use px86_core::logging::{log, LogCategory, LogLevel};
//!
//! // The closure only runs when CPU/Debug is enabled
//! log(LogCategory::CPU, LogLevel::Debug, || {
//!     format!("CPU: CALL to EIP={:08X}", 0x7C10)
//! });
//! ```

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};

/// Log level for controlling verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    const ALL: [LogLevel; 6] = [
        LogLevel::Off,
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    /// Parse a level name or its number (case-insensitive)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn from_u8(val: u8) -> Self {
        Self::ALL
            .get(val as usize)
            .copied()
            .unwrap_or(LogLevel::Off)
    }
}

/// Log category for the interpreter components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// CPU execution (instruction trace, end of program)
    CPU,
    /// Memory access faults and image loading
    Bus,
    /// Port I/O traffic
    IO,
    /// Unimplemented opcodes and addressing modes
    Stubs,
}

const CATEGORY_COUNT: usize = 4;

impl LogCategory {
    pub const ALL: [LogCategory; CATEGORY_COUNT] = [
        LogCategory::CPU,
        LogCategory::Bus,
        LogCategory::IO,
        LogCategory::Stubs,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

const RATE_WINDOW: Duration = Duration::from_secs(1);

/// What the rate limiter decided for one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Pass,
    /// Passed, and this many earlier messages were dropped since the last pass
    PassAfterDrops(usize),
    Drop,
}

/// Messages admitted during the last second for one category
#[derive(Default)]
struct Window {
    admitted: VecDeque<Instant>,
    dropped: usize,
}

/// Per-category sliding window rate limiter. A limit of 0 admits everything,
/// which is what the instruction trace needs.
struct RateLimiter {
    max_per_second: AtomicUsize,
    windows: Mutex<[Window; CATEGORY_COUNT]>,
}

impl RateLimiter {
    fn new(max_per_second: usize) -> Self {
        Self {
            max_per_second: AtomicUsize::new(max_per_second),
            windows: Mutex::new(Default::default()),
        }
    }

    fn admit(&self, category: LogCategory) -> Admission {
        let max = self.max_per_second.load(Ordering::Relaxed);
        if max == 0 {
            return Admission::Pass;
        }

        let now = Instant::now();
        let mut windows = lock(&self.windows);
        let window = &mut windows[category.index()];

        while window
            .admitted
            .front()
            .is_some_and(|&t| now.duration_since(t) > RATE_WINDOW)
        {
            window.admitted.pop_front();
        }

        if window.admitted.len() >= max {
            window.dropped += 1;
            return Admission::Drop;
        }

        window.admitted.push_back(now);
        match std::mem::take(&mut window.dropped) {
            0 => Admission::Pass,
            n => Admission::PassAfterDrops(n),
        }
    }
}

/// Where log lines go
enum Sink {
    Stderr,
    File(LineWriter<File>),
}

/// Global logging configuration
pub struct LogConfig {
    global_level: AtomicU8,
    /// Per-category overrides; Off means "use the global level"
    category_levels: [AtomicU8; CATEGORY_COUNT],
    sink: Mutex<Sink>,
    rate_limiter: RateLimiter,
}

impl LogConfig {
    /// Everything off, stderr output, 60 messages per second per category
    fn new() -> Self {
        Self {
            global_level: AtomicU8::new(LogLevel::Off as u8),
            category_levels: Default::default(),
            sink: Mutex::new(Sink::Stderr),
            rate_limiter: RateLimiter::new(60),
        }
    }

    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<LogConfig> = OnceLock::new();
        INSTANCE.get_or_init(LogConfig::new)
    }

    pub fn set_global_level(&self, level: LogLevel) {
        self.global_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn get_global_level(&self) -> LogLevel {
        LogLevel::from_u8(self.global_level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, category: LogCategory, level: LogLevel) {
        self.category_levels[category.index()].store(level as u8, Ordering::Relaxed);
    }

    pub fn get_level(&self, category: LogCategory) -> LogLevel {
        LogLevel::from_u8(self.category_levels[category.index()].load(Ordering::Relaxed))
    }

    /// A category level other than Off wins; otherwise the global level decides
    pub fn should_log(&self, category: LogCategory, level: LogLevel) -> bool {
        let limit = match self.get_level(category) {
            LogLevel::Off => self.get_global_level(),
            category_level => category_level,
        };
        level <= limit
    }

    /// Turn every level back to Off
    pub fn reset(&self) {
        self.set_global_level(LogLevel::Off);
        for category in LogCategory::ALL {
            self.set_level(category, LogLevel::Off);
        }
    }

    /// Maximum messages per second per category (0 = unlimited)
    pub fn set_rate_limit(&self, max_per_second: usize) {
        self.rate_limiter
            .max_per_second
            .store(max_per_second, Ordering::Relaxed);
    }

    pub fn get_rate_limit(&self) -> usize {
        self.rate_limiter.max_per_second.load(Ordering::Relaxed)
    }

    /// Append log lines to `path` instead of stderr
    pub fn set_log_file(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *lock(&self.sink) = Sink::File(LineWriter::new(file));
        Ok(())
    }

    fn write_line(&self, message: &str) {
        let mut sink = lock(&self.sink);
        if let Sink::File(file) = &mut *sink {
            if writeln!(file, "{}", message).is_ok() {
                return;
            }
        }
        eprintln!("{}", message);
    }

    fn emit<F>(&self, category: LogCategory, level: LogLevel, message_fn: F)
    where
        F: FnOnce() -> String,
    {
        if !self.should_log(category, level) {
            return;
        }
        match self.rate_limiter.admit(category) {
            Admission::Drop => {}
            Admission::Pass => self.write_line(&message_fn()),
            Admission::PassAfterDrops(count) => {
                self.write_line(&format!(
                    "[{:?}] rate limit: {} message(s) dropped",
                    category, count
                ));
                self.write_line(&message_fn());
            }
        }
    }
}

/// Log a message with the specified category and level
///
/// The closure is only called when the category/level is enabled and the
/// rate limiter admits the message. By default at most 60 messages per
/// second are written per category; the next admitted message is preceded
/// by a line counting the dropped ones. `LogConfig::set_rate_limit(0)`
/// lifts the limit.
///
/// ```rust
/// use px86_core::logging::{log, LogCategory, LogLevel};
///
/// log(LogCategory::IO, LogLevel::Trace, || {
///     format!("IO: OUT {:04X} <- {:02X}", 0x3F8, b'A')
/// });
/// ```
pub fn log<F>(category: LogCategory, level: LogLevel, message_fn: F)
where
    F: FnOnce() -> String,
{
    LogConfig::global().emit(category, level, message_fn);
}
