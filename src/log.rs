//! Process-wide log level and callback hook (spec §4.B).
//!
//! This is a second, independent channel from the crate's internal
//! `tracing` diagnostics: it is the public hook a caller installs to receive
//! exactly the `(level, message)` pairs the spec describes, regardless of
//! whatever `tracing` subscriber (if any) is also active.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use once_cell::sync::OnceCell;

/// Ordered log levels, `None` suppresses everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    /// Logging disabled.
    None = 0,
    /// Errors only.
    Error = 1,
    /// Errors and warnings.
    Warn = 2,
    /// Informational messages.
    Info = 3,
    /// Debug-level detail.
    Debug = 4,
    /// Maximally verbose.
    Spew = 5,
}

impl Level {
    fn from_u8(v: u8) -> Level {
        match v {
            0 => Level::None,
            1 => Level::Error,
            2 => Level::Warn,
            3 => Level::Info,
            4 => Level::Debug,
            _ => Level::Spew,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::None => "none",
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Info => "info",
            Level::Debug => "debug",
            Level::Spew => "spew",
        };
        f.write_str(s)
    }
}

/// A process-wide log callback: `(level, formatted message)`.
pub type LogCallback = Box<dyn Fn(Level, &str) + Send + Sync + 'static>;

static LEVEL: AtomicU8 = AtomicU8::new(Level::Warn as u8);
static CALLBACK: OnceCell<Mutex<Option<LogCallback>>> = OnceCell::new();

fn callback_slot() -> &'static Mutex<Option<LogCallback>> {
    CALLBACK.get_or_init(|| Mutex::new(None))
}

fn lock(slot: &Mutex<Option<LogCallback>>) -> std::sync::MutexGuard<'_, Option<LogCallback>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Read the process-wide log level.
pub fn level() -> Level {
    Level::from_u8(LEVEL.load(Ordering::SeqCst))
}

/// Set the process-wide log level. Atomic; not ordered with concurrent logs.
pub fn set_level(level: Level) {
    LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Install a log callback, replacing any previous one. Atomic.
pub fn set_callback(callback: LogCallback) {
    *lock(callback_slot()) = Some(callback);
}

/// Clear the installed callback, reverting to the default stderr writer.
pub fn clear_callback() {
    *lock(callback_slot()) = None;
}

/// Emit a log line at `msg_level` if it is enabled by the current level.
///
/// If no callback is installed, writes a level-prefixed line to stderr.
pub fn log(msg_level: Level, args: fmt::Arguments<'_>) {
    if msg_level == Level::None || msg_level > level() {
        return;
    }
    let message = args.to_string();
    let guard = lock(callback_slot());
    match guard.as_ref() {
        Some(cb) => cb(msg_level, &message),
        None => eprintln!("{}: {}", msg_level, message),
    }
}

/// Log at `Error` level.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { $crate::log::log($crate::log::Level::Error, format_args!($($arg)*)) };
}
/// Log at `Warn` level.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::log::log($crate::log::Level::Warn, format_args!($($arg)*)) };
}
/// Log at `Info` level.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::log::log($crate::log::Level::Info, format_args!($($arg)*)) };
}
/// Log at `Debug` level.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { $crate::log::log($crate::log::Level::Debug, format_args!($($arg)*)) };
}
/// Log at `Spew` level.
#[macro_export]
macro_rules! log_spew {
    ($($arg:tt)*) => { $crate::log::log($crate::log::Level::Spew, format_args!($($arg)*)) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn level_ordering() {
        assert!(Level::None < Level::Error);
        assert!(Level::Error < Level::Warn);
        assert!(Level::Warn < Level::Info);
        assert!(Level::Info < Level::Debug);
        assert!(Level::Debug < Level::Spew);
    }

    #[test]
    fn callback_receives_enabled_messages() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        set_callback(Box::new(move |_level, msg| {
            seen2.lock().unwrap().push(msg.to_string());
        }));
        set_level(Level::Info);
        log(Level::Info, format_args!("hello {}", 42));
        log(Level::Debug, format_args!("suppressed"));
        assert_eq!(seen.lock().unwrap().as_slice(), ["hello 42"]);
        clear_callback();
        set_level(Level::Warn);
    }
}
