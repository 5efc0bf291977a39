//! Logging macros for consistent output across the engine.
//!
//! # Macros
//!
//! - `verbose!()` - Debug info, only shown when verbose mode enabled
//! - `info!()` - General information messages
//! - `warn!()` - Warning messages
//! - `error!()` - Error messages
//!
//! Job id and chunk index are folded into the formatted message by callers
//! (e.g. `info!("job {job_id} chunk {index} completed")`) rather than carried
//! as structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use transcribe_core::{verbose, info, warn, error};
//!
//! verbose!("backoff delay: {}ms", delay_ms);  // Only if set_verbose(true)
//! info!("job {} chunking complete: {} chunks", job_id, total);
//! warn!("chunk {} retry {} of {}", index, attempt, max);
//! error!("job {} failed: {}", job_id, err);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Enable or disable verbose logging
pub fn set_verbose(enabled: bool) {
    VERBOSE.store(enabled, Ordering::SeqCst);
}

/// Check if verbose logging is enabled
pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::SeqCst)
}

/// Log a formatted message if verbose mode is enabled
#[macro_export]
macro_rules! verbose {
    ($($arg:tt)*) => {
        if $crate::verbose::is_verbose() {
            eprintln!("[verbose] {}", format!($($arg)*));
        }
    };
}

/// Log an info message (always printed)
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        eprintln!("[info] {}", format!($($arg)*));
    };
}

/// Log a warning message (always printed)
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        eprintln!("[warn] {}", format!($($arg)*));
    };
}

/// Log an error message (always printed)
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        eprintln!("[error] {}", format!($($arg)*));
    };
}
