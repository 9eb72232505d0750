//! Logging macros gated on a module-level `ENABLE_LOGS` flag.
//!
//! Background loops log on every tick; the flag lets a module go quiet without touching
//! the global `RUST_LOG` filter. A module opts in with:
//!
//! ```text
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_debug, log_error, log_info, log_warn};
//! ```

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
