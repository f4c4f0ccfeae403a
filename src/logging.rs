//! Unified Logging Macros
//!
//! This module provides a unified logging interface that automatically
//! selects between `log::` and `defmt::` based on the active feature flags.
//!
//! # Usage
//!
//! ```rust,ignore
//! knx_log!(info, "Connection established");
//! knx_log!(debug, "Received {} bytes", n);
//! knx_log!(warn, "Timeout occurred");
//! ```
//!
//! # Feature Flags
//!
//! - No feature - Uses the `log` facade (default for hosted targets)
//! - `defmt` - Uses `defmt::` instead (for embedded targets)

/// Unified logging macro - automatically selects log:: or defmt:: based on features
///
/// This macro provides a consistent logging API across the entire crate,
/// regardless of which logging backend is configured at compile time.
#[macro_export]
#[cfg(not(feature = "defmt"))]
macro_rules! knx_log {
    (info, $($arg:tt)*) => { log::info!($($arg)*) };
    (debug, $($arg:tt)*) => { log::debug!($($arg)*) };
    (warn, $($arg:tt)*) => { log::warn!($($arg)*) };
    (error, $($arg:tt)*) => { log::error!($($arg)*) };
    (trace, $($arg:tt)*) => { log::trace!($($arg)*) };
}

#[macro_export]
#[cfg(feature = "defmt")]
macro_rules! knx_log {
    (info, $($arg:tt)*) => { defmt::info!($($arg)*) };
    (debug, $($arg:tt)*) => { defmt::debug!($($arg)*) };
    (warn, $($arg:tt)*) => { defmt::warn!($($arg)*) };
    (error, $($arg:tt)*) => { defmt::error!($($arg)*) };
    (trace, $($arg:tt)*) => { defmt::trace!($($arg)*) };
}
