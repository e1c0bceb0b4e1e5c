//! Logging backend selection.
//!
//! Library code logs through the `log` facade; the binary picks a backend with
//! the `use_tracing_subscriber` (default) or `use_env_logger` feature.

#[cfg(feature = "use_env_logger")]
pub mod env_logger;
#[cfg(feature = "use_tracing_subscriber")]
pub mod tracing;

use crate::DynError;

const LIB_CRATE: &str = "spa_backend";

/// Filter used when `RUST_LOG` is not set.
pub fn default_directive(crate_name: &str, level: &str) -> String {
    if crate_name == LIB_CRATE {
        format!("{crate_name}={level},tower_http=warn")
    } else {
        format!("{crate_name}={level},{LIB_CRATE}={level},tower_http=warn")
    }
}

#[cfg(feature = "use_tracing_subscriber")]
pub fn init(crate_name: &str, level: &str) -> Result<(), DynError> {
    tracing::init(crate_name, level)
}

#[cfg(all(feature = "use_env_logger", not(feature = "use_tracing_subscriber")))]
pub fn init(crate_name: &str, level: &str) -> Result<(), DynError> {
    env_logger::init(crate_name, level);
    Ok(())
}

#[cfg(not(any(feature = "use_env_logger", feature = "use_tracing_subscriber")))]
pub fn init(_crate_name: &str, _level: &str) -> Result<(), DynError> {
    Ok(())
}
