//! OS integration behind the [`Platform`] trait.
//!
//! The index only needs two things from the host: bundle timestamps from the
//! metadata layer and conversion of a bundle's icon set into raster variants.

use std::sync::Arc;

mod adapters;
#[cfg(test)]
pub(crate) mod fake;

pub use adapters::{Platform, SharedPlatform};

#[cfg(any(target_os = "macos", test))]
pub use adapters::macos::MacosPlatform;
#[cfg(any(not(target_os = "macos"), test))]
pub use adapters::portable::PortablePlatform;

/// Adapter for the host OS: Spotlight and `iconutil` on macOS, file-system
/// metadata and in-process `.icns` decoding elsewhere.
pub fn default_platform() -> SharedPlatform {
    #[cfg(target_os = "macos")]
    let platform: SharedPlatform = Arc::new(MacosPlatform::new());
    #[cfg(not(target_os = "macos"))]
    let platform: SharedPlatform = Arc::new(PortablePlatform::new());

    log::debug!("app index platform={}", platform.id());
    platform
}
