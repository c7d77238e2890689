use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use icns::{IconFamily, IconType};

use super::{system_time_millis, Platform};
use crate::error::{AppIndexError, Result};
use crate::types::BundleTimestamps;

/// File-system timestamps and in-process `.icns` decoding.
///
/// Used where Spotlight and `iconutil` are not available. The last-used
/// time is approximated by the access time.
#[derive(Debug, Default)]
pub struct PortablePlatform;

impl PortablePlatform {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Platform for PortablePlatform {
    fn id(&self) -> &str {
        "portable"
    }

    async fn bundle_timestamps(&self, bundle: &Path) -> Result<BundleTimestamps> {
        let metadata = tokio::fs::metadata(bundle).await.map_err(|error| {
            AppIndexError::Metadata(format!(
                "unable to read metadata of {}: {error}",
                bundle.display()
            ))
        })?;
        Ok(BundleTimestamps {
            created: metadata.created().map(system_time_millis).unwrap_or(0),
            opened: metadata.accessed().map(system_time_millis).unwrap_or(0),
        })
    }

    async fn convert_icon_set(&self, icon_set: &Path, output_dir: &Path) -> Result<()> {
        let icon_set = icon_set.to_path_buf();
        let output_dir = output_dir.to_path_buf();
        let guard = CancelOnDrop::default();
        let cancelled = guard.0.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            write_icns_variants(&icon_set, &output_dir, &cancelled)
        })
        .await;
        drop(guard);
        outcome
            .map_err(|error| AppIndexError::Internal(format!("icon decode task failed: {error}")))?
    }
}

/// Tells the blocking decode to stop once the awaiting future is gone.
#[derive(Default)]
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Removes whatever was written so far once the caller has given up.
fn stop_if_cancelled(cancelled: &AtomicBool, output_dir: &Path) -> Result<()> {
    if !cancelled.load(Ordering::SeqCst) {
        return Ok(());
    }
    match fs::remove_dir_all(output_dir) {
        Ok(()) => {}
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => log::debug!("failed to remove {}: {error}", output_dir.display()),
    }
    Err(AppIndexError::IconConversion(format!(
        "conversion into {} cancelled",
        output_dir.display()
    )))
}

/// Decodes every image in `icon_set` into `output_dir` using the
/// `icon_<w>x<h>[@2x].png` names `iconutil` produces.
///
/// Checks `cancelled` between writes; a cancelled decode leaves no
/// `output_dir` behind.
fn write_icns_variants(icon_set: &Path, output_dir: &Path, cancelled: &AtomicBool) -> Result<()> {
    let file = File::open(icon_set)?;
    let family = IconFamily::read(BufReader::new(file)).map_err(|error| {
        AppIndexError::IconConversion(format!(
            "failed to read icon family {}: {error}",
            icon_set.display()
        ))
    })?;

    stop_if_cancelled(cancelled, output_dir)?;
    fs::create_dir_all(output_dir)?;
    let mut written = 0usize;
    for icon_type in family.available_icons() {
        stop_if_cancelled(cancelled, output_dir)?;
        let Ok(image) = family.get_icon_with_type(icon_type) else {
            continue;
        };
        let target = output_dir.join(variant_file_name(icon_type));
        let output = BufWriter::new(File::create(&target)?);
        match image.write_png(output) {
            Ok(()) => written += 1,
            Err(error) => {
                log::debug!("skipping icon variant {}: {error}", target.display());
                let _ = fs::remove_file(&target);
            }
        }
    }
    stop_if_cancelled(cancelled, output_dir)?;

    if written == 0 {
        return Err(AppIndexError::IconConversion(format!(
            "no decodable images in {}",
            icon_set.display()
        )));
    }
    Ok(())
}

fn variant_file_name(icon_type: IconType) -> PathBuf {
    let (width, height) = (icon_type.screen_width(), icon_type.screen_height());
    match icon_type.pixel_density() {
        1 => PathBuf::from(format!("icon_{width}x{height}.png")),
        density => PathBuf::from(format!("icon_{width}x{height}@{density}x.png")),
    }
}
