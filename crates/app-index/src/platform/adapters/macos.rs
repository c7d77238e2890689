use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use chrono::DateTime;
use tokio::process::Command;

use super::Platform;
use crate::error::{AppIndexError, Result};
use crate::types::BundleTimestamps;

const CREATION_DATE_ATTR: &str = "kMDItemFSCreationDate";
const LAST_USED_DATE_ATTR: &str = "kMDItemLastUsedDate";

/// Spotlight metadata through `mdls` and icon sets through `iconutil`.
#[derive(Debug, Default)]
pub struct MacosPlatform;

impl MacosPlatform {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Platform for MacosPlatform {
    fn id(&self) -> &str {
        "macos"
    }

    async fn bundle_timestamps(&self, bundle: &Path) -> Result<BundleTimestamps> {
        let output = Command::new("mdls")
            .arg("-raw")
            .arg("-name")
            .arg(CREATION_DATE_ATTR)
            .arg("-name")
            .arg(LAST_USED_DATE_ATTR)
            .arg(bundle)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|error| AppIndexError::Metadata(format!("failed to execute mdls: {error}")))?;
        let stdout = check_output("mdls", output).map_err(AppIndexError::Metadata)?;
        Ok(parse_mdls_raw(&stdout))
    }

    async fn convert_icon_set(&self, icon_set: &Path, output_dir: &Path) -> Result<()> {
        let output = Command::new("iconutil")
            .arg("--convert")
            .arg("iconset")
            .arg(icon_set)
            .arg("--output")
            .arg(output_dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|error| {
                AppIndexError::IconConversion(format!("failed to execute iconutil: {error}"))
            })?;
        check_output("iconutil", output).map_err(AppIndexError::IconConversion)?;
        Ok(())
    }
}

fn check_output(program: &str, output: Output) -> std::result::Result<String, String> {
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(format!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

/// Parses `mdls -raw` output: values in request order, NUL separated,
/// `(null)` for missing attributes.
fn parse_mdls_raw(stdout: &str) -> BundleTimestamps {
    let mut values = stdout.split('\0');
    let created = values.next().and_then(parse_mdls_date).unwrap_or(0);
    let opened = values.next().and_then(parse_mdls_date).unwrap_or(0);
    BundleTimestamps { created, opened }
}

fn parse_mdls_date(value: &str) -> Option<i64> {
    DateTime::parse_from_str(value.trim(), "%Y-%m-%d %H:%M:%S %z")
        .ok()
        .map(|date| date.timestamp_millis())
}
