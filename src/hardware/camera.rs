//! Camera backed by a snapshot file
//!
//! The camera tool on the device writes its latest still to a fixed path;
//! capturing reads that file and names the artifact after the capture time.

use super::CaptureDevice;
use crate::protocol::ImageArtifact;
use async_trait::async_trait;
use chrono::Local;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Reads the most recent JPEG produced by an external camera tool
#[derive(Debug, Clone)]
pub struct SnapshotCamera {
    snapshot_path: Option<PathBuf>,
}

impl SnapshotCamera {
    /// A camera without a snapshot source never produces an artifact
    pub fn new(snapshot_path: Option<PathBuf>) -> Self {
        Self { snapshot_path }
    }

    /// `smartfarm_YYYYMMDD_HHMMSS.jpg` in local time
    pub fn artifact_filename() -> String {
        Local::now().format("smartfarm_%Y%m%d_%H%M%S.jpg").to_string()
    }
}

#[async_trait]
impl CaptureDevice for SnapshotCamera {
    async fn capture(&self) -> Option<ImageArtifact> {
        let Some(path) = &self.snapshot_path else {
            debug!("No camera configured, capture skipped");
            return None;
        };

        match tokio::fs::read(path).await {
            Ok(bytes) if bytes.is_empty() => {
                warn!(component = "camera", operation = "capture", path = %path.display(), "Snapshot file is empty");
                None
            }
            Ok(bytes) => Some(ImageArtifact {
                filename: Self::artifact_filename(),
                bytes,
            }),
            Err(e) => {
                warn!(
                    component = "camera",
                    operation = "capture",
                    path = %path.display(),
                    error = %e,
                    "Failed to read snapshot"
                );
                None
            }
        }
    }
}
