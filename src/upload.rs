//! Scoped staging of uploaded files.
//!
//! An upload lives in `<upload_dir>/<uuid>` only for the request that created
//! it. [`StagedUpload`] removes the file when dropped, so every exit path of a
//! handler releases it; `cleanup` does the same asynchronously.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use axum::extract::multipart::Field;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug)]
pub struct StagedUpload {
    path: PathBuf,
    len: u64,
    removed: bool,
}

impl StagedUpload {
    /// Streams a multipart field to a fresh file under `dir`, failing once the
    /// field grows past `max_bytes`.
    pub async fn from_field(
        dir: &Path,
        max_bytes: u64,
        mut field: Field<'_>,
    ) -> Result<Self, ApiError> {
        tokio::fs::create_dir_all(dir).await.map_err(|error| {
            ApiError::internal(format!("Could not prepare the upload directory: {error}"))
        })?;

        let mut staged = Self {
            path: dir.join(Uuid::new_v4().to_string()),
            len: 0,
            removed: false,
        };

        let mut file = tokio::fs::File::create(&staged.path).await.map_err(|error| {
            ApiError::internal(format!("Could not stage the uploaded file: {error}"))
        })?;

        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|error| ApiError::bad_request(format!("Upload was interrupted: {error}")))?
        {
            staged.len += chunk.len() as u64;
            if staged.len > max_bytes {
                return Err(ApiError::bad_request(format!(
                    "Uploaded file exceeds the limit of {max_bytes} bytes."
                )));
            }

            file.write_all(&chunk).await.map_err(|error| {
                ApiError::internal(format!("Could not write the uploaded file: {error}"))
            })?;
        }

        file.flush().await.map_err(|error| {
            ApiError::internal(format!("Could not write the uploaded file: {error}"))
        })?;

        debug!("Staged upload of {} bytes at {:?}", staged.len, staged.path);
        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub async fn cleanup(mut self) {
        self.removed = true;
        if let Err(error) = tokio::fs::remove_file(&self.path).await
            && error.kind() != ErrorKind::NotFound
        {
            warn!("Could not remove staged upload {:?}: {error}", self.path);
        }
    }
}

// Fallback for early returns; handlers remove uploads with `cleanup().await`.
impl Drop for StagedUpload {
    fn drop(&mut self) {
        if self.removed {
            return;
        }

        if let Err(error) = std::fs::remove_file(&self.path)
            && error.kind() != ErrorKind::NotFound
        {
            warn!("Could not remove staged upload {:?}: {error}", self.path);
        }
    }
}

/// Removes staged uploads older than `older_than` left behind by a previous
/// process.
pub async fn cleanup_stale_uploads(upload_dir: &Path, older_than: Duration) {
    let mut entries = match tokio::fs::read_dir(upload_dir).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("Could not open upload directory for cleanup: {error}");
            }
            return;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0usize;

    loop {
        let maybe_entry = match entries.next_entry().await {
            Ok(value) => value,
            Err(error) => {
                warn!("Could not iterate upload directory for cleanup: {error}");
                break;
            }
        };

        let Some(entry) = maybe_entry else {
            break;
        };

        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(error) => {
                warn!("Could not read metadata of {:?}: {error}", path);
                continue;
            }
        };

        if !metadata.is_file() {
            continue;
        }

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified_at| now.duration_since(modified_at).ok())
            .unwrap_or_default();
        if age < older_than {
            continue;
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!("Could not remove stale upload {:?}: {error}", path),
        }
    }

    if removed > 0 {
        info!("Removed {removed} stale upload(s) from {:?}", upload_dir);
    }
}
