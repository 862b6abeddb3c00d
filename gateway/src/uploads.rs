// ============================================================================
// Upload Spool - per-tenant temporary storage for multipart uploads
// ============================================================================
//
// Incoming files are drained to `<cwd>/<dir>/<tenantId>/<uuid><ext>` while
// the size cap and the extension allow-list are enforced, then forwarded to
// the upstream. The spooled file is removed when the request completes,
// success or failure, via the SpooledFile guard.
//
// ============================================================================

use axum::extract::multipart::Field;
use portico_config::UploadConfig;
use portico_error::GatewayError;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub struct SpoolManager {
    root: PathBuf,
    max_size_bytes: usize,
    allowed_extensions: Vec<String>,
}

/// A spooled upload on disk. Removing the file is tied to this guard's
/// lifetime, which ends with the request.
pub struct SpooledFile {
    pub path: PathBuf,
    pub file_name: String,
    pub content_type: String,
    pub size: usize,
}

impl Drop for SpooledFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove spooled upload");
            }
        }
    }
}

impl SpoolManager {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            root: PathBuf::from(&config.dir),
            max_size_bytes: config.max_size_bytes,
            allowed_extensions: config.allowed_extensions.clone(),
        }
    }

    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    /// Lower-cased extension of the file name, if allowed
    fn validate_extension(&self, file_name: &str) -> Result<String, GatewayError> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        if extension.is_empty() || !self.allowed_extensions.contains(&extension) {
            return Err(GatewayError::BadRequest(format!(
                "File type '{}' is not allowed",
                if extension.is_empty() { "unknown" } else { &extension }
            )));
        }
        Ok(extension)
    }

    /// Drain one multipart field to the tenant's spool directory,
    /// enforcing the size cap chunk by chunk.
    pub async fn spool(
        &self,
        tenant_id: &str,
        mut field: Field<'_>,
    ) -> Result<SpooledFile, GatewayError> {
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::BadRequest("Upload is missing a file name".into()))?;
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let extension = self.validate_extension(&file_name)?;

        let tenant = if tenant_id.is_empty() { "unknown" } else { tenant_id };
        let dir = self.root.join(tenant);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| GatewayError::internal(format!("failed to create spool dir: {}", e)))?;

        let path = dir.join(format!("{}.{}", Uuid::new_v4(), extension));
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| GatewayError::internal(format!("failed to create spool file: {}", e)))?;

        // The guard owns cleanup from here on, including early error returns
        let mut spooled = SpooledFile {
            path,
            file_name,
            content_type,
            size: 0,
        };

        loop {
            let chunk = match field.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    return Err(GatewayError::BadRequest(format!(
                        "Malformed multipart body: {}",
                        e
                    )))
                }
            };

            spooled.size += chunk.len();
            if spooled.size > self.max_size_bytes {
                return Err(GatewayError::PayloadTooLarge(format!(
                    "File exceeds the {} byte limit",
                    self.max_size_bytes
                )));
            }

            file.write_all(&chunk)
                .await
                .map_err(|e| GatewayError::internal(format!("failed to write spool file: {}", e)))?;
        }

        file.flush()
            .await
            .map_err(|e| GatewayError::internal(format!("failed to flush spool file: {}", e)))?;

        Ok(spooled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(max: usize) -> SpoolManager {
        SpoolManager {
            root: std::env::temp_dir().join("portico-spool-test"),
            max_size_bytes: max,
            allowed_extensions: vec!["pdf".into(), "csv".into(), "jpg".into()],
        }
    }

    #[test]
    fn extension_allow_list() {
        let spool = manager(1024);
        assert_eq!(spool.validate_extension("report.pdf").unwrap(), "pdf");
        assert_eq!(spool.validate_extension("DATA.CSV").unwrap(), "csv");

        assert!(spool.validate_extension("malware.exe").is_err());
        assert!(spool.validate_extension("noextension").is_err());
    }

    #[test]
    fn disallowed_extension_is_bad_request() {
        let spool = manager(1024);
        let err = spool.validate_extension("script.sh").unwrap_err();
        assert_eq!(err.error_code(), "ERR_BAD_REQUEST");
    }

    #[tokio::test]
    async fn spooled_file_removed_on_drop() {
        let dir = std::env::temp_dir().join("portico-spool-test").join("t1");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("probe.pdf");
        tokio::fs::write(&path, b"content").await.unwrap();

        {
            let _guard = SpooledFile {
                path: path.clone(),
                file_name: "probe.pdf".into(),
                content_type: "application/pdf".into(),
                size: 7,
            };
        }

        assert!(!path.exists());
    }
}
