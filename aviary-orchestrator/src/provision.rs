//! Installer-source provisioning collaborator.
//!
//! Fetching or producing the installation image is owned by an external
//! component; the core only asks for a local path and treats failure as
//! fatal to the calling operation.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::OrchestratorError;

/// Supplies the installation source image on demand.
#[async_trait]
pub trait ImageProvisioner: Send + Sync {
    /// Ensure the installation image exists locally and return its path.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::Provisioning`] when the image cannot
    /// be made available.
    async fn ensure_install_image(&self) -> Result<PathBuf, OrchestratorError>;
}

/// Provisioner over an image that must already be present on disk.
///
/// The production deployment wires a downloading implementation in the
/// host application; the core only needs the seam.
pub struct LocalImageProvisioner {
    path: PathBuf,
}

impl LocalImageProvisioner {
    /// Wrap a local image path.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ImageProvisioner for LocalImageProvisioner {
    async fn ensure_install_image(&self) -> Result<PathBuf, OrchestratorError> {
        if self.path.exists() {
            Ok(self.path.clone())
        } else {
            Err(OrchestratorError::Provisioning(format!(
                "installation image not found at {}",
                self.path.display()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_provisioner_requires_existing_image() {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => panic!("tempdir: {e}"),
        };
        let path = dir.path().join("android.iso");

        let missing = LocalImageProvisioner::new(path.clone());
        assert!(
            matches!(
                missing.ensure_install_image().await,
                Err(OrchestratorError::Provisioning(_))
            ),
            "a missing image must be a fatal provisioning error"
        );

        if let Err(e) = tokio::fs::write(&path, b"iso").await {
            panic!("write: {e}");
        }
        let present = LocalImageProvisioner::new(path.clone());
        match present.ensure_install_image().await {
            Ok(p) => assert_eq!(p, path),
            Err(e) => panic!("present image must resolve: {e}"),
        }
    }
}
