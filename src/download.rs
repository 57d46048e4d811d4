use std::io::Write;
use std::path::Path;

use tracing::debug;

use crate::error::DownloadError;

/// Transport collaborator. The engine never retries; failed transfers
/// surface as [`DownloadError`] and abort the hop.
pub trait DownloadService {
    /// Fetch `url` into the file at `dest` (parent directories are created).
    fn download(&self, url: &str, dest: &Path) -> Result<(), DownloadError>;

    /// Fetch `url` into memory.
    fn read(&self, url: &str) -> Result<Vec<u8>, DownloadError>;
}

/// Blocking HTTP implementation over reqwest.
pub struct HttpDownloadService {
    client: reqwest::blocking::Client,
}

impl HttpDownloadService {
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
        }
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        debug!(url, "fetching");
        let response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| DownloadError::new(url, e))?;
        let bytes = response.bytes().map_err(|e| DownloadError::new(url, e))?;
        Ok(bytes.to_vec())
    }
}

impl Default for HttpDownloadService {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadService for HttpDownloadService {
    fn download(&self, url: &str, dest: &Path) -> Result<(), DownloadError> {
        let bytes = self.fetch(url)?;

        let write = || -> std::io::Result<()> {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::File::create(dest)?;
            file.write_all(&bytes)?;
            file.flush()
        };
        write().map_err(|e| DownloadError::new(url, e))
    }

    fn read(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        self.fetch(url)
    }
}
