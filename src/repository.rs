use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::Error;

pub const INTERNAL_FOLDER: &str = ".bireus";
pub const PATCHES_SUBFOLDER: &str = "__patches__";
pub const TEMP_SUBFOLDER: &str = "__temp__";
pub const INFO_FILE: &str = "info.json";
pub const VERSIONS_FILE: &str = "versions.gml";

/// Persisted repository descriptor (`.bireus/info.json`) plus derived
/// path and URL accessors.
///
/// `current_version` always names the version the local checkout actually
/// reflects; the orchestration persists it after every completed hop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    #[serde(skip)]
    root: PathBuf,
    pub name: String,
    pub first_version: String,
    pub latest_version: String,
    pub current_version: String,
    #[serde(rename = "protocol")]
    pub protocol_version: u32,
    pub url: String,
    #[serde(default)]
    pub strategy: String,
}

impl Repository {
    /// Load the descriptor from `<root>/.bireus/info.json`.
    pub fn load(root: &Path) -> Result<Self, Error> {
        let info_path = root.join(INTERNAL_FOLDER).join(INFO_FILE);
        trace!(path = %info_path.display(), "loading repository descriptor");

        let bytes = std::fs::read(&info_path)?;
        let mut repository: Repository = serde_json::from_slice(&bytes)?;
        repository.root = root.to_path_buf();
        Ok(repository)
    }

    /// Rewrite `<root>/.bireus/info.json` with the current state.
    /// Called synchronously after every successful hop, never batched.
    pub fn save(&self) -> Result<(), Error> {
        trace!(path = %self.info_path().display(), "rewriting repository descriptor");
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(self.info_path(), json)?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn internal_path(&self) -> PathBuf {
        self.root.join(INTERNAL_FOLDER)
    }

    pub fn info_path(&self) -> PathBuf {
        self.internal_path().join(INFO_FILE)
    }

    pub fn version_graph_path(&self) -> PathBuf {
        self.internal_path().join(VERSIONS_FILE)
    }

    pub fn patches_path(&self) -> PathBuf {
        self.internal_path().join(PATCHES_SUBFOLDER)
    }

    pub fn temp_path(&self) -> PathBuf {
        self.internal_path().join(TEMP_SUBFOLDER)
    }

    pub fn patch_file_name(from_version: &str, to_version: &str) -> String {
        format!("{from_version}_to_{to_version}.tar.xz")
    }

    /// Local cache location of one hop's patch archive.
    pub fn patch_path(&self, from_version: &str, to_version: &str) -> PathBuf {
        self.patches_path()
            .join(Self::patch_file_name(from_version, to_version))
    }

    pub fn remote_info_url(&self) -> String {
        join_url(&self.url, &[INFO_FILE])
    }

    pub fn remote_version_graph_url(&self) -> String {
        join_url(&self.url, &[VERSIONS_FILE])
    }

    pub fn remote_patch_url(&self, from_version: &str, to_version: &str) -> String {
        join_url(
            &self.url,
            &[
                PATCHES_SUBFOLDER,
                &Self::patch_file_name(from_version, to_version),
            ],
        )
    }

    /// Authoritative location of a single file at `version`, used by the
    /// CRC fallback re-download.
    pub fn remote_file_url(&self, version: &str, relative_path: &str) -> String {
        join_url(&self.url, &[version, relative_path])
    }
}

fn join_url(base: &str, parts: &[&str]) -> String {
    let mut url = base.trim_end_matches('/').to_string();
    for part in parts {
        url.push('/');
        url.push_str(part.trim_matches('/'));
    }
    url
}
