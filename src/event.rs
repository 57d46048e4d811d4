use std::path::Path;

use crate::version_graph::PatchHop;

/// One-way progress notifications emitted during a checkout.
///
/// Every hook has a no-op default body, so implementors only override what
/// they care about; the engine behaves identically under a listener that
/// overrides nothing.
#[allow(unused_variables)]
pub trait PatchEventListener {
    fn error(&self, message: &str) {}

    fn begin_checkout_version(&self, version: &str) {}
    fn finish_checkout_version(&self, version: &str) {}
    fn checked_out_already(&self, version: &str) {}
    fn version_unknown(&self, version: &str) {}
    fn no_patch_path(&self, version: &str) {}
    fn found_patch_path(&self, hops: &[PatchHop]) {}

    fn begin_apply_patch(&self, from_version: &str, to_version: &str) {}
    fn finish_apply_patch(&self, from_version: &str, to_version: &str) {}

    fn begin_download_patch(&self, url: &str) {}
    fn finish_download_patch(&self, url: &str) {}

    fn begin_patching_file(&self, path: &Path) {}
    fn finish_patching_file(&self, path: &Path) {}
    fn begin_patching_directory(&self, path: &Path) {}
    fn finish_patching_directory(&self, path: &Path) {}

    fn crc_mismatch(&self, path: &Path) {}
}

/// Listener that ignores every notification.
pub struct NullEventListener;

impl PatchEventListener for NullEventListener {}
