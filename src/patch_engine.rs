use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info};

use crate::archive;
use crate::delta;
use crate::diff_model::{DiffHead, DiffItem, EntryKind, PatchAction};
use crate::download::DownloadService;
use crate::error::Error;
use crate::event::PatchEventListener;
use crate::repository::{self, Repository};
use crate::util;

/// Collaborators threaded through one engine run. Never persisted; scoped
/// to a single hop.
pub struct PatchContext<'a> {
    pub repository: &'a Repository,
    pub download: &'a dyn DownloadService,
    pub listener: &'a dyn PatchEventListener,
    /// The hop's target version, used to address authoritative files for
    /// the CRC fallback.
    pub target_version: &'a str,
}

/// One implementation per wire protocol version.
pub trait PatchEngine {
    fn protocol(&self) -> u32;

    /// Apply one hop's patch archive to the live repository tree.
    fn run(&self, ctx: &PatchContext<'_>, patch_file: &Path) -> Result<(), Error>;
}

/// Explicit protocol-version -> engine mapping, constructed once and
/// injected into the orchestration.
#[derive(Default)]
pub struct PatchEngineRegistry {
    engines: Vec<Box<dyn PatchEngine>>,
}

impl PatchEngineRegistry {
    pub fn new() -> Self {
        Self { engines: Vec::new() }
    }

    pub fn with_default_engines() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(PatchEngineV1));
        registry
    }

    pub fn register(&mut self, engine: Box<dyn PatchEngine>) {
        self.engines.push(engine);
    }

    pub fn get(&self, protocol: u32) -> Option<&dyn PatchEngine> {
        self.engines
            .iter()
            .find(|e| e.protocol() == protocol)
            .map(Box::as_ref)
    }
}

/// Protocol-v1 recursive tree patcher.
///
/// The patched repository is built inside the staging folder by replacing
/// delta payloads with actual file content; the live tree stays intact
/// until the final promotion, so an aborted hop never leaves the checkout
/// half-patched.
pub struct PatchEngineV1;

impl PatchEngine for PatchEngineV1 {
    fn protocol(&self) -> u32 {
        1
    }

    fn run(&self, ctx: &PatchContext<'_>, patch_file: &Path) -> Result<(), Error> {
        let temp_root = ctx.repository.temp_path();
        std::fs::create_dir_all(&temp_root)?;

        let patch_name = patch_file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("patch");
        let staging = util::create_scratch_dir(&temp_root, &format!("{patch_name}_"))?;

        match self.run_staged(ctx, patch_file, &staging) {
            // on success the staging folder has been promoted into place
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = std::fs::remove_dir_all(&staging);
                Err(e)
            }
        }
    }
}

impl PatchEngineV1 {
    fn run_staged(
        &self,
        ctx: &PatchContext<'_>,
        patch_file: &Path,
        staging: &Path,
    ) -> Result<(), Error> {
        info!(
            patch = %patch_file.display(),
            staging = %staging.display(),
            "decompressing patch archive"
        );
        archive::extract_tar_xz(patch_file, staging)?;

        let head_path = staging
            .join(repository::INTERNAL_FOLDER)
            .join(repository::INFO_FILE);
        let head_bytes = std::fs::read(&head_path).map_err(|_| {
            Error::ProtocolMismatch("patch archive carries no embedded patch head".to_string())
        })?;
        let head: DiffHead = serde_json::from_slice(&head_bytes)?;

        if head.protocol != self.protocol() {
            let message = format!(
                "patch protocol version {} does not match engine version {}",
                head.protocol,
                self.protocol()
            );
            ctx.listener.error(&message);
            return Err(Error::ProtocolMismatch(message));
        }

        let root_item = match head.root_item() {
            Ok(root) => root,
            Err(e) => {
                ctx.listener.error(&e.to_string());
                return Err(e);
            }
        };

        // The root node's own name is a container label; patching starts at
        // the repository root itself.
        self.patch_item(ctx, root_item, ctx.repository.root(), staging, false)?;

        self.promote(ctx.repository, staging)
    }

    fn patch_item(
        &self,
        ctx: &PatchContext<'_>,
        item: &DiffItem,
        base: &Path,
        staging: &Path,
        inside_archive: bool,
    ) -> Result<(), Error> {
        match item.kind {
            EntryKind::File => self.patch_file(ctx, item, base, staging, inside_archive),
            EntryKind::Directory => self.patch_directory(ctx, item, base, staging, inside_archive),
        }
    }

    fn patch_directory(
        &self,
        ctx: &PatchContext<'_>,
        item: &DiffItem,
        base: &Path,
        staging: &Path,
        inside_archive: bool,
    ) -> Result<(), Error> {
        debug!(action = ?item.action, directory = %item.name, "patching directory");
        ctx.listener.begin_patching_directory(base);

        match item.action {
            // added subtrees ship in the archive, removed ones are simply absent
            PatchAction::Add | PatchAction::Remove => {}
            PatchAction::Unchanged => util::copy_dir_recursive(base, staging)?,
            PatchAction::Delta => {
                std::fs::create_dir_all(staging)?;
                for child in &item.items {
                    self.patch_item(
                        ctx,
                        child,
                        &base.join(&child.name),
                        &staging.join(&child.name),
                        inside_archive,
                    )?;
                }
            }
            PatchAction::Bsdiff | PatchAction::Zipdelta => {
                return Err(Error::ProtocolMismatch(format!(
                    "directory `{}` carries a file-only action",
                    item.name
                )));
            }
        }

        ctx.listener.finish_patching_directory(base);
        Ok(())
    }

    fn patch_file(
        &self,
        ctx: &PatchContext<'_>,
        item: &DiffItem,
        base: &Path,
        staging: &Path,
        inside_archive: bool,
    ) -> Result<(), Error> {
        debug!(action = ?item.action, file = %item.name, "patching file");
        ctx.listener.begin_patching_file(base);

        match item.action {
            // added files ship in the archive, removed ones are simply absent
            PatchAction::Add | PatchAction::Remove => {}
            PatchAction::Unchanged => {
                // not in the archive; carry the base bytes over verbatim
                std::fs::copy(base, staging)?;
            }
            PatchAction::Bsdiff => {
                self.bsdiff_with_fallback(ctx, item, base, staging, inside_archive)?;
            }
            PatchAction::Zipdelta => {
                self.patch_zip_file(ctx, item, base, staging)?;
            }
            PatchAction::Delta => {
                return Err(Error::ProtocolMismatch(format!(
                    "file `{}` carries the directory-only delta action",
                    item.name
                )));
            }
        }

        ctx.listener.finish_patching_file(base);
        Ok(())
    }

    /// Binary-delta a single file, recovering from an integrity failure by
    /// re-downloading the authoritative bytes once. Inside a nested archive
    /// there is no addressable remote path, so the failure propagates.
    fn bsdiff_with_fallback(
        &self,
        ctx: &PatchContext<'_>,
        item: &DiffItem,
        base: &Path,
        staging: &Path,
        inside_archive: bool,
    ) -> Result<(), Error> {
        match self.bsdiff_file(ctx, item, base, staging) {
            Err(Error::CrcMismatch { .. }) if !inside_archive => {
                info!(file = %base.display(), "crc mismatch, re-downloading authoritative file");

                let relative = base
                    .strip_prefix(ctx.repository.root())
                    .map_err(|_| {
                        Error::Io(io::Error::new(
                            io::ErrorKind::Other,
                            "patched file is outside the repository root",
                        ))
                    })?
                    .to_str()
                    .ok_or_else(|| {
                        Error::Io(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("non-UTF8 path: {}", base.display()),
                        ))
                    })?
                    .replace('\\', "/");

                let url = ctx
                    .repository
                    .remote_file_url(ctx.target_version, &relative);
                if staging.exists() {
                    std::fs::remove_file(staging)?;
                }
                ctx.download.download(&url, staging)?;
                Ok(())
            }
            result => result,
        }
    }

    fn bsdiff_file(
        &self,
        ctx: &PatchContext<'_>,
        item: &DiffItem,
        base: &Path,
        staging: &Path,
    ) -> Result<(), Error> {
        let expected_base = required_crc(item, item.base_crc.as_deref(), "base_crc")?;
        let actual_base = util::crc32_of_file(base)?;
        if actual_base != expected_base {
            ctx.listener.crc_mismatch(base);
            return Err(Error::CrcMismatch {
                path: base.to_path_buf(),
                expected: util::format_crc(expected_base),
                actual: util::format_crc(actual_base),
            });
        }

        // The staging location currently holds the delta payload; the
        // patched bytes replace it via a sibling temp file.
        let base_bytes = util::mmap_file(base)?;
        let payload = std::fs::read(staging)?;
        let patched = delta::apply(&base_bytes, &payload)?;
        drop(base_bytes);

        let patched_path = sibling_with_suffix(staging, ".patched");
        std::fs::write(&patched_path, &patched)?;
        std::fs::rename(&patched_path, staging)?;

        let expected_target = required_crc(item, item.target_crc.as_deref(), "target_crc")?;
        let actual_target = crc32fast::hash(&patched);
        if actual_target != expected_target {
            let expected = util::format_crc(expected_target);
            let actual = util::format_crc(actual_target);
            error!(
                file = %staging.display(),
                expected,
                actual,
                "crc mismatch in patched file"
            );
            ctx.listener.crc_mismatch(staging);
            return Err(Error::CrcMismatch {
                path: staging.to_path_buf(),
                expected,
                actual,
            });
        }

        Ok(())
    }

    /// A zip whose contents changed: extract the base archive, patch the
    /// extracted tree against the node's children, recompress.
    fn patch_zip_file(
        &self,
        ctx: &PatchContext<'_>,
        item: &DiffItem,
        base: &Path,
        staging: &Path,
    ) -> Result<(), Error> {
        let temp_root = ctx.repository.temp_path();
        std::fs::create_dir_all(&temp_root)?;
        let extracted = util::create_scratch_dir(&temp_root, &format!("extracted_{}_", item.name))?;
        debug!(archive = %base.display(), scratch = %extracted.display(), "patching zip contents");

        let patched = (|| -> Result<(), Error> {
            archive::extract_zip(base, &extracted)?;

            std::fs::create_dir_all(staging)?;
            for child in &item.items {
                self.patch_item(
                    ctx,
                    child,
                    &extracted.join(&child.name),
                    &staging.join(&child.name),
                    true,
                )?;
            }
            Ok(())
        })();
        let _ = std::fs::remove_dir_all(&extracted);
        patched?;

        // the staging path is a folder of patched entries but is supposed to
        // be the zip file itself
        let intermediate = sibling_with_suffix(staging, ".patched");
        std::fs::rename(staging, &intermediate)?;
        archive::compress_dir_to_zip(&intermediate, staging)?;
        std::fs::remove_dir_all(&intermediate)?;
        Ok(())
    }

    /// Promote the fully patched staging tree into the repository root's
    /// position.
    ///
    /// Not atomic across its steps; the durable unit is the whole hop, via
    /// the descriptor's `current_version` (persisted by the caller only
    /// after this returns).
    fn promote(&self, repo: &Repository, staging: &Path) -> Result<(), Error> {
        let root = repo.root();
        let parent = root.parent().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "repository root has no parent directory",
            ))
        })?;
        // staging lives inside <root>/.bireus/__temp__ and moves together
        // with the root, so resolve it relative to the aside copy
        let staging_rel = staging
            .strip_prefix(root)
            .map_err(|_| {
                Error::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "staging folder is outside the repository root",
                ))
            })?
            .to_path_buf();

        let root_name = root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("repository");
        let aside = parent.join(format!("{root_name}.aside-{:012x}", unique_suffix()));

        debug!(root = %root.display(), aside = %aside.display(), "promoting staging tree");
        std::fs::rename(root, &aside)?;
        std::fs::rename(aside.join(&staging_rel), root)?;

        // drop the archive-embedded patch head, restore the real metadata
        let metadata = root.join(repository::INTERNAL_FOLDER);
        if metadata.exists() {
            std::fs::remove_dir_all(&metadata)?;
        }
        std::fs::rename(aside.join(repository::INTERNAL_FOLDER), &metadata)?;
        std::fs::remove_dir_all(&aside)?;
        Ok(())
    }
}

fn required_crc(item: &DiffItem, value: Option<&str>, field: &str) -> Result<u32, Error> {
    value.and_then(util::parse_crc).ok_or_else(|| {
        Error::ProtocolMismatch(format!(
            "bsdiff item `{}` has a missing or invalid {field}",
            item.name
        ))
    })
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn unique_suffix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 ^ d.as_secs())
        .unwrap_or(0)
        ^ ((std::process::id() as u64) << 32)
}
