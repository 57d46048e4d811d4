use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::download::DownloadService;
use crate::error::{CheckoutError, Error};
use crate::event::PatchEventListener;
use crate::patch_engine::{PatchContext, PatchEngineRegistry};
use crate::repository::Repository;
use crate::version_graph::{PatchHop, VersionGraph};

/// Orchestrates checkouts against one repository root: resolves the hop
/// sequence, ensures each hop's patch archive is on disk, invokes the
/// engine matching the repository's protocol version and durably advances
/// `current_version` after every hop.
///
/// Assumes exclusive access to the repository root; callers running
/// concurrent checkouts must serialize externally.
pub struct RepositoryService {
    repository: Repository,
    version_graph: VersionGraph,
    download: Box<dyn DownloadService>,
    listener: Box<dyn PatchEventListener>,
    engines: PatchEngineRegistry,
}

impl RepositoryService {
    /// Load the persisted descriptor and version graph from `root`, with
    /// the default engine registry.
    pub fn open(
        root: &Path,
        download: Box<dyn DownloadService>,
        listener: Box<dyn PatchEventListener>,
    ) -> Result<Self, Error> {
        Self::with_engines(
            root,
            download,
            listener,
            PatchEngineRegistry::with_default_engines(),
        )
    }

    pub fn with_engines(
        root: &Path,
        download: Box<dyn DownloadService>,
        listener: Box<dyn PatchEventListener>,
        engines: PatchEngineRegistry,
    ) -> Result<Self, Error> {
        debug!(root = %root.display(), "opening repository");
        let repository = Repository::load(root)?;
        let version_graph = VersionGraph::load(&repository.version_graph_path())?;
        info!(
            name = %repository.name,
            current = %repository.current_version,
            latest = %repository.latest_version,
            "repository loaded"
        );

        Ok(Self {
            repository,
            version_graph,
            download,
            listener,
            engines,
        })
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn version_graph(&self) -> &VersionGraph {
        &self.version_graph
    }

    /// Local graph membership; on a miss, refreshes from the remote and
    /// re-checks once.
    pub fn version_exists(&mut self, version: &str) -> bool {
        if self.version_graph.contains(version) {
            return true;
        }
        match self.refresh_from_remote() {
            Ok(()) => self.version_graph.contains(version),
            Err(e) => {
                error!("updating from remote repository failed: {e}");
                false
            }
        }
    }

    /// Best-effort remote refresh, then checkout of whatever
    /// `latest_version` ended up being (local state if the refresh failed).
    pub fn checkout_latest(&mut self) -> Result<(), CheckoutError> {
        if let Err(e) = self.refresh_from_remote() {
            warn!("updating repository info from remote failed, using local state: {e}");
        }
        let latest = self.repository.latest_version.clone();
        self.checkout(&latest)
    }

    /// Check out `version`, applying every hop of the shortest patch path
    /// from the current version.
    pub fn checkout(&mut self, version: &str) -> Result<(), CheckoutError> {
        self.checkout_inner(version).map_err(|e| {
            CheckoutError::new(self.repository.name.clone(), version.to_string(), e)
        })
    }

    fn checkout_inner(&mut self, version: &str) -> Result<(), Error> {
        info!(
            version,
            repository = %self.repository.name,
            "checking out version"
        );
        self.listener.begin_checkout_version(version);

        if self.repository.current_version == version {
            info!(version, "version is already checked out");
            self.listener.checked_out_already(version);
            return Ok(());
        }

        if !self.version_exists(version) {
            error!(version, "version is not listed on the server");
            self.listener.version_unknown(version);
            return Err(Error::VersionUnknown(version.to_string()));
        }

        let current = self.repository.current_version.clone();
        let Some(hops) = self.version_graph.shortest_path(&current, version) else {
            error!(from = %current, to = %version, "no valid patch path");
            self.listener.no_patch_path(version);
            return Err(Error::NoPatchPath {
                from: current,
                to: version.to_string(),
            });
        };

        debug!(?hops, "patch path found");
        self.listener.found_patch_path(&hops);
        self.purge_stale_temp();

        for hop in &hops {
            self.ensure_patch_present(hop)?;
            self.apply_hop(hop)?;

            // advance durable state before touching the next hop; a crash
            // resumes from here
            self.repository.current_version = hop.to.clone();
            self.repository.save()?;
        }

        info!(version, "version is now checked out");
        self.listener.finish_checkout_version(version);
        Ok(())
    }

    /// Make sure the hop's patch archive is cached on disk, downloading it
    /// from the origin if absent.
    fn ensure_patch_present(&self, hop: &PatchHop) -> Result<(), Error> {
        let patch_path = self.repository.patch_path(&hop.from, &hop.to);
        if patch_path.exists() {
            info!(patch = %patch_path.display(), "patch archive is already on disk");
            return Ok(());
        }

        std::fs::create_dir_all(self.repository.patches_path())?;
        let url = self.repository.remote_patch_url(&hop.from, &hop.to);
        info!(url, "downloading patch archive");

        self.listener.begin_download_patch(&url);
        if let Err(e) = self.download.download(&url, &patch_path) {
            self.listener
                .error(&format!("downloading patch-file failed from `{url}`"));
            error!(url, "downloading patch-file failed: {e}");
            return Err(e.into());
        }
        self.listener.finish_download_patch(&url);
        Ok(())
    }

    fn apply_hop(&self, hop: &PatchHop) -> Result<(), Error> {
        debug!(from = %hop.from, to = %hop.to, "applying patch");
        self.listener.begin_apply_patch(&hop.from, &hop.to);

        let engine = self
            .engines
            .get(self.repository.protocol_version)
            .ok_or_else(|| {
                Error::ProtocolMismatch(format!(
                    "no patch engine registered for protocol version {}",
                    self.repository.protocol_version
                ))
            })?;

        let ctx = PatchContext {
            repository: &self.repository,
            download: self.download.as_ref(),
            listener: self.listener.as_ref(),
            target_version: &hop.to,
        };
        engine.run(&ctx, &self.repository.patch_path(&hop.from, &hop.to))?;

        debug!("patch applied");
        self.listener.finish_apply_patch(&hop.from, &hop.to);
        Ok(())
    }

    /// Re-fetch the remote descriptor; when its `latest_version` differs
    /// from ours, persist the new descriptor and re-download the version
    /// graph.
    fn refresh_from_remote(&mut self) -> Result<(), Error> {
        debug!("downloading repository info from remote");
        let bytes = self.download.read(&self.repository.remote_info_url())?;
        let remote: Repository = serde_json::from_slice(&bytes)?;

        if remote.latest_version == self.repository.latest_version {
            debug!("local repository info is up to date");
            return Ok(());
        }

        debug!(
            old = %self.repository.latest_version,
            new = %remote.latest_version,
            "latest version has changed, updating local metadata"
        );
        self.repository.latest_version = remote.latest_version;
        self.repository.save()?;

        let graph_path = self.repository.version_graph_path();
        self.download
            .download(&self.repository.remote_version_graph_url(), &graph_path)?;
        self.version_graph = VersionGraph::load(&graph_path)?;
        Ok(())
    }

    /// Remove leftover scratch folders from crashed runs. Best effort; a
    /// failure here must not block the checkout.
    fn purge_stale_temp(&self) {
        let Ok(entries) = std::fs::read_dir(self.repository.temp_path()) else {
            return;
        };
        for entry in entries.flatten() {
            debug!(path = %entry.path().display(), "removing stale scratch folder");
            let _ = std::fs::remove_dir_all(entry.path());
        }
    }
}
