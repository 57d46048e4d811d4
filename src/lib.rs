//! Client for BiReUS (binary repository update service).
//!
//! Incrementally updates a versioned on-disk tree: resolves a minimum-hop
//! chain of published patches between the checked-out version and a
//! requested target, downloads the missing patch archives and applies them
//! in place, verifying CRC32 content integrity and recovering from local
//! corruption by re-fetching authoritative files from the origin.
//!
//! ```no_run
//! use bireus::download::HttpDownloadService;
//! use bireus::event::NullEventListener;
//! use bireus::service::RepositoryService;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut service = RepositoryService::open(
//!     std::path::Path::new("/opt/my-game"),
//!     Box::new(HttpDownloadService::new()),
//!     Box::new(NullEventListener),
//! )?;
//! service.checkout("v42")?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod delta;
pub mod diff_model;
pub mod download;
pub mod error;
pub mod event;
pub mod patch_engine;
pub mod repository;
pub mod service;
pub mod util;
pub mod version_graph;

pub use diff_model::{DiffHead, DiffItem, EntryKind, PatchAction};
pub use download::{DownloadService, HttpDownloadService};
pub use error::{CheckoutError, DownloadError, Error};
pub use event::{NullEventListener, PatchEventListener};
pub use patch_engine::{PatchContext, PatchEngine, PatchEngineRegistry, PatchEngineV1};
pub use repository::Repository;
pub use service::RepositoryService;
pub use version_graph::{PatchHop, VersionGraph};
