//! Shared fixture: an on-disk "server repository" served through a mock
//! download service, plus a client checkout to run the engine against.

use std::fs;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bireus::archive;
use bireus::delta::{self, DeltaChunk};
use bireus::diff_model::{DiffHead, DiffItem, EntryKind, PatchAction};
use bireus::download::DownloadService;
use bireus::error::DownloadError;
use bireus::event::PatchEventListener;
use bireus::service::RepositoryService;
use bireus::util::format_crc;
use bireus::version_graph::{PatchHop, VersionGraph};

pub const SERVER_URL: &str = "mock://server/demo-repo";

// ---------------------------------------------------------------------------
// mock download service

/// Resolves `mock://server/demo-repo/...` URLs against a local directory,
/// recording every request. URLs listed in `fail_urls` fail on purpose.
#[derive(Clone)]
pub struct MockDownloadService {
    server_root: PathBuf,
    requests: Arc<Mutex<Vec<String>>>,
    fail_urls: Arc<Mutex<Vec<String>>>,
}

impl MockDownloadService {
    pub fn new(server_root: &Path) -> Self {
        Self {
            server_root: server_root.to_path_buf(),
            requests: Arc::new(Mutex::new(Vec::new())),
            fail_urls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requested(&self, url: &str) -> bool {
        self.requests.lock().unwrap().iter().any(|r| r == url)
    }

    pub fn fail_on(&self, url: &str) {
        self.fail_urls.lock().unwrap().push(url.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_urls.lock().unwrap().clear();
    }

    fn resolve(&self, url: &str) -> Result<PathBuf, DownloadError> {
        if self.fail_urls.lock().unwrap().iter().any(|u| u == url) {
            return Err(DownloadError::message(url));
        }
        let rel = url
            .strip_prefix(SERVER_URL)
            .map(|r| r.trim_start_matches('/'))
            .ok_or_else(|| DownloadError::message(url))?;
        let path = self.server_root.join(rel);
        if !path.exists() {
            return Err(DownloadError::message(url));
        }
        Ok(path)
    }
}

impl DownloadService for MockDownloadService {
    fn download(&self, url: &str, dest: &Path) -> Result<(), DownloadError> {
        self.requests.lock().unwrap().push(url.to_string());
        let src = self.resolve(url)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| DownloadError::new(url, e))?;
        }
        fs::copy(&src, dest).map_err(|e| DownloadError::new(url, e))?;
        Ok(())
    }

    fn read(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        self.requests.lock().unwrap().push(url.to_string());
        let src = self.resolve(url)?;
        fs::read(&src).map_err(|e| DownloadError::new(url, e))
    }
}

// ---------------------------------------------------------------------------
// recording listener

#[derive(Clone, Default)]
pub struct RecordingListener {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count_of(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

impl PatchEventListener for RecordingListener {
    fn error(&self, message: &str) {
        self.record(format!("error:{message}"));
    }
    fn begin_checkout_version(&self, version: &str) {
        self.record(format!("begin_checkout:{version}"));
    }
    fn finish_checkout_version(&self, version: &str) {
        self.record(format!("finish_checkout:{version}"));
    }
    fn checked_out_already(&self, version: &str) {
        self.record(format!("checked_out_already:{version}"));
    }
    fn version_unknown(&self, version: &str) {
        self.record(format!("version_unknown:{version}"));
    }
    fn no_patch_path(&self, version: &str) {
        self.record(format!("no_patch_path:{version}"));
    }
    fn found_patch_path(&self, hops: &[PatchHop]) {
        self.record(format!("found_patch_path:{}", hops.len()));
    }
    fn begin_apply_patch(&self, from_version: &str, to_version: &str) {
        self.record(format!("begin_apply_patch:{from_version}->{to_version}"));
    }
    fn finish_apply_patch(&self, from_version: &str, to_version: &str) {
        self.record(format!("finish_apply_patch:{from_version}->{to_version}"));
    }
    fn begin_download_patch(&self, url: &str) {
        self.record(format!("begin_download_patch:{url}"));
    }
    fn finish_download_patch(&self, url: &str) {
        self.record(format!("finish_download_patch:{url}"));
    }
    fn crc_mismatch(&self, path: &Path) {
        self.record(format!(
            "crc_mismatch:{}",
            path.file_name().unwrap().to_string_lossy()
        ));
    }
}

// ---------------------------------------------------------------------------
// version content

pub fn readme_v1() -> Vec<u8> {
    b"hello bireus v1\n".to_vec()
}
pub fn readme_v2() -> Vec<u8> {
    b"hello bireus v2, now with more words\n".to_vec()
}
pub fn readme_v3() -> Vec<u8> {
    b"hello bireus v3\n".to_vec()
}
pub fn records_v1() -> Vec<u8> {
    vec![0xAA; 4096]
}
pub fn records_v2() -> Vec<u8> {
    let mut data = vec![0xAA; 2048];
    data.extend_from_slice(&[0xBB; 2048]);
    data
}
pub fn inner_v1() -> Vec<u8> {
    b"inner v1 payload".to_vec()
}
pub fn inner_v2() -> Vec<u8> {
    b"inner v2 payload!".to_vec()
}

pub fn zip_entries_v1() -> Vec<(String, Vec<u8>)> {
    vec![
        ("inner.txt".into(), inner_v1()),
        ("keep.txt".into(), b"keep".to_vec()),
    ]
}

pub fn zip_entries_v2() -> Vec<(String, Vec<u8>)> {
    vec![
        ("added.txt".into(), b"fresh".to_vec()),
        ("inner.txt".into(), inner_v2()),
        ("keep.txt".into(), b"keep".to_vec()),
    ]
}

/// Plain-file content of each version, excluding `assets.zip` (compared by
/// entry, not by archive bytes).
pub fn tree_v1() -> Vec<(String, Vec<u8>)> {
    vec![
        ("readme.txt".into(), readme_v1()),
        ("unchanged.txt".into(), b"same in every version\n".to_vec()),
        ("old.txt".into(), b"removed in v2\n".to_vec()),
        ("data/records.bin".into(), records_v1()),
        ("docs/guide.txt".into(), b"read me carefully\n".to_vec()),
        ("obsolete/junk.txt".into(), b"junk\n".to_vec()),
    ]
}

pub fn tree_v2() -> Vec<(String, Vec<u8>)> {
    vec![
        ("readme.txt".into(), readme_v2()),
        ("unchanged.txt".into(), b"same in every version\n".to_vec()),
        ("new.txt".into(), b"introduced in v2\n".to_vec()),
        ("data/records.bin".into(), records_v2()),
        ("docs/guide.txt".into(), b"read me carefully\n".to_vec()),
        ("extras/bonus.dat".into(), vec![0xFF; 1024]),
    ]
}

pub fn tree_v3() -> Vec<(String, Vec<u8>)> {
    let mut tree = tree_v2();
    for (path, content) in &mut tree {
        if path == "readme.txt" {
            *content = readme_v3();
        }
    }
    tree.push(("v3marker.txt".into(), b"v3\n".to_vec()));
    tree
}

// ---------------------------------------------------------------------------
// tree building and comparison helpers

pub fn write_tree(root: &Path, files: &[(String, Vec<u8>)]) {
    for (rel_path, content) in files {
        let full = root.join(rel_path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&full, content).unwrap();
    }
}

pub fn write_zip(target: &Path, entries: &[(String, Vec<u8>)]) {
    let build = tempfile::tempdir().unwrap();
    write_tree(build.path(), entries);
    archive::compress_dir_to_zip(build.path(), target).unwrap();
}

pub fn read_zip_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
    let extracted = tempfile::tempdir().unwrap();
    archive::extract_zip(path, extracted.path()).unwrap();
    collect_files(extracted.path(), &[])
}

/// Collect `(relative path, bytes)` of every file under `root`, sorted,
/// skipping any top-level directory named in `skip`.
pub fn collect_files(root: &Path, skip: &[&str]) -> Vec<(String, Vec<u8>)> {
    let mut entries = Vec::new();
    for entry in walk(root) {
        let rel = entry
            .strip_prefix(root)
            .unwrap()
            .to_str()
            .unwrap()
            .replace('\\', "/");
        if skip.iter().any(|s| rel == *s || rel.starts_with(&format!("{s}/"))) {
            continue;
        }
        entries.push((rel, fs::read(&entry).unwrap()));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

fn walk(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files
}

/// Compare a checkout against an expected version: plain files byte-for-byte
/// and `assets.zip` entry-by-entry.
pub fn assert_tree_matches(
    checkout: &Path,
    expected_files: &[(String, Vec<u8>)],
    expected_zip: &[(String, Vec<u8>)],
) {
    let actual = collect_files(checkout, &[".bireus", "assets.zip"]);
    let mut expected = expected_files.to_vec();
    expected.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        actual.iter().map(|(p, _)| p).collect::<Vec<_>>(),
        expected.iter().map(|(p, _)| p).collect::<Vec<_>>(),
        "checkout file list mismatch"
    );
    for ((path, actual_bytes), (_, expected_bytes)) in actual.iter().zip(expected.iter()) {
        assert_eq!(actual_bytes, expected_bytes, "content mismatch for {path}");
    }

    let actual_entries = read_zip_entries(&checkout.join("assets.zip"));
    assert_eq!(actual_entries, expected_zip, "assets.zip entry mismatch");
}

// ---------------------------------------------------------------------------
// patch archive construction

pub fn bsdiff_item(name: &str, base: &[u8], target: &[u8]) -> DiffItem {
    DiffItem {
        name: name.to_string(),
        kind: EntryKind::File,
        base_crc: Some(format_crc(crc32fast::hash(base))),
        target_crc: Some(format_crc(crc32fast::hash(target))),
        action: PatchAction::Bsdiff,
        items: Vec::new(),
    }
}

pub fn zipdelta_item(name: &str, items: Vec<DiffItem>) -> DiffItem {
    DiffItem {
        name: name.to_string(),
        kind: EntryKind::File,
        base_crc: None,
        target_crc: None,
        action: PatchAction::Zipdelta,
        items,
    }
}

pub fn delta_payload(chunks: &[DeltaChunk]) -> Vec<u8> {
    delta::encode(chunks).unwrap()
}

/// Build `{from}_to_{to}.tar.xz` under the server's `__patches__` folder:
/// staged content plus the embedded patch head.
pub fn build_patch_archive(
    server: &Path,
    from: &str,
    to: &str,
    head: &DiffHead,
    staged: &[(String, Vec<u8>)],
) {
    let build = tempfile::tempdir().unwrap();
    write_tree(build.path(), staged);

    let internal = build.path().join(".bireus");
    fs::create_dir_all(&internal).unwrap();
    fs::write(
        internal.join("info.json"),
        serde_json::to_vec_pretty(head).unwrap(),
    )
    .unwrap();

    let patches = server.join("__patches__");
    fs::create_dir_all(&patches).unwrap();
    tar_xz_dir(
        build.path(),
        &patches.join(format!("{from}_to_{to}.tar.xz")),
    );
}

pub fn tar_xz_dir(source: &Path, target: &Path) {
    let file = File::create(target).unwrap();
    let encoder = xz2::write::XzEncoder::new(file, 6);
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all("", source).unwrap();
    let encoder = builder.into_inner().unwrap();
    encoder.finish().unwrap();
}

pub fn head(from: &str, to: &str, root_items: Vec<DiffItem>) -> DiffHead {
    DiffHead {
        repository: Some("demo-repo".to_string()),
        protocol: 1,
        base_version: from.to_string(),
        target_version: to.to_string(),
        items: vec![DiffItem::directory("demo-repo", PatchAction::Delta, root_items)],
    }
}

/// The v1 -> v2 patch: every action kind at least once.
pub fn head_v1_to_v2() -> (DiffHead, Vec<(String, Vec<u8>)>) {
    let mut readme = bsdiff_item("readme.txt", &readme_v1(), &readme_v2());
    // exercise the 0x-prefixed wire spelling some repositories use
    readme.base_crc = Some(format!("0x{}", readme.base_crc.unwrap()));

    let head = head(
        "v1",
        "v2",
        vec![
            readme,
            DiffItem::file("unchanged.txt", PatchAction::Unchanged),
            DiffItem::file("old.txt", PatchAction::Remove),
            DiffItem::file("new.txt", PatchAction::Add),
            DiffItem::directory(
                "data",
                PatchAction::Delta,
                vec![bsdiff_item("records.bin", &records_v1(), &records_v2())],
            ),
            DiffItem::directory("docs", PatchAction::Unchanged, vec![]),
            DiffItem::directory("obsolete", PatchAction::Remove, vec![]),
            DiffItem::directory("extras", PatchAction::Add, vec![]),
            zipdelta_item(
                "assets.zip",
                vec![
                    bsdiff_item("inner.txt", &inner_v1(), &inner_v2()),
                    DiffItem::file("keep.txt", PatchAction::Unchanged),
                    DiffItem::file("added.txt", PatchAction::Add),
                ],
            ),
        ],
    );

    let staged = vec![
        (
            "readme.txt".to_string(),
            delta_payload(&[
                DeltaChunk::Copy { offset: 0, length: 13 },
                DeltaChunk::Insert { data: b"v2, now with more words\n".to_vec() },
            ]),
        ),
        ("new.txt".to_string(), b"introduced in v2\n".to_vec()),
        (
            "data/records.bin".to_string(),
            delta_payload(&[
                DeltaChunk::Copy { offset: 0, length: 2048 },
                DeltaChunk::Insert { data: vec![0xBB; 2048] },
            ]),
        ),
        ("extras/bonus.dat".to_string(), vec![0xFF; 1024]),
        (
            "assets.zip/inner.txt".to_string(),
            delta_payload(&[
                DeltaChunk::Copy { offset: 0, length: 6 },
                DeltaChunk::Insert { data: b"v2 payload!".to_vec() },
            ]),
        ),
        ("assets.zip/added.txt".to_string(), b"fresh".to_vec()),
    ];

    (head, staged)
}

pub fn head_v2_to_v3() -> (DiffHead, Vec<(String, Vec<u8>)>) {
    let head = head(
        "v2",
        "v3",
        vec![
            bsdiff_item("readme.txt", &readme_v2(), &readme_v3()),
            DiffItem::file("unchanged.txt", PatchAction::Unchanged),
            DiffItem::file("new.txt", PatchAction::Unchanged),
            DiffItem::file("assets.zip", PatchAction::Unchanged),
            DiffItem::file("v3marker.txt", PatchAction::Add),
            DiffItem::directory("data", PatchAction::Unchanged, vec![]),
            DiffItem::directory("docs", PatchAction::Unchanged, vec![]),
            DiffItem::directory("extras", PatchAction::Unchanged, vec![]),
        ],
    );

    let staged = vec![
        (
            "readme.txt".to_string(),
            delta_payload(&[
                DeltaChunk::Copy { offset: 0, length: 12 },
                DeltaChunk::Insert { data: b" v3\n".to_vec() },
            ]),
        ),
        ("v3marker.txt".to_string(), b"v3\n".to_vec()),
    ];

    (head, staged)
}

// ---------------------------------------------------------------------------
// the fixture

pub struct Fixture {
    pub temp: tempfile::TempDir,
    pub server: PathBuf,
    pub client: PathBuf,
    pub download: MockDownloadService,
    pub listener: RecordingListener,
}

impl Fixture {
    /// Server with versions v1 -> v2 -> v3 and both patch archives; client
    /// checked out at v1.
    pub fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let server = temp.path().join("server");
        let client = temp.path().join("client");

        // server metadata
        fs::create_dir_all(&server).unwrap();
        fs::write(server.join("info.json"), server_info_json("v3")).unwrap();
        fs::write(server.join("versions.gml"), chain_gml(&["v1", "v2", "v3"])).unwrap();

        // patch archives
        let (head12, staged12) = head_v1_to_v2();
        build_patch_archive(&server, "v1", "v2", &head12, &staged12);
        let (head23, staged23) = head_v2_to_v3();
        build_patch_archive(&server, "v2", "v3", &head23, &staged23);

        // full version trees, addressed by the crc fallback
        for (version, tree, zip) in [
            ("v1", tree_v1(), zip_entries_v1()),
            ("v2", tree_v2(), zip_entries_v2()),
            ("v3", tree_v3(), zip_entries_v2()),
        ] {
            let root = server.join(version);
            write_tree(&root, &tree);
            write_zip(&root.join("assets.zip"), &zip);
        }

        // client checkout at v1
        write_tree(&client, &tree_v1());
        write_zip(&client.join("assets.zip"), &zip_entries_v1());
        let internal = client.join(".bireus");
        fs::create_dir_all(&internal).unwrap();
        fs::write(internal.join("info.json"), client_info_json("v1", "v3")).unwrap();
        fs::write(internal.join("versions.gml"), chain_gml(&["v1", "v2", "v3"])).unwrap();

        let download = MockDownloadService::new(&server);
        let listener = RecordingListener::new();

        Self {
            temp,
            server,
            client,
            download,
            listener,
        }
    }

    pub fn service(&self) -> RepositoryService {
        RepositoryService::open(
            &self.client,
            Box::new(self.download.clone()),
            Box::new(self.listener.clone()),
        )
        .unwrap()
    }

    pub fn current_version_on_disk(&self) -> String {
        bireus::repository::Repository::load(&self.client)
            .unwrap()
            .current_version
    }

    pub fn patch_url(&self, from: &str, to: &str) -> String {
        format!("{SERVER_URL}/__patches__/{from}_to_{to}.tar.xz")
    }
}

pub fn chain_gml(versions: &[&str]) -> String {
    let mut graph = VersionGraph::new();
    for pair in versions.windows(2) {
        graph.add_edge(pair[0], pair[1]);
    }
    graph.to_gml()
}

pub fn server_info_json(latest: &str) -> String {
    format!(
        r#"{{
  "name": "demo-repo",
  "first_version": "v1",
  "latest_version": "{latest}",
  "current_version": "{latest}",
  "protocol": 1,
  "url": "{SERVER_URL}",
  "strategy": "inst-bi"
}}"#
    )
}

pub fn client_info_json(current: &str, latest: &str) -> String {
    format!(
        r#"{{
  "name": "demo-repo",
  "first_version": "v1",
  "latest_version": "{latest}",
  "current_version": "{current}",
  "protocol": 1,
  "url": "{SERVER_URL}",
  "strategy": "inst-bi"
}}"#
    )
}
