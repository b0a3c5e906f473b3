//! Backup archive layout, writing and reading.
//!
//! Two layouts are understood:
//!
//! - tree: `meilisearch_backup/<uid>/{info,settings,documents}.json`, plus
//!   `meilisearch_backup/manifest.json`
//! - flat: `all_indexes.json`, `manifest.json` and one `indexes/<uid>.json`
//!   per index holding `{"info", "settings", "documents"}`. Older flat
//!   archives keep `<uid>.json` at the root; both are read.
//!
//! [`DirectoryStore`] writes the tree layout to disk and zips it. [`MemoryStore`]
//! keeps everything in memory and produces flat-layout zip bytes.
//! [`BackupArchive`] reads either layout from a zip file, zip bytes, or an
//! extracted directory, without assuming any entry order.

use std::{
    collections::BTreeSet,
    fmt, fs,
    io::{Cursor, Read, Seek, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result, anyhow, ensure};
use chrono::Utc;
use meili::prelude::{Document, IndexInfo, Settings};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use zip::{CompressionMethod, ZipArchive, ZipWriter, result::ZipError, write::SimpleFileOptions};

/// Name of the backup root directory. Any directory whose name contains it is
/// accepted as a backup root on restore.
pub const BACKUP_ROOT: &str = "meilisearch_backup";
pub const INFO_FILE: &str = "info.json";
pub const SETTINGS_FILE: &str = "settings.json";
pub const DOCUMENTS_FILE: &str = "documents.json";
pub const MANIFEST_NAME: &str = "manifest.json";
/// Index list of the flat layout
pub const FLAT_INDEX_LIST: &str = "all_indexes.json";
/// Directory of per-index entries in the flat layout, so that no uid can
/// collide with the index list or the manifest
pub const FLAT_INDEX_DIR: &str = "indexes";
/// Error text when neither layout is found
pub const MISSING_BACKUP_ROOT: &str = "Could not find meilisearch_backup directory in the zip file.";

const INDEX_FILES: [&str; 3] = [INFO_FILE, SETTINGS_FILE, DOCUMENTS_FILE];

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveFileEntry {
    pub path: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveSourceKind {
    Directory,
    Zip,
}

impl ArchiveSourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Directory => "directory",
            Self::Zip => "zip",
        }
    }
}

trait ZipSource: Read + Seek + Send {}
impl<T: Read + Seek + Send> ZipSource for T {}

/// Reads entries of an extracted directory or a zip archive in place.
/// Paths are relative to the archive root and always use `/`.
#[derive(Clone)]
pub struct ArchiveReader {
    root: PathBuf,
    source: ArchiveSourceKind,
    zip: Option<ZipReaderState>,
}

#[derive(Clone)]
struct ZipReaderState {
    archive: Arc<Mutex<ZipArchive<Box<dyn ZipSource>>>>,
    files: Arc<Vec<ArchiveFileEntry>>,
}

impl fmt::Debug for ArchiveReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("root", &self.root)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl ArchiveReader {
    pub fn from_path(path: &Path) -> Result<Self> {
        if path.is_dir() {
            return Ok(Self {
                root: path.to_path_buf(),
                source: ArchiveSourceKind::Directory,
                zip: None,
            });
        }
        if path.is_file() {
            let file = fs::File::open(path)
                .with_context(|| format!("failed to open archive file {}", path.display()))?;
            if let Ok(reader) = Self::from_zip(path.to_path_buf(), Box::new(file)) {
                return Ok(reader);
            }
        }
        Err(anyhow!(
            "archive must be a directory or zip file: {}",
            path.display()
        ))
    }

    /// Reads a zip archive held in memory.
    pub fn from_zip_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_zip(PathBuf::from("<memory>"), Box::new(Cursor::new(bytes)))
            .context("archive bytes are not a zip file")
    }

    fn from_zip(root: PathBuf, source: Box<dyn ZipSource>) -> Result<Self> {
        let mut zip = ZipArchive::new(source)?;
        let mut files = Vec::new();
        for idx in 0..zip.len() {
            let entry = zip.by_index(idx)?;
            if entry.is_dir() {
                continue;
            }
            files.push(ArchiveFileEntry {
                path: entry.name().trim_start_matches("./").to_string(),
                bytes: entry.size(),
            });
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(Self {
            root,
            source: ArchiveSourceKind::Zip,
            zip: Some(ZipReaderState {
                archive: Arc::new(Mutex::new(zip)),
                files: Arc::new(files),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source(&self) -> ArchiveSourceKind {
        self.source
    }

    pub fn list_files(&self) -> Result<Vec<ArchiveFileEntry>> {
        match self.source {
            ArchiveSourceKind::Directory => {
                let mut entries = Vec::new();
                for path in walk_files(&self.root)? {
                    let rel = path.strip_prefix(&self.root).with_context(|| {
                        format!("archive file not under root: {}", path.display())
                    })?;
                    let meta = fs::metadata(&path)?;
                    entries.push(ArchiveFileEntry {
                        path: slash_path(rel),
                        bytes: meta.len(),
                    });
                }
                entries.sort_by(|a, b| a.path.cmp(&b.path));
                Ok(entries)
            }
            ArchiveSourceKind::Zip => Ok(self.zip_state()?.files.as_ref().clone()),
        }
    }

    pub fn read_bytes(&self, rel_path: &str) -> Result<Vec<u8>> {
        self.read_bytes_if_exists(rel_path)?
            .ok_or_else(|| anyhow!("archive entry not found: {rel_path}"))
    }

    pub fn read_bytes_if_exists(&self, rel_path: &str) -> Result<Option<Vec<u8>>> {
        match self.source {
            ArchiveSourceKind::Directory => {
                let path = self.root.join(rel_path);
                if !path.is_file() {
                    return Ok(None);
                }
                let bytes = fs::read(&path)
                    .with_context(|| format!("failed to read archive file {}", path.display()))?;
                Ok(Some(bytes))
            }
            ArchiveSourceKind::Zip => {
                let state = self.zip_state()?;
                let mut zip = state
                    .archive
                    .lock()
                    .map_err(|_| anyhow!("zip archive lock poisoned"))?;
                let mut entry = match zip.by_name(rel_path) {
                    Ok(entry) => entry,
                    Err(ZipError::FileNotFound) => return Ok(None),
                    Err(err) => {
                        return Err(err).with_context(|| format!("failed to read {rel_path}"));
                    }
                };
                let mut out = Vec::new();
                entry.read_to_end(&mut out)?;
                drop(entry);
                drop(zip);
                Ok(Some(out))
            }
        }
    }

    /// Parses a json entry. Returns `None` if the entry does not exist.
    pub fn read_json<T: DeserializeOwned>(&self, rel_path: &str) -> Result<Option<T>> {
        let Some(bytes) = self.read_bytes_if_exists(rel_path)? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&bytes)
            .with_context(|| format!("invalid json in archive entry {rel_path}"))?;
        Ok(Some(value))
    }

    fn zip_state(&self) -> Result<&ZipReaderState> {
        self.zip
            .as_ref()
            .ok_or_else(|| anyhow!("zip archive state unavailable"))
    }
}

fn walk_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in
            fs::read_dir(&dir).with_context(|| format!("failed to read {}", dir.display()))?
        {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// One index as stored in an archive. Also the shape of a flat-layout `indexes/<uid>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub info: IndexInfo,
    /// Absent when settings could not be read during backup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    #[serde(default)]
    pub documents: Vec<Document>,
}

impl IndexSnapshot {
    pub fn uid(&self) -> &str {
        &self.info.uid
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestIndex {
    pub uid: String,
    #[serde(default)]
    pub primary_key: Option<String>,
    pub document_count: usize,
    /// False when pagination stopped early and the document set is partial
    #[serde(default = "default_true")]
    pub complete: bool,
}

fn default_true() -> bool {
    true
}

/// Describes a backup. Written under the backup root; restore never requires it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub tool: String,
    pub created_at: String,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub indexes: Vec<ManifestIndex>,
}

impl Manifest {
    pub fn new(source_url: Option<&str>) -> Self {
        Self {
            schema_version: 1,
            tool: format!("meiliback/{}", env!("CARGO_PKG_VERSION")),
            created_at: Utc::now().to_rfc3339(),
            source_url: source_url.map(str::to_string),
            indexes: Vec::new(),
        }
    }

    pub fn record(&mut self, snapshot: &IndexSnapshot, complete: bool) {
        self.indexes.push(ManifestIndex {
            uid: snapshot.info.uid.clone(),
            primary_key: snapshot.info.primary_key.clone(),
            document_count: snapshot.documents.len(),
            complete,
        });
    }
}

/// Where a finished backup ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutput {
    File(PathBuf),
    Bytes(Vec<u8>),
}

impl ArchiveOutput {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path),
            Self::Bytes(_) => None,
        }
    }
}

impl fmt::Display for ArchiveOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Bytes(bytes) => write!(f, "<{} bytes in memory>", bytes.len()),
        }
    }
}

/// Storage strategy for the backup orchestrator.
pub trait BackupStore {
    /// Stores one index. Called once per index, in listing order.
    fn write_index(&mut self, snapshot: &IndexSnapshot) -> Result<()>;

    /// Writes the manifest and packages everything into one archive.
    fn finish(&mut self, manifest: &Manifest) -> Result<ArchiveOutput>;
}

fn check_uid(uid: &str) -> Result<()> {
    ensure!(
        !uid.is_empty()
            && uid
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'),
        "index uid is not usable as an archive path: {uid:?}"
    );
    Ok(())
}

fn write_json_file<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_vec_pretty(value)?;
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

fn zip_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

fn zip_json<W: Write + Seek, T: Serialize + ?Sized>(
    writer: &mut ZipWriter<W>,
    name: &str,
    value: &T,
) -> Result<()> {
    writer.start_file(name, zip_options())?;
    serde_json::to_writer_pretty(&mut *writer, value)?;
    Ok(())
}

/// Writes `<work_dir>/meilisearch_backup/<uid>/...` on disk, then zips the tree
/// to `archive_path` with entries rooted at `meilisearch_backup/`.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    work_dir: PathBuf,
    archive_path: PathBuf,
}

impl DirectoryStore {
    pub fn new(work_dir: impl Into<PathBuf>, archive_path: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            archive_path: archive_path.into(),
        }
    }

    pub fn backup_root(&self) -> PathBuf {
        self.work_dir.join(BACKUP_ROOT)
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }
}

impl BackupStore for DirectoryStore {
    fn write_index(&mut self, snapshot: &IndexSnapshot) -> Result<()> {
        check_uid(snapshot.uid())?;
        let dir = self.backup_root().join(snapshot.uid());
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
        write_json_file(&dir.join(INFO_FILE), &snapshot.info)?;
        if let Some(settings) = &snapshot.settings {
            write_json_file(&dir.join(SETTINGS_FILE), settings)?;
        }
        write_json_file(&dir.join(DOCUMENTS_FILE), &snapshot.documents)
    }

    fn finish(&mut self, manifest: &Manifest) -> Result<ArchiveOutput> {
        let root = self.backup_root();
        fs::create_dir_all(&root).with_context(|| format!("failed to create {}", root.display()))?;
        write_json_file(&root.join(MANIFEST_NAME), manifest)?;

        let file = fs::File::create(&self.archive_path).with_context(|| {
            format!("failed to create archive {}", self.archive_path.display())
        })?;
        let mut writer = ZipWriter::new(file);
        for path in walk_files(&root)? {
            let rel = path.strip_prefix(&root)?;
            let name = format!("{BACKUP_ROOT}/{}", slash_path(rel));
            writer.start_file(name, zip_options())?;
            let mut source = fs::File::open(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            std::io::copy(&mut source, &mut writer)?;
        }
        writer.finish()?;
        Ok(ArchiveOutput::File(self.archive_path.clone()))
    }
}

/// Keeps snapshots in memory and packages them as a flat-layout zip.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: Vec<IndexSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> &[IndexSnapshot] {
        &self.snapshots
    }
}

impl BackupStore for MemoryStore {
    fn write_index(&mut self, snapshot: &IndexSnapshot) -> Result<()> {
        check_uid(snapshot.uid())?;
        self.snapshots.push(snapshot.clone());
        Ok(())
    }

    fn finish(&mut self, manifest: &Manifest) -> Result<ArchiveOutput> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let infos: Vec<&IndexInfo> = self.snapshots.iter().map(|s| &s.info).collect();
        zip_json(&mut writer, FLAT_INDEX_LIST, &infos)?;
        for snapshot in &self.snapshots {
            zip_json(&mut writer, &format!("{FLAT_INDEX_DIR}/{}.json", snapshot.uid()), snapshot)?;
        }
        zip_json(&mut writer, MANIFEST_NAME, manifest)?;
        let cursor = writer.finish()?;
        Ok(ArchiveOutput::Bytes(cursor.into_inner()))
    }
}

/// Where the indexes live inside an archive. Prefixes are empty or end with `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveLayout {
    Tree { prefix: String },
    Flat { prefix: String },
}

fn detect_layout(reader: &ArchiveReader, files: &[ArchiveFileEntry]) -> Option<ArchiveLayout> {
    let mut roots = BTreeSet::new();
    let mut bare_index_files = false;
    for entry in files {
        let parts: Vec<&str> = entry.path.split('/').collect();
        let Some(name) = parts.last() else { continue };
        if !INDEX_FILES.contains(name) {
            continue;
        }
        match parts.len() {
            2 => bare_index_files = true,
            n if n >= 3 && parts[n - 3].contains(BACKUP_ROOT) => {
                roots.insert(format!("{}/", parts[..n - 2].join("/")));
            }
            _ => {}
        }
    }
    // shallowest root wins
    if let Some(prefix) = roots
        .into_iter()
        .min_by_key(|prefix| (prefix.matches('/').count(), prefix.clone()))
    {
        return Some(ArchiveLayout::Tree { prefix });
    }
    let root_is_backup = reader.source() == ArchiveSourceKind::Directory
        && reader
            .root()
            .file_name()
            .is_some_and(|name| name.to_string_lossy().contains(BACKUP_ROOT));
    if bare_index_files && root_is_backup {
        return Some(ArchiveLayout::Tree {
            prefix: String::new(),
        });
    }
    files
        .iter()
        .filter_map(|entry| {
            let parts: Vec<&str> = entry.path.split('/').collect();
            match parts.as_slice() {
                [name] if *name == FLAT_INDEX_LIST => Some(String::new()),
                [dir, name] if *name == FLAT_INDEX_LIST => Some(format!("{dir}/")),
                _ => None,
            }
        })
        .min_by_key(String::len)
        .map(|prefix| ArchiveLayout::Flat { prefix })
}

/// Per-index summary for listing an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchivedIndex {
    pub uid: String,
    pub primary_key: Option<String>,
    pub documents: usize,
    pub settings: bool,
}

/// A backup archive opened for restore.
#[derive(Debug, Clone)]
pub struct BackupArchive {
    reader: ArchiveReader,
    layout: ArchiveLayout,
    files: Vec<ArchiveFileEntry>,
}

impl BackupArchive {
    /// Opens a zip file or an extracted directory and locates the backup root.
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_reader(ArchiveReader::from_path(path)?)
    }

    pub fn from_zip_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_reader(ArchiveReader::from_zip_bytes(bytes)?)
    }

    pub fn from_reader(reader: ArchiveReader) -> Result<Self> {
        let files = reader.list_files()?;
        let layout = detect_layout(&reader, &files).ok_or_else(|| anyhow!(MISSING_BACKUP_ROOT))?;
        Ok(Self {
            reader,
            layout,
            files,
        })
    }

    pub fn layout(&self) -> &ArchiveLayout {
        &self.layout
    }

    pub fn reader(&self) -> &ArchiveReader {
        &self.reader
    }

    pub fn files(&self) -> &[ArchiveFileEntry] {
        &self.files
    }

    /// Uids of archived indexes. Tree layouts are sorted by uid; flat layouts
    /// keep the order of `all_indexes.json`.
    pub fn index_uids(&self) -> Result<Vec<String>> {
        match &self.layout {
            ArchiveLayout::Tree { prefix } => {
                let uids: BTreeSet<String> = self
                    .files
                    .iter()
                    .filter_map(|entry| entry.path.strip_prefix(prefix.as_str()))
                    .filter_map(|rest| match rest.split('/').collect::<Vec<_>>().as_slice() {
                        [uid, name] if INDEX_FILES.contains(name) => Some((*uid).to_string()),
                        _ => None,
                    })
                    .collect();
                Ok(uids.into_iter().collect())
            }
            ArchiveLayout::Flat { prefix } => {
                let infos: Vec<IndexInfo> = self
                    .reader
                    .read_json(&format!("{prefix}{FLAT_INDEX_LIST}"))?
                    .unwrap_or_default();
                Ok(infos.into_iter().map(|info| info.uid).collect())
            }
        }
    }

    /// Reads one index. Missing `info.json` yields a descriptor with only the uid;
    /// missing `documents.json` yields no documents.
    pub fn read_index(&self, uid: &str) -> Result<IndexSnapshot> {
        check_uid(uid)?;
        match &self.layout {
            ArchiveLayout::Tree { prefix } => {
                let dir = format!("{prefix}{uid}");
                let mut info: IndexInfo = self
                    .reader
                    .read_json(&format!("{dir}/{INFO_FILE}"))?
                    .unwrap_or_else(|| IndexInfo::new(uid, None));
                info.uid = uid.to_string();
                let settings = self.reader.read_json(&format!("{dir}/{SETTINGS_FILE}"))?;
                let documents = self
                    .reader
                    .read_json(&format!("{dir}/{DOCUMENTS_FILE}"))?
                    .unwrap_or_default();
                Ok(IndexSnapshot {
                    info,
                    settings,
                    documents,
                })
            }
            ArchiveLayout::Flat { prefix } => {
                let path = format!("{prefix}{FLAT_INDEX_DIR}/{uid}.json");
                // older flat archives kept index entries at the root
                let legacy = format!("{prefix}{uid}.json");
                let snapshot: Option<IndexSnapshot> = match self.reader.read_json(&path)? {
                    Some(snapshot) => Some(snapshot),
                    None => self.reader.read_json(&legacy)?,
                };
                let mut snapshot = snapshot.ok_or_else(|| anyhow!("archive entry not found: {path}"))?;
                snapshot.info.uid = uid.to_string();
                Ok(snapshot)
            }
        }
    }

    pub fn manifest(&self) -> Result<Option<Manifest>> {
        let path = match &self.layout {
            ArchiveLayout::Tree { prefix } | ArchiveLayout::Flat { prefix } => {
                format!("{prefix}{MANIFEST_NAME}")
            }
        };
        self.reader.read_json(&path)
    }

    /// Reads every index and summarizes it.
    pub fn summarize(&self) -> Result<Vec<ArchivedIndex>> {
        self.index_uids()?
            .into_iter()
            .map(|uid| {
                let snapshot = self.read_index(&uid)?;
                Ok(ArchivedIndex {
                    uid,
                    primary_key: snapshot.info.primary_key,
                    documents: snapshot.documents.len(),
                    settings: snapshot.settings.is_some(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn snapshot(uid: &str, docs: usize) -> IndexSnapshot {
        let settings: Settings =
            serde_json::from_value(json!({"rankingRules": ["words"], "stopWords": []})).unwrap();
        IndexSnapshot {
            info: IndexInfo::new(uid, Some("id".to_string())),
            settings: Some(settings),
            documents: (0..docs)
                .map(|i| json!({"id": i}).as_object().cloned().unwrap())
                .collect(),
        }
    }

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = ZipWriter::new(file);
        for (name, body) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn reader_lists_and_reads_directory_archive() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp.path().join("alpha")).unwrap();
        fs::write(temp.path().join("manifest.json"), b"{}").unwrap();
        fs::write(temp.path().join("alpha/documents.json"), b"[]").unwrap();

        let reader = ArchiveReader::from_path(temp.path()).unwrap();
        assert_eq!(reader.source(), ArchiveSourceKind::Directory);

        let files = reader.list_files().unwrap();
        assert!(files.iter().any(|entry| entry.path == "manifest.json"));
        assert!(files.iter().any(|entry| entry.path == "alpha/documents.json"));
        assert_eq!(reader.read_bytes("alpha/documents.json").unwrap(), b"[]");
        assert!(reader.read_bytes_if_exists("missing.json").unwrap().is_none());
    }

    #[test]
    fn reader_lists_and_reads_zip_archive() {
        let temp = tempfile::tempdir().unwrap();
        let zip_path = temp.path().join("archive.zip");
        write_zip(
            &zip_path,
            &[("manifest.json", "{}"), ("alpha/documents.json", "[]")],
        );

        let reader = ArchiveReader::from_path(&zip_path).unwrap();
        assert_eq!(reader.source(), ArchiveSourceKind::Zip);
        let files = reader.list_files().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(reader.read_bytes("alpha/documents.json").unwrap(), b"[]");
        assert!(reader.read_bytes_if_exists("nope").unwrap().is_none());
    }

    #[test]
    fn directory_store_round_trips_through_zip() {
        let temp = tempfile::tempdir().unwrap();
        let archive_path = temp.path().join("backup.zip");
        let mut store = DirectoryStore::new(temp.path().join("work"), &archive_path);
        let mut manifest = Manifest::new(Some("http://search:7700"));
        for snap in [snapshot("alpha", 3), snapshot("page", 0)] {
            store.write_index(&snap).unwrap();
            manifest.record(&snap, true);
        }
        let output = store.finish(&manifest).unwrap();
        assert_eq!(output.path(), Some(archive_path.as_path()));

        let archive = BackupArchive::open(&archive_path).unwrap();
        assert_eq!(
            archive.layout(),
            &ArchiveLayout::Tree {
                prefix: "meilisearch_backup/".into()
            }
        );
        assert_eq!(archive.index_uids().unwrap(), vec!["alpha", "page"]);
        assert_eq!(archive.read_index("alpha").unwrap(), snapshot("alpha", 3));
        assert!(archive.read_index("page").unwrap().documents.is_empty());
        assert_eq!(archive.manifest().unwrap(), Some(manifest));
    }

    #[test]
    fn memory_store_writes_flat_layout() {
        let mut store = MemoryStore::new();
        store.write_index(&snapshot("alpha", 2)).unwrap();
        store.write_index(&snapshot("beta", 1)).unwrap();
        let ArchiveOutput::Bytes(bytes) = store.finish(&Manifest::new(None)).unwrap() else {
            panic!("expected bytes");
        };

        let archive = BackupArchive::from_zip_bytes(bytes).unwrap();
        assert_eq!(
            archive.layout(),
            &ArchiveLayout::Flat {
                prefix: String::new()
            }
        );
        assert_eq!(archive.index_uids().unwrap(), vec!["alpha", "beta"]);
        assert!(archive.files().iter().any(|entry| entry.path == "indexes/beta.json"));
        assert_eq!(archive.read_index("beta").unwrap(), snapshot("beta", 1));
        let summary = archive.summarize().unwrap();
        assert_eq!(summary[0].documents, 2);
        assert!(summary[0].settings);
    }

    #[test]
    fn flat_layout_accepts_uids_named_like_its_metadata() {
        let mut store = MemoryStore::new();
        let mut manifest = Manifest::new(None);
        for snap in [snapshot("manifest", 2), snapshot("all_indexes", 1), snapshot("movies", 3)] {
            store.write_index(&snap).unwrap();
            manifest.record(&snap, true);
        }
        let ArchiveOutput::Bytes(bytes) = store.finish(&manifest).unwrap() else {
            panic!("expected bytes");
        };

        let archive = BackupArchive::from_zip_bytes(bytes).unwrap();
        assert_eq!(
            archive.index_uids().unwrap(),
            vec!["manifest", "all_indexes", "movies"]
        );
        assert_eq!(archive.read_index("manifest").unwrap(), snapshot("manifest", 2));
        assert_eq!(archive.read_index("all_indexes").unwrap(), snapshot("all_indexes", 1));
        assert_eq!(archive.manifest().unwrap(), Some(manifest));
    }

    #[test]
    fn flat_layout_reads_root_level_index_entries() {
        let temp = tempfile::tempdir().unwrap();
        let zip_path = temp.path().join("flat.zip");
        let alpha = serde_json::to_string(&snapshot("alpha", 2)).unwrap();
        write_zip(
            &zip_path,
            &[
                ("all_indexes.json", r#"[{"uid":"alpha","primaryKey":"id"}]"#),
                ("alpha.json", alpha.as_str()),
            ],
        );

        let archive = BackupArchive::open(&zip_path).unwrap();
        assert!(matches!(archive.layout(), ArchiveLayout::Flat { .. }));
        assert_eq!(archive.read_index("alpha").unwrap(), snapshot("alpha", 2));
        assert!(archive.read_index("beta").is_err());
    }

    #[test]
    fn nested_backup_root_is_found_in_any_entry_order() {
        let temp = tempfile::tempdir().unwrap();
        let zip_path = temp.path().join("legacy.zip");
        write_zip(
            &zip_path,
            &[
                ("tmp/meilisearch_backup_old/page/documents.json", "[]"),
                ("README.txt", "hello"),
                (
                    "tmp/meilisearch_backup_old/alpha/info.json",
                    r#"{"uid":"alpha","primaryKey":null,"createdAt":"2024-01-01T00:00:00Z"}"#,
                ),
            ],
        );

        let archive = BackupArchive::open(&zip_path).unwrap();
        assert_eq!(archive.index_uids().unwrap(), vec!["alpha", "page"]);
        let alpha = archive.read_index("alpha").unwrap();
        assert!(alpha.info.primary_key.is_none());
        assert!(alpha.info.extra.contains_key("createdAt"));
        assert!(alpha.settings.is_none());
        assert!(alpha.documents.is_empty());
        let page = archive.read_index("page").unwrap();
        assert_eq!(page.info, IndexInfo::new("page", None));
    }

    #[test]
    fn extracted_backup_root_is_accepted() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join(BACKUP_ROOT);
        fs::create_dir_all(root.join("alpha")).unwrap();
        fs::write(root.join("alpha/documents.json"), br#"[{"id": 1}]"#).unwrap();

        let archive = BackupArchive::open(&root).unwrap();
        assert_eq!(
            archive.layout(),
            &ArchiveLayout::Tree {
                prefix: String::new()
            }
        );
        assert_eq!(archive.read_index("alpha").unwrap().documents.len(), 1);
    }

    #[test]
    fn archive_without_backup_root_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let zip_path = temp.path().join("other.zip");
        write_zip(&zip_path, &[("stuff/alpha/info.json", "{}")]);

        let err = BackupArchive::open(&zip_path).unwrap_err();
        assert_eq!(err.to_string(), MISSING_BACKUP_ROOT);
    }

    #[test]
    fn unsafe_uids_are_rejected() {
        let mut store = MemoryStore::new();
        assert!(store.write_index(&snapshot("../evil", 0)).is_err());
        assert!(check_uid("movies_2024-v1").is_ok());
    }
}
