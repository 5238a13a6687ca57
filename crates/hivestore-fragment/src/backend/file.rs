//! File backend: one directory tree per disk
//!
//! On-disk layout under each disk root:
//!
//! ```text
//! <root>/
//! ├── data/<h1>/<h2>/<object>_<frag>         committed fragment
//! ├── data/<h1>/<h2>/<object>_<frag>.fext    committed footer extension
//! ├── staging/<object>_<frag>                transient fragment
//! ├── staging/<object>_<frag>.fext           transient footer extension
//! └── checkpoints/<object>_<frag>.ctx0|.ctx1 write checkpoint slots
//! ```
//!
//! `h1`/`h2` are two bytes of the object id's xxh64, keeping directories
//! small. Staging and data share a filesystem, so commit is a single
//! `rename(2)`: readers see either no committed fragment or all of it.
//! Files ending in `.tmp` are atomic replacements in progress.

use super::{FragmentBackend, FragmentMedium};
use crate::FragmentState;
use hivestore_common::config::{BackendKind, SyncMode};
use hivestore_common::{DiskId, Error, FragmentHandle, ObjectId, Result};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const DATA_DIR: &str = "data";
const STAGING_DIR: &str = "staging";
const CHECKPOINT_DIR: &str = "checkpoints";
const FOOTER_EXT: &str = "fext";
const CHECKPOINT_EXT: &str = "ctx";

/// Directory tree of one disk
#[derive(Clone, Debug)]
struct DiskTree {
    data: PathBuf,
    staging: PathBuf,
    checkpoints: PathBuf,
}

impl DiskTree {
    fn open(root: &Path) -> io::Result<Self> {
        let tree = Self {
            data: root.join(DATA_DIR),
            staging: root.join(STAGING_DIR),
            checkpoints: root.join(CHECKPOINT_DIR),
        };
        fs::create_dir_all(&tree.data)?;
        fs::create_dir_all(&tree.staging)?;
        fs::create_dir_all(&tree.checkpoints)?;
        Ok(tree)
    }

    fn hash_dir(&self, object_id: &ObjectId) -> PathBuf {
        let h = xxhash_rust::xxh64::xxh64(object_id.as_bytes(), 0);
        self.data
            .join(format!("{:02x}", h & 0xff))
            .join(format!("{:02x}", (h >> 8) & 0xff))
    }

    fn committed(&self, handle: &FragmentHandle) -> PathBuf {
        self.hash_dir(&handle.object_id).join(handle.file_stem())
    }

    fn staged(&self, handle: &FragmentHandle) -> PathBuf {
        self.staging.join(handle.file_stem())
    }

    fn location(&self, handle: &FragmentHandle, state: FragmentState) -> PathBuf {
        match state {
            FragmentState::Committed => self.committed(handle),
            FragmentState::Transient | FragmentState::Absent => self.staged(handle),
        }
    }

    fn checkpoint(&self, handle: &FragmentHandle, slot: usize) -> PathBuf {
        self.checkpoints
            .join(format!("{}.{CHECKPOINT_EXT}{slot}", handle.file_stem()))
    }
}

fn footer_path(fragment: &Path) -> PathBuf {
    fragment.with_extension(FOOTER_EXT)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Remove a file, treating absence as success
fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Rename a file if the source exists; returns whether it did
fn rename_if_exists(from: &Path, to: &Path) -> io::Result<bool> {
    match fs::rename(from, to) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn sync_dir(path: &Path) -> io::Result<()> {
    File::open(path)?.sync_all()
}

/// Parse `<object>_<frag>.ctx<slot>` back into its object and fragment
fn parse_checkpoint_name(name: &str) -> Option<(ObjectId, u8)> {
    let (stem, ext) = name.rsplit_once('.')?;
    if !ext.starts_with(CHECKPOINT_EXT) {
        return None;
    }
    let (object, fragment) = stem.rsplit_once('_')?;
    Some((object.parse().ok()?, fragment.parse().ok()?))
}

/// Fragment store over local directory trees
pub struct FileBackend {
    disks: HashMap<DiskId, DiskTree>,
    sync_mode: SyncMode,
}

impl FileBackend {
    /// Prepare the directory tree on every disk
    pub fn new(
        disks: impl IntoIterator<Item = (DiskId, PathBuf)>,
        sync_mode: SyncMode,
    ) -> Result<Self> {
        let mut trees = HashMap::new();
        for (id, root) in disks {
            let tree = DiskTree::open(&root).map_err(|e| {
                Error::configuration(format!("failed to prepare {} at {:?}: {}", id, root, e))
            })?;
            info!("Fragment tree for {} at {:?}", id, root);
            trees.insert(id, tree);
        }
        Ok(Self {
            disks: trees,
            sync_mode,
        })
    }

    fn tree(&self, disk: DiskId) -> Result<&DiskTree> {
        self.disks.get(&disk).ok_or(Error::InvalidDisk(disk))
    }

    fn durable(&self) -> bool {
        self.sync_mode != SyncMode::Never
    }

    /// Write `data` to `path` through a temp file and rename
    fn replace_file(&self, path: &Path, data: &[u8], flush: bool) -> io::Result<()> {
        let tmp = temp_path(path);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(data)?;
            if flush {
                file.sync_all()?;
            }
        }
        fs::rename(&tmp, path)?;
        if flush && let Some(parent) = path.parent() {
            sync_dir(parent)?;
        }
        Ok(())
    }
}

impl FragmentBackend for FileBackend {
    type Medium = FileMedium;

    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn state(&self, handle: &FragmentHandle) -> Result<FragmentState> {
        let tree = self.tree(handle.disk)?;
        let exists = |p: PathBuf| {
            p.try_exists()
                .map_err(|e| Error::fragment_io(handle, "stat", &e))
        };

        let committed = exists(tree.committed(handle))?;
        let staged = exists(tree.staged(handle))?;
        match (committed, staged) {
            (true, true) => {
                warn!("{} has both a staged and a committed copy", handle);
                Ok(FragmentState::Committed)
            }
            (true, false) => Ok(FragmentState::Committed),
            (false, true) => Ok(FragmentState::Transient),
            (false, false) => Ok(FragmentState::Absent),
        }
    }

    fn create(&self, handle: &FragmentHandle) -> Result<FileMedium> {
        let path = self.tree(handle.disk)?.staged(handle);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| Error::fragment_io(handle, "create", &e))?;
        Ok(FileMedium { file })
    }

    fn open(
        &self,
        handle: &FragmentHandle,
        state: FragmentState,
        writable: bool,
    ) -> Result<FileMedium> {
        let path = self.tree(handle.disk)?.location(handle, state);
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&path)
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    Error::fragment_not_found(handle)
                } else {
                    Error::fragment_io(handle, "open", &e)
                }
            })?;
        Ok(FileMedium { file })
    }

    fn publish(&self, handle: &FragmentHandle) -> Result<()> {
        let tree = self.tree(handle.disk)?;
        let staged = tree.staged(handle);
        let committed = tree.committed(handle);
        let io_err = |e: io::Error| Error::fragment_io(handle, "publish", &e);

        if committed.try_exists().map_err(io_err)? {
            return Err(Error::fragment(handle, "a committed copy already exists"));
        }
        let dir = tree.hash_dir(&handle.object_id);
        fs::create_dir_all(&dir).map_err(io_err)?;

        // Footer first: the data rename is the publish point.
        rename_if_exists(&footer_path(&staged), &footer_path(&committed)).map_err(io_err)?;
        fs::rename(&staged, &committed).map_err(io_err)?;

        if self.durable() {
            sync_dir(&dir).map_err(io_err)?;
            sync_dir(&tree.staging).map_err(io_err)?;
        }
        Ok(())
    }

    fn unpublish(&self, handle: &FragmentHandle) -> Result<()> {
        let tree = self.tree(handle.disk)?;
        let staged = tree.staged(handle);
        let committed = tree.committed(handle);
        let io_err = |e: io::Error| Error::fragment_io(handle, "rollback", &e);

        if staged.try_exists().map_err(io_err)? {
            return Err(Error::fragment(handle, "a staged copy already exists"));
        }

        fs::rename(&committed, &staged).map_err(io_err)?;
        rename_if_exists(&footer_path(&committed), &footer_path(&staged)).map_err(io_err)?;

        if self.durable() {
            sync_dir(&tree.staging).map_err(io_err)?;
            sync_dir(&tree.hash_dir(&handle.object_id)).map_err(io_err)?;
        }
        Ok(())
    }

    fn remove(&self, handle: &FragmentHandle) -> Result<()> {
        let tree = self.tree(handle.disk)?;
        let staged = tree.staged(handle);
        let committed = tree.committed(handle);

        for path in [
            footer_path(&committed),
            committed,
            footer_path(&staged),
            staged,
        ] {
            remove_if_exists(&path).map_err(|e| Error::fragment_io(handle, "delete", &e))?;
        }
        self.remove_checkpoint(handle)
    }

    fn length(&self, handle: &FragmentHandle, state: FragmentState) -> Result<u64> {
        let path = self.tree(handle.disk)?.location(handle, state);
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::fragment_not_found(handle)),
            Err(e) => Err(Error::fragment_io(handle, "stat", &e)),
        }
    }

    fn read_footer(
        &self,
        handle: &FragmentHandle,
        state: FragmentState,
    ) -> Result<Option<Vec<u8>>> {
        let tree = self.tree(handle.disk)?;
        let primary = footer_path(&tree.location(handle, state));
        // A crash between the footer and data renames leaves the footer on
        // the other side; it still belongs to this fragment.
        let other = match state {
            FragmentState::Committed => footer_path(&tree.staged(handle)),
            _ => footer_path(&tree.committed(handle)),
        };

        for path in [primary, other] {
            match fs::read(&path) {
                Ok(data) => return Ok(Some(data)),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(Error::fragment_io(handle, "read footer", &e)),
            }
        }
        Ok(None)
    }

    fn write_footer(
        &self,
        handle: &FragmentHandle,
        state: FragmentState,
        data: &[u8],
    ) -> Result<()> {
        let tree = self.tree(handle.disk)?;
        let path = footer_path(&tree.location(handle, state));
        let stale = match state {
            FragmentState::Committed => footer_path(&tree.staged(handle)),
            _ => footer_path(&tree.committed(handle)),
        };
        let io_err = |e: io::Error| Error::fragment_io(handle, "write footer", &e);

        self.replace_file(&path, data, self.durable()).map_err(io_err)?;
        remove_if_exists(&stale).map_err(io_err)
    }

    fn read_checkpoint_slot(
        &self,
        handle: &FragmentHandle,
        slot: usize,
    ) -> Result<Option<Vec<u8>>> {
        let path = self.tree(handle.disk)?.checkpoint(handle, slot);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::fragment_io(handle, "read checkpoint", &e)),
        }
    }

    fn write_checkpoint_slot(
        &self,
        handle: &FragmentHandle,
        slot: usize,
        data: &[u8],
        flush: bool,
    ) -> Result<()> {
        let path = self.tree(handle.disk)?.checkpoint(handle, slot);
        self.replace_file(&path, data, flush)
            .map_err(|e| Error::fragment_io(handle, "save checkpoint", &e))
    }

    fn remove_checkpoint(&self, handle: &FragmentHandle) -> Result<()> {
        let tree = self.tree(handle.disk)?;
        for slot in 0..crate::checkpoint::CHECKPOINT_SLOTS {
            let path = tree.checkpoint(handle, slot);
            for p in [temp_path(&path), path] {
                remove_if_exists(&p)
                    .map_err(|e| Error::fragment_io(handle, "delete checkpoint", &e))?;
            }
        }
        Ok(())
    }

    fn list_checkpoints(&self, disk: DiskId) -> Result<Vec<FragmentHandle>> {
        let tree = self.tree(disk)?;
        let entries = fs::read_dir(&tree.checkpoints).map_err(|e| {
            Error::Storage(format!("failed to list {:?}: {}", tree.checkpoints, e))
        })?;

        let mut found = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                Error::Storage(format!("failed to list {:?}: {}", tree.checkpoints, e))
            })?;
            let name = entry.file_name();
            match name.to_str().and_then(parse_checkpoint_name) {
                Some((object_id, fragment)) => {
                    found.insert(FragmentHandle::new(disk, object_id, fragment));
                }
                None => warn!("Ignoring unexpected file {:?} in {:?}", name, tree.checkpoints),
            }
        }
        Ok(found.into_iter().collect())
    }
}

/// Open fragment file
pub struct FileMedium {
    file: File,
}

impl FragmentMedium for FileMedium {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        loop {
            match self.file.read_at(buf, offset) {
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                result => return result,
            }
        }
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        self.file.write_all_at(buf, offset)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&self, size: u64) -> io::Result<()> {
        self.file.set_len(size)
    }

    fn sync(&self) -> io::Result<()> {
        self.file.sync_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_checkpoint_name_parsing() {
        let oid = ObjectId::new();
        let name = format!("{oid}_3.ctx1");
        assert_eq!(parse_checkpoint_name(&name), Some((oid, 3)));
        assert_eq!(parse_checkpoint_name(&format!("{oid}_3.ctx1.tmp")), None);
        assert_eq!(parse_checkpoint_name("garbage"), None);
    }

    #[test]
    fn test_publish_moves_into_hash_dir() {
        let dir = tempdir().unwrap();
        let disk = DiskId::new(0);
        let backend =
            FileBackend::new([(disk, dir.path().to_path_buf())], SyncMode::Never).unwrap();
        let handle = FragmentHandle::new(disk, ObjectId::new(), 0);

        let medium = backend.create(&handle).unwrap();
        medium.write_at(b"abc", 0).unwrap();
        backend.write_footer(&handle, FragmentState::Transient, b"ext").unwrap();
        backend.publish(&handle).unwrap();

        let tree = backend.tree(disk).unwrap();
        assert!(tree.committed(&handle).exists());
        assert!(footer_path(&tree.committed(&handle)).exists());
        assert!(!tree.staged(&handle).exists());
        assert_eq!(backend.state(&handle).unwrap(), FragmentState::Committed);
    }

    #[test]
    fn test_unknown_disk() {
        let dir = tempdir().unwrap();
        let backend =
            FileBackend::new([(DiskId::new(0), dir.path().to_path_buf())], SyncMode::Never)
                .unwrap();
        let handle = FragmentHandle::new(DiskId::new(5), ObjectId::new(), 0);

        assert!(matches!(backend.state(&handle), Err(Error::InvalidDisk(_))));
    }
}
