//! In-process fragment backend
//!
//! Holds fragment bytes, footers and checkpoint slots in maps keyed by
//! handle. Lifecycle moves are flag flips under one mutex, so they are
//! trivially atomic. Nothing survives the process.

use super::{FragmentBackend, FragmentMedium};
use crate::FragmentState;
use hivestore_common::config::BackendKind;
use hivestore_common::{DiskId, Error, FragmentHandle, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io;
use std::sync::Arc;

struct MemFragment {
    state: FragmentState,
    data: Arc<RwLock<Vec<u8>>>,
    footer: Option<Vec<u8>>,
}

#[derive(Default)]
struct MemState {
    fragments: HashMap<FragmentHandle, MemFragment>,
    checkpoints: HashMap<(FragmentHandle, usize), Vec<u8>>,
}

/// Fragment store held entirely in memory
pub struct MemoryBackend {
    disks: HashSet<DiskId>,
    state: Mutex<MemState>,
}

impl MemoryBackend {
    pub fn new(disks: impl IntoIterator<Item = DiskId>) -> Self {
        Self {
            disks: disks.into_iter().collect(),
            state: Mutex::new(MemState::default()),
        }
    }

    fn check_disk(&self, disk: DiskId) -> Result<()> {
        if self.disks.contains(&disk) {
            Ok(())
        } else {
            Err(Error::InvalidDisk(disk))
        }
    }

    /// Run `f` on the fragment if it is in `state`
    fn with_fragment<T>(
        &self,
        handle: &FragmentHandle,
        state: FragmentState,
        f: impl FnOnce(&mut MemFragment) -> T,
    ) -> Result<T> {
        self.check_disk(handle.disk)?;
        let mut inner = self.state.lock();
        match inner.fragments.get_mut(handle) {
            Some(frag) if frag.state == state => Ok(f(frag)),
            _ => Err(Error::fragment_not_found(handle)),
        }
    }

    fn transition(
        &self,
        handle: &FragmentHandle,
        from: FragmentState,
        to: FragmentState,
    ) -> Result<()> {
        self.with_fragment(handle, from, |frag| frag.state = to)
    }
}

impl FragmentBackend for MemoryBackend {
    type Medium = MemoryMedium;

    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn state(&self, handle: &FragmentHandle) -> Result<FragmentState> {
        self.check_disk(handle.disk)?;
        Ok(self
            .state
            .lock()
            .fragments
            .get(handle)
            .map_or(FragmentState::Absent, |f| f.state))
    }

    fn create(&self, handle: &FragmentHandle) -> Result<MemoryMedium> {
        self.check_disk(handle.disk)?;
        let mut inner = self.state.lock();
        if inner.fragments.contains_key(handle) {
            return Err(Error::fragment(handle, "create: fragment already exists"));
        }
        let data = Arc::new(RwLock::new(Vec::new()));
        inner.fragments.insert(
            *handle,
            MemFragment {
                state: FragmentState::Transient,
                data: Arc::clone(&data),
                footer: None,
            },
        );
        Ok(MemoryMedium { data })
    }

    fn open(
        &self,
        handle: &FragmentHandle,
        state: FragmentState,
        _writable: bool,
    ) -> Result<MemoryMedium> {
        self.with_fragment(handle, state, |frag| MemoryMedium {
            data: Arc::clone(&frag.data),
        })
    }

    fn publish(&self, handle: &FragmentHandle) -> Result<()> {
        self.transition(handle, FragmentState::Transient, FragmentState::Committed)
    }

    fn unpublish(&self, handle: &FragmentHandle) -> Result<()> {
        self.transition(handle, FragmentState::Committed, FragmentState::Transient)
    }

    fn remove(&self, handle: &FragmentHandle) -> Result<()> {
        self.check_disk(handle.disk)?;
        let mut inner = self.state.lock();
        inner.fragments.remove(handle);
        inner.checkpoints.retain(|(h, _), _| h != handle);
        Ok(())
    }

    fn length(&self, handle: &FragmentHandle, state: FragmentState) -> Result<u64> {
        self.with_fragment(handle, state, |frag| frag.data.read().len() as u64)
    }

    fn read_footer(
        &self,
        handle: &FragmentHandle,
        state: FragmentState,
    ) -> Result<Option<Vec<u8>>> {
        self.with_fragment(handle, state, |frag| frag.footer.clone())
    }

    fn write_footer(
        &self,
        handle: &FragmentHandle,
        state: FragmentState,
        data: &[u8],
    ) -> Result<()> {
        self.with_fragment(handle, state, |frag| frag.footer = Some(data.to_vec()))
    }

    fn read_checkpoint_slot(
        &self,
        handle: &FragmentHandle,
        slot: usize,
    ) -> Result<Option<Vec<u8>>> {
        self.check_disk(handle.disk)?;
        Ok(self.state.lock().checkpoints.get(&(*handle, slot)).cloned())
    }

    fn write_checkpoint_slot(
        &self,
        handle: &FragmentHandle,
        slot: usize,
        data: &[u8],
        _flush: bool,
    ) -> Result<()> {
        self.check_disk(handle.disk)?;
        self.state
            .lock()
            .checkpoints
            .insert((*handle, slot), data.to_vec());
        Ok(())
    }

    fn remove_checkpoint(&self, handle: &FragmentHandle) -> Result<()> {
        self.check_disk(handle.disk)?;
        self.state
            .lock()
            .checkpoints
            .retain(|(h, _), _| h != handle);
        Ok(())
    }

    fn list_checkpoints(&self, disk: DiskId) -> Result<Vec<FragmentHandle>> {
        self.check_disk(disk)?;
        let inner = self.state.lock();
        let found: BTreeSet<_> = inner
            .checkpoints
            .keys()
            .filter(|(h, _)| h.disk == disk)
            .map(|(h, _)| *h)
            .collect();
        Ok(found.into_iter().collect())
    }
}

/// Largest fragment the memory backend will hold (4 GiB)
pub const MEMORY_FRAGMENT_LIMIT: u64 = 4 << 30;

fn checked_size(size: u64) -> io::Result<usize> {
    if size > MEMORY_FRAGMENT_LIMIT {
        return Err(io::Error::new(
            io::ErrorKind::FileTooLarge,
            format!("{size} bytes exceeds the in-memory fragment limit"),
        ));
    }
    usize::try_from(size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "size out of range"))
}

/// Shared view of an in-memory fragment's bytes
pub struct MemoryMedium {
    data: Arc<RwLock<Vec<u8>>>,
}

impl FragmentMedium for MemoryMedium {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let data = self.data.read();
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?;
        let end = checked_size(end)?;
        let start = end - buf.len();
        let mut data = self.data.write();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn set_len(&self, size: u64) -> io::Result<()> {
        let size = checked_size(size)?;
        self.data.write().resize(size, 0);
        Ok(())
    }

    fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}
