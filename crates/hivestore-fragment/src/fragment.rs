//! Lifecycle of one physical fragment
//!
//! ```text
//! Absent --create--> Transient --commit--> Committed
//! Transient --delete--> Absent
//! Committed --rollback--> Transient
//! Committed --delete--> Absent
//! Transient --rollback--> Transient (no-op)
//! ```
//!
//! A [`Fragment`] owns exactly one handle. Calls on one `Fragment` are not
//! synchronized; cooperating writers and repairers exclude each other with
//! [`Fragment::lock`], which fails instead of waiting.

use crate::backend::{FragmentBackend, FragmentMedium};
use crate::checkpoint::{self, CHECKPOINT_SLOTS, WriteCheckpoint};
use crate::footer::FooterExtension;
use crate::store::{FragmentStats, StoreShared};
use hivestore_common::config::SyncMode;
use hivestore_common::{Error, FragmentHandle, Result};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Where a fragment is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentState {
    /// Nothing on disk
    Absent,
    /// Staged; invisible to readers
    Transient,
    /// Published in the durable location
    Committed,
}

impl fmt::Display for FragmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Absent => "absent",
            Self::Transient => "transient",
            Self::Committed => "committed",
        };
        f.write_str(name)
    }
}

/// Closes a fragment's open handle from another thread.
///
/// Once fired, I/O in flight on the handle and every later I/O call fail
/// with a fragment storage error. The owner still calls [`Fragment::close`]
/// to release the handle.
#[derive(Debug, Clone)]
pub struct CloseSignal {
    closed: Arc<AtomicBool>,
}

impl CloseSignal {
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

struct OpenMedium<M> {
    medium: M,
    writable: bool,
    closed: Arc<AtomicBool>,
}

impl<M> OpenMedium<M> {
    fn new(medium: M, writable: bool) -> Self {
        Self {
            medium,
            writable,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// One fragment's lifecycle, I/O and checkpoints
pub struct Fragment<B: FragmentBackend> {
    handle: FragmentHandle,
    store: Arc<StoreShared<B>>,
    open: Option<OpenMedium<B::Medium>>,
    /// Offset of the next append
    cursor: u64,
    lock_held: bool,
}

impl<B: FragmentBackend> Fragment<B> {
    pub(crate) fn new(handle: FragmentHandle, store: Arc<StoreShared<B>>) -> Self {
        Self {
            handle,
            store,
            open: None,
            cursor: 0,
            lock_held: false,
        }
    }

    #[must_use]
    pub fn handle(&self) -> &FragmentHandle {
        &self.handle
    }

    fn backend(&self) -> &B {
        &self.store.backend
    }

    fn stats(&self) -> &FragmentStats {
        &self.store.stats
    }

    fn misuse(&self, op: &str, what: impl fmt::Display) -> Error {
        Error::fragment(&self.handle, format!("{op}: {what}"))
    }

    // ---- Lifecycle ----

    /// Allocate the fragment in staging and open it read-write
    pub fn create(&mut self) -> Result<()> {
        if self.open.is_some() {
            return Err(self.misuse("create", "fragment is open"));
        }
        let state = self.state()?;
        if state != FragmentState::Absent {
            return Err(self.misuse("create", format_args!("fragment is already {state}")));
        }

        let medium = self.backend().create(&self.handle)?;
        self.open = Some(OpenMedium::new(medium, true));
        self.cursor = 0;
        FragmentStats::bump(&self.stats().creates, 1);
        debug!("Created {}", self.handle);
        Ok(())
    }

    /// Publish the staged fragment. Its write checkpoint is discarded.
    pub fn commit(&mut self) -> Result<()> {
        let state = self.state()?;
        if state != FragmentState::Transient {
            return Err(self.misuse("commit", format_args!("fragment is {state}")));
        }

        if self.open.as_ref().is_some_and(OpenMedium::is_closed) {
            return Err(self.misuse("commit", "handle was closed"));
        }
        if self.store.sync_mode != SyncMode::Never {
            match self.open.as_ref().filter(|o| o.writable) {
                Some(open) => {
                    let result = open.medium.sync();
                    self.complete(open, "commit", result)?;
                }
                None => {
                    // Data written through an earlier handle may still be cached.
                    let medium = self
                        .backend()
                        .open(&self.handle, FragmentState::Transient, true)?;
                    medium
                        .sync()
                        .map_err(|e| Error::fragment_io(&self.handle, "commit", &e))?;
                }
            }
        }
        self.backend().publish(&self.handle)?;
        self.backend().remove_checkpoint(&self.handle)?;

        FragmentStats::bump(&self.stats().commits, 1);
        debug!("Committed {}", self.handle);
        Ok(())
    }

    /// Return a committed fragment to staging. No-op otherwise.
    pub fn rollback(&mut self) -> Result<()> {
        if self.state()? != FragmentState::Committed {
            return Ok(());
        }
        self.backend().unpublish(&self.handle)?;
        FragmentStats::bump(&self.stats().rollbacks, 1);
        debug!("Rolled back {}", self.handle);
        Ok(())
    }

    /// Remove every trace of the fragment. Closes the handle if open.
    pub fn delete(&mut self) -> Result<()> {
        if let Some(open) = self.open.take() {
            open.closed.store(true, Ordering::Release);
        }
        self.cursor = 0;
        self.backend().remove(&self.handle)?;
        FragmentStats::bump(&self.stats().deletes, 1);
        debug!("Deleted {}", self.handle);
        Ok(())
    }

    /// Take the advisory lock. Fails at once if anyone holds it, this
    /// fragment included.
    pub fn lock(&mut self) -> Result<()> {
        if self.lock_held || !self.store.try_lock(&self.handle) {
            FragmentStats::bump(&self.stats().lock_conflicts, 1);
            return Err(self.misuse("lock", "lock is already taken"));
        }
        self.lock_held = true;
        Ok(())
    }

    pub fn unlock(&mut self) -> Result<()> {
        if !self.lock_held {
            return Err(self.misuse("unlock", "lock is not held"));
        }
        self.lock_held = false;
        self.store.unlock(&self.handle);
        Ok(())
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock_held
    }

    pub fn state(&self) -> Result<FragmentState> {
        self.backend().state(&self.handle)
    }

    pub fn is_transient(&self) -> Result<bool> {
        Ok(self.state()? == FragmentState::Transient)
    }

    pub fn is_committed(&self) -> Result<bool> {
        Ok(self.state()? == FragmentState::Committed)
    }

    // ---- Handles ----

    /// Open a committed fragment read-only
    pub fn open(&mut self) -> Result<()> {
        if self.open.is_some() {
            return Err(self.misuse("open", "fragment is already open"));
        }
        if self.state()? != FragmentState::Committed {
            return Err(Error::fragment_not_found(&self.handle));
        }
        let medium = self
            .backend()
            .open(&self.handle, FragmentState::Committed, false)?;
        self.open = Some(OpenMedium::new(medium, false));
        self.cursor = 0;
        Ok(())
    }

    /// Open a transient or committed fragment read-write
    pub fn rwopen(&mut self) -> Result<()> {
        if self.open.is_some() {
            return Err(self.misuse("rwopen", "fragment is already open"));
        }
        let state = self.state()?;
        if state == FragmentState::Absent {
            return Err(Error::fragment_not_found(&self.handle));
        }
        let medium = self.backend().open(&self.handle, state, true)?;
        self.open = Some(OpenMedium::new(medium, true));
        self.cursor = 0;
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        let open = self
            .open
            .take()
            .ok_or_else(|| self.misuse("close", "fragment is not open"))?;
        open.closed.store(true, Ordering::Release);
        Ok(())
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Signal that closes the current handle from another thread
    #[must_use]
    pub fn close_signal(&self) -> Option<CloseSignal> {
        self.open.as_ref().map(|o| CloseSignal {
            closed: Arc::clone(&o.closed),
        })
    }

    /// Current append offset
    #[must_use]
    pub fn position(&self) -> u64 {
        self.cursor
    }

    fn medium(&self, op: &str, write: bool) -> Result<&OpenMedium<B::Medium>> {
        let open = self
            .open
            .as_ref()
            .ok_or_else(|| self.misuse(op, "fragment is not open"))?;
        if open.is_closed() {
            return Err(self.misuse(op, "handle was closed"));
        }
        if write && !open.writable {
            return Err(self.misuse(op, "handle is read-only"));
        }
        Ok(open)
    }

    /// Map a medium result, failing if the handle was closed meanwhile
    fn complete<T>(&self, open: &OpenMedium<B::Medium>, op: &str, result: io::Result<T>) -> Result<T> {
        let value = result.map_err(|e| Error::fragment_io(&self.handle, op, &e))?;
        if open.is_closed() {
            return Err(self.misuse(op, "handle closed during I/O"));
        }
        Ok(value)
    }

    // ---- I/O ----

    /// Positioned read; returns 0 at end of fragment
    pub fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let open = self.medium("read", false)?;
        let mut total = 0;
        while total < buf.len() {
            let result = open.medium.read_at(&mut buf[total..], offset + total as u64);
            let n = self.complete(open, "read", result)?;
            if n == 0 {
                break;
            }
            total += n;
        }
        FragmentStats::bump(&self.stats().bytes_read, total as u64);
        Ok(total)
    }

    /// Positioned write; the append cursor does not move
    pub fn write(&self, buf: &[u8], offset: u64) -> Result<usize> {
        self.write_at("write", buf, offset)?;
        Ok(buf.len())
    }

    fn write_at(&self, op: &str, buf: &[u8], offset: u64) -> Result<()> {
        let open = self.medium(op, true)?;
        let result = open.medium.write_at(buf, offset);
        self.complete(open, op, result)?;
        if self.store.sync_mode == SyncMode::Always {
            let result = open.medium.sync();
            self.complete(open, op, result)?;
        }
        FragmentStats::bump(&self.stats().bytes_written, buf.len() as u64);
        Ok(())
    }

    /// Write at the cursor and advance it
    pub fn append(&mut self, buf: &[u8]) -> Result<usize> {
        let offset = self.cursor;
        self.write_at("append", buf, offset)?;
        self.cursor = offset + buf.len() as u64;
        Ok(buf.len())
    }

    /// Append each buffer in order; returns the total written
    pub fn append_buffers<T: AsRef<[u8]>>(&mut self, bufs: &[T]) -> Result<usize> {
        let mut total = 0;
        for buf in bufs {
            total += self.append(buf.as_ref())?;
        }
        Ok(total)
    }

    /// Shrink to `size`; appends continue from the new end.
    /// No-op when `size` is not below the current length.
    pub fn truncate(&mut self, size: u64) -> Result<()> {
        let open = self.medium("truncate", true)?;
        let result = open.medium.size();
        let len = self.complete(open, "truncate", result)?;
        if size >= len {
            return Ok(());
        }

        let result = open.medium.set_len(size);
        self.complete(open, "truncate", result)?;
        if self.store.sync_mode == SyncMode::Always {
            let result = open.medium.sync();
            self.complete(open, "truncate", result)?;
        }
        self.cursor = size;
        Ok(())
    }

    /// Content length, from the open handle or from the backend
    pub fn length(&self) -> Result<u64> {
        match self.open.as_ref().filter(|o| !o.is_closed()) {
            Some(open) => {
                let result = open.medium.size();
                self.complete(open, "length", result)
            }
            None => match self.state()? {
                FragmentState::Absent => Err(Error::fragment_not_found(&self.handle)),
                state => self.backend().length(&self.handle, state),
            },
        }
    }

    // ---- Footer extension ----

    /// Footer extension; `None` when none was ever written
    pub fn read_footer_extension(&self) -> Result<Option<FooterExtension>> {
        let state = self.state()?;
        if state == FragmentState::Absent {
            return Err(Error::fragment_not_found(&self.handle));
        }
        self.backend()
            .read_footer(&self.handle, state)?
            .map(|raw| FooterExtension::from_bytes(&raw))
            .transpose()
    }

    /// Atomically replace the footer extension
    pub fn write_footer_extension(&self, extension: &FooterExtension) -> Result<()> {
        let state = self.state()?;
        if state == FragmentState::Absent {
            return Err(Error::fragment_not_found(&self.handle));
        }
        self.backend()
            .write_footer(&self.handle, state, &extension.to_bytes()?)
    }

    // ---- Write checkpoints ----

    /// Valid checkpoints, newest first
    fn load_checkpoints(&self) -> Result<Vec<(usize, WriteCheckpoint)>> {
        let mut slots = Vec::with_capacity(CHECKPOINT_SLOTS);
        for slot in 0..CHECKPOINT_SLOTS {
            slots.push((slot, self.backend().read_checkpoint_slot(&self.handle, slot)?));
        }
        Ok(checkpoint::by_recency(&self.handle, slots))
    }

    fn load_checkpoint(&self) -> Result<Option<(usize, WriteCheckpoint)>> {
        Ok(self.load_checkpoints()?.into_iter().next())
    }

    /// Record write progress: the current append offset plus `buffers`,
    /// bytes the caller holds but has not yet appended.
    ///
    /// With `flush`, fragment data and the checkpoint reach stable storage
    /// before this returns. Without it a crash may lose this checkpoint, but
    /// never the one before it.
    pub fn save_checkpoint<T: AsRef<[u8]>>(&mut self, buffers: &[T], flush: bool) -> Result<()> {
        let state = self.state()?;
        if state != FragmentState::Transient {
            return Err(self.misuse("save checkpoint", format_args!("fragment is {state}")));
        }

        let resume_offset = match self.open.as_ref() {
            Some(open) => {
                if open.is_closed() {
                    return Err(self.misuse("save checkpoint", "handle was closed"));
                }
                if flush {
                    let result = open.medium.sync();
                    self.complete(open, "save checkpoint", result)?;
                }
                self.cursor
            }
            None => {
                if flush {
                    let medium = self.backend().open(&self.handle, state, true)?;
                    medium
                        .sync()
                        .map_err(|e| Error::fragment_io(&self.handle, "save checkpoint", &e))?;
                }
                self.backend().length(&self.handle, state)?
            }
        };

        let newest = self.load_checkpoint()?;
        let slot = checkpoint::next_slot(newest.as_ref());
        let sequence = newest.map_or(1, |(_, c)| c.sequence + 1);

        let mut pending = Vec::with_capacity(buffers.iter().map(|b| b.as_ref().len()).sum());
        for buf in buffers {
            pending.extend_from_slice(buf.as_ref());
        }

        let record = WriteCheckpoint {
            disk: self.handle.disk,
            object_id: self.handle.object_id,
            fragment: self.handle.fragment,
            topology_epoch: self.store.topology_epoch,
            sequence,
            resume_offset,
            pending,
        };
        self.backend()
            .write_checkpoint_slot(&self.handle, slot, &record.to_bytes()?, flush)?;

        FragmentStats::bump(&self.stats().checkpoints_saved, 1);
        debug!(
            "Checkpoint {} of {} in slot {} (resume at {}, {} pending bytes)",
            sequence,
            self.handle,
            slot,
            resume_offset,
            record.pending.len()
        );
        Ok(())
    }

    /// Resume an interrupted write.
    ///
    /// Returns `None` when no checkpoint exists. Otherwise the fragment is
    /// opened read-write, cut back to the checkpointed offset with the append
    /// cursor there, and the pending bytes are returned for the caller to
    /// append again.
    pub fn restore_checkpoint(&mut self) -> Result<Option<Vec<u8>>> {
        let candidates = self.load_checkpoints()?;
        let Some((newest_slot, newest)) = candidates.first() else {
            return Ok(None);
        };
        let (newest_slot, newest_sequence, newest_offset) =
            (*newest_slot, newest.sequence, newest.resume_offset);

        let state = self.state()?;
        if state != FragmentState::Transient {
            return Err(Error::stale_checkpoint(
                &self.handle,
                format!("fragment is {state}"),
            ));
        }

        if self
            .open
            .as_ref()
            .is_some_and(|o| o.is_closed() || !o.writable)
        {
            self.open = None;
        }
        if self.open.is_none() {
            let medium = self
                .backend()
                .open(&self.handle, FragmentState::Transient, true)?;
            self.open = Some(OpenMedium::new(medium, true));
        }

        let open = self.medium("restore checkpoint", true)?;
        let result = open.medium.size();
        let len = self.complete(open, "restore checkpoint", result)?;

        // An unflushed checkpoint can outlive the data it points past; an
        // older checkpoint still within the fragment is usable.
        let Some((rank, (slot, record))) = candidates
            .into_iter()
            .enumerate()
            .find(|(_, (_, c))| c.resume_offset <= len)
        else {
            return Err(Error::stale_checkpoint(
                &self.handle,
                format!("fragment holds {len} bytes, checkpoint resumes at {newest_offset}"),
            ));
        };
        if record.topology_epoch != self.store.topology_epoch {
            return Err(Error::stale_checkpoint(
                &self.handle,
                format!(
                    "taken under topology epoch {:016x}, now {:016x}",
                    record.topology_epoch, self.store.topology_epoch
                ),
            ));
        }

        if rank > 0 {
            warn!(
                "Checkpoint {} of {} resumes past the fragment end ({} bytes), falling back to checkpoint {}",
                newest_sequence, self.handle, len, record.sequence
            );
            // Supersede the unusable slot so later saves never fall back onto it.
            let promoted = WriteCheckpoint {
                sequence: newest_sequence + 1,
                ..record.clone()
            };
            self.backend().write_checkpoint_slot(
                &self.handle,
                newest_slot,
                &promoted.to_bytes()?,
                true,
            )?;
        }

        if len > record.resume_offset {
            let result = open.medium.set_len(record.resume_offset);
            self.complete(open, "restore checkpoint", result)?;
        }
        self.cursor = record.resume_offset;

        debug!(
            "Restored checkpoint {} of {} from slot {} (resume at {})",
            record.sequence, self.handle, slot, record.resume_offset
        );
        Ok(Some(record.pending))
    }

    /// Discard checkpoint state; fine when there is none
    pub fn delete_checkpoint(&self) -> Result<()> {
        self.backend().remove_checkpoint(&self.handle)
    }
}

impl<B: FragmentBackend> Drop for Fragment<B> {
    fn drop(&mut self) {
        if self.lock_held {
            self.store.unlock(&self.handle);
        }
    }
}

impl<B: FragmentBackend> fmt::Debug for Fragment<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fragment")
            .field("handle", &self.handle)
            .field("open", &self.open.is_some())
            .field("cursor", &self.cursor)
            .field("lock_held", &self.lock_held)
            .finish()
    }
}
