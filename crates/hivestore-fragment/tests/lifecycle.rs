//! Fragment lifecycle and I/O, run against every backend

use hivestore_common::config::{BackendKind, FragmentConfig, SyncMode};
use hivestore_common::{DiskId, FragmentHandle, ObjectId};
use hivestore_fragment::{
    FooterExtension, FragmentBackend, FragmentState, FragmentStore, MemoryBackend,
};
use rand::{Rng, RngCore};
use std::sync::atomic::Ordering;
use std::thread;
use tempfile::TempDir;

const DISK: DiskId = DiskId::new(0);

fn file_store() -> (TempDir, FragmentStore<hivestore_fragment::AnyBackend>) {
    let dir = tempfile::tempdir().unwrap();
    let config = FragmentConfig {
        backend: BackendKind::File,
        sync_mode: SyncMode::Always,
    };
    let store = FragmentStore::from_config(&config, &[(DISK, dir.path().to_path_buf())], 1).unwrap();
    (dir, store)
}

fn memory_store() -> FragmentStore<MemoryBackend> {
    FragmentStore::new(MemoryBackend::new([DISK]), SyncMode::OnCommit, 1)
}

fn new_handle() -> FragmentHandle {
    FragmentHandle::new(DISK, ObjectId::new(), 3)
}

macro_rules! backend_tests {
    ($($name:ident),* $(,)?) => {
        mod file {
            $(
                #[test]
                fn $name() {
                    let (_dir, store) = super::file_store();
                    super::$name(&store);
                }
            )*
        }

        mod memory {
            $(
                #[test]
                fn $name() {
                    super::$name(&super::memory_store());
                }
            )*
        }
    };
}

backend_tests!(
    state_transitions,
    rollback_of_transient_is_noop,
    create_twice_fails,
    open_missing_is_not_found,
    open_requires_commit,
    rwopen_transient_and_committed,
    double_lock_fails,
    lock_released_on_drop,
    append_close_reopen_roundtrip,
    append_buffers_in_order,
    positioned_reads_at_end,
    truncate_beyond_length_is_noop,
    truncate_moves_append_position,
    length_without_handle,
    delete_is_idempotent,
    footer_extension_lifecycle,
    close_signal_fails_io,
    close_unopened_fails,
    write_past_addressable_range_fails,
);

fn state_transitions<B: FragmentBackend>(store: &FragmentStore<B>) {
    let mut frag = store.fragment(new_handle());
    assert_eq!(frag.state().unwrap(), FragmentState::Absent);

    frag.create().unwrap();
    assert!(frag.is_transient().unwrap());
    assert!(!frag.is_committed().unwrap());

    frag.commit().unwrap();
    assert!(frag.is_committed().unwrap());
    assert!(!frag.is_transient().unwrap());

    frag.rollback().unwrap();
    assert!(frag.is_transient().unwrap());
    assert!(!frag.is_committed().unwrap());

    frag.commit().unwrap();
    frag.delete().unwrap();
    assert_eq!(frag.state().unwrap(), FragmentState::Absent);

    assert_eq!(store.stats().commits.load(Ordering::Relaxed), 2);
    assert_eq!(store.stats().rollbacks.load(Ordering::Relaxed), 1);
}

fn rollback_of_transient_is_noop<B: FragmentBackend>(store: &FragmentStore<B>) {
    let mut frag = store.fragment(new_handle());
    frag.rollback().unwrap();
    assert_eq!(frag.state().unwrap(), FragmentState::Absent);

    frag.create().unwrap();
    frag.rollback().unwrap();
    assert!(frag.is_transient().unwrap());
}

fn create_twice_fails<B: FragmentBackend>(store: &FragmentStore<B>) {
    let handle = new_handle();
    let mut frag = store.fragment(handle);
    frag.create().unwrap();
    frag.commit().unwrap();

    let mut other = store.fragment(handle);
    let err = other.create().unwrap_err();
    assert!(err.is_fragment_storage());
    assert!(!err.is_not_found());
}

fn open_missing_is_not_found<B: FragmentBackend>(store: &FragmentStore<B>) {
    let mut frag = store.fragment(new_handle());
    assert!(frag.open().unwrap_err().is_not_found());
    assert!(frag.rwopen().unwrap_err().is_not_found());
}

fn open_requires_commit<B: FragmentBackend>(store: &FragmentStore<B>) {
    let handle = new_handle();
    let mut writer = store.fragment(handle);
    writer.create().unwrap();
    writer.append(b"staged").unwrap();

    let mut reader = store.fragment(handle);
    assert!(reader.open().unwrap_err().is_not_found());

    writer.commit().unwrap();
    reader.open().unwrap();
    let mut buf = [0u8; 6];
    assert_eq!(reader.read(&mut buf, 0).unwrap(), 6);
    assert_eq!(&buf, b"staged");

    // Already open
    assert!(reader.open().unwrap_err().is_fragment_storage());
}

fn rwopen_transient_and_committed<B: FragmentBackend>(store: &FragmentStore<B>) {
    let handle = new_handle();
    let mut frag = store.fragment(handle);
    frag.create().unwrap();
    frag.append(b"abc").unwrap();
    frag.close().unwrap();

    frag.rwopen().unwrap();
    assert_eq!(frag.position(), 0);
    frag.write(b"X", 1).unwrap();
    frag.commit().unwrap();
    frag.close().unwrap();

    // Repair tools patch committed fragments in place.
    frag.rwopen().unwrap();
    frag.write(b"Y", 2).unwrap();
    frag.close().unwrap();

    frag.open().unwrap();
    let mut buf = [0u8; 3];
    frag.read(&mut buf, 0).unwrap();
    assert_eq!(&buf, b"aXY");
}

fn double_lock_fails<B: FragmentBackend>(store: &FragmentStore<B>) {
    let handle = new_handle();
    let mut frag = store.fragment(handle);
    frag.lock().unwrap();
    assert!(frag.lock().unwrap_err().is_fragment_storage());

    let mut other = store.fragment(handle);
    assert!(other.lock().is_err());
    assert!(other.unlock().is_err());

    frag.unlock().unwrap();
    other.lock().unwrap();
    assert_eq!(store.stats().lock_conflicts.load(Ordering::Relaxed), 2);
}

fn lock_released_on_drop<B: FragmentBackend>(store: &FragmentStore<B>) {
    let handle = new_handle();
    {
        let mut frag = store.fragment(handle);
        frag.lock().unwrap();
    }
    let mut frag = store.fragment(handle);
    frag.lock().unwrap();
    assert!(frag.is_locked());
}

fn append_close_reopen_roundtrip<B: FragmentBackend>(store: &FragmentStore<B>) {
    let mut rng = rand::thread_rng();
    let mut data = vec![0u8; rng.gen_range(1..64 * 1024)];
    rng.fill_bytes(&mut data);

    let handle = new_handle();
    let mut frag = store.fragment(handle);
    frag.create().unwrap();
    for chunk in data.chunks(4096) {
        frag.append(chunk).unwrap();
    }
    frag.commit().unwrap();
    frag.close().unwrap();

    let mut reader = store.fragment(handle);
    reader.open().unwrap();
    let mut back = vec![0u8; data.len()];
    assert_eq!(reader.read(&mut back, 0).unwrap(), data.len());
    assert_eq!(back, data);
    assert_eq!(reader.length().unwrap(), data.len() as u64);
}

fn append_buffers_in_order<B: FragmentBackend>(store: &FragmentStore<B>) {
    let mut frag = store.fragment(new_handle());
    frag.create().unwrap();

    let written = frag
        .append_buffers(&[&b"one"[..], &b"-two"[..], &b"-three"[..]])
        .unwrap();
    assert_eq!(written, 13);
    assert_eq!(frag.position(), 13);

    let mut buf = [0u8; 13];
    frag.read(&mut buf, 0).unwrap();
    assert_eq!(&buf, b"one-two-three");
}

fn positioned_reads_at_end<B: FragmentBackend>(store: &FragmentStore<B>) {
    let mut frag = store.fragment(new_handle());
    frag.create().unwrap();
    frag.append(b"0123456789").unwrap();

    let mut buf = [0u8; 4];
    assert_eq!(frag.read(&mut buf, 8).unwrap(), 2);
    assert_eq!(&buf[..2], b"89");
    assert_eq!(frag.read(&mut buf, 10).unwrap(), 0);
    assert_eq!(frag.read(&mut buf, 100).unwrap(), 0);

    // Same range twice reads the same bytes.
    frag.read(&mut buf, 3).unwrap();
    let first = buf;
    frag.read(&mut buf, 3).unwrap();
    assert_eq!(buf, first);
}

fn truncate_beyond_length_is_noop<B: FragmentBackend>(store: &FragmentStore<B>) {
    let mut frag = store.fragment(new_handle());
    frag.create().unwrap();
    frag.append(b"twelve bytes").unwrap();

    frag.truncate(100).unwrap();
    assert_eq!(frag.length().unwrap(), 12);
    frag.truncate(12).unwrap();
    assert_eq!(frag.length().unwrap(), 12);
    assert_eq!(frag.position(), 12);
}

fn truncate_moves_append_position<B: FragmentBackend>(store: &FragmentStore<B>) {
    let mut frag = store.fragment(new_handle());
    frag.create().unwrap();
    frag.append(b"keep-drop").unwrap();

    frag.truncate(4).unwrap();
    assert_eq!(frag.length().unwrap(), 4);
    frag.append(b"!").unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(frag.read(&mut buf, 0).unwrap(), 5);
    assert_eq!(&buf[..5], b"keep!");
}

fn length_without_handle<B: FragmentBackend>(store: &FragmentStore<B>) {
    let handle = new_handle();
    let mut frag = store.fragment(handle);
    assert!(frag.length().unwrap_err().is_not_found());

    frag.create().unwrap();
    frag.append(&[7u8; 300]).unwrap();
    frag.close().unwrap();
    assert_eq!(store.fragment(handle).length().unwrap(), 300);

    frag.commit().unwrap();
    assert_eq!(store.fragment(handle).length().unwrap(), 300);
}

fn delete_is_idempotent<B: FragmentBackend>(store: &FragmentStore<B>) {
    let handle = new_handle();
    let mut frag = store.fragment(handle);
    frag.delete().unwrap();

    frag.create().unwrap();
    frag.append(b"x").unwrap();
    frag.save_checkpoint(&[b"y"], true).unwrap();
    frag.delete().unwrap();
    frag.delete().unwrap();

    assert!(!frag.is_open());
    assert_eq!(frag.state().unwrap(), FragmentState::Absent);
    assert_eq!(frag.restore_checkpoint().unwrap(), None);

    // Handle can be created again after delete.
    frag.create().unwrap();
    assert!(frag.is_transient().unwrap());
}

fn footer_extension_lifecycle<B: FragmentBackend>(store: &FragmentStore<B>) {
    let handle = new_handle();
    let mut frag = store.fragment(handle);
    assert!(frag.read_footer_extension().unwrap_err().is_not_found());

    frag.create().unwrap();
    assert_eq!(frag.read_footer_extension().unwrap(), None);

    let mut ext = FooterExtension::new();
    ext.insert("content-type", b"application/octet-stream".to_vec());
    frag.write_footer_extension(&ext).unwrap();

    // The extension follows the fragment through commit and rollback.
    frag.commit().unwrap();
    assert_eq!(frag.read_footer_extension().unwrap(), Some(ext.clone()));

    ext.add_legal_hold("case-7");
    frag.write_footer_extension(&ext).unwrap();
    frag.rollback().unwrap();
    let back = frag.read_footer_extension().unwrap().unwrap();
    assert!(back.is_held());

    frag.delete().unwrap();
    assert!(frag.read_footer_extension().unwrap_err().is_not_found());
}

fn close_signal_fails_io<B: FragmentBackend>(store: &FragmentStore<B>) {
    let mut frag = store.fragment(new_handle());
    assert!(frag.close_signal().is_none());
    frag.create().unwrap();
    frag.append(b"before").unwrap();

    let signal = frag.close_signal().unwrap();
    thread::spawn(move || signal.close()).join().unwrap();

    assert!(frag.append(b"after").unwrap_err().is_fragment_storage());
    let mut buf = [0u8; 6];
    assert!(frag.read(&mut buf, 0).unwrap_err().is_fragment_storage());

    // The owner still releases the handle and can reopen.
    frag.close().unwrap();
    frag.rwopen().unwrap();
    assert_eq!(frag.length().unwrap(), 6);
}

fn close_unopened_fails<B: FragmentBackend>(store: &FragmentStore<B>) {
    let mut frag = store.fragment(new_handle());
    assert!(frag.close().unwrap_err().is_fragment_storage());
    frag.create().unwrap();
    frag.close().unwrap();
    assert!(frag.close().is_err());
}

fn write_past_addressable_range_fails<B: FragmentBackend>(store: &FragmentStore<B>) {
    let mut frag = store.fragment(new_handle());
    frag.create().unwrap();
    frag.append(b"abc").unwrap();

    let err = frag.write(b"xy", u64::MAX - 1).unwrap_err();
    assert!(err.is_fragment_storage());
    assert_eq!(frag.length().unwrap(), 3);
    assert_eq!(frag.position(), 3);
}

#[test]
fn fragments_are_independent_across_threads() {
    let (_dir, store) = file_store();
    let object_id = ObjectId::new();

    let workers: Vec<_> = (0..7u8)
        .map(|n| {
            let store = store.clone();
            thread::spawn(move || {
                let mut frag = store.fragment(FragmentHandle::new(DISK, object_id, n));
                frag.lock().unwrap();
                frag.create().unwrap();
                frag.append(&vec![n; 1000]).unwrap();
                frag.commit().unwrap();
                frag.unlock().unwrap();
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    for n in 0..7u8 {
        let mut frag = store.fragment(FragmentHandle::new(DISK, object_id, n));
        frag.open().unwrap();
        let mut buf = [0u8; 1000];
        frag.read(&mut buf, 0).unwrap();
        assert!(buf.iter().all(|&b| b == n));
    }
    assert_eq!(store.stats().commits.load(Ordering::Relaxed), 7);
}

#[test]
fn committed_fragment_survives_store_restart() {
    let (dir, store) = file_store();
    let handle = new_handle();
    let mut frag = store.fragment(handle);
    frag.create().unwrap();
    frag.append(b"durable").unwrap();
    frag.commit().unwrap();
    drop(frag);
    drop(store);

    let config = FragmentConfig::default();
    let reopened =
        FragmentStore::from_config(&config, &[(DISK, dir.path().to_path_buf())], 1).unwrap();
    let mut frag = reopened.fragment(handle);
    assert!(frag.is_committed().unwrap());
    frag.open().unwrap();
    assert_eq!(frag.length().unwrap(), 7);
}

#[test]
fn unknown_disk_is_rejected() {
    let store = memory_store();
    let mut frag = store.fragment(FragmentHandle::new(DiskId::new(9), ObjectId::new(), 0));
    assert!(matches!(
        frag.create(),
        Err(hivestore_common::Error::InvalidDisk(_))
    ));
}
