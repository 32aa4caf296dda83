//! Memtable rotation and the background flush worker.
//!
//! Rotation happens on the writer that crosses the size threshold: under
//! the engine write latch the active WAL is renamed to its rotated name,
//! a fresh WAL and memtable are installed, and the full memtable moves to
//! the immutable slot. The expensive part, serializing the immutable
//! memtable into a table file, runs on a background thread.
//!
//! Crash-safety ordering: the rotated WAL is unlinked only after the table
//! file is durable and the engine state is persisted, so at every
//! intermediate point a restart can rebuild the memtable from the log.

use std::fs;
use std::sync::Arc;
use std::thread;

use super::state::EngineState;
use super::{rotated_wal_path, sstable_path, Shared, WAL_FILE};
use crate::error::Result;
use crate::memtable::Memtable;
use crate::sstable::TableWriter;
use crate::wal::Wal;

/// Rotates the active memtable and hands it to a background worker. A
/// no-op when a flush is already pending: the coalesced writer has paid
/// its WAL cost and its data sits safely in the new active memtable.
pub(crate) fn maybe_flush(shared: &Arc<Shared>) -> Result<()> {
    let (immutable, counter) = {
        let mut inner = shared.inner.write()?;
        if inner.immutable.is_some() || inner.active.is_empty() {
            return Ok(());
        }
        let counter = inner.sstable_counter;

        // Rotate the log. Writers hold the read side of the latch for the
        // whole append/insert pair, so nothing is mid-append here.
        inner.wal.flush()?;
        fs::rename(inner.wal.path(), rotated_wal_path(&shared.config.dir, counter))?;
        inner.wal = Arc::new(Wal::open(shared.config.dir.join(WAL_FILE))?);

        let full = std::mem::replace(&mut inner.active, Arc::new(Memtable::new()));
        full.freeze()?;
        inner.immutable = Some(full.clone());
        (full, counter)
    };

    // The slot was empty, so any previous worker has finished; reap it
    // before installing the new handle.
    let mut flusher = shared.flusher.lock()?;
    if let Some(handle) = flusher.take() {
        let _ = handle.join();
    }

    let worker_shared = Arc::clone(shared);
    *flusher = Some(thread::spawn(move || {
        if let Err(e) = flush_immutable(&worker_shared, &immutable, counter) {
            tracing::error!(table = counter, error = %e, "background flush failed");
        }
    }));

    Ok(())
}

/// Serializes `memtable` into table file `counter`, then commits: clear
/// the immutable slot, advance and persist the counter, unlink the
/// rotated WAL. On failure the immutable memtable stays in place and
/// readers keep serving from it; the rotated WAL preserves durability.
fn flush_immutable(shared: &Shared, memtable: &Memtable, counter: u64) -> Result<()> {
    let table_path = sstable_path(&shared.config.dir, counter);

    if let Err(e) = write_table(shared, memtable, counter) {
        // A partial table must not survive; readers would reject it, but
        // recovery is simpler when it never exists.
        let _ = fs::remove_file(&table_path);
        return Err(e);
    }

    let mut inner = shared.inner.write()?;
    inner.immutable = None;
    inner.sstable_counter = counter + 1;
    EngineState {
        sstable_counter: inner.sstable_counter,
    }
    .persist(&shared.config.dir)?;

    let rotated = rotated_wal_path(&shared.config.dir, counter);
    if let Err(e) = fs::remove_file(&rotated) {
        tracing::warn!(table = counter, error = %e, "failed to remove rotated wal");
    }
    drop(inner);

    tracing::info!(
        table = counter,
        entries = memtable.len(),
        "flushed memtable to sstable"
    );
    Ok(())
}

fn write_table(shared: &Shared, memtable: &Memtable, counter: u64) -> Result<()> {
    let path = sstable_path(&shared.config.dir, counter);
    let mut writer = TableWriter::create(
        &path,
        memtable.len(),
        shared.config.data_block_size,
        shared.config.bloom_fp_rate,
    )?;
    for (key, value) in memtable.iter() {
        writer.add(&key, &value)?;
    }
    writer.finish()
}
