// WAL recovery (spec.md §4.A, §8 S1/S6).
//
// Recovery replays durable records in sequence order, groups them by
// transaction, and determines per-transaction outcome before invoking
// the caller's replay callback. A transaction is only replayed if its
// group contains a terminal COMMIT record; BEGIN-only or ROLLBACK
// groups are skipped. Hitting a bad checksum on a record that is not
// the very last (truncated-tail) frame halts recovery with
// `CorruptedLog`, per the spec's durability guarantee.

use std::collections::BTreeMap;

use crate::common::{TransactionId, SYSTEM_COLLECTION};
use crate::error::{Error, Result};
use crate::wal::codec::{self, DecodedFrame};
use crate::wal::record::{OperationType, RecordType, TransactionRef, WalRecord};

/// Outcome of replaying a single WAL record during recovery.
#[derive(Debug, Clone)]
pub enum ReplayedRecord {
    /// A DATA record belonging to a committed transaction (or a
    /// system record outside any transaction).
    Apply(WalRecord),
    /// Synthetic marker emitted once recovery reaches a CHECKPOINT
    /// record, so callers can fast-forward any secondary index.
    Checkpoint(WalRecord),
}

#[derive(Debug, Default)]
struct TxGroup {
    records: Vec<WalRecord>,
    committed: bool,
    rolled_back: bool,
}

/// Recover the durable contents of the segments at `wal_dir`, invoking
/// `replay` once per record that should be applied, in sequence order.
/// Returns the highest sequence number observed.
pub fn recover(
    wal_dir: &std::path::Path,
    base_name: &str,
    algorithm: crate::config::ChecksumAlgorithm,
    mut replay: impl FnMut(ReplayedRecord) -> Result<()>,
) -> Result<crate::common::SequenceNumber> {
    let segments = list_segments(wal_dir, base_name)?;
    let mut all_records: Vec<WalRecord> = Vec::new();
    let mut max_sequence = 0u64;

    for path in &segments {
        let file = std::fs::File::open(path)?;
        let mut reader = std::io::BufReader::new(file);
        loop {
            match codec::decode_frame(&mut reader, algorithm)? {
                DecodedFrame::Ok(record) => {
                    max_sequence = max_sequence.max(record.sequence_number);
                    all_records.push(record);
                }
                DecodedFrame::ChecksumFailed { sequence } => {
                    // Only a genuine mid-log corruption should halt recovery.
                    // A checksum failure on what turns out to be the very
                    // last frame in the very last segment is indistinguishable
                    // from a torn write and is dropped instead.
                    let is_last_segment = path == segments.last().unwrap();
                    let rest_is_eof = matches!(
                        codec::decode_frame(&mut reader, algorithm)?,
                        DecodedFrame::Eof
                    );
                    if is_last_segment && rest_is_eof {
                        tracing::warn!(sequence, "dropping torn tail WAL record during recovery");
                        break;
                    }
                    let transaction = last_open_transaction(&all_records).unwrap_or(0);
                    tracing::error!(
                        sequence,
                        transaction,
                        checksum_hex = %hex::encode(sequence.to_be_bytes()),
                        "halting recovery on corrupted WAL record"
                    );
                    return Err(Error::CorruptedLog {
                        sequence,
                        transaction,
                    });
                }
                DecodedFrame::Malformed => {
                    // The body didn't even decode as a record, so its
                    // stated sequence number (if any) can't be trusted;
                    // report the next sequence we expected to see.
                    let sequence = max_sequence + 1;
                    let is_last_segment = path == segments.last().unwrap();
                    let rest_is_eof = matches!(
                        codec::decode_frame(&mut reader, algorithm)?,
                        DecodedFrame::Eof
                    );
                    if is_last_segment && rest_is_eof {
                        tracing::warn!(sequence, "dropping torn tail WAL record during recovery");
                        break;
                    }
                    let transaction = last_open_transaction(&all_records).unwrap_or(0);
                    tracing::error!(
                        sequence,
                        transaction,
                        "halting recovery on unreadable WAL record"
                    );
                    return Err(Error::CorruptedLog {
                        sequence,
                        transaction,
                    });
                }
                DecodedFrame::Eof => break,
            }
        }
    }

    all_records.sort_by_key(|r| r.sequence_number);

    let mut groups: BTreeMap<TransactionId, TxGroup> = BTreeMap::new();
    let mut system_records: Vec<WalRecord> = Vec::new();

    for record in &all_records {
        match record.transaction_id {
            TransactionRef::System => system_records.push(record.clone()),
            TransactionRef::Transaction(tx) => {
                let group = groups.entry(tx).or_default();
                match record.record_type {
                    RecordType::Commit => group.committed = true,
                    RecordType::Rollback => group.rolled_back = true,
                    _ => {}
                }
                group.records.push(record.clone());
            }
        }
    }

    // Replay in original sequence order: walk all_records again, only
    // emitting DATA records for committed transactions and system
    // records (which include CHECKPOINT markers) unconditionally.
    for record in &all_records {
        match record.transaction_id {
            TransactionRef::System => {
                if record.record_type == RecordType::Checkpoint {
                    replay(ReplayedRecord::Checkpoint(record.clone()))?;
                } else {
                    replay(ReplayedRecord::Apply(record.clone()))?;
                }
            }
            TransactionRef::Transaction(tx) => {
                let group = groups.get(&tx).expect("group inserted above");
                if group.committed && !group.rolled_back && record.record_type == RecordType::Data {
                    replay(ReplayedRecord::Apply(record.clone()))?;
                }
            }
        }
    }

    // Mark the recovery boundary with a synthetic CHECKPOINT, appended
    // to the last segment so a subsequent recovery (or a WalEngine
    // reopening over this directory) sees it too. An empty log has
    // nothing to mark a boundary past, so it is left untouched.
    if max_sequence > 0 {
        if let Some(last_segment) = segments.last() {
            let sequence = max_sequence + 1;
            let checkpoint_id = uuid::Uuid::new_v4().to_string();
            let metadata = serde_json::to_vec(&serde_json::json!({ "checkpoint_id": checkpoint_id }))
                .map_err(Error::from)?;
            let record = codec::finalize_record(
                algorithm,
                sequence,
                crate::wal::record::now_micros(),
                TransactionRef::System,
                RecordType::Checkpoint,
                SYSTEM_COLLECTION.to_string(),
                OperationType::Store,
                metadata,
            )?;
            let mut file = std::fs::OpenOptions::new().append(true).open(last_segment)?;
            codec::write_frame(&mut file, &record)?;
            file.sync_all()?;
            max_sequence = sequence;
            tracing::info!(checkpoint_id = %checkpoint_id, sequence, "recovery boundary checkpoint written");
            replay(ReplayedRecord::Checkpoint(record))?;
        }
    }

    Ok(max_sequence)
}

fn last_open_transaction(records: &[WalRecord]) -> Option<TransactionId> {
    records.iter().rev().find_map(|r| r.transaction_id.id())
}

fn list_segments(wal_dir: &std::path::Path, base_name: &str) -> Result<Vec<std::path::PathBuf>> {
    let mut segments = Vec::new();
    let prefix = format!("{base_name}.wal");
    if let Ok(entries) = std::fs::read_dir(wal_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy().to_string();
            if name == prefix || name.starts_with(&format!("{prefix}.")) {
                segments.push((name, entry.path()));
            }
        }
    }
    segments.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(segments.into_iter().map(|(_, p)| p).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChecksumAlgorithm;
    use crate::wal::engine::WalEngine;
    use crate::wal::record::{OperationType, PendingRecord};

    #[tokio::test]
    async fn replays_only_committed_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let engine = WalEngine::open(
            dir.path(),
            "node",
            crate::config::WalConfig {
                wal_dir: dir.path().to_string_lossy().to_string(),
                ..Default::default()
            },
        )
        .unwrap();

        engine.write_entry(PendingRecord::begin(1)).await.unwrap();
        engine
            .write_entry(PendingRecord::data(1, "c1", OperationType::Insert, b"a".to_vec()))
            .await
            .unwrap();
        engine.write_entry(PendingRecord::commit(1)).await.unwrap();

        engine.write_entry(PendingRecord::begin(2)).await.unwrap();
        engine
            .write_entry(PendingRecord::data(2, "c1", OperationType::Insert, b"b".to_vec()))
            .await
            .unwrap();
        engine.write_entry(PendingRecord::rollback(2)).await.unwrap();
        engine.close().await.unwrap();

        let mut applied = Vec::new();
        recover(dir.path(), "node", ChecksumAlgorithm::Crc32C, |r| {
            if let ReplayedRecord::Apply(rec) = r {
                if rec.record_type == RecordType::Data {
                    applied.push(rec.data);
                }
            }
            Ok(())
        })
        .unwrap();

        assert_eq!(applied, vec![b"a".to_vec()]);
    }
}
