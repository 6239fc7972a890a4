// WAL Engine (spec.md §4.A).
//
// Append-only, checksummed, sequenced log with group buffering,
// segment rollover, checkpointing, and replay-based recovery. Mirrors
// the structure of the teacher's `transaction::wal::WALManager` —
// a single append-serialization lock, an atomic durable-upto
// watermark, buffered non-critical records flushed on COMMIT/ROLLBACK/
// CHECKPOINT or when the buffer fills.

use parking_lot::{Mutex, RwLock};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::common::SequenceNumber;
use crate::config::WalConfig;
use crate::error::{Error, Result};
use crate::wal::codec::{self, DecodedFrame};
use crate::wal::record::{OperationType, PendingRecord, RecordType, WalRecord};

/// A checkpoint descriptor returned by `WalEngine::create_checkpoint`.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub id: String,
    pub sequence_number: SequenceNumber,
    pub timestamp_micros: u64,
}

#[derive(Debug, Clone, Default)]
pub struct WalStats {
    pub total_records: u64,
    pub total_bytes: u64,
    pub flushes: u64,
    pub checksum_gaps: u64,
    pub segments_rolled: u64,
}

struct ActiveSegment {
    index: u32,
    writer: BufWriter<File>,
    bytes_written: u64,
}

struct EngineState {
    active: ActiveSegment,
    /// Buffered records not yet flushed to disk.
    buffer: Vec<WalRecord>,
}

/// Append-only, checksummed, sequenced log.
///
/// One `WalEngine` owns one log *family* rooted at
/// `<wal_dir>/<base_name>.wal{.NNNN}` (spec.md §6). A node may run
/// several engines side by side (e.g. one per collection) or a single
/// engine whose `collection_name` field on each record disambiguates —
/// the engine itself is agnostic to that choice.
pub struct WalEngine {
    wal_dir: PathBuf,
    base_name: String,
    config: WalConfig,
    state: Mutex<EngineState>,
    next_sequence: AtomicU64,
    durable_upto: AtomicU64,
    shutdown: AtomicBool,
    stats: RwLock<WalStats>,
}

impl WalEngine {
    pub fn open(wal_dir: impl Into<PathBuf>, base_name: impl Into<String>, config: WalConfig) -> Result<Self> {
        let wal_dir = wal_dir.into();
        let base_name = base_name.into();
        fs::create_dir_all(&wal_dir)?;

        let active_index = Self::latest_segment_index(&wal_dir, &base_name)?;
        let path = Self::segment_path(&wal_dir, &base_name, active_index);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let bytes_written = file.metadata().map(|m| m.len()).unwrap_or(0);

        let next_sequence = Self::scan_max_sequence(&wal_dir, &base_name, config.checksum_algorithm)?
            .map(|s| s + 1)
            .unwrap_or(1);

        Ok(Self {
            wal_dir,
            base_name,
            config,
            state: Mutex::new(EngineState {
                active: ActiveSegment {
                    index: active_index,
                    writer: BufWriter::new(file),
                    bytes_written,
                },
                buffer: Vec::new(),
            }),
            next_sequence: AtomicU64::new(next_sequence),
            durable_upto: AtomicU64::new(next_sequence.saturating_sub(1)),
            shutdown: AtomicBool::new(false),
            stats: RwLock::new(WalStats::default()),
        })
    }

    fn segment_path(wal_dir: &Path, base_name: &str, index: u32) -> PathBuf {
        if index == 0 {
            wal_dir.join(format!("{base_name}.wal"))
        } else {
            wal_dir.join(format!("{base_name}.wal.{index:04}"))
        }
    }

    fn latest_segment_index(wal_dir: &Path, base_name: &str) -> Result<u32> {
        let mut max_index = 0u32;
        if let Ok(entries) = fs::read_dir(wal_dir) {
            let prefix = format!("{base_name}.wal");
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if let Some(suffix) = name.strip_prefix(&format!("{prefix}.")) {
                    if let Ok(idx) = suffix.parse::<u32>() {
                        max_index = max_index.max(idx);
                    }
                } else if name == prefix {
                    max_index = max_index.max(0);
                }
            }
        }
        Ok(max_index)
    }

    /// All segment paths in ascending (oldest-first) order. File names
    /// sort lexicographically and the combined sequence space is
    /// globally monotonic across them (spec.md §6).
    fn all_segments(&self) -> Result<Vec<PathBuf>> {
        let mut segments = Vec::new();
        let prefix = format!("{}.wal", self.base_name);
        if let Ok(entries) = fs::read_dir(&self.wal_dir) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy().to_string();
                if name == prefix || name.starts_with(&format!("{prefix}.")) {
                    segments.push((name.clone(), entry.path()));
                }
            }
        }
        segments.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(segments.into_iter().map(|(_, p)| p).collect())
    }

    fn scan_max_sequence(
        wal_dir: &Path,
        base_name: &str,
        algorithm: crate::config::ChecksumAlgorithm,
    ) -> Result<Option<SequenceNumber>> {
        let mut max_seq = None;
        let mut segments = Vec::new();
        if let Ok(entries) = fs::read_dir(wal_dir) {
            let prefix = format!("{base_name}.wal");
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy().to_string();
                if name == prefix || name.starts_with(&format!("{prefix}.")) {
                    segments.push((name.clone(), entry.path()));
                }
            }
        }
        segments.sort_by(|a, b| a.0.cmp(&b.0));

        for (_, path) in segments {
            let file = match File::open(&path) {
                Ok(f) => f,
                Err(_) => continue,
            };
            let mut reader = BufReader::new(file);
            loop {
                match codec::decode_frame(&mut reader, algorithm)? {
                    DecodedFrame::Ok(record) => {
                        max_seq = Some(max_seq.map_or(record.sequence_number, |m: SequenceNumber| {
                            m.max(record.sequence_number)
                        }));
                    }
                    DecodedFrame::ChecksumFailed { sequence } => {
                        max_seq = Some(max_seq.map_or(sequence, |m: SequenceNumber| m.max(sequence)));
                    }
                    // No sequence number could be recovered from an
                    // undecodable body; skip it for max-seq purposes and
                    // keep scanning, since the length prefix was still
                    // read in full and the next frame starts at a known
                    // offset.
                    DecodedFrame::Malformed => {}
                    DecodedFrame::Eof => break,
                }
            }
        }
        Ok(max_seq)
    }

    fn allocate_sequence(&self) -> SequenceNumber {
        self.next_sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Append a record, assigning the next sequence number and
    /// checksum. COMMIT/ROLLBACK/CHECKPOINT records force an immediate
    /// flush before returning; others may be buffered up to
    /// `max_buffer_size`.
    pub async fn write_entry(&self, pending: PendingRecord) -> Result<SequenceNumber> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(Error::ShutdownInProgress);
        }

        let sequence = self.allocate_sequence();
        let record = codec::finalize_record_for(
            self.config.checksum_algorithm,
            sequence,
            crate::wal::record::now_micros(),
            pending.transaction_id,
            pending.record_type,
            pending.collection_name,
            pending.operation,
            pending.participant,
            pending.data,
        )?;

        let forces_flush = record.record_type.forces_flush();

        {
            let mut state = self.state.lock();
            state.buffer.push(record);
        }

        if forces_flush || self.buffer_over_threshold() {
            self.flush().await?;
        }

        Ok(sequence)
    }

    /// Append a record that already carries its final sequence number
    /// and checksum, as received verbatim from a replication leader.
    /// Advances `next_sequence` past the applied record instead of
    /// allocating a new one, so a follower's local sequence space
    /// stays identical to the leader's.
    pub async fn write_replicated(&self, record: WalRecord) -> Result<()> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(Error::ShutdownInProgress);
        }

        self.next_sequence
            .fetch_max(record.sequence_number + 1, Ordering::SeqCst);
        let forces_flush = record.record_type.forces_flush();

        {
            let mut state = self.state.lock();
            state.buffer.push(record);
        }

        if forces_flush || self.buffer_over_threshold() {
            self.flush().await?;
        }
        Ok(())
    }

    fn buffer_over_threshold(&self) -> bool {
        let state = self.state.lock();
        let approx: usize = state.buffer.len() * 128; // rough per-record estimate
        approx >= self.config.max_buffer_size
    }

    /// Drain buffered records to durable storage. Idempotent.
    pub async fn flush(&self) -> Result<()> {
        let records = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.buffer)
        };

        if records.is_empty() {
            return Ok(());
        }

        let last_sequence = records.last().map(|r| r.sequence_number).unwrap_or(0);
        let mut total_bytes = 0u64;

        {
            let mut state = self.state.lock();
            for record in &records {
                self.maybe_roll_segment(&mut state)?;
                let frame = codec::encode_frame(record)?;
                state.active.writer.write_all(&frame)?;
                state.active.bytes_written += frame.len() as u64;
                total_bytes += frame.len() as u64;
            }
            state.active.writer.flush()?;
            state.active.writer.get_ref().sync_all()?;
        }

        self.durable_upto.store(last_sequence, Ordering::SeqCst);

        let mut stats = self.stats.write();
        stats.total_records += records.len() as u64;
        stats.total_bytes += total_bytes;
        stats.flushes += 1;

        Ok(())
    }

    fn maybe_roll_segment(&self, state: &mut EngineState) -> Result<()> {
        if state.active.bytes_written < self.config.segment_size {
            return Ok(());
        }
        state.active.writer.flush()?;
        let next_index = state.active.index + 1;
        let path = Self::segment_path(&self.wal_dir, &self.base_name, next_index);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        state.active = ActiveSegment {
            index: next_index,
            writer: BufWriter::new(file),
            bytes_written: 0,
        };
        self.stats.write().segments_rolled += 1;
        Ok(())
    }

    /// Restartable, ordered enumeration of durably-flushed records
    /// beginning at the smallest sequence >= `from_sequence`. Records
    /// with invalid checksums are skipped with a gap-counter increment
    /// rather than delivered.
    pub fn read_entries(&self, from_sequence: SequenceNumber) -> Result<Vec<WalRecord>> {
        let segments = self.all_segments()?;
        let mut out = Vec::new();
        let mut gaps = 0u64;

        for path in segments {
            let file = File::open(&path)?;
            let mut reader = BufReader::new(file);
            loop {
                match codec::decode_frame(&mut reader, self.config.checksum_algorithm)? {
                    DecodedFrame::Ok(record) => {
                        if record.sequence_number >= from_sequence {
                            out.push(record);
                        }
                    }
                    DecodedFrame::ChecksumFailed { .. } => {
                        gaps += 1;
                    }
                    DecodedFrame::Malformed => {
                        gaps += 1;
                    }
                    DecodedFrame::Eof => break,
                }
            }
        }

        if gaps > 0 {
            tracing::warn!(gaps, "skipped corrupted WAL records during read_entries");
            self.stats.write().checksum_gaps += gaps;
        }

        out.sort_by_key(|r| r.sequence_number);
        Ok(out)
    }

    /// Remove records with sequence < `before_sequence`. The caller
    /// must have durably applied those records already. Segments that
    /// become entirely stale are deleted; the segment still containing
    /// live records is left untouched (in-place truncation of an active
    /// segment is not attempted, matching the append-only contract).
    pub fn truncate(&self, before_sequence: SequenceNumber) -> Result<()> {
        let segments = self.all_segments()?;
        // Never drop the active (currently-open) segment's file.
        let active_index = self.state.lock().active.index;

        for path in segments {
            let stem = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let this_index: u32 = stem
                .rsplit('.')
                .next()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            if this_index == active_index {
                continue;
            }

            let file = match File::open(&path) {
                Ok(f) => f,
                Err(_) => continue,
            };
            let mut reader = BufReader::new(file);
            let mut max_seq_in_segment = 0u64;
            loop {
                match codec::decode_frame(&mut reader, self.config.checksum_algorithm)? {
                    DecodedFrame::Ok(record) => {
                        max_seq_in_segment = max_seq_in_segment.max(record.sequence_number);
                    }
                    DecodedFrame::ChecksumFailed { sequence } => {
                        max_seq_in_segment = max_seq_in_segment.max(sequence);
                    }
                    DecodedFrame::Malformed => {}
                    DecodedFrame::Eof => break,
                }
            }

            if max_seq_in_segment != 0 && max_seq_in_segment < before_sequence {
                let _ = fs::remove_file(&path);
            }
        }
        Ok(())
    }

    /// Emit a CHECKPOINT record and return its identifier.
    pub async fn create_checkpoint(&self) -> Result<Checkpoint> {
        let id = uuid::Uuid::new_v4().to_string();
        let metadata = serde_json::to_vec(&serde_json::json!({ "checkpoint_id": id }))
            .map_err(Error::from)?;
        let pending = PendingRecord::system(RecordType::Checkpoint, OperationType::Store, metadata);
        let sequence = self.write_entry(pending).await?;
        let timestamp_micros = crate::wal::record::now_micros();
        tracing::info!(
            checkpoint_id = %id,
            sequence,
            at = %crate::wal::record::format_timestamp(timestamp_micros),
            "checkpoint created"
        );
        Ok(Checkpoint {
            id,
            sequence_number: sequence,
            timestamp_micros,
        })
    }

    pub fn current_sequence(&self) -> SequenceNumber {
        self.next_sequence.load(Ordering::SeqCst).saturating_sub(1)
    }

    pub fn durable_upto(&self) -> SequenceNumber {
        self.durable_upto.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> WalStats {
        self.stats.read().clone()
    }

    pub async fn close(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.flush().await
    }
}
