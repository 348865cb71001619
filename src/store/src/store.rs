//! The level-set store
//!
//! `store_level_set` appends one record per vertex to the active segment,
//! syncs, and only then publishes index entries — so an acknowledged write
//! is always recoverable, and a crash in between is healed by replaying
//! the log on the next open.

use crate::error::{Result, StoreError};
use crate::record::{BlockLocation, NodeRecord, RecordLocation};
use crate::segment::{
    list_segments, read_record, replay_segment, SegmentWriter, LEN_PREFIX,
};
use dashmap::DashMap;
use lattice_dag::{DagError, LevelSetPersistence, Milestone, Vertex};
use lattice_types::{Block, Hash256};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

const INDEX_FILE: &str = "index.bin";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub dir: PathBuf,

    /// Segment rollover threshold in bytes. A level set is never split
    /// across segments, so the active segment may exceed this by one set.
    pub max_segment_size: u64,

    /// fsync after every level set. Disabled only in tests.
    pub sync_writes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/levelsets"),
            max_segment_size: 64 * 1024 * 1024,
            sync_writes: true,
        }
    }
}

/// Contiguous run of records forming one level set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct LevelSetLocation {
    segment: u32,
    offset: u64,
    count: u32,
}

/// Persisted projection of the in-memory index. Purely a cache: when it
/// is missing or does not match the segment files, the log is replayed.
#[derive(Serialize, Deserialize)]
struct IndexSnapshot {
    end_segment: u32,
    end_offset: u64,
    vertices: Vec<(Hash256, RecordLocation)>,
    level_sets: Vec<(Hash256, LevelSetLocation)>,
}

pub struct LevelSetStore {
    config: StoreConfig,
    writer: Mutex<SegmentWriter>,
    index: DashMap<Hash256, RecordLocation>,
    level_sets: DashMap<Hash256, LevelSetLocation>,
}

impl LevelSetStore {
    pub fn open(config: StoreConfig) -> Result<LevelSetStore> {
        std::fs::create_dir_all(&config.dir)?;
        let segments = list_segments(&config.dir)?;
        let last = segments.last().copied().unwrap_or(0);

        let store = LevelSetStore {
            writer: Mutex::new(SegmentWriter::open(&config.dir, last)?),
            index: DashMap::new(),
            level_sets: DashMap::new(),
            config,
        };

        if !segments.is_empty() {
            if store.try_load_index(last)? {
                debug!("index cache loaded");
            } else {
                info!("index cache missing or stale, replaying segment log");
                store.replay(&segments)?;
            }
        }
        Ok(store)
    }

    /// Durably persist a sealed level set and index every vertex in it.
    pub fn store_level_set(&self, milestone: &Milestone) -> Result<()> {
        let vertices = &milestone.snapshot.level_set;
        if vertices.is_empty() {
            // Nothing to append and no milestone record to index.
            return Ok(());
        }
        let mut encoded = Vec::with_capacity(vertices.len());
        for vertex in vertices {
            encoded.push(bincode::serialize(&NodeRecord::from_vertex(
                vertex, milestone,
            ))?);
        }

        let mut writer = self.writer.lock();
        if !writer.is_empty() && writer.len() >= self.config.max_segment_size {
            writer.sync()?;
            let next = writer.id + 1;
            debug!(sealed = writer.id, next, "segment rollover");
            *writer = SegmentWriter::open(&self.config.dir, next)?;
        }

        let segment = writer.id;
        let mut locations = Vec::with_capacity(encoded.len());
        for bytes in &encoded {
            let offset = writer.append(bytes)?;
            locations.push(RecordLocation { segment, offset });
        }
        if self.config.sync_writes {
            writer.sync()?;
        }

        // Records are durable; now publish the index entries.
        for (vertex, location) in vertices.iter().zip(&locations) {
            self.index.insert(vertex.hash, *location);
        }
        self.level_sets.insert(
            milestone.hash,
            LevelSetLocation {
                segment,
                offset: locations[0].offset,
                count: vertices.len() as u32,
            },
        );

        // Best effort: the cache is rebuildable, so a failed save is a
        // warning, not a failed store.
        if let Err(e) = self.save_index(&writer) {
            warn!(error = %e, "failed to save index cache");
        }
        Ok(())
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.index.contains_key(hash)
    }

    /// Locate a stored block without reading it.
    pub fn locate(&self, hash: &Hash256) -> Option<BlockLocation> {
        self.index.get(hash).map(|loc| BlockLocation::Disk(*loc))
    }

    /// Materialize a block from wherever it lives.
    pub fn resolve(&self, location: &BlockLocation) -> Result<Block> {
        match location {
            BlockLocation::Memory(block) => Ok((**block).clone()),
            BlockLocation::Disk(loc) => {
                let bytes = read_record(&self.config.dir, loc.segment, loc.offset)?;
                Ok(decode_record(&bytes, *loc)?.block)
            }
        }
    }

    /// Fetch one block by identifier.
    pub fn get_block(&self, hash: &Hash256) -> Result<Block> {
        Ok(self.get_record(hash)?.block)
    }

    /// Fetch a stored vertex (with its consensus metadata) by identifier.
    pub fn get_vertex(&self, hash: &Hash256) -> Result<Vertex> {
        Ok(self.get_record(hash)?.into_vertex())
    }

    fn get_record(&self, hash: &Hash256) -> Result<NodeRecord> {
        let location = *self.index.get(hash).ok_or(StoreError::NotFound)?;
        let bytes = read_record(&self.config.dir, location.segment, location.offset)?;
        decode_record(&bytes, location)
    }

    /// Fetch a whole level set, in original order, by its milestone
    /// identifier.
    pub fn get_level_set(&self, milestone: &Hash256) -> Result<Vec<Block>> {
        let location = *self.level_sets.get(milestone).ok_or(StoreError::NotFound)?;
        let mut blocks = Vec::with_capacity(location.count as usize);
        let mut offset = location.offset;
        for _ in 0..location.count {
            let bytes = read_record(&self.config.dir, location.segment, offset)?;
            let record = decode_record(
                &bytes,
                RecordLocation {
                    segment: location.segment,
                    offset,
                },
            )?;
            offset += LEN_PREFIX + bytes.len() as u64;
            blocks.push(record.block);
        }
        Ok(blocks)
    }

    /// Number of sealed level sets known to the index.
    pub fn level_set_count(&self) -> usize {
        self.level_sets.len()
    }

    fn replay(&self, segments: &[u32]) -> Result<()> {
        let last = *segments.last().expect("non-empty");
        for &segment in segments {
            let is_active = segment == last;
            let (records, end) = replay_segment(&self.config.dir, segment, is_active)?;

            let mut run: Option<(u64, u32, Hash256)> = None;
            for (offset, bytes) in &records {
                let location = RecordLocation {
                    segment,
                    offset: *offset,
                };
                let record = decode_record(bytes, location)?;
                self.index.insert(record.hash, location);

                run = match run {
                    Some((start, count, ms)) if ms == record.milestone => {
                        Some((start, count + 1, ms))
                    }
                    _ => Some((*offset, 1, record.milestone)),
                };
                // The milestone vertex is always the last record of its
                // level set.
                if record.hash == record.milestone {
                    let (start, count, ms) = run.take().expect("run just set");
                    self.level_sets.insert(
                        ms,
                        LevelSetLocation {
                            segment,
                            offset: start,
                            count,
                        },
                    );
                }
            }

            if is_active {
                let mut writer = self.writer.lock();
                if writer.len() > end {
                    warn!(segment, end, "truncating torn tail");
                    writer.truncate_to(end)?;
                }
            }
        }
        info!(
            vertices = self.index.len(),
            level_sets = self.level_sets.len(),
            "segment log replayed"
        );
        Ok(())
    }

    fn try_load_index(&self, last_segment: u32) -> Result<bool> {
        let path = self.config.dir.join(INDEX_FILE);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(_) => return Ok(false),
        };
        let Ok(snapshot) = bincode::deserialize::<IndexSnapshot>(&bytes) else {
            return Ok(false);
        };
        // Stale cache: the log has grown (or shrunk) since it was saved.
        if snapshot.end_segment != last_segment
            || snapshot.end_offset != self.writer.lock().len()
        {
            return Ok(false);
        }
        for (hash, location) in snapshot.vertices {
            self.index.insert(hash, location);
        }
        for (hash, location) in snapshot.level_sets {
            self.level_sets.insert(hash, location);
        }
        Ok(true)
    }

    fn save_index(&self, writer: &SegmentWriter) -> Result<()> {
        let snapshot = IndexSnapshot {
            end_segment: writer.id,
            end_offset: writer.len(),
            vertices: self
                .index
                .iter()
                .map(|e| (*e.key(), *e.value()))
                .collect(),
            level_sets: self
                .level_sets
                .iter()
                .map(|e| (*e.key(), *e.value()))
                .collect(),
        };
        let tmp = self.config.dir.join(format!("{INDEX_FILE}.tmp"));
        std::fs::write(&tmp, bincode::serialize(&snapshot)?)?;
        std::fs::rename(&tmp, self.config.dir.join(INDEX_FILE))?;
        Ok(())
    }
}

fn decode_record(bytes: &[u8], location: RecordLocation) -> Result<NodeRecord> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Corruption {
        segment: location.segment,
        offset: location.offset,
        reason: format!("undecodable record: {e}"),
    })
}

impl LevelSetPersistence for LevelSetStore {
    fn store_level_set(&self, milestone: &Milestone) -> lattice_dag::Result<()> {
        LevelSetStore::store_level_set(self, milestone)
            .map_err(|e| DagError::Storage(e.to_string()))
    }

    fn contains_block(&self, hash: &Hash256) -> bool {
        self.contains(hash)
    }

    fn miner_chain_height(&self, hash: &Hash256) -> Option<u64> {
        match self.get_vertex(hash) {
            Ok(vertex) => Some(vertex.miner_chain_height),
            Err(StoreError::NotFound) => None,
            Err(e) => {
                warn!(%hash, error = %e, "failed to read vertex for chain height");
                None
            }
        }
    }
}
