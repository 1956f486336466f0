//! Candidate generation by blocking.
//!
//! Each record is assigned to a few blocks (brand, ultra-aggressive name
//! prefix, category + first name token). Only records sharing a block are
//! ever compared, which turns the O(n²) all-pairs scan into a sum of small
//! per-block scans.
//!
//! Large inputs are processed progressively: records are blocked one chunk at
//! a time and merged into the running result, with a rough byte estimate kept
//! against the configured memory limit. Oversized blocks are split after the
//! merge so that the split sees the complete block.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::mem::size_of;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vintner_core::{BlockingConfig, Record};

use crate::prepare::{PreparedRecord, Preparer};

/// Progressive chunks never shrink below this many records.
const MIN_CHUNK_SIZE: usize = 64;
/// Fraction of the memory limit at which chunks start shrinking.
const MEMORY_PRESSURE_RATIO: f64 = 0.8;
/// Rough per-record footprint on top of its strings.
const RECORD_OVERHEAD_BYTES: usize = 256;
/// Rough per-block footprint on top of its key and member list.
const BLOCK_OVERHEAD_BYTES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Brand,
    UltraKey,
    CategoryToken,
    /// Records with no other usable key land alone in a fallback block.
    Fallback,
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockKind::Brand => "brand",
            BlockKind::UltraKey => "ultra",
            BlockKind::CategoryToken => "category",
            BlockKind::Fallback => "fallback",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockKey {
    pub kind: BlockKind,
    pub value: String,
}

impl BlockKey {
    pub fn new(kind: BlockKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// A set of records that are compared with each other.
///
/// Members are indices into the slice that was blocked, in ascending order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub key: BlockKey,
    pub members: Vec<usize>,
}

impl Block {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Pairwise comparisons this block implies.
    pub fn comparisons(&self) -> u64 {
        pairs(self.members.len())
    }
}

pub type BlockMap = BTreeMap<BlockKey, Block>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockingMetrics {
    pub records_processed: usize,
    pub total_time_ms: f64,
    pub throughput_per_sec: f64,
    pub estimated_memory_bytes: usize,
    pub blocks_created: usize,
    /// Sum of per-block pair counts. Overlapping blocks count a pair more than once.
    pub comparisons: u64,
    pub brute_force_comparisons: u64,
    /// `1 - comparisons / brute_force_comparisons` as a percentage, floored at 0.
    pub comparisons_avoided_pct: f64,
    pub block_type_distribution: BTreeMap<BlockKind, usize>,
    pub oversized_blocks_split: usize,
    pub used_progressive: bool,
    pub chunks_processed: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BlockingResult {
    pub blocks: BlockMap,
    pub metrics: BlockingMetrics,
}

impl BlockingResult {
    pub fn is_cancelled(&self) -> bool {
        self.metrics.cancelled
    }

    /// Distinct `(i, j)` pairs with `i < j` that share at least one block.
    pub fn candidate_pairs(&self) -> Vec<(usize, usize)> {
        let mut seen = BTreeSet::new();
        for block in self.blocks.values() {
            for (pos, &left) in block.members.iter().enumerate() {
                for &right in &block.members[pos + 1..] {
                    seen.insert((left.min(right), left.max(right)));
                }
            }
        }
        seen.into_iter().collect()
    }
}

/// The blocks one record belongs to.
pub fn block_keys(prepared: &PreparedRecord<'_>, config: &BlockingConfig) -> Vec<BlockKey> {
    let mut keys = Vec::with_capacity(3);

    if let Some(brand) = &prepared.brand {
        keys.push(BlockKey::new(BlockKind::Brand, brand.clone()));
    }

    let ultra_prefix: String = compact(&prepared.keys.ultra_aggressive)
        .take(config.ultra_prefix_len.max(1))
        .collect();
    if !ultra_prefix.is_empty() {
        keys.push(BlockKey::new(BlockKind::UltraKey, ultra_prefix));
    }

    if let Some(token) = prepared.keys.aggressive.split_whitespace().next() {
        let family = prepared.category.as_deref().unwrap_or("any");
        keys.push(BlockKey::new(
            BlockKind::CategoryToken,
            format!("{family}:{token}"),
        ));
    }

    if keys.is_empty() {
        keys.push(BlockKey::new(
            BlockKind::Fallback,
            prepared.record.id.to_string(),
        ));
    }
    keys
}

/// Key used to split an oversized block.
///
/// Ultra blocks split on the full ultra key so identical keys stay together.
/// Category blocks already share their first token and split on a prefix of
/// the rest of the name; other kinds on a prefix of the whole aggressive key.
fn secondary_key(kind: BlockKind, prepared: &PreparedRecord<'_>, config: &BlockingConfig) -> String {
    let prefix_len = config.secondary_prefix_len.max(1);
    let aggressive = prepared.keys.aggressive.as_str();
    let key: String = match kind {
        BlockKind::UltraKey => compact(&prepared.keys.ultra_aggressive).collect(),
        BlockKind::CategoryToken => {
            let rest = aggressive.split_once(' ').map_or("", |(_, rest)| rest);
            compact(rest).take(prefix_len).collect()
        }
        _ => compact(aggressive).take(prefix_len).collect(),
    };
    if key.is_empty() { "_".to_string() } else { key }
}

fn compact(text: &str) -> impl Iterator<Item = char> + '_ {
    text.chars().filter(|c| !c.is_whitespace())
}

fn pairs(n: usize) -> u64 {
    let n = n as u64;
    n * n.saturating_sub(1) / 2
}

fn record_bytes(record: &Record) -> usize {
    RECORD_OVERHEAD_BYTES
        + record.name.len()
        + record.brand.as_ref().map_or(0, String::len)
        + record.category.as_ref().map_or(0, String::len)
        + record.source.len()
}

fn is_cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
}

/// Running merge target for chunk results.
#[derive(Default)]
struct BlockAccumulator {
    blocks: BTreeMap<BlockKey, Vec<usize>>,
    estimated_bytes: usize,
}

impl BlockAccumulator {
    /// Merge the keys of records `start..start + keys.len()`.
    fn absorb(&mut self, start: usize, keys: Vec<Vec<BlockKey>>) {
        let mut chunk: HashMap<BlockKey, Vec<usize>> = HashMap::new();
        for (offset, record_keys) in keys.into_iter().enumerate() {
            for key in record_keys {
                chunk.entry(key).or_default().push(start + offset);
            }
        }

        for (key, members) in chunk {
            self.estimated_bytes += members.len() * size_of::<usize>();
            match self.blocks.entry(key) {
                Entry::Occupied(mut entry) => {
                    let existing = entry.get_mut();
                    existing.extend(members);
                    existing.shrink_to_fit();
                }
                Entry::Vacant(entry) => {
                    self.estimated_bytes +=
                        BLOCK_OVERHEAD_BYTES + size_of::<BlockKey>() + entry.key().value.len();
                    let mut members = members;
                    members.shrink_to_fit();
                    entry.insert(members);
                }
            }
        }
    }
}

/// Partitions records into candidate blocks.
#[derive(Debug, Clone)]
pub struct BlockingEngine {
    config: BlockingConfig,
    preparer: Preparer,
}

impl Default for BlockingEngine {
    fn default() -> Self {
        Self::new(BlockingConfig::default(), Preparer::default())
    }
}

impl BlockingEngine {
    pub fn new(config: BlockingConfig, preparer: Preparer) -> Self {
        Self { config, preparer }
    }

    pub fn config(&self) -> &BlockingConfig {
        &self.config
    }

    pub fn create_blocks(&self, records: &[Record]) -> BlockMap {
        self.create_blocks_with_metrics(records).blocks
    }

    pub fn create_blocks_with_metrics(&self, records: &[Record]) -> BlockingResult {
        self.block_records(records, None)
    }

    /// Like [`create_blocks_with_metrics`](Self::create_blocks_with_metrics),
    /// but stops feeding chunks once `cancel` is set. The result then holds
    /// the blocks of the chunks merged so far.
    pub fn create_blocks_cancellable(&self, records: &[Record], cancel: &AtomicBool) -> BlockingResult {
        self.block_records(records, Some(cancel))
    }

    /// Block records that were already prepared, reusing their keys.
    pub fn create_blocks_prepared(
        &self,
        prepared: &[PreparedRecord<'_>],
        cancel: Option<&AtomicBool>,
    ) -> BlockingResult {
        let input_bytes = prepared.iter().map(|p| record_bytes(p.record)).sum();
        self.run(
            prepared.len(),
            input_bytes,
            cancel,
            |range| {
                prepared[range]
                    .par_iter()
                    .map(|p| block_keys(p, &self.config))
                    .collect()
            },
            |kind, idx| secondary_key(kind, &prepared[idx], &self.config),
        )
    }

    fn block_records(&self, records: &[Record], cancel: Option<&AtomicBool>) -> BlockingResult {
        let input_bytes = records.iter().map(record_bytes).sum();
        // Keys are derived per chunk and dropped after the merge.
        self.run(
            records.len(),
            input_bytes,
            cancel,
            |range| {
                records[range]
                    .par_iter()
                    .map(|record| block_keys(&self.preparer.prepare(record), &self.config))
                    .collect()
            },
            |kind, idx| secondary_key(kind, &self.preparer.prepare(&records[idx]), &self.config),
        )
    }

    fn memory_limit_bytes(&self) -> usize {
        self.config.memory_limit_mb.saturating_mul(1024 * 1024)
    }

    fn should_use_progressive(&self, len: usize, input_bytes: usize) -> bool {
        self.config.enable_progressive_blocking
            && (len > self.config.progressive_chunk_size || input_bytes > self.memory_limit_bytes())
    }

    fn run<K, S>(
        &self,
        len: usize,
        input_bytes: usize,
        cancel: Option<&AtomicBool>,
        keys_for: K,
        secondary_for: S,
    ) -> BlockingResult
    where
        K: Fn(Range<usize>) -> Vec<Vec<BlockKey>>,
        S: Fn(BlockKind, usize) -> String,
    {
        let started = Instant::now();
        let progressive = self.should_use_progressive(len, input_bytes);
        let mut accumulator = BlockAccumulator::default();
        let mut chunks = 0;
        let mut cancelled = false;

        if progressive {
            let limit = self.memory_limit_bytes() as f64;
            let mut chunk_size = self.config.progressive_chunk_size.max(1);
            let mut start = 0;
            debug!("progressive blocking of {len} records in chunks of {chunk_size}");
            while start < len {
                if is_cancelled(cancel) {
                    cancelled = true;
                    break;
                }
                let end = start.saturating_add(chunk_size).min(len);
                accumulator.absorb(start, keys_for(start..end));
                chunks += 1;
                start = end;

                if accumulator.estimated_bytes as f64 > limit * MEMORY_PRESSURE_RATIO
                    && chunk_size > MIN_CHUNK_SIZE
                {
                    chunk_size = (chunk_size / 2).max(MIN_CHUNK_SIZE);
                    warn!(
                        "blocking memory estimate {} bytes is near the {} MB limit, chunk size reduced to {}",
                        accumulator.estimated_bytes, self.config.memory_limit_mb, chunk_size
                    );
                }
            }
        } else if len > 0 {
            if is_cancelled(cancel) {
                cancelled = true;
            } else {
                accumulator.absorb(0, keys_for(0..len));
                chunks = 1;
            }
        }

        if cancelled {
            warn!("blocking cancelled after {chunks} chunks, returning partial blocks");
        }

        let (blocks, split) = self.split_oversized(accumulator.blocks, &secondary_for);
        let mut metrics = compute_metrics(&blocks, len, started);
        metrics.oversized_blocks_split = split;
        metrics.used_progressive = progressive;
        metrics.chunks_processed = chunks;
        metrics.cancelled = cancelled;

        if self.config.enable_performance_monitoring {
            log_metrics(&metrics);
        }

        BlockingResult { blocks, metrics }
    }

    fn split_oversized<S>(&self, blocks: BTreeMap<BlockKey, Vec<usize>>, secondary_for: &S) -> (BlockMap, usize)
    where
        S: Fn(BlockKind, usize) -> String,
    {
        let max = self.config.max_block_size.max(2);
        let mut out = BlockMap::new();
        let mut split = 0;

        for (key, members) in blocks {
            if members.len() <= max {
                insert_block(&mut out, key, members);
                continue;
            }
            split += 1;
            debug!("splitting block {key} with {} members", members.len());

            let mut by_secondary: BTreeMap<String, Vec<usize>> = BTreeMap::new();
            for idx in members {
                by_secondary
                    .entry(secondary_for(key.kind, idx))
                    .or_default()
                    .push(idx);
            }
            for (secondary, sub) in by_secondary {
                let base = format!("{}/{}", key.value, secondary);
                if sub.len() <= max {
                    insert_block(&mut out, BlockKey::new(key.kind, base), sub);
                } else {
                    warn!(
                        "block {base} still has {} members after splitting, chunking it by {max}; \
                         some identical keys will no longer share a block",
                        sub.len()
                    );
                    for (part, piece) in sub.chunks(max).enumerate() {
                        insert_block(
                            &mut out,
                            BlockKey::new(key.kind, format!("{base}#{part}")),
                            piece.to_vec(),
                        );
                    }
                }
            }
        }

        (out, split)
    }

}

fn insert_block(out: &mut BlockMap, key: BlockKey, members: Vec<usize>) {
    match out.entry(key) {
        Entry::Occupied(mut entry) => {
            let block = entry.get_mut();
            block.members.extend(members);
            block.members.sort_unstable();
            block.members.dedup();
        }
        Entry::Vacant(entry) => {
            let key = entry.key().clone();
            entry.insert(Block { key, members });
        }
    }
}

fn compute_metrics(blocks: &BlockMap, len: usize, started: Instant) -> BlockingMetrics {
    let elapsed = started.elapsed().as_secs_f64();
    let comparisons: u64 = blocks.values().map(Block::comparisons).sum();
    let brute_force = pairs(len);
    let avoided = if brute_force == 0 {
        0.0
    } else {
        ((1.0 - comparisons as f64 / brute_force as f64) * 100.0).max(0.0)
    };

    let mut distribution = BTreeMap::new();
    let mut memory = 0usize;
    for (key, block) in blocks {
        *distribution.entry(key.kind).or_insert(0) += 1;
        memory += BLOCK_OVERHEAD_BYTES
            + size_of::<BlockKey>()
            + key.value.len()
            + block.members.capacity() * size_of::<usize>();
    }

    BlockingMetrics {
        records_processed: len,
        total_time_ms: elapsed * 1000.0,
        throughput_per_sec: if elapsed > 0.0 { len as f64 / elapsed } else { 0.0 },
        estimated_memory_bytes: memory,
        blocks_created: blocks.len(),
        comparisons,
        brute_force_comparisons: brute_force,
        comparisons_avoided_pct: avoided,
        block_type_distribution: distribution,
        ..BlockingMetrics::default()
    }
}

fn log_metrics(metrics: &BlockingMetrics) {
    info!(
        records = metrics.records_processed,
        blocks = metrics.blocks_created,
        comparisons = metrics.comparisons,
        progressive = metrics.used_progressive,
        "blocking finished in {:.1} ms, {:.1}% of comparisons avoided",
        metrics.total_time_ms,
        metrics.comparisons_avoided_pct
    );
    debug!("block types: {:?}", metrics.block_type_distribution);
}
