//! # Diagnostics
//!
//! Read-only views of an index for debugging and tuning:
//!
//! - [`IndexStats`]: occupancy and overflow-chain statistics.
//! - [`write_graphviz`]: the directory and every bucket as a `dot` graph.
//! - [`GraphvizDumper`]: numbered `<prefix>-<n>.dot` snapshots on disk.
//! - [`format_bits`]: binary key display split at the depth boundary.
//!
//! None of these touch the bucket `seen` markers, so they can run between
//! steps of an iteration without disturbing it.


use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::bucket::Bucket;
use crate::engine::HashIndex;
use crate::layout::{PIECE_CAPACITY, PIECES_PER_BUCKET, piece_after};
use crate::page::PageAllocator;

/// Overflow runs at least this long are counted as long chains.
pub const LONG_CHAIN: usize = 20;

// ------------------------------------------------------------------------------------------------
// Statistics
// ------------------------------------------------------------------------------------------------

/// Occupancy snapshot of an index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexStats {
    pub depth: u8,
    pub slots: u32,
    pub buckets: usize,
    pub entries: u64,
    pub directory_pages: u32,
    /// Pieces across all buckets.
    pub pieces: usize,
    /// Smallest non-zero `bytes_used` of any piece.
    pub min_piece_bytes: usize,
    pub max_piece_bytes: usize,
    pub total_piece_bytes: u64,
    pub empty_pieces: usize,
    pub overflowed_pieces: usize,
    /// Longest run of consecutive overflowed pieces.
    pub max_overflow_run: usize,
    /// Runs of at least [`LONG_CHAIN`] pieces.
    pub long_runs: usize,
    /// Sum of run lengths, counted from every overflowed piece.
    pub overflow_run_sum: usize,
}

impl IndexStats {
    /// Collects statistics over every unique bucket.
    pub fn collect<A: PageAllocator>(index: &HashIndex<A>) -> Self {
        let dir = index.directory();
        let mut stats = Self {
            depth: dir.depth(),
            slots: dir.number_of_buckets(),
            buckets: dir.bucket_count(),
            entries: dir.entries(),
            directory_pages: dir.directory_pages(),
            min_piece_bytes: PIECE_CAPACITY,
            ..Self::default()
        };

        for (_, bucket) in dir.buckets() {
            for (i, piece) in bucket.pieces().enumerate() {
                let used = piece.bytes_used();
                stats.pieces += 1;
                stats.total_piece_bytes += used as u64;
                stats.max_piece_bytes = stats.max_piece_bytes.max(used);
                if used == 0 {
                    stats.empty_pieces += 1;
                } else {
                    stats.min_piece_bytes = stats.min_piece_bytes.min(used);
                }

                if piece.overflowed() {
                    stats.overflowed_pieces += 1;
                    let run = overflow_run_from(bucket, i);
                    stats.max_overflow_run = stats.max_overflow_run.max(run);
                    stats.overflow_run_sum += run;
                    if run >= LONG_CHAIN {
                        stats.long_runs += 1;
                    }
                }
            }
        }
        if stats.total_piece_bytes == 0 {
            stats.min_piece_bytes = 0;
        }
        stats
    }

    /// Mean bytes used per piece.
    pub fn avg_piece_bytes(&self) -> f64 {
        if self.pieces == 0 {
            0.0
        } else {
            self.total_piece_bytes as f64 / self.pieces as f64
        }
    }
}

/// Consecutive overflowed pieces starting at `start`.
fn overflow_run_from(bucket: &Bucket, start: usize) -> usize {
    (0..PIECES_PER_BUCKET)
        .take_while(|&step| bucket.piece(piece_after(start, step)).overflowed())
        .count()
}

// ------------------------------------------------------------------------------------------------
// Graphviz
// ------------------------------------------------------------------------------------------------

/// Binary rendering of `key`, most significant bit first.
///
/// Leading zeros above both `depth` and the low byte are dropped, and a
/// space separates the low `depth` bits that select the bucket.
///
/// ```rust
/// use ehashkv::diagnostics::format_bits;
///
/// assert_eq!(format_bits(5, 2), "000001 01");
/// assert_eq!(format_bits(0x1ff, 3), "111111 111");
/// ```
pub fn format_bits(key: u64, depth: u8) -> String {
    let depth = u32::from(depth);
    let mut out = String::with_capacity(66);
    let mut significant = false;
    for bit in (0..64u32).rev() {
        let set = (key >> bit) & 1 == 1;
        significant |= set;
        if !significant && bit >= depth && bit >= 8 {
            continue;
        }
        out.push(if set { '1' } else { '0' });
        if bit == depth && bit != 0 {
            out.push(' ');
        }
    }
    out
}

fn bucket_node(out: &mut String, name: &str, bucket: &Bucket, first_slot: usize) {
    let _ = write!(
        out,
        "\t{name} [label=\"Depth: {}, Entries: {}, Size: {}, Index: {first_slot}\\l--------\\l",
        bucket.depth(),
        bucket.entries(),
        bucket.used_bytes()
    );
    for (key, value) in bucket.records() {
        let _ = write!(
            out,
            "{} \\| {key:>4} = {value:>4}\\l",
            format_bits(key, bucket.depth())
        );
    }
    out.push_str("\"]\n");
}

/// Writes the directory and every bucket as a `dot` digraph.
///
/// The graph has a `table` node with the directory header, a `slots`
/// record node with one field per slot, and one node per unique bucket
/// listing its records.
pub fn write_graphviz<A: PageAllocator, W: Write>(
    index: &HashIndex<A>,
    mut out: W,
) -> io::Result<()> {
    let dir = index.directory();
    let mut dot = String::new();
    dot.push_str("digraph hash {\n\tnode[shape = record ];\n");
    let _ = writeln!(
        dot,
        "\ttable [label=\"Depth: {}, Size: {}\\lPages: {}, Entries: {}\\l\"]",
        dir.depth(),
        dir.number_of_buckets(),
        dir.directory_pages(),
        dir.entries()
    );

    dot.push_str("\tslots [label=\"");
    for (i, id) in dir.slots().enumerate() {
        if i != 0 {
            dot.push('|');
        }
        let _ = write!(dot, "<slot_{i}> {i} - {id} ");
    }
    dot.push_str("\"]\n");

    let mut drawn = HashSet::new();
    for (i, id) in dir.slots().enumerate() {
        if !drawn.insert(id) {
            continue;
        }
        if let Some(bucket) = dir.bucket(id) {
            bucket_node(&mut dot, &format!("bucket_{}", id.index()), bucket, i);
        }
    }

    for (i, id) in dir.slots().enumerate() {
        let _ = writeln!(dot, "\tslots:slot_{i} -> bucket_{};", id.index());
    }
    dot.push_str("\ttable -> slots;\n}\n");

    out.write_all(dot.as_bytes())?;
    out.flush()
}

/// Writes numbered graphviz snapshots into a directory.
///
/// Each call to [`dump`](Self::dump) writes `<prefix>-<n>.dot` with `n`
/// counting from 1 per dumper.
#[derive(Debug)]
pub struct GraphvizDumper {
    dir: PathBuf,
    prefix: String,
    counter: u32,
}

impl GraphvizDumper {
    pub fn new(dir: impl AsRef<Path>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            prefix: prefix.into(),
            counter: 0,
        }
    }

    /// Writes the next snapshot and returns its path.
    pub fn dump<A: PageAllocator>(&mut self, index: &HashIndex<A>) -> io::Result<PathBuf> {
        self.counter += 1;
        let path = self
            .dir
            .join(format!("{}-{}.dot", self.prefix, self.counter));
        let file = BufWriter::new(File::create(&path)?);
        write_graphviz(index, file)?;
        debug!(path = %path.display(), "wrote graphviz snapshot");
        Ok(path)
    }

    /// Snapshots written so far.
    pub fn count(&self) -> u32 {
        self.counter
    }
}
