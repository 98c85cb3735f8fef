//! The measurement routines behind the `experiments` binary.
//!
//! Each routine drives the public API the way an application would (build
//! the database, look ratings up, scan a range, bulk-delete) and prints
//! what it observed: result sizes, node and block access counts, and wall
//! times. Results come back as opaque pointers and are resolved through the
//! record heap, never by peeking into the tree.

use std::collections::HashSet;
use std::time::Instant;

use bptree_api::controller::Disk;
use bptree_api::types::{Rating, Record, RECORD_SIZE};
use log::info;

use crate::data_block::DATA_HEADER_SIZE;
use crate::heap::RecordHeap;
use crate::tree::BPTree;

/// The loaded database: the record heap and the index over it.
#[derive(Debug)]
pub struct Database {
    /// Where the record bytes live.
    pub heap: RecordHeap,
    /// The index over `(rating, id)`.
    pub tree: BPTree,
}

/// Load every record into the heap and index it, in the given order.
pub fn build_database(disk: &mut Disk, records: &[Record]) -> anyhow::Result<Database> {
    let started = Instant::now();
    let mut heap = RecordHeap::new(disk)?;
    let mut tree = BPTree::new(disk)?;
    for record in records {
        let ptr = heap.append(disk, record)?;
        tree.insert(disk, record.key(), ptr)?;
    }
    info!(
        "loaded {} records in {:.2?}",
        records.len(),
        started.elapsed()
    );
    Ok(Database { heap, tree })
}

/// Experiment 1: storage statistics of the loaded heap.
pub fn report_storage(disk: &Disk, db: &Database, records: &[Record]) {
    let per_block = (disk.block_size() - DATA_HEADER_SIZE) / RECORD_SIZE as u32;
    println!("--- experiment 1: storage ---");
    println!("{}", disk.info());
    println!("records:           {}", records.len());
    println!("record size:       {} B", RECORD_SIZE);
    println!("records per block: {}", per_block);
    println!("data blocks:       {}", db.heap.block_count());
}

/// Experiment 2: shape of the index built over the data.
pub fn report_index(disk: &Disk, db: &Database) -> anyhow::Result<()> {
    println!("--- experiment 2: index ---");
    println!("keys per node (n): {}", db.tree.order());
    println!("height:            {}", db.tree.height(disk)?);
    println!("nodes:             {}", db.tree.num_nodes(disk)?);
    let root_keys: Vec<String> = db
        .tree
        .root_keys(disk)?
        .iter()
        .map(|k| k.to_string())
        .collect();
    println!("root keys:         {}", root_keys.join(" "));
    Ok(())
}

/// Experiment 3: equality lookup of every record rated `8.0`.
pub fn report_search(disk: &Disk, db: &Database) -> anyhow::Result<()> {
    let target = Rating::from_parts(8, 0);
    db.tree.stats().reset_node_accesses();
    let started = Instant::now();
    let ptrs = db.tree.search(disk, target)?;
    let elapsed = started.elapsed();

    let index_accesses = db.tree.stats().nodes_accessed();
    let data_blocks: HashSet<u32> = ptrs.iter().map(|p| p.block_id).collect();
    let mut votes_total: u64 = 0;
    for &ptr in &ptrs {
        votes_total += u64::from(db.heap.fetch(disk, ptr)?.votes);
    }

    println!("--- experiment 3: search rating = {} ---", target);
    println!("matches:               {}", ptrs.len());
    println!("index nodes accessed:  {}", index_accesses);
    println!("data blocks accessed:  {}", data_blocks.len());
    if !ptrs.is_empty() {
        println!(
            "average votes:         {:.1}",
            votes_total as f64 / ptrs.len() as f64
        );
    }
    println!("elapsed:               {:.2?}", elapsed);
    Ok(())
}

/// Experiment 4: range scan over ratings `7.0` to `9.0` inclusive.
pub fn report_range(disk: &Disk, db: &Database) -> anyhow::Result<()> {
    let lo = Rating::from_parts(7, 0);
    let hi = Rating::from_parts(9, 0);
    db.tree.stats().reset_node_accesses();
    let started = Instant::now();
    let ptrs = db.tree.search_range(disk, Some(lo), Some(hi))?;
    let elapsed = started.elapsed();

    let index_accesses = db.tree.stats().nodes_accessed();
    let data_blocks: HashSet<u32> = ptrs.iter().map(|p| p.block_id).collect();
    let mut votes_total: u64 = 0;
    for &ptr in &ptrs {
        votes_total += u64::from(db.heap.fetch(disk, ptr)?.votes);
    }

    println!("--- experiment 4: range {} <= rating <= {} ---", lo, hi);
    println!("matches:               {}", ptrs.len());
    println!("index nodes accessed:  {}", index_accesses);
    println!("data blocks accessed:  {}", data_blocks.len());
    if !ptrs.is_empty() {
        println!(
            "average votes:         {:.1}",
            votes_total as f64 / ptrs.len() as f64
        );
    }
    println!("elapsed:               {:.2?}", elapsed);
    Ok(())
}

/// Experiment 5: bulk-delete every record rated `7.0`.
pub fn report_delete(disk: &mut Disk, db: &mut Database) -> anyhow::Result<()> {
    let target = Rating::from_parts(7, 0);
    let merges_before = db.tree.stats().merges();
    let deleted_before = db.tree.stats().nodes_deleted();
    let started = Instant::now();
    let removed = db.tree.delete(disk, target)?;
    let elapsed = started.elapsed();

    println!("--- experiment 5: delete rating = {} ---", target);
    println!("entries removed:   {}", removed);
    println!(
        "node merges:       {}",
        db.tree.stats().merges() - merges_before
    );
    println!(
        "nodes deleted:     {}",
        db.tree.stats().nodes_deleted() - deleted_before
    );
    println!("height after:      {}", db.tree.height(disk)?);
    println!("nodes after:       {}", db.tree.num_nodes(disk)?);
    println!("elapsed:           {:.2?}", elapsed);
    Ok(())
}
