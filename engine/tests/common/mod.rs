//! Shared helpers for the integration tests: a small synthetic ratings
//! dataset and the plumbing to load it through the real ingest path.

use std::io::Write;

use bptree_api::controller::Disk;
use bptree_api::types::Record;
use bptree_engine::experiment::{build_database, Database};
use bptree_engine::ingest;

/// Block size used across the integration tests: nodes hold 3 keys, data
/// blocks hold 4 records, so a few dozen records already build a real tree.
pub const BLOCK_SIZE: u32 = 100;

/// The ratings each synthetic record cycles through. `7.0` and `8.0`
/// appear several times so the equality queries return more than one hit.
const RATINGS: [&str; 8] = ["5.6", "6.5", "7.0", "7.3", "8.0", "8.0", "9.1", "3.2"];

/// Render the synthetic dataset as a TSV document with a header row.
pub fn synthetic_tsv(rows: usize) -> String {
    let mut out = String::from("id\trating\tvotes\n");
    for i in 0..rows {
        let rating = RATINGS[i % RATINGS.len()];
        out.push_str(&format!("tt{:07}\t{}\t{}\n", i + 1, rating, 100 + i * 13));
    }
    out
}

/// Write the dataset to a temp file and run it through the ingest path.
pub fn load_synthetic(rows: usize) -> Vec<Record> {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(synthetic_tsv(rows).as_bytes()).unwrap();
    ingest::load_records(file.path()).unwrap()
}

/// Ingest `rows` synthetic records and build the database over them.
pub fn setup(rows: usize) -> (Disk, Database, Vec<Record>) {
    let records = load_synthetic(rows);
    let mut disk = Disk::new(BLOCK_SIZE, 4096);
    let db = build_database(&mut disk, &records).unwrap();
    (disk, db, records)
}
