//! Command-line driver: load the ratings file, build the database and run
//! the experiments.

use std::path::PathBuf;

use anyhow::Context;
use bptree_api::controller::Disk;
use bptree_api::types::{BLOCK_SIZE, DISK_SIZE};
use log::info;
use structopt::StructOpt;

use bptree_engine::{experiment, ingest};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "experiments",
    about = "Build the ratings database and run the experiments over it"
)]
struct Opt {
    /// Tab-separated ratings file with a header row: id, rating, votes
    #[structopt(parse(from_os_str))]
    data: PathBuf,

    /// Block size in bytes (default 500)
    #[structopt(long)]
    block_size: Option<u32>,

    /// Disk size in bytes (default 200 MiB)
    #[structopt(long)]
    disk_size: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let records = ingest::load_records(&opt.data)
        .with_context(|| format!("loading {}", opt.data.display()))?;
    info!("parsed {} records from {}", records.len(), opt.data.display());

    let block_size = opt.block_size.unwrap_or(BLOCK_SIZE);
    let disk_size = opt.disk_size.unwrap_or(DISK_SIZE);
    let nblocks = (disk_size / u64::from(block_size)) as u32;
    let mut disk = Disk::new(block_size, nblocks);

    let mut db = experiment::build_database(&mut disk, &records)?;
    experiment::report_storage(&disk, &db, &records);
    experiment::report_index(&disk, &db)?;
    experiment::report_search(&disk, &db)?;
    experiment::report_range(&disk, &db)?;
    experiment::report_delete(&mut disk, &mut db)?;
    Ok(())
}
