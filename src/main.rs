//! vibekv - command-line front end for the disk hash table and buffer pool

use anyhow::{bail, Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use rand::Rng;
use std::path::{Path, PathBuf};
use vibekv::access::HashTable;
use vibekv::config::{StorageConfig, TableConfig, DEFAULT_CACHELINE};
use vibekv::storage::disk::{block, BlockFileBackend, FileBackend};
use vibekv::storage::{BufferPool, PageId};

type U64Table = HashTable<u64, u64, FileBackend>;

/// vibekv - a disk-resident key/value index
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty u64 -> u64 table
    Init {
        file: PathBuf,
        /// Number of head buckets
        #[arg(short, long, default_value = "1024")]
        buckets: usize,
        /// Cacheline size buckets are sized to
        #[arg(long, default_value_t = DEFAULT_CACHELINE)]
        cacheline: usize,
    },
    /// Insert a key if it is not present yet
    Insert { file: PathBuf, key: u64, value: u64 },
    /// Look up a key
    Get { file: PathBuf, key: u64 },
    /// Remove a key
    Remove { file: PathBuf, key: u64 },
    /// Print every entry in bucket order
    Dump { file: PathBuf },
    /// Pad a file to a whole number of blocks
    Align { file: PathBuf },
    /// Drive random page traffic through a buffer pool
    Bench {
        file: PathBuf,
        /// Number of page accesses
        #[arg(short, long, default_value = "10000")]
        count: usize,
        /// Number of frames in the pool
        #[arg(long, default_value = "10")]
        capacity: usize,
        /// Number of distinct pages touched
        #[arg(short, long, default_value = "64")]
        pages: u64,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match args.command {
        Command::Init {
            file,
            buckets,
            cacheline,
        } => init(&file, buckets, cacheline),
        Command::Insert { file, key, value } => {
            println!("{}", insert(&file, key, value)?);
            Ok(())
        }
        Command::Get { file, key } => {
            let mut table = open_table(&file)?;
            match table.get(&key) {
                Ok(value) => println!("{}", value),
                Err(e) if e.is_not_found() => bail!("key {} not found", key),
                Err(e) => return Err(e).context("Failed to look up key"),
            }
            Ok(())
        }
        Command::Remove { file, key } => {
            let mut table = open_table(&file)?;
            table
                .remove(&key)
                .with_context(|| format!("Failed to remove key {}", key))?;
            println!("removed {}", key);
            Ok(())
        }
        Command::Dump { file } => dump(&file),
        Command::Align { file } => align(&file),
        Command::Bench {
            file,
            count,
            capacity,
            pages,
        } => bench(&file, count, capacity, pages),
    }
}

fn init(path: &Path, buckets: usize, cacheline: usize) -> Result<()> {
    let config = StorageConfig {
        cacheline,
        ..StorageConfig::default()
    };
    let backend = FileBackend::create(path)
        .with_context(|| format!("Failed to create table file {}", path.display()))?;
    let table = U64Table::create_with_config(backend, buckets, &config)
        .context("Failed to create table")?;
    table
        .config()
        .save(path)
        .context("Failed to write table metadata")?;

    println!(
        "created {} with {} buckets ({} slots of {} bytes each)",
        path.display(),
        table.bucket_count(),
        table.layout().slots(),
        table.layout().entry_size()
    );
    Ok(())
}

fn open_table(path: &Path) -> Result<U64Table> {
    let config = TableConfig::load(path)?;
    let backend = FileBackend::open_existing(path)
        .with_context(|| format!("Failed to open table file {}", path.display()))?;
    U64Table::open_with_config(backend, &config).context("Failed to open table")
}

/// Insert into the table at `path` and describe the outcome.
fn insert(path: &Path, key: u64, value: u64) -> Result<String> {
    let mut table = open_table(path)?;
    let present = table.contains(&key).context("Failed to look up key")?;
    let stored = table
        .insert(key, value)
        .with_context(|| format!("Failed to insert key {}", key))?;

    Ok(if present {
        format!("{} already present = {}", key, stored)
    } else {
        format!("{} = {}", key, stored)
    })
}

fn dump(path: &Path) -> Result<()> {
    let mut table = open_table(path)?;
    let entries = table.entries().context("Failed to read entries")?;
    for (key, value) in &entries {
        println!("{}\t{}", key, value);
    }

    let longest = (0..table.bucket_count())
        .map(|bucket_no| table.chain_length(bucket_no))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .max()
        .unwrap_or(0);
    log::info!("{} entries, longest chain {} buckets", entries.len(), longest);
    Ok(())
}

fn align(path: &Path) -> Result<()> {
    let backend = FileBackend::open_existing(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let before = block::file_len(backend.file())?;
    block::prepare(backend.file()).context("Failed to pad file")?;
    let blocks = block::block_count(backend.file())?;

    println!(
        "{}: {} -> {} bytes ({} blocks)",
        path.display(),
        before,
        blocks * block::BLOCK_SIZE as u64,
        blocks
    );
    Ok(())
}

fn bench(path: &Path, count: usize, capacity: usize, pages: u64) -> Result<()> {
    if pages == 0 {
        bail!("--pages must be nonzero");
    }

    let config = StorageConfig {
        pool_capacity: capacity,
        ..StorageConfig::default()
    };
    let backend = BlockFileBackend::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let pool = BufferPool::with_config(backend, &config).context("Failed to create pool")?;

    let mut rng = rand::thread_rng();
    for _ in 0..count {
        let page_id = PageId(rng.gen_range(0..pages));
        let mut lease = pool.pin(page_id)?;

        let mut counter = [0u8; 8];
        lease.read_at(0, &mut counter)?;
        let next = u64::from_le_bytes(counter) + 1;
        lease.write_at(0, &next.to_le_bytes())?;
    }
    pool.flush_all().context("Failed to flush pool")?;

    let stats = pool.stats();
    let accesses = (stats.hits + stats.misses).max(1);
    println!(
        "{} accesses over {} pages with {} frames: {} hits ({:.1}%), {} misses, {} evictions, {} flushes",
        count,
        pages,
        pool.capacity(),
        stats.hits,
        stats.hits as f64 * 100.0 / accesses as f64,
        stats.misses,
        stats.evictions,
        stats.flushes
    );
    Ok(())
}
