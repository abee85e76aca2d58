//! Offline tool for manipulating storage files.

use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use bookstore::storage::backend::FileBackend;
use bookstore::storage::engine::{create, NopHook, Storage};
use bookstore::storage::format::{MAX_CHUNK_SIZE, MAX_NUM_CHUNKS, MIN_CHUNK_SIZE};

#[derive(Parser)]
#[command(name = "bsctl", about = "a tool for manipulating bs storage files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Creates a new bs storage file
    Create {
        /// Size of a single chunk data (not including chunk header)
        #[arg(short = 's', long = "size")]
        chunk_size: usize,
        /// Total number of chunks
        #[arg(short = 'c', long = "chunks")]
        num_chunks: usize,
        /// Filename to create
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Assign storage id (default or zero forces random storage id to be used)
        #[arg(short = 'i', long = "stid", default_value_t = 0)]
        storage_id: u64,
    },
    /// Copies every record of one storage file into another. The destination
    /// is written with a no-op commit hook, so it must not be actively
    /// replicated while the copy runs.
    Move {
        /// Source storage file
        #[arg(short = 'i', long = "input")]
        input: PathBuf,
        /// Destination storage file
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    match Cli::parse().command {
        Command::Create {
            chunk_size,
            num_chunks,
            file,
            storage_id,
        } => run_create(chunk_size, num_chunks, &file, storage_id),
        Command::Move { input, output } => run_move(&input, &output).await,
    }
}

fn run_create(
    chunk_size: usize,
    num_chunks: usize,
    path: &PathBuf,
    storage_id: u64,
) -> anyhow::Result<()> {
    if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
        anyhow::bail!(
            "chunk size can not be less than {} or greater than {}",
            MIN_CHUNK_SIZE,
            MAX_CHUNK_SIZE
        );
    }
    if num_chunks < 1 {
        anyhow::bail!("number of chunks can not be less than 1");
    }
    if num_chunks > MAX_NUM_CHUNKS {
        anyhow::bail!("number of chunks can not be greater than {}", MAX_NUM_CHUNKS);
    }

    let file = OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("error creating storage file {}", path.display()))?;

    let mut backend = FileBackend::new(file);
    create(&mut backend, chunk_size, num_chunks, storage_id)
        .context("error creating storage")?;

    let file_size = std::fs::metadata(path)
        .context("error getting file stat")?
        .len();
    let reopened = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .context("error opening storage file")?;
    let storage = Storage::open(FileBackend::new(reopened)).context("error opening storage")?;

    println!(
        "Storage created.\nFile size:  {} bytes\nStorage ID: {}",
        file_size,
        storage.id()
    );
    Ok(())
}

async fn run_move(input: &PathBuf, output: &PathBuf) -> anyhow::Result<()> {
    let src_file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(input)
        .with_context(|| format!("error opening input storage file {}", input.display()))?;
    let src = Storage::open(FileBackend::new(src_file)).context("error opening input storage")?;

    let dst_file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(output)
        .with_context(|| format!("error opening output storage file {}", output.display()))?;
    let dst = Storage::open(FileBackend::new(dst_file)).context("error opening output storage")?;

    src.iter(|idx, data| {
        let dst = &dst;
        async move {
            let new_idx = dst.write(&data, &NopHook).await?;
            tracing::info!("copied record {} -> {}", idx, new_idx);
            Ok(())
        }
    })
    .await
    .context("error copying data")?;

    Ok(())
}
