use anyhow::Context;
use clap::{Parser, Subcommand};
use regionstore_common::{ChunkCoord, RegionCoord};
use regionstore_persist::{
    ChunkCodec, ChunkHeader, ChunkPayloads, ChunkRecord, RegionStore, RegionStoreManager, StoreConfig,
    ZstdCodec,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "regionstore-cli", about = "CLI tool for region store operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Store directory (overrides the config file)
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Region side length in chunks (overrides the config file)
    #[arg(long)]
    region_side: Option<i32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a chunk record from payload files
    Put {
        #[arg(allow_hyphen_values = true)]
        x: i32,
        #[arg(allow_hyphen_values = true)]
        z: i32,
        #[arg(allow_hyphen_values = true)]
        y: i32,
        /// Block payload file
        #[arg(long)]
        blocks: PathBuf,
        /// HP payload file
        #[arg(long)]
        hp: Option<PathBuf>,
        /// State payload file
        #[arg(long)]
        state: Option<PathBuf>,
        /// Biome id
        #[arg(long, default_value = "0")]
        biome: u8,
        /// Mark the chunk as still needing generation
        #[arg(long)]
        needs_generation: bool,
        /// Compress payloads with zstd before storing
        #[arg(long)]
        compress: bool,
    },
    /// Print a chunk record's header and optionally dump its payloads
    Get {
        #[arg(allow_hyphen_values = true)]
        x: i32,
        #[arg(allow_hyphen_values = true)]
        z: i32,
        #[arg(allow_hyphen_values = true)]
        y: i32,
        /// Directory to write blocks.bin, hp.bin and state.bin into
        #[arg(long)]
        out: Option<PathBuf>,
        /// Decompress payloads with zstd after loading
        #[arg(long)]
        decompress: bool,
    },
    /// List a region's free list
    Holes {
        #[arg(allow_hyphen_values = true)]
        rx: i32,
        #[arg(allow_hyphen_values = true)]
        rz: i32,
    },
    /// List a region's index entries
    Index {
        #[arg(allow_hyphen_values = true)]
        rx: i32,
        #[arg(allow_hyphen_values = true)]
        rz: i32,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let mut config = match &cli.config {
        Some(path) => StoreConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(root) = cli.root {
        config.root = root;
    }
    if let Some(side) = cli.region_side {
        config.region_side = side;
    }

    match cli.command {
        Commands::Put {
            x,
            z,
            y,
            blocks,
            hp,
            state,
            biome,
            needs_generation,
            compress,
        } => {
            let coord = ChunkCoord::new(x, z, y);
            let raw = ChunkPayloads {
                blocks: read_payload(Some(blocks.as_path()))?,
                hp: read_payload(hp.as_deref())?,
                state: read_payload(state.as_deref())?,
            };
            let header = ChunkHeader {
                biome,
                needs_generation,
                ..ChunkHeader::default()
            };

            let mut manager = RegionStoreManager::open(config)?;
            let offset = if compress {
                manager.save_encoded(&ZstdCodec::default(), coord, header, &raw)?
            } else {
                manager.save_chunk(coord, &ChunkRecord { header, payloads: raw })?
            };
            manager.close()?;
            println!("stored {coord} at offset {offset}");
        }
        Commands::Get {
            x,
            z,
            y,
            out,
            decompress,
        } => {
            let coord = ChunkCoord::new(x, z, y);
            let mut manager = RegionStoreManager::open(config)?;
            let record = manager.load_chunk(coord)?;
            manager.close()?;

            let header = record.header;
            let payloads = if decompress {
                ZstdCodec::default().decode(&record.payloads)?
            } else {
                record.payloads
            };
            println!("chunk {coord}");
            println!("  biome: {}", header.biome);
            println!("  last visited: {:02x?}", header.last_visited);
            println!("  needs generation: {}", header.needs_generation);
            println!(
                "  payloads: blocks={} hp={} state={}",
                payloads.blocks.len(),
                payloads.hp.len(),
                payloads.state.len()
            );

            if let Some(dir) = out {
                std::fs::create_dir_all(&dir)?;
                std::fs::write(dir.join("blocks.bin"), &payloads.blocks)?;
                std::fs::write(dir.join("hp.bin"), &payloads.hp)?;
                std::fs::write(dir.join("state.bin"), &payloads.state)?;
                println!("  written to {}", dir.display());
            }
        }
        Commands::Holes { rx, rz } => {
            let store = open_region(&config, RegionCoord::new(rx, rz))?;
            println!("region {} holes: {}", store.coord(), store.holes().len());
            for hole in store.holes() {
                if hole.infinite {
                    println!("  {:>12}  open end", hole.position);
                } else {
                    println!("  {:>12}  {} bytes", hole.position, hole.size);
                }
            }
            println!("  free bytes below open end: {}", store.allocator().free_bytes());
        }
        Commands::Index { rx, rz } => {
            let store = open_region(&config, RegionCoord::new(rx, rz))?;
            println!("region {} chunks: {}", store.coord(), store.index().len());
            for (key, offset) in store.index() {
                println!("  key {key:>8}  offset {offset}");
            }
        }
    }

    Ok(())
}

fn read_payload(path: Option<&Path>) -> anyhow::Result<Vec<u8>> {
    match path {
        Some(path) => std::fs::read(path).with_context(|| format!("reading {}", path.display())),
        None => Ok(Vec::new()),
    }
}

/// Open a region for inspection without creating files that are not there.
fn open_region(config: &StoreConfig, coord: RegionCoord) -> anyhow::Result<RegionStore> {
    config.validate()?;
    for path in RegionStore::paths(&config.root, coord) {
        anyhow::ensure!(path.is_file(), "region {coord} has no {}", path.display());
    }
    Ok(RegionStore::open(config, coord)?)
}
