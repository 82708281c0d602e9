// SPDX-License-Identifier: MIT

mod commands;
mod config;
mod utils;
mod volume;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::CacheMode;
use crate::config::InspectConfig;
use crate::utils::{LogLevel, init_logger};
use crate::volume::{Volume, open_image};

#[derive(Parser)]
#[command(name = "umsinspect", version, about = "Inspect FAT32 disk images through the USB mass storage stack", long_about = None)]
struct Cli {
    /// Disk image (raw dump of a LUN)
    image: PathBuf,

    /// Settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Partition index; defaults to the first that may hold FAT32
    #[arg(short, long)]
    partition: Option<usize>,

    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the partition table and volume summary
    Info,
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print a directory tree
    Tree {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Write a file to stdout
    Cat {
        path: String,
        /// Read through the streaming cache
        #[arg(long, value_enum)]
        cached: Option<CacheMode>,
    },
    /// Copy a host file into the image
    Put {
        src: PathBuf,
        dest: String,
        /// Replace an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Create a directory and any missing parents
    Mkdir { path: String },
    /// Remove a file or directory
    Rm {
        path: String,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Create an unpartitioned FAT32 image
    Mkfs {
        /// Image size in MiB
        #[arg(short, long)]
        size: u64,
        #[arg(short, long)]
        label: Option<String>,
        /// Cluster size in bytes
        #[arg(long)]
        cluster: Option<u32>,
    },
}

impl Commands {
    fn writes(&self) -> bool {
        matches!(self, Commands::Put { .. } | Commands::Mkdir { .. } | Commands::Rm { .. })
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger(if cli.quiet {
        LogLevel::Quiet
    } else if cli.verbose {
        LogLevel::Verbose
    } else {
        LogLevel::Normal
    });

    let cfg = match &cli.config {
        Some(path) => InspectConfig::from_file(path)?,
        None => InspectConfig::default(),
    };

    if let Commands::Mkfs { size, label, cluster } = &cli.command {
        return commands::mkfs(&cli.image, *size, label.as_deref(), *cluster);
    }

    let mut file = open_image(&cli.image, cli.command.writes())?;
    let vol = Volume::mount(&mut file, cfg.block_size, cli.partition)?;

    let result = match &cli.command {
        Commands::Info => commands::info(&vol),
        Commands::Ls { path } => commands::ls(&vol, path),
        Commands::Tree { path } => commands::tree(&vol, path),
        Commands::Cat { path, cached } => commands::cat(&vol, path, *cached, &cfg),
        Commands::Put { src, dest, force } => commands::put(&vol, src, dest, *force),
        Commands::Mkdir { path } => commands::mkdir(&vol, path),
        Commands::Rm { path, recursive } => commands::rm(&vol, path, *recursive),
        Commands::Mkfs { .. } => Ok(()),
    };
    let closed = vol.close();
    result?;
    closed
}
