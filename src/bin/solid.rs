//! Solid archive CLI
//!
//! Packs directories and ZIP/JAR files into a session archive and queries it.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use solid_archive::{ArchiveBuilder, ArchiveLoader, ResourceLoader};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "solid")]
#[command(about = "Pack resource roots into a solid archive and look entries up")]
struct Args {
    /// TOML file with archive settings
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List entry names and chain lengths
    List {
        roots: Vec<PathBuf>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Write an entry's bytes to stdout
    Cat {
        roots: Vec<PathBuf>,

        /// Entry name
        #[arg(short = 'n', long)]
        name: String,

        /// Chain index for duplicate names
        #[arg(short = 'i', long, default_value = "0")]
        index: usize,
    },

    /// Locate a class by binary name
    Class {
        /// Binary name, e.g. org.example.Theme
        binary_name: String,

        #[arg(required = true)]
        roots: Vec<PathBuf>,
    },
}

#[derive(Serialize)]
struct Listing {
    name: String,
    entries: usize,
    sizes: Vec<u64>,
}

fn build_loader(config: Option<&PathBuf>, roots: &[PathBuf]) -> anyhow::Result<ArchiveLoader> {
    let mut builder = ArchiveBuilder::new();
    if let Some(path) = config {
        builder = builder
            .config_file(path)
            .with_context(|| format!("loading config {:?}", path))?;
    }
    for root in roots {
        builder = builder.root(root);
    }
    Ok(builder.build_loader()?)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match &args.command {
        Command::List { roots, json } => {
            let loader = build_loader(args.config.as_ref(), roots)?;
            let archive = loader.archive();

            let listing: Vec<Listing> = archive
                .names()
                .into_iter()
                .map(|name| {
                    let chain = archive.chain(&name);
                    Listing {
                        entries: chain.len(),
                        sizes: chain.iter().map(|e| e.size()).collect(),
                        name,
                    }
                })
                .collect();

            if *json {
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                for item in &listing {
                    println!("{:>10}  {} (x{})", item.sizes[0], item.name, item.entries);
                }
            }
            loader.close()?;
        }

        Command::Cat { roots, name, index } => {
            let loader = build_loader(args.config.as_ref(), roots)?;
            let archive = loader.archive();

            let Some(entry) = archive.entry_at(name, *index) else {
                bail!("no entry {} #{}", name, index);
            };
            let bytes = archive.read_entry(&entry)?;
            std::io::stdout().lock().write_all(&bytes)?;
            loader.close()?;
        }

        Command::Class { binary_name, roots } => {
            let loader = build_loader(args.config.as_ref(), roots)?;
            let class = loader.find_class(binary_name)?;
            info!("Resolved {} from {}", class.binary_name, class.resource_name);
            println!("{} {} bytes", class.url, class.bytes.len());
            loader.close()?;
        }
    }

    Ok(())
}
