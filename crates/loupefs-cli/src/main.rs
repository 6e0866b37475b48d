use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use loupefs_core::{ExtentLocation, ItemType, Key, Volume};

#[derive(Parser, Debug)]
#[command(name = "loupefs", version, about = "LoupeFS - read-only Btrfs image inspector")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show superblock information
    Info {
        /// Path to image file
        image: PathBuf,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// List a directory
    Ls {
        image: PathBuf,
        /// Absolute path within the volume
        #[arg(default_value = "/")]
        path: String,
        #[arg(long)]
        json: bool,
    },
    /// Show inode metadata for a path
    Stat {
        image: PathBuf,
        path: String,
        #[arg(long)]
        json: bool,
    },
    /// Show the extent layout of a file
    Extents { image: PathBuf, path: String },
    /// Write a file's content to stdout
    Cat { image: PathBuf, path: String },
    /// List subvolumes
    Subvols {
        image: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Raw key search
    Find {
        image: PathBuf,
        /// Key object id
        objectid: u64,
        /// Item type wire tag (e.g. 1 = InodeItem, 108 = ExtentData)
        item_type: u8,
        /// Search the root tree instead of the FS tree
        #[arg(long)]
        root_tree: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Info { image, json } => {
            let volume = Volume::open(&image)?;
            let sb = volume.superblock();
            if json {
                let out = serde_json::json!({
                    "label": sb.label,
                    "fs_uuid": sb.fs_uuid,
                    "generation": sb.generation,
                    "total_bytes": sb.total_bytes,
                    "bytes_used": sb.bytes_used,
                    "num_devices": sb.num_devices,
                    "sector_size": sb.sector_size,
                    "node_size": sb.node_size,
                    "root": sb.root,
                    "chunk_root": sb.chunk_root,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("Label:        {}", sb.label);
                println!("UUID:         {}", sb.fs_uuid);
                println!("Generation:   {}", sb.generation);
                println!("Total bytes:  {}", sb.total_bytes);
                println!("Bytes used:   {}", sb.bytes_used);
                println!("Devices:      {}", sb.num_devices);
                println!("Sector size:  {}", sb.sector_size);
                println!("Node size:    {}", sb.node_size);
                println!("Root tree:    0x{:x}", sb.root);
                println!("Chunk tree:   0x{:x}", sb.chunk_root);
            }
        }
        Commands::Ls { image, path, json } => {
            let mut volume = Volume::open(&image)?;
            let ino = volume
                .lookup(&path)?
                .with_context(|| format!("no such path: {}", path))?;
            let entries = volume.list_dir(ino)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in entries {
                    println!("{:>8}  {:?}  {}", entry.inode, entry.kind, entry.name);
                }
            }
        }
        Commands::Stat { image, path, json } => {
            let mut volume = Volume::open(&image)?;
            let ino = volume
                .lookup(&path)?
                .with_context(|| format!("no such path: {}", path))?;
            let inode = volume
                .inode(ino)?
                .with_context(|| format!("inode {} has no InodeItem", ino))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&inode)?);
            } else {
                println!("Inode:    {}", ino);
                println!("Size:     {}", inode.size);
                println!("Mode:     0o{:o}", inode.mode);
                println!("Links:    {}", inode.nlink);
                println!("Uid/Gid:  {}/{}", inode.uid, inode.gid);
                if let Some(mtime) = inode.mtime.to_datetime() {
                    println!("Modified: {}", mtime);
                }
            }
        }
        Commands::Extents { image, path } => {
            let mut volume = Volume::open(&image)?;
            let ino = volume
                .lookup(&path)?
                .with_context(|| format!("no such path: {}", path))?;
            for fe in volume.extents(ino)? {
                match &fe.extent.location {
                    ExtentLocation::Inline(data) => {
                        println!("{:>12}  inline  {} bytes", fe.file_offset, data.len());
                    }
                    ExtentLocation::Regular {
                        disk_bytenr,
                        num_bytes,
                        ..
                    } => {
                        println!(
                            "{:>12}  regular  {} bytes at logical 0x{:x}",
                            fe.file_offset, num_bytes, disk_bytenr
                        );
                    }
                    ExtentLocation::Prealloc { num_bytes, .. } => {
                        println!("{:>12}  prealloc  {} bytes", fe.file_offset, num_bytes);
                    }
                }
            }
        }
        Commands::Cat { image, path } => {
            let mut volume = Volume::open(&image)?;
            let ino = volume
                .lookup(&path)?
                .with_context(|| format!("no such path: {}", path))?;
            let content = volume.read_file(ino)?;
            std::io::stdout().write_all(&content)?;
        }
        Commands::Subvols { image, json } => {
            let mut volume = Volume::open(&image)?;
            let subvols = volume.subvolumes()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&subvols)?);
            } else if subvols.is_empty() {
                println!("No subvolumes");
            } else {
                for sv in subvols {
                    println!("{:>8}  {}", sv.tree_id, sv.name);
                }
            }
        }
        Commands::Find {
            image,
            objectid,
            item_type,
            root_tree,
        } => {
            let mut volume = Volume::open(&image)?;
            let item_type = match ItemType::try_from(item_type) {
                Ok(t) => t,
                Err(e) => bail!("{}", e),
            };
            let key = Key::new(objectid, item_type, 0);
            let matches = if root_tree {
                volume.find_in_root_tree(&key)?
            } else {
                volume.find_in_fs_tree(&key)?
            };
            if matches.is_empty() {
                println!("No matches for {}", key);
            }
            for (found_key, item) in matches {
                println!("{}", found_key);
                println!("  {:?}", item);
            }
        }
    }

    Ok(())
}
