// SPDX-License-Identifier: MIT

use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use anyhow::Context;
use clap::ValueEnum;
use colored::Colorize;
use time::OffsetDateTime;
use umsfs::fat32::*;
use umsfs::stream::{ChunkCache, SharedFile};
use umsfs::{join_paths, split_path};

use crate::config::InspectConfig;
use crate::utils::{byte_progress, pretty_bytes, sep_u64};
use crate::volume::Volume;
use crate::{log_info, log_verbose};

const COPY_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheMode {
    /// Aging cache used for sequential playback.
    Playback,
    /// Size-capped cache used for tag and cover-art reads.
    Metadata,
}

pub fn info(vol: &Volume) -> anyhow::Result<()> {
    println!("{}", "Partitions".bold());
    for (i, p) in vol.partitions.iter().enumerate() {
        let marker = if i == vol.index { "*".green() } else { " ".normal() };
        println!(
            " {marker} #{i}  {:<24} start {:>10}  blocks {:>12}  {}",
            p.kind.to_string(),
            p.start_block,
            p.num_blocks,
            pretty_bytes(p.num_blocks * vol.block_size as u64)
        );
    }

    let mut fs = vol.fs.borrow_mut();
    let label = fs.volume_label()?;
    let free = fs.free_space()?;
    let meta = fs.meta().clone();
    println!("{}", "Volume".bold());
    println!("   label         {}", if label.is_empty() { "(none)".dimmed() } else { label.normal() });
    println!("   cluster size  {} bytes", sep_u64(meta.bytes_per_cluster as u64));
    println!("   clusters      {}", sep_u64(meta.cluster_count as u64));
    println!("   capacity      {}", pretty_bytes(fs.capacity()));
    println!("   free          {}", pretty_bytes(free));
    Ok(())
}

fn describe(node: &Fat32Node) -> String {
    let m = node.modified;
    let stamp = format!(
        "{:04}-{:02}-{:02} {:02}:{:02}",
        m.year(),
        u8::from(m.month()),
        m.day(),
        m.hour(),
        m.minute()
    );
    if node.is_dir() {
        format!("d {:>12}  {stamp}  {}/", "-", node.name.blue().bold())
    } else {
        format!("- {:>12}  {stamp}  {}", sep_u64(node.length), node.name)
    }
}

pub fn ls(vol: &Volume, path: &str) -> anyhow::Result<()> {
    let node = vol.lookup(path)?;
    if !node.is_dir() {
        println!("{}", describe(&node));
        return Ok(());
    }
    for child in vol.children(&node)? {
        println!("{}", describe(&child));
    }
    Ok(())
}

pub fn tree(vol: &Volume, path: &str) -> anyhow::Result<()> {
    let node = vol.lookup(path)?;
    println!("{}", node.path.blue().bold());
    let (dirs, files) = tree_level(vol, &node, "")?;
    log_info!("{dirs} directories, {files} files");
    Ok(())
}

fn tree_level(vol: &Volume, dir: &Fat32Node, indent: &str) -> anyhow::Result<(usize, usize)> {
    let children = vol.children(dir)?;
    let (mut dirs, mut files) = (0, 0);
    for (i, child) in children.iter().enumerate() {
        let last = i + 1 == children.len();
        let (branch, next) = if last { ("└── ", "    ") } else { ("├── ", "│   ") };
        if child.is_dir() {
            println!("{indent}{branch}{}", child.name.blue().bold());
            let (d, f) = tree_level(vol, child, &format!("{indent}{next}"))?;
            dirs += d + 1;
            files += f;
        } else {
            println!("{indent}{branch}{} ({})", child.name, pretty_bytes(child.length));
            files += 1;
        }
    }
    Ok((dirs, files))
}

pub fn cat(vol: &Volume, path: &str, cached: Option<CacheMode>, cfg: &InspectConfig) -> anyhow::Result<()> {
    let node = vol.lookup(path)?;
    anyhow::ensure!(!node.is_dir(), "{path}: is a directory");

    let mut out = std::io::stdout().lock();
    let mut buf = vec![0u8; cfg.read_size];
    let mut pos = 0u64;
    let mut reads = 0usize;

    match cached {
        None => {
            let mut fs = vol.fs.borrow_mut();
            let mut file = fs.open(&node)?;
            loop {
                let n = fs.read(&mut file, pos, &mut buf)?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n])?;
                pos += n as u64;
                reads += 1;
            }
        }
        Some(mode) => {
            let chunk = match cfg.chunk_size {
                Some(c) => c,
                None => vol.fs.borrow().chunk_size(),
            };
            let policy = match mode {
                CacheMode::Playback => cfg.cache.playback(),
                CacheMode::Metadata => cfg.cache.metadata(),
            };
            let mut stream = ChunkCache::new(SharedFile::open(&vol.fs, &node)?, chunk, policy);
            while let Some(n) = stream.read(pos, &mut buf).bytes() {
                out.write_all(&buf[..n])?;
                pos += n as u64;
                reads += 1;
            }
            anyhow::ensure!(pos == node.length, "{path}: stream ended at {pos} of {} bytes", node.length);
            log_verbose!("{policy:?} with {chunk}-byte chunks, {} bytes cached at end", stream.cached_bytes());
        }
    }
    out.flush()?;
    log_verbose!("{reads} reads of up to {} bytes, {pos} bytes total", cfg.read_size);
    Ok(())
}

/// Splits `path` into its parent directory and final name.
fn parent_and_name(vol: &Volume, path: &str) -> anyhow::Result<(Fat32Node, String)> {
    let parts = split_path(path);
    let (name, dirs) = parts.split_last().context("path names no entry")?;
    let parent = vol.lookup(&format!("/{}", dirs.join("/")))?;
    anyhow::ensure!(parent.is_dir(), "{}: not a directory", parent.path);
    Ok((parent, (*name).to_owned()))
}

pub fn put(vol: &Volume, src: &Path, dest: &str, force: bool) -> anyhow::Result<()> {
    let mut input = fs::File::open(src).with_context(|| format!("cannot open {}", src.display()))?;
    let total = input.metadata()?.len();

    let target = match vol.fs.borrow_mut().search(dest)? {
        Some(dir) if dir.is_dir() => {
            let name = src
                .file_name()
                .and_then(|n| n.to_str())
                .context("source has no usable file name")?;
            join_paths(&dir.path, name)
        }
        _ => dest.to_owned(),
    };
    let (parent, name) = parent_and_name(vol, &target)?;

    let mut fs = vol.fs.borrow_mut();
    if let Some(existing) = fs.search(&target)? {
        anyhow::ensure!(force, "{target}: already exists (use --force)");
        anyhow::ensure!(!existing.is_dir(), "{target}: is a directory");
        fs.delete(&existing)?;
    }
    let node = fs.create_file(&parent, &name)?;
    let mut file = fs.open(&node)?;

    let pb = byte_progress(total, &name);
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut pos = 0u64;
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        fs.write(&mut file, pos, &buf[..n])?;
        pos += n as u64;
        pb.inc(n as u64);
    }
    pb.finish_and_clear();
    fs.close_file(file)?;
    log_info!("{} -> {target} ({})", src.display(), pretty_bytes(pos));
    Ok(())
}

pub fn mkdir(vol: &Volume, path: &str) -> anyhow::Result<()> {
    let mut fs = vol.fs.borrow_mut();
    let mut dir = fs.root();
    for part in split_path(path) {
        let existing = fs.list_files(&dir)?.into_iter().find(|n| n.name.eq_ignore_ascii_case(part));
        dir = match existing {
            Some(node) => {
                anyhow::ensure!(node.is_dir(), "{}: not a directory", node.path);
                node
            }
            None => {
                log_verbose!("creating {}", join_paths(&dir.path, part));
                fs.create_directory(&dir, part)?
            }
        };
    }
    Ok(())
}

pub fn rm(vol: &Volume, path: &str, recursive: bool) -> anyhow::Result<()> {
    let node = vol.lookup(path)?;
    anyhow::ensure!(!node.is_root(), "refusing to remove the root directory");
    remove(vol, &node, recursive)
}

fn remove(vol: &Volume, node: &Fat32Node, recursive: bool) -> anyhow::Result<()> {
    if node.is_dir() && recursive {
        for child in vol.children(node)? {
            remove(vol, &child, true)?;
        }
    }
    vol.fs
        .borrow_mut()
        .delete(node)
        .with_context(|| format!("cannot remove {}", node.path))?;
    log_verbose!("removed {}", node.path);
    Ok(())
}

/// Creates an unpartitioned FAT32 image of `size_mib` MiB.
pub fn mkfs(path: &Path, size_mib: u64, label: Option<&str>, cluster: Option<u32>) -> anyhow::Result<()> {
    let size = size_mib.checked_mul(1 << 20).context("size too large")?;
    let meta = match cluster {
        Some(bpc) => {
            let volume_id = OffsetDateTime::now_utc().unix_timestamp() as u32;
            Fat32Meta::new_custom(size, label, volume_id, 512, bpc)?
        }
        None => Fat32Meta::new(size, label)?,
    };

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("cannot create {}", path.display()))?;
    file.set_len(size)?;

    let mut io = StdBlockIO::new(&mut file);
    Fat32Formatter::new(&mut io, &meta)
        .format(false)
        .map_err(FsError::from)?;
    io.flush()?;
    log_info!(
        "{}: {} FAT32, {} clusters of {} bytes",
        path.display(),
        pretty_bytes(size),
        sep_u64(meta.cluster_count as u64),
        meta.bytes_per_cluster
    );
    Ok(())
}
