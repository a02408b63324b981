use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use dwarfs::config::ImageOffset;
use dwarfs::metadata::frozen::InodeKind;
use dwarfs::util::glob;
use dwarfs::{Filesystem, ReaderOptions};

#[derive(Parser)]
#[command(name = "dwarfsextract", version, about = "Extract and inspect DwarFS read-only filesystem images")]
struct Cli {
    /// Path to the filesystem image.
    #[arg(short = 'i', long)]
    input: PathBuf,

    /// Directory to extract into. Without this, use --list/--info/--cat instead.
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// List the directory tree instead of extracting.
    #[arg(long)]
    list: bool,

    /// Print image/section/metadata summary instead of extracting.
    #[arg(long)]
    info: bool,

    /// Stream one file's contents to stdout instead of extracting.
    #[arg(long, value_name = "PATH")]
    cat: Option<String>,

    /// Only operate on paths matching this shell-style glob.
    #[arg(long)]
    pattern: Option<String>,

    /// `auto` (scan for the magic) or a fixed byte offset.
    #[arg(long, default_value = "auto")]
    image_offset: String,

    /// Skip per-block checksum verification (dangerous).
    #[arg(long)]
    disable_integrity_check: bool,

    /// Decompression worker thread count.
    #[arg(long)]
    num_workers: Option<usize>,

    /// Block cache byte budget.
    #[arg(long)]
    cache_size: Option<u64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(feature = "cli-logging")]
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let image_offset = match cli.image_offset.as_str() {
        "auto" => ImageOffset::Auto,
        n => ImageOffset::Fixed(n.parse().map_err(|_| "--image-offset must be 'auto' or a byte offset")?),
    };

    let mut options = ReaderOptions::default();
    options.image_offset = image_offset;
    options.disable_integrity_check = cli.disable_integrity_check;
    if let Some(n) = cli.num_workers {
        options.num_workers = n.max(1);
    }
    if let Some(bytes) = cli.cache_size {
        options.max_cache_bytes = bytes;
    }

    tracing::debug!(input = %cli.input.display(), "opening image");
    let fs = Filesystem::open(&cli.input, &options)?;

    if cli.info {
        print_info(&fs);
        return Ok(());
    }

    if let Some(path) = &cli.cat {
        return cat_file(&fs, path);
    }

    if cli.list {
        walk(&fs, fs.metadata().root_inode(), &PathBuf::new(), &cli.pattern, &mut |path, _inode| {
            println!("{}", path.display());
            Ok(())
        })?;
        return Ok(());
    }

    if let Some(output) = &cli.output {
        fs::create_dir_all(output)?;
        let mut count = 0usize;
        walk(&fs, fs.metadata().root_inode(), &PathBuf::new(), &cli.pattern, &mut |path, inode| {
            extract_one(&fs, inode, output, path)?;
            count += 1;
            Ok(())
        })?;
        println!("Extracted {count} entries to {}", output.display());
        return Ok(());
    }

    eprintln!("nothing to do: pass --list, --info, --cat <path>, or -o <dir>");
    Ok(())
}

fn print_info(fs: &Filesystem) {
    let image = fs.image();
    let (major, minor) = image.version();
    println!("── DwarFS image ─────────────────────────────────────────");
    println!("  Path             {}", "(opened)");
    println!("  Format version   {major}.{minor}");
    println!("  Sections         {}", image.sections().len());
    println!("  Has section index {}", image.has_index());
    println!("  Filesystem size  {} B", image.filesystem_size());
    println!("  Inodes           {}", fs.metadata().inode_count());
    let statvfs = fs.statvfs();
    println!("  Blocks           {} × {} B", statvfs.total_blocks, statvfs.block_size);
    if let Some(json) = fs.metadata().category_metadata_json() {
        println!("  Category metadata present ({} B)", json.len());
    }
}

fn cat_file(fs: &Filesystem, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let inode = fs
        .find_path(path)?
        .ok_or_else(|| format!("no such path in image: {path}"))?;
    let handle = fs.open(inode)?;
    let attr = fs.getattr(handle)?;
    let mut remaining = attr.size;
    let mut offset = 0u64;
    let mut stdout = io::stdout().lock();
    const CHUNK: usize = 1 << 20;
    while remaining > 0 {
        let take = remaining.min(CHUNK as u64) as usize;
        let data = fs.read(handle, offset, take)?;
        if data.is_empty() {
            break;
        }
        stdout.write_all(&data)?;
        offset += data.len() as u64;
        remaining -= data.len() as u64;
    }
    Ok(())
}

/// Depth-first walk over the directory tree, invoking `visit` with each
/// entry's relative path (files and directories alike, root excluded) and
/// inode number, filtered by `pattern` when given.
fn walk(
    fs: &Filesystem,
    inode: u32,
    prefix: &Path,
    pattern: &Option<String>,
    visit: &mut dyn FnMut(&Path, u32) -> Result<(), Box<dyn std::error::Error>>,
) -> Result<(), Box<dyn std::error::Error>> {
    for (name, child) in fs.readdir(inode)? {
        if name == "." || name == ".." {
            continue;
        }
        let child_path = prefix.join(&name);
        let matched = pattern
            .as_ref()
            .map(|p| glob::matches(p, &child_path.to_string_lossy()))
            .unwrap_or(true);

        match fs.metadata().kind(child)? {
            InodeKind::Directory => {
                if matched {
                    visit(&child_path, child)?;
                }
                walk(fs, child, &child_path, pattern, visit)?;
            }
            _ => {
                if matched {
                    visit(&child_path, child)?;
                }
            }
        }
    }
    Ok(())
}

fn extract_one(fs: &Filesystem, inode: u32, output_dir: &Path, rel_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let dest = output_dir.join(rel_path);
    let attr = fs.getattr(inode)?;

    match attr.kind {
        InodeKind::Directory => {
            fs::create_dir_all(&dest)?;
        }
        InodeKind::Symlink => {
            let target = fs.readlink(inode)?;
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            #[cfg(unix)]
            std::os::unix::fs::symlink(target, &dest)?;
            #[cfg(not(unix))]
            fs::write(&dest, target)?;
        }
        InodeKind::Regular => {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            let handle = fs.open(inode)?;
            let mut file = fs::File::create(&dest)?;
            let mut offset = 0u64;
            const CHUNK: usize = 1 << 20;
            loop {
                let data = fs.read(handle, offset, CHUNK)?;
                if data.is_empty() {
                    break;
                }
                file.write_all(&data)?;
                offset += data.len() as u64;
            }
        }
        InodeKind::Device => {
            // Device nodes need privileged mknod; this extractor just records
            // their presence rather than attempting to recreate them.
            eprintln!("skipping device node: {}", rel_path.display());
            return Ok(());
        }
    }

    restore_attrs(&dest, attr.mode);
    Ok(())
}

#[cfg(unix)]
fn restore_attrs(dest: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(dest, fs::Permissions::from_mode(mode & 0o7777));
}

#[cfg(not(unix))]
fn restore_attrs(_dest: &Path, _mode: u32) {}
