use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tfs::{FsConfig, Latency, OpenFlag, Tfs};

#[derive(Parser)]
struct Args {
    /// Host files to copy into the filesystem
    #[arg(required = true)]
    files: Vec<PathBuf>,
    /// Directory the files are copied back out to
    #[arg(long)]
    out_dir: PathBuf,
    /// Number of inodes, including the root directory
    #[arg(long, default_value_t = FsConfig::DEFAULT_INODE_TABLE_SIZE)]
    inodes: usize,
    /// Number of data blocks
    #[arg(long, default_value_t = FsConfig::DEFAULT_DATA_BLOCKS)]
    blocks: usize,
    /// Number of files that may be open at once
    #[arg(long, default_value_t = FsConfig::DEFAULT_MAX_OPEN_FILES)]
    open_files: usize,
    /// Busy-loop iterations simulated on every access
    #[arg(long, default_value_t = FsConfig::DEFAULT_DELAY_ITERATIONS, conflicts_with = "sleep_us")]
    spin: u32,
    /// Microseconds slept on every access, instead of spinning
    #[arg(long)]
    sleep_us: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let latency = match args.sleep_us {
        Some(micros) => Latency::Sleep(Duration::from_micros(micros)),
        None if args.spin == 0 => Latency::None,
        None => Latency::Spin {
            iterations: args.spin,
        },
    };

    let tfs = Tfs::init(FsConfig {
        inode_table_size: args.inodes,
        data_blocks: args.blocks,
        max_open_files: args.open_files,
        latency,
    })
    .context("unable to initialize the filesystem")?;

    let names = args
        .files
        .iter()
        .map(|path| internal_path(path))
        .collect::<Result<Vec<_>>>()?;

    thread::scope(|s| {
        let imports: Vec<_> = args
            .files
            .iter()
            .zip(&names)
            .map(|(source, name)| {
                let tfs = &tfs;
                s.spawn(move || import(tfs, source, name))
            })
            .collect();

        imports.into_iter().try_for_each(|import| match import.join() {
            Ok(result) => result,
            Err(_) => bail!("import thread panicked"),
        })
    })?;

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("unable to create {}", args.out_dir.display()))?;

    for name in &names {
        let dest = args.out_dir.join(&name[1..]);
        let copied = tfs
            .copy_to_external_fs(name, &dest)
            .with_context(|| format!("unable to copy {name} out"))?;

        println!("{name}: {copied} bytes -> {}", dest.display());
    }

    tfs.check().context("filesystem check failed")?;

    println!(
        "{} files, {} free data blocks",
        tfs.read_directory()?.len(),
        tfs.free_block_count()?
    );

    tfs.destroy();
    Ok(())
}

fn internal_path(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("{} has no usable file name", path.display()))?;

    Ok(format!("/{name}"))
}

fn import(tfs: &Tfs, source: &Path, name: &str) -> Result<()> {
    let data =
        fs::read(source).with_context(|| format!("unable to read {}", source.display()))?;

    let handle = tfs
        .open(name, OpenFlag::Create | OpenFlag::Truncate)
        .with_context(|| format!("unable to open {name}"))?;

    let written = tfs.write(handle, &data);
    tfs.close(handle)?;

    let written = written.with_context(|| format!("unable to write {name}"))?;
    if written < data.len() {
        bail!("{name}: only {written} of {} bytes fit", data.len());
    }

    info!("imported {} as {name} ({written} bytes)", source.display());
    Ok(())
}
