// src/main.rs
use clap::{ Parser, Subcommand };
use locker::{ DEFAULT_CHUNK_SIZE, Locker, LockerError };
use std::path::{ Path, PathBuf };
use std::process::ExitCode;

// 1. Define the Command Line Interface (CLI)
#[derive(Parser)]
#[command(name = "locker")]
#[command(about = "A deduplicating, content-addressable file locker", long_about = None)]
struct Cli {
    /// Directory that holds (or will hold) the Locker folder
    #[arg(long, global = true, env = "LOCKER_ROOT", default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new locker
    Init {
        /// Average chunk size in bytes
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },
    /// Add a file or a directory to the locker
    Add {
        /// The file or directory to store
        path: PathBuf,
        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,
        /// Local path to store a single file under (defaults to its file name)
        #[arg(long = "as")]
        name: Option<String>,
    },
    /// Write a stored file back out
    Retrieve {
        /// The path of the file inside the locker
        local_path: String,
        /// Where to write it
        target: PathBuf,
    },
    /// Stop tracking a file
    Remove {
        local_path: String,
    },
    /// List all files stored in the locker
    List,
    /// Show deduplication statistics
    Stats,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Cli::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if let LockerError::Save(failures) = &e {
                for failure in failures {
                    eprintln!("  {}: {}", failure.unit, failure.error);
                }
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: Cli) -> locker::Result<()> {
    match args.command {
        Commands::Init { chunk_size } => {
            let locker = Locker::create(&args.root, chunk_size)?;
            println!("Created locker at {}", locker.root().display());
        }
        Commands::Add { path, recursive, name } => {
            let mut locker = Locker::open(&args.root)?;
            if path.is_dir() {
                let added = locker.add_directory(&path, recursive)?;
                println!("Added {} file(s) from {}", added, path.display());
            } else {
                let local_path = match name {
                    Some(name) => name,
                    None => file_name(&path)?,
                };
                let stats = locker.add_path(&path, &local_path)?;
                println!(
                    "Added '{}' ({} bytes, {} chunks, {} bytes deduplicated)",
                    local_path,
                    stats.bytes,
                    stats.chunks,
                    stats.deduplicated_bytes()
                );
            }
            locker.save()?;
        }
        Commands::Retrieve { local_path, target } => {
            let mut locker = Locker::open(&args.root)?;
            let written = locker.retrieve(&local_path, &target)?;
            println!("Wrote '{}' to {} ({} bytes)", local_path, target.display(), written);
        }
        Commands::Remove { local_path } => {
            let mut locker = Locker::open(&args.root)?;
            locker.remove_file(&local_path)?;
            locker.save()?;
            println!("Removed '{}'", local_path);
        }
        Commands::List => {
            let locker = Locker::open(&args.root)?;
            let files = locker.list_files()?;
            if files.is_empty() {
                println!("No files found in locker.");
            } else {
                println!("Files in locker:");
                for file in files {
                    println!(" - {}", file);
                }
            }
        }
        Commands::Stats => {
            let locker = Locker::open(&args.root)?;
            let stats = locker.stats()?;
            println!("Files:         {}", stats.files);
            println!("Chunks:        {}", stats.chunks);
            println!("Stored bytes:  {}", stats.stored_bytes);
            println!("Logical bytes: {}", stats.logical_bytes);
            println!("Dedup ratio:   {:.2}", stats.dedup_ratio());
        }
    }
    Ok(())
}

fn file_name(path: &Path) -> locker::Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| LockerError::InvalidPath {
            path: path.display().to_string(),
            reason: "cannot derive a local path from it",
        })
}
