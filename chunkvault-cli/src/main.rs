use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chunkvault_core::vault::{SyncStatus, Vault};
use chunkvault_core::{CancelToken, FileId, OwnerId, VaultConfig};

#[derive(Parser)]
#[command(name = "chunkvault", version, about = "Chunked file storage with backup-tier recovery")]
struct Cli {
    /// JSON config file; flags and env vars override its values
    #[arg(long, global = true, env = "CHUNKVAULT_CONFIG")]
    config: Option<PathBuf>,
    /// Primary storage root
    #[arg(long, global = true, env = "CHUNKVAULT_STORAGE")]
    storage: Option<PathBuf>,
    /// Backup root; omit to run without redundancy
    #[arg(long, global = true, env = "CHUNKVAULT_BACKUP")]
    backup: Option<PathBuf>,
    /// Chunk size in bytes for new uploads
    #[arg(long, global = true, env = "CHUNKVAULT_CHUNK_SIZE")]
    chunk_size: Option<usize>,
    #[arg(long, global = true, env = "CHUNKVAULT_OWNER", default_value = "default")]
    owner: String,
    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, global = true, env = "CHUNKVAULT_LOG_LEVEL", default_value = "warn")]
    log_level: String,
    #[arg(long, global = true, env = "CHUNKVAULT_LOG_JSON")]
    log_json: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Store a file; prints its id
    Put {
        path: PathBuf,
        /// Name to record instead of the file's own name
        #[arg(long)]
        name: Option<String>,
    },
    /// Reconstruct a file, restoring lost chunks from backup
    Get {
        id: String,
        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete a file from both tiers
    Rm { id: String },
    /// Mirror a stored file to the backup tier
    Sync { id: String },
    /// List the owner's files, newest first
    Ls,
    /// Storage usage of the owner on both tiers
    Usage,
    /// Check chunk presence and checksum without repairing
    Verify { id: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let cfg = resolve_config(&cli)?;
    let vault = Vault::open(&cfg)
        .with_context(|| format!("open vault at {}", cfg.storage_path.display()))?;
    let owner = OwnerId::new(&cli.owner).with_context(|| format!("owner {:?}", cli.owner))?;

    match &cli.cmd {
        Cmd::Put { path, name } => put(&vault, &owner, path, name.as_deref(), cli.json)?,
        Cmd::Get { id, output } => get(&vault, &owner, &parse_id(id)?, output.as_deref())?,
        Cmd::Rm { id } => {
            let out = vault.delete(&owner, &parse_id(id)?)?;
            if cli.json {
                print_json(&out)?;
            } else if !out.backup_cleaned || !out.primary_failed.is_empty() {
                eprintln!("deleted {} (cleanup incomplete, see log)", out.file_id);
            }
        }
        Cmd::Sync { id } => {
            let record = vault.sync(&owner, &parse_id(id)?)?;
            if cli.json {
                print_json(&record)?;
            } else {
                println!("{}", record.backup_locator.unwrap_or_default());
            }
        }
        Cmd::Ls => {
            let records = vault.list(&owner)?;
            if cli.json {
                print_json(&records)?;
            } else {
                for r in records {
                    let synced = if r.synced { "synced" } else { "local" };
                    println!("{}\t{}\t{}\t{}", r.id, r.size, synced, r.original_name);
                }
            }
        }
        Cmd::Usage => {
            let usage = vault.usage(&owner)?;
            if cli.json {
                print_json(&usage)?;
            } else {
                println!("files: {}", usage.file_count);
                println!(
                    "primary: {} chunks, {} bytes",
                    usage.primary.chunk_count, usage.primary.total_bytes
                );
                match usage.backup {
                    Some(b) => println!(
                        "backup: {} files, {} chunks, {} bytes",
                        b.file_count, b.chunk_count, b.total_bytes
                    ),
                    None => println!("backup: disabled"),
                }
            }
        }
        Cmd::Verify { id } => {
            let report = vault.verify(&owner, &parse_id(id)?)?;
            if cli.json {
                print_json(&report)?;
            }
            if !report.is_healthy() {
                bail!(
                    "file {} damaged: {} chunk(s) missing, {} recoverable from backup, checksum {}",
                    report.file_id,
                    report.missing_primary.len(),
                    report.recoverable.len(),
                    match report.checksum_ok {
                        Some(true) => "ok",
                        Some(false) => "mismatch",
                        None => "unchecked",
                    }
                );
            }
            if !cli.json {
                println!("OK");
            }
        }
    }
    Ok(())
}

fn init_logging(cli: &Cli) {
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(io::stderr))
            .init();
    }
}

fn resolve_config(cli: &Cli) -> Result<VaultConfig> {
    let mut cfg = match &cli.config {
        Some(p) => VaultConfig::from_file(p).with_context(|| format!("load {}", p.display()))?,
        None => VaultConfig::default(),
    };
    if let Some(p) = &cli.storage {
        cfg.storage_path = p.clone();
    }
    if let Some(p) = &cli.backup {
        cfg.backup_path = Some(p.clone());
    }
    if let Some(n) = cli.chunk_size {
        cfg.chunk_size = n;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn parse_id(s: &str) -> Result<FileId> {
    FileId::parse(s).with_context(|| format!("bad file id {s:?}"))
}

fn print_json<T: serde::Serialize>(v: &T) -> Result<()> {
    let mut out = io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, v)?;
    writeln!(out)?;
    Ok(())
}

fn put(vault: &Vault, owner: &OwnerId, path: &Path, name: Option<&str>, json: bool) -> Result<()> {
    let name = match name {
        Some(n) => n.to_string(),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", path.display()))?,
    };
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let report = vault
        .upload(owner, &name, BufReader::new(f))
        .with_context(|| format!("store {}", path.display()))?;
    if json {
        print_json(&report)?;
    } else {
        println!("{}", report.file_id);
        if let SyncStatus::Unavailable { reason } = &report.sync {
            eprintln!("warning: stored without backup: {reason}");
        }
    }
    Ok(())
}

fn get(vault: &Vault, owner: &OwnerId, id: &FileId, output: Option<&Path>) -> Result<()> {
    let bytes = vault.download(owner, id, &CancelToken::new())?;
    match output {
        Some(p) => std::fs::write(p, &bytes).with_context(|| format!("write {}", p.display()))?,
        None => {
            let mut out = io::stdout().lock();
            out.write_all(&bytes)?;
            out.flush()?;
        }
    }
    Ok(())
}
