//! gordian: password-protected authenticated archives
//!
//! Commands:
//!   hash new                    - derive a fresh password hash, print it as hex
//!   hash verify <hex>           - check a password against a stored hash
//!   pack <archive> <paths..>    - write files and directory trees into an archive
//!   list <archive> [--json]     - show entry names, modes and sizes
//!   unpack <archive> <dir>      - verify and extract every entry
//!   config show                 - display the effective configuration
//!
//! Passwords come from GORDIAN_PASSWORD or an interactive prompt.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use gordian_archive::{ArchiveMode, ArchiveReader, ArchiveWriter};
use gordian_core::{GordianConfig, GordianError, LoggingConfig};
use gordian_crypto::{PasswordHash, SecurityGenerator};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "gordian",
    version,
    about = "Password-protected authenticated archives",
    long_about = "gordian: pack files into signed, compressed and encrypted archives and verify them on the way out"
)]
struct Cli {
    /// Path to gordian.toml configuration file
    #[arg(long, short = 'c', env = "GORDIAN_CONFIG", default_value = "gordian.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Password hash management
    Hash {
        #[command(subcommand)]
        action: HashAction,
    },

    /// Write files into a new archive
    Pack {
        /// Archive to create
        archive: PathBuf,

        /// Files or directories to add
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// raw, compress, encrypt or compress-and-encrypt (default: archive.default_mode)
        #[arg(long, short = 'm')]
        mode: Option<ArchiveMode>,
    },

    /// List archive entries
    List {
        archive: PathBuf,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Extract every entry into a directory
    Unpack {
        archive: PathBuf,

        /// Destination directory (created if missing)
        dir: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum HashAction {
    /// Derive a new password hash and print it as hex
    New,
    /// Verify a password against a hex-encoded hash
    Verify {
        /// Hash bytes as printed by `gordian hash new`
        hash: String,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = GordianConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;
    init_logging(&config.logging);

    match cli.command {
        Commands::Hash { action: HashAction::New } => cmd_hash_new(&config),
        Commands::Hash { action: HashAction::Verify { hash } } => cmd_hash_verify(&config, &hash),
        Commands::Pack { archive, paths, mode } => cmd_pack(&config, &archive, &paths, mode),
        Commands::List { archive, json } => cmd_list(&archive, json),
        Commands::Unpack { archive, dir } => cmd_unpack(&config, &archive, &dir),
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // stdout carries command output (`list --json`), logs go to stderr
    if logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

// ── Passwords ─────────────────────────────────────────────────────────────────

const PASSWORD_ENV: &str = "GORDIAN_PASSWORD";

fn read_password(prompt: &str) -> Result<SecretString> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(SecretString::from(password));
    }
    let password = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(SecretString::from(password))
}

/// Prompt twice unless the password comes from the environment.
fn read_new_password() -> Result<SecretString> {
    if std::env::var(PASSWORD_ENV).is_ok() {
        return read_password("");
    }
    let first = rpassword::prompt_password("New password: ").context("reading password")?;
    let second = rpassword::prompt_password("Repeat password: ").context("reading password")?;
    if first != second {
        anyhow::bail!("passwords do not match");
    }
    Ok(SecretString::from(first))
}

fn verify_password(generator: &SecurityGenerator, stored: &[u8]) -> Result<PasswordHash> {
    let password = read_password("Password: ")?;
    match generator.derive_password_hash(stored, password) {
        Ok(hash) => Ok(hash),
        Err(GordianError::Authentication) => anyhow::bail!("wrong password"),
        Err(e) => Err(e).context("checking password"),
    }
}

// ── `gordian hash` ────────────────────────────────────────────────────────────

fn cmd_hash_new(config: &GordianConfig) -> Result<()> {
    let generator = SecurityGenerator::new(&config.security).context("building security generator")?;
    let hash = generator
        .new_password_hash(read_new_password()?)
        .context("deriving password hash")?;
    println!("{}", hex::encode(hash.hash_bytes()));
    Ok(())
}

fn cmd_hash_verify(config: &GordianConfig, stored_hex: &str) -> Result<()> {
    let stored = hex::decode(stored_hex.trim()).context("hash is not valid hex")?;
    let generator = SecurityGenerator::new(&config.security).context("building security generator")?;
    verify_password(&generator, &stored)?;
    println!("password verified");
    Ok(())
}

// ── `gordian pack` ────────────────────────────────────────────────────────────

fn cmd_pack(
    config: &GordianConfig,
    archive: &Path,
    paths: &[PathBuf],
    mode: Option<ArchiveMode>,
) -> Result<()> {
    let mode = match mode {
        Some(mode) => mode,
        None => config
            .archive
            .default_mode
            .parse()
            .context("parsing archive.default_mode")?,
    };

    let mut files = Vec::new();
    for path in paths {
        collect_files(path, path, &mut files)?;
    }
    if files.is_empty() {
        anyhow::bail!("nothing to pack");
    }

    let out = BufWriter::new(
        File::create(archive).with_context(|| format!("creating {}", archive.display()))?,
    );
    let mut writer = if mode.encrypts() {
        let generator =
            SecurityGenerator::new(&config.security).context("building security generator")?;
        let hash = generator
            .new_password_hash(read_new_password()?)
            .context("deriving password hash")?;
        ArchiveWriter::new_secured(out, &config.archive, &generator, &hash)?
    } else {
        ArchiveWriter::new(out, &config.archive)?
    };

    for (name, path) in &files {
        let mut input =
            File::open(path).with_context(|| format!("opening {}", path.display()))?;
        writer.start_entry(name, mode)?;
        std::io::copy(&mut input, &mut writer)
            .map_err(GordianError::from_io)
            .with_context(|| format!("packing {}", path.display()))?;
        let entry = writer.close_entry()?;
        println!(
            "  {} ({} -> {} bytes)",
            entry.name(),
            entry.size(),
            entry.stored_size()
        );
    }

    let mut out = writer.finish().context("writing archive header")?;
    out.flush()?;
    println!("packed {} file(s) into {} [{}]", files.len(), archive.display(), mode);
    Ok(())
}

/// Walk `path`, naming each file by its `/`-separated path relative to
/// `root`'s parent (or its file name when `root` is a file).
fn collect_files(root: &Path, path: &Path, files: &mut Vec<(String, PathBuf)>) -> Result<()> {
    let meta = std::fs::metadata(path).with_context(|| format!("reading {}", path.display()))?;
    if meta.is_dir() {
        let mut children: Vec<PathBuf> = std::fs::read_dir(path)
            .with_context(|| format!("listing {}", path.display()))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<_>>()?;
        children.sort();
        for child in children {
            collect_files(root, &child, files)?;
        }
    } else {
        files.push((entry_name(root, path)?, path.to_path_buf()));
    }
    Ok(())
}

fn entry_name(root: &Path, path: &Path) -> Result<String> {
    let base = root.parent().unwrap_or_else(|| Path::new(""));
    let relative = path.strip_prefix(base).unwrap_or(path);
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        anyhow::bail!("cannot name entry for {}", path.display());
    }
    Ok(parts.join("/"))
}

// ── `gordian list` ────────────────────────────────────────────────────────────

fn cmd_list(archive: &Path, json: bool) -> Result<()> {
    let reader = open_archive(archive)?;
    let summaries = reader.summaries();

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    println!("{:<22} {:>12} {:>12}  name", "mode", "size", "stored");
    for summary in &summaries {
        println!(
            "{:<22} {:>12} {:>12}  {}",
            summary.mode.to_string(),
            summary.size,
            summary.stored_size,
            summary.name
        );
    }
    println!(
        "{} entr{}{}",
        summaries.len(),
        if summaries.len() == 1 { "y" } else { "ies" },
        if reader.is_encrypted() { ", password protected" } else { "" }
    );
    Ok(())
}

// ── `gordian unpack` ──────────────────────────────────────────────────────────

fn cmd_unpack(config: &GordianConfig, archive: &Path, dir: &Path) -> Result<()> {
    let mut reader = open_archive(archive)?;
    if let Some(stored) = reader.hash_bytes().map(<[u8]>::to_vec) {
        let generator =
            SecurityGenerator::new(&config.security).context("building security generator")?;
        let hash = verify_password(&generator, &stored)?;
        reader.unlock(&hash).context("unlocking archive")?;
    }

    let names: Vec<String> = reader.entries().iter().map(|e| e.name().to_string()).collect();
    for name in &names {
        let target = extract_path(dir, name)?;
        let data = reader
            .read_entry(name)
            .with_context(|| format!("verifying entry {name}"))?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(&target, &data)
            .with_context(|| format!("writing {}", target.display()))?;
        println!("  {name} ({} bytes)", data.len());
    }
    println!("unpacked {} entr{} into {}", names.len(), if names.len() == 1 { "y" } else { "ies" }, dir.display());
    Ok(())
}

/// Map an entry name below `dir`, refusing names that would escape it.
fn extract_path(dir: &Path, name: &str) -> Result<PathBuf> {
    let mut target = dir.to_path_buf();
    for part in name.split('/') {
        match part {
            "" | "." | ".." => anyhow::bail!("refusing unsafe entry name: {name}"),
            part if part.contains('\\') || Path::new(part).is_absolute() => {
                anyhow::bail!("refusing unsafe entry name: {name}")
            }
            part => target.push(part),
        }
    }
    Ok(target)
}

fn open_archive(archive: &Path) -> Result<ArchiveReader<BufReader<File>>> {
    let file = File::open(archive).with_context(|| format!("opening {}", archive.display()))?;
    ArchiveReader::open(BufReader::new(file))
        .with_context(|| format!("reading archive {}", archive.display()))
}

// ── `gordian config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &GordianConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
