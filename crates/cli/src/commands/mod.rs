//! CLI commands module.

use anyhow::{bail, Context, Result};
use authchain_consensus::PoAConfig;
use authchain_core::{is_digest_hex, Ed25519Key};
use clap::Subcommand;
use std::fs;
use std::path::Path;

mod demo;
mod inspect;
mod keygen;

#[derive(Subcommand)]
pub enum Commands {
    /// Generate validator keys and a default config
    Keygen(keygen::KeygenArgs),
    /// Run a full propose/sign/commit round and persist the chain
    Demo(demo::DemoArgs),
    /// Show a persisted chain
    Inspect(inspect::InspectArgs),
}

pub fn run(cmd: Commands, config: Option<&Path>) -> Result<()> {
    match cmd {
        Commands::Keygen(args) => keygen::run(args, config),
        Commands::Demo(args) => demo::run(args, config),
        Commands::Inspect(args) => inspect::run(args),
    }
}

/// Read the consensus config from `path`, else `<data_dir>/config.json`,
/// else fall back to the defaults.
fn load_config(path: Option<&Path>, data_dir: &Path) -> Result<PoAConfig> {
    let default_file = data_dir.join("config.json");
    let file = match path {
        Some(p) => p,
        None if default_file.exists() => default_file.as_path(),
        None => return Ok(PoAConfig::default()),
    };

    let contents = fs::read_to_string(file)
        .with_context(|| format!("Failed to read config: {}", file.display()))?;
    let config: PoAConfig = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid config: {}", file.display()))?;
    config.validate().context("Invalid consensus config")?;
    Ok(config)
}

/// First 16 hex digits of a digest; anything else is shown whole.
fn short_hash(hash: &str) -> &str {
    if is_digest_hex(hash) {
        &hash[..16]
    } else {
        hash
    }
}

/// Load a key file written by `keygen`.
fn load_key(key_file: &Path) -> Result<Ed25519Key> {
    let contents = fs::read_to_string(key_file)
        .with_context(|| format!("Failed to read key file: {}", key_file.display()))?;
    let json: serde_json::Value = serde_json::from_str(&contents)?;

    let private_key_hex = json
        .get("private_key")
        .and_then(|v| v.as_str())
        .context("Missing private_key in key file")?;
    let private_key = hex::decode(private_key_hex).context("Invalid private key hex")?;
    if private_key.len() != 32 {
        bail!(
            "Invalid private key length: expected 32 bytes, got {}",
            private_key.len()
        );
    }

    Ed25519Key::from_private_key(&private_key).context("Failed to load key")
}

/// All keys in `<data_dir>/keys`, sorted by file name.
fn load_keys(data_dir: &Path) -> Result<Vec<(String, Ed25519Key)>> {
    let keys_dir = data_dir.join("keys");
    if !keys_dir.exists() {
        return Ok(Vec::new());
    }

    let mut files: Vec<_> = fs::read_dir(&keys_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    files
        .iter()
        .map(|path| {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok((name, load_key(path)?))
        })
        .collect()
}
