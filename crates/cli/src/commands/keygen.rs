//! Key generation command.

use anyhow::{Context, Result};
use authchain_core::{Ed25519Key, SigningKey};
use clap::Args;
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct KeygenArgs {
    /// Directory to store keys and config
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Number of validator keys to generate
    #[arg(short, long, default_value = "3")]
    validators: usize,
}

pub fn run(args: KeygenArgs, config: Option<&Path>) -> Result<()> {
    println!("{}", "Generating validator keys...".bold().cyan());
    println!();

    fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", args.data_dir))?;

    for (file, key) in write_keys(&args.data_dir, args.validators)? {
        println!(
            "{}  {} saved to {}",
            "✓".green().bold(),
            key.id().bright_yellow(),
            file.display().to_string().bright_black()
        );
    }

    let config = super::load_config(config, &args.data_dir)?;
    let config_file = args.data_dir.join("config.json");
    fs::write(&config_file, serde_json::to_string_pretty(&config)?)?;
    println!(
        "{}  Saved config to: {}",
        "✓".green().bold(),
        config_file.display().to_string().bright_black()
    );

    println!();
    println!(
        "Next: run {} to drive blocks through consensus",
        "authchain demo".bright_cyan()
    );
    Ok(())
}

/// Generate `count` keys into `<data_dir>/keys/validator_<i>.json`.
pub(super) fn write_keys(data_dir: &Path, count: usize) -> Result<Vec<(PathBuf, Ed25519Key)>> {
    let keys_dir = data_dir.join("keys");
    fs::create_dir_all(&keys_dir)?;

    (0..count)
        .map(|i| {
            let key = Ed25519Key::generate();
            let private_key = key.private_key().context("Generated key has no private half")?;
            let key_json = serde_json::json!({
                "id": key.id(),
                "public_key": hex::encode(key.public_key()),
                "private_key": hex::encode(private_key),
            });

            let key_file = keys_dir.join(format!("validator_{}.json", i));
            fs::write(&key_file, serde_json::to_string_pretty(&key_json)?)?;
            Ok((key_file, key))
        })
        .collect()
}
