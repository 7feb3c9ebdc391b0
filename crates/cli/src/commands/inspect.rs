//! Inspect a persisted chain.

use anyhow::{Context, Result};
use authchain_chain::Chain;
use authchain_core::{Block, Timestamp};
use authchain_storage::SledStore;
use chrono::DateTime;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

#[derive(Args)]
pub struct InspectArgs {
    /// Directory holding the ledger database
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Show one block in detail
    #[arg(short, long)]
    block: Option<usize>,

    /// Number of recent blocks to list
    #[arg(short, long, default_value = "10")]
    count: usize,
}

pub fn run(args: InspectArgs) -> Result<()> {
    let store = SledStore::open(args.data_dir.join("ledger"))
        .context("Failed to open ledger database. Did you run 'authchain demo'?")?;
    let chain: Chain<String> = Chain::load("demo", &store).context("Failed to load chain")?;

    match args.block {
        Some(index) => {
            let block = chain
                .block(index)
                .with_context(|| format!("Block {} not found", index))?;
            show_block(&chain, block)
        }
        None => {
            list_blocks(&chain, args.count);
            Ok(())
        }
    }
}

fn list_blocks(chain: &Chain<String>, count: usize) {
    println!();
    println!(
        "{} {}",
        "Chain".bold().cyan(),
        format!("({} blocks, valid: {})", chain.len(), chain.is_valid()).bright_black()
    );
    println!();

    for block in chain.blocks().iter().rev().take(count) {
        println!(
            "  {} {} {} {}",
            format!("#{}", block.index).bright_black(),
            super::short_hash(&block.hash).bright_yellow(),
            format!("({} txs)", block.tx_count()).bright_black(),
            format_timestamp(&block.timestamp).bright_black()
        );
    }
    println!();
}

fn show_block(chain: &Chain<String>, block: &Block<String>) -> Result<()> {
    let position = usize::try_from(block.index).context("Negative block index")?;

    println!();
    println!("{}", "Block Information:".bold().cyan());
    println!();
    println!("  Index:        {}", block.index.to_string().bright_cyan());
    println!("  Hash:         {}", block.hash.bright_yellow());
    println!("  Previous:     {}", block.previous_hash.bright_black());
    println!("  Merkle Root:  {}", block.merkle_root.bright_black());
    println!(
        "  Timestamp:    {}",
        format_timestamp(&block.timestamp).bright_black()
    );
    println!("  Valid:        {}", block.is_valid().to_string().bright_cyan());
    println!();

    println!("{}", "Transactions:".bold());
    println!();
    for (i, tx) in block.transactions.iter().enumerate() {
        let included = if chain.verify_transaction(position, i) {
            "✓".green().bold()
        } else {
            "✗".red().bold()
        };
        println!(
            "  {} {} {} {}",
            format!("{}.", i + 1).bright_black(),
            included,
            tx.id.bright_yellow(),
            tx.payload.bright_black()
        );
    }
    println!();
    Ok(())
}

fn format_timestamp(ts: &Timestamp) -> String {
    DateTime::from_timestamp(ts.secs, ts.nanos)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}
