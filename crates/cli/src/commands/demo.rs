//! End-to-end demo: propose, sign and commit blocks, then persist.

use anyhow::{Context, Result};
use authchain_chain::{Chain, Ledger, LedgerError};
use authchain_consensus::{ConsensusError, PoAConsensus};
use authchain_core::{Block, Ed25519Key, Transaction};
use authchain_storage::{LedgerStore, SledStore};
use clap::Args;
use colored::Colorize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const CHAIN_ID: &str = "demo";
const PARTICIPANT: &str = "writer";
const CAPABILITY: &str = "write";

#[derive(Args)]
pub struct DemoArgs {
    /// Directory holding keys, config and the ledger database
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Number of blocks to commit
    #[arg(short, long, default_value = "3")]
    blocks: usize,

    /// Transactions per block
    #[arg(short, long, default_value = "2")]
    txs: usize,

    /// Write the resulting chain as JSON to this file
    #[arg(long)]
    export: Option<PathBuf>,
}

pub fn run(args: DemoArgs, config: Option<&Path>) -> Result<()> {
    let config = super::load_config(config, &args.data_dir)?;

    let mut keys = super::load_keys(&args.data_dir)?;
    if keys.is_empty() {
        println!(
            "{}",
            "No keys found; using 3 throwaway validators (see 'authchain keygen')".yellow()
        );
        keys = (0..3)
            .map(|i| (format!("validator_{}", i), Ed25519Key::generate()))
            .collect();
    }

    let consensus = Arc::new(PoAConsensus::new(config)?);
    let mut validators = Vec::with_capacity(keys.len());
    for (name, key) in keys {
        validators.push(consensus.add_validator(name, Arc::new(key), 1)?);
    }
    println!(
        "{}  {} validators, {} signatures required",
        "✓".green().bold(),
        validators.len(),
        consensus.required_signatures()
    );

    fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", args.data_dir))?;
    let mut store = SledStore::open(args.data_dir.join("ledger"))
        .context("Failed to open ledger database")?;

    let client_key = Ed25519Key::generate();
    let mut ledger: Ledger<String> = if store.height()?.is_some() {
        Ledger::load(CHAIN_ID, &store, Arc::clone(&consensus))
            .context("Failed to load stored chain")?
    } else {
        let chain = Chain::new(CHAIN_ID, "init".to_string(), &client_key)?;
        Ledger::new(chain, Arc::clone(&consensus))
    };
    println!(
        "{}  Chain at height {}",
        "✓".green().bold(),
        ledger.chain().latest_block().index.to_string().bright_cyan()
    );

    ledger
        .chain_mut()
        .register_participant(PARTICIPANT, "active", BTreeMap::new());
    ledger.chain_mut().grant_capability(PARTICIPANT, CAPABILITY);

    println!();
    println!("{}", "Committing blocks...".bold());
    for round in 0..args.blocks {
        ledger
            .chain()
            .check_authorization(PARTICIPANT, CAPABILITY)?;

        let next_index = ledger.chain().len();
        let txs = (0..args.txs)
            .map(|j| {
                Transaction::new(
                    format!("tx-{}-{}", next_index, j),
                    format!("entry {} of block {}", j, next_index),
                    1,
                )
                .signed(&client_key)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let proposer = &validators[round % validators.len()];
        let proposal_id = propose_with_retry(&mut ledger, Block::new(txs), proposer)?;

        for validator in &validators {
            if ledger.sign(&proposal_id, validator)? {
                break;
            }
        }

        let signatures = ledger.commit(&proposal_id)?;
        let block = ledger.chain().latest_block();
        println!(
            "  {} {} {} {}",
            format!("#{}", block.index).bright_black(),
            super::short_hash(&block.hash).bright_yellow(),
            format!("({} txs)", block.tx_count()).bright_black(),
            format!("{} signatures", signatures.len()).green()
        );
    }

    // Replaying a committed transaction ID is refused.
    let replayed = ledger
        .chain()
        .latest_block()
        .transactions
        .first()
        .map(|tx| tx.id.clone());
    if let Some(id) = replayed {
        let tx = Transaction::new(id.clone(), "replay".to_string(), 1).signed(&client_key)?;
        match ledger.propose(Block::new(vec![tx]), &validators[0]) {
            Err(e) => println!(
                "{}  Replay of {} rejected: {}",
                "✓".green().bold(),
                id.bright_yellow(),
                e.to_string().bright_black()
            ),
            Ok(proposal_id) => {
                ledger.abandon(&proposal_id);
                println!("{}  Replay of {} was not rejected", "✗".red().bold(), id);
            }
        }
    }

    println!();
    let written = ledger.persist(&mut store)?;
    store.flush()?;
    println!(
        "{}  Persisted {} new blocks, chain valid: {}",
        "✓".green().bold(),
        written,
        ledger.chain().is_valid().to_string().bright_cyan()
    );

    if let Some(path) = args.export {
        fs::write(&path, ledger.chain().to_json()?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!(
            "{}  Exported chain to: {}",
            "✓".green().bold(),
            path.display().to_string().bright_black()
        );
    }

    Ok(())
}

/// Propose, waiting out the proposer's minimum gap if needed.
fn propose_with_retry(
    ledger: &mut Ledger<String>,
    block: Block<String>,
    proposer: &str,
) -> Result<String> {
    match ledger.propose(block.clone(), proposer) {
        Err(LedgerError::Consensus(ConsensusError::ProposingTooSoon { wait_secs, .. })) => {
            println!(
                "  {}",
                format!("{} must wait {}s", short_id(proposer), wait_secs).bright_black()
            );
            thread::sleep(Duration::from_secs(wait_secs));
            Ok(ledger.propose(block, proposer)?)
        }
        other => Ok(other?),
    }
}

fn short_id(id: &str) -> &str {
    id.get(..10).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use authchain_core::SigningKey;

    #[test]
    fn test_short_id() {
        let key = Ed25519Key::generate();
        assert_eq!(short_id(&key.id()).len(), 10);
        assert_eq!(short_id("abc"), "abc");
    }
}
