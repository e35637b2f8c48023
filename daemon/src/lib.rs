//! Daemon: wires the core library's pipeline stages (C2 gossip → C3/C4/C5
//! scan → C6 deduce → C7 materialize) into one runnable pass, plus the
//! ambient config/logging/cursor layers spec.md treats as external.

pub mod config;
pub mod cursor;
pub mod logger;

use anyhow::Context;

use lnchannels_core::chain::{bitcoind::Bitcoind, esplora::Esplora, Chain, ChainClient};
use lnchannels_core::database::sqlite::SqliteDb;
use lnchannels_core::database::Database;
use lnchannels_core::error::CoreError;
use lnchannels_core::gossip::{self, GossipClient, HttpGossipClient};
use lnchannels_core::{deducer, open, scanner};

use config::Config;
use cursor::Cursor;

/// Build the production [`Chain`] client from config.
pub fn build_chain(config: &Config) -> anyhow::Result<Chain> {
    let (user, password) = config.bitcoind.auth.resolve()?;
    let bitcoind = Bitcoind::new(&config.bitcoind.url, &user, &password)
        .context("connecting to bitcoind")?;
    let esplora = Esplora::new(config.esplora_mirrors.clone());
    Ok(Chain::new(bitcoind, esplora))
}

/// Run one full pass of the pipeline: import gossip, scan to the chain
/// tip, run the deducer, and refresh the materialized aggregates.
///
/// This is the unit the binary re-invokes on a timer/`--loop`, not an
/// internal infinite loop: there's no long-lived wallet state to keep hot
/// between runs, so one bounded pass per invocation is the whole contract.
pub fn run_once(config: &Config, chain: &dyn ChainClient) -> anyhow::Result<()> {
    let mut db = SqliteDb::open_or_create(&config.database_path)
        .context("opening database")?;

    import_gossip(config, chain, &mut db)?;
    scan_chain(config, chain, &mut db)?;
    run_deducer(config)?;
    db.recompute_aggregates().context("refreshing materialized aggregates")?;

    Ok(())
}

fn import_gossip(config: &Config, chain: &dyn ChainClient, db: &mut SqliteDb) -> anyhow::Result<()> {
    let client = HttpGossipClient::new(config.gossip.url.clone(), config.gossip.access_token.clone());
    let now = now_unix();

    let channels = client.list_channels().context("fetching gossip channel listing")?;
    let newly_created = gossip::import_channels(db, &channels, now).context("importing gossip channels")?;

    let nodes = client.list_nodes().context("fetching gossip node listing")?;
    gossip::import_nodes(db, &nodes, now).context("importing gossip nodes")?;

    // A channel gossip just discovered may have funded long before the
    // scanner's rewind window, so it'll never be found by the forward walk
    // from `start`. Look its funding tx up directly by scid, the same way
    // the original `onchain.py`'s `onopen` resolves a channel it already
    // knows about from gossip.
    for scid in &newly_created {
        let block = chain
            .get_block_at(scid.block)
            .with_context(|| format!("fetching funding block for {scid}"))?;
        let Some(tx) = block.tx.get(scid.tx_index as usize) else {
            log::warn!("gossip: {scid} funding block has no tx at index {}", scid.tx_index);
            continue;
        };
        open::handle_open(db, chain, scid, scid.block, block.time, tx, scid.output_index, None)
            .with_context(|| format!("recording on-chain open for {scid}"))?;
    }

    Ok(())
}

fn scan_chain(config: &Config, chain: &dyn ChainClient, db: &mut SqliteDb) -> anyhow::Result<()> {
    let tip = chain.tip().context("fetching chain tip")?;
    let cursor = Cursor::new(&config.cursor_path);
    let saved = cursor.read().context("reading scan cursor")?.unwrap_or(0);
    let start = scanner::rewind_cursor(saved, tip, config.rewind_blocks);

    log::info!("scanner: resuming from block {start} (tip {tip})");

    let reached = scanner::scan(db, chain, start, tip, config.near_tip_blocks, |height| {
        cursor.write(height)
    })
    .context("scanning blocks")?;

    log::info!("scanner: caught up to block {reached}");

    scanner::scan_try_later(db, chain).context("re-scanning try_later candidates")?;

    Ok(())
}

fn run_deducer(config: &Config) -> anyhow::Result<()> {
    let db_path = config.database_path.clone();
    let make_db = move || -> Result<Box<dyn Database>, CoreError> {
        let db = SqliteDb::open_or_create(&db_path)
            .map_err(|e| CoreError::DatabaseMessage(e.to_string()))?;
        Ok(Box::new(db))
    };

    deducer::run(&make_db, config.deducer_workers, config.deducer_sample_probability)
        .context("running chain-analysis deducer")?;
    Ok(())
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
