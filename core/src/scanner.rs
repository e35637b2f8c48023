//! Block scanner (C3): cursor-driven, idempotent traversal of the chain
//! that detects channel closes by matching spent outpoints against the
//! known funding-outpoint index (spec.md §4.3).

use std::collections::HashMap;

use crate::chain::ChainClient;
use crate::classifier;
use crate::database::Database;
use crate::error::ChainError;
use crate::open;
use crate::types::ShortChannelId;

/// Rewind window: 14 days of blocks at the ~10 minute target (spec.md
/// §4.3). Recently-opened channels may not have been in the funding index
/// when their close block was first scanned, so every scan re-walks this
/// trailing window.
pub const REWIND_BLOCKS: u32 = 14 * 144;

pub const DEFAULT_NEAR_TIP_BLOCKS: u32 = 3000;

/// Apply the startup rewind policy: if the saved cursor is closer to the
/// tip than `tip - REWIND_BLOCKS`, force it back to that floor so the
/// trailing window always gets rescanned (spec.md §3/§4.3: "if cursor >
/// tip − 14×144, set cursor = tip − 14×144"). A cursor that's already
/// further behind than the floor — a fresh database, or a daemon that's
/// fallen behind — is left alone; this never *skips* unscanned history.
pub fn rewind_cursor(cursor: u32, tip: u32, rewind_blocks: u32) -> u32 {
    let floor = tip.saturating_sub(rewind_blocks);
    cursor.min(floor)
}

/// Scan blocks `[start, tip)`, invoking the open handler and closure
/// classifier as closes are found, advancing and persisting `cursor` after
/// each fully-processed block. Returns the height to resume from on the
/// next invocation (either `tip`, or the last successfully committed
/// block height if an RPC failure interrupted the scan).
pub fn scan(
    db: &mut dyn Database,
    chain: &dyn ChainClient,
    start: u32,
    tip: u32,
    near_tip_blocks: u32,
    mut persist_cursor: impl FnMut(u32) -> std::io::Result<()>,
) -> Result<u32, ChainError> {
    let funding_map = db
        .funding_outpoint_map()
        .map_err(|e| ChainError::MalformedResponse(format!("database error: {e}")))?;

    let mut height = start;
    while height < tip {
        match scan_block(db, chain, height, tip, near_tip_blocks, &funding_map) {
            Ok(()) => {
                height += 1;
                persist_cursor(height).map_err(|e| {
                    ChainError::MalformedResponse(format!("failed to persist cursor: {e}"))
                })?;
            }
            Err(e) => {
                log::warn!("scanner: block {height} failed, leaving cursor there: {e}");
                return Ok(height);
            }
        }
    }
    Ok(height)
}

fn scan_block(
    db: &mut dyn Database,
    chain: &dyn ChainClient,
    height: u32,
    tip: u32,
    near_tip_blocks: u32,
    funding_map: &HashMap<String, ShortChannelId>,
) -> Result<(), ChainError> {
    let block = chain.get_block_at(height)?;
    log::info!("scanner: scanned block {height}");

    for (tx_index, tx) in block.tx.iter().enumerate() {
        for vin in &tx.vin {
            let Some(prev_txid) = &vin.txid else { continue };
            let Some(scid) = funding_map.get(prev_txid).cloned() else {
                continue;
            };
            let Some(vout) = vin.vout else { continue };
            if vout != scid.output_index {
                continue;
            }

            log::info!("scanner: {scid} closed by {}", tx.txid);
            classifier::handle_close(
                db,
                chain,
                &scid,
                height,
                block.time,
                tx,
                tip,
                near_tip_blocks,
            )?;
        }

        for (vout_index, vout) in tx.vout.iter().enumerate() {
            if vout.script_pub_key.script_type != "witness_v0_scripthash" {
                continue;
            }
            let candidate = ShortChannelId::new(height, tx_index as u32, vout_index as u32);
            if let Some(channel) = db
                .get_channel(&candidate)
                .map_err(|e| ChainError::MalformedResponse(format!("database error: {e}")))?
            {
                if channel.open.is_none() {
                    log::info!("scanner: {candidate} opened by {}", tx.txid);
                    let gossip_hint = Some((channel.nodes.clone(), channel.satoshis));
                    open::handle_open(
                        db,
                        chain,
                        &candidate,
                        height,
                        block.time,
                        tx,
                        vout_index as u32,
                        gossip_hint,
                    )?;
                }
            } else {
                db.upsert_try_later(&candidate, &tx.txid)
                    .map_err(|e| ChainError::MalformedResponse(format!("database error: {e}")))?;
            }
        }
    }
    Ok(())
}

/// Re-inspect `try_later` candidates (channels seen on-chain but not yet in
/// gossip, or vice-versa) capped at [`crate::model::TRY_LATER_MAX_TRIES`]
/// tries, per spec.md §3's `try_later` queue.
pub fn scan_try_later(db: &mut dyn Database, chain: &dyn ChainClient) -> Result<(), ChainError> {
    let candidates = db
        .try_later_candidates(crate::model::TRY_LATER_MAX_TRIES)
        .map_err(|e| ChainError::MalformedResponse(format!("database error: {e}")))?;

    for candidate in candidates {
        let Some(channel) = db
            .get_channel(&candidate.short_channel_id)
            .map_err(|e| ChainError::MalformedResponse(format!("database error: {e}")))?
        else {
            continue;
        };
        if channel.open.is_some() {
            continue;
        }
        let tx = match chain.get_tx(&candidate.txid) {
            Ok(tx) => tx,
            Err(e) => {
                log::warn!("try_later: {} failed: {e}", candidate.short_channel_id);
                db.upsert_try_later(&candidate.short_channel_id, &candidate.txid)
                    .map_err(|e| ChainError::MalformedResponse(format!("database error: {e}")))?;
                continue;
            }
        };
        let block_time = tx.blocktime.unwrap_or(0);
        open::handle_open(
            db,
            chain,
            &candidate.short_channel_id,
            candidate.short_channel_id.block,
            block_time,
            &tx,
            candidate.short_channel_id.output_index,
            Some((channel.nodes.clone(), channel.satoshis)),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewind_cursor_forces_rewind_when_cursor_is_past_floor() {
        let floor = 800_000 - 14 * 144;
        assert_eq!(rewind_cursor(799_000, 800_000, 14 * 144), floor);
    }

    #[test]
    fn rewind_cursor_keeps_older_cursor_unchanged() {
        assert_eq!(rewind_cursor(700_000, 800_000, 14 * 144), 700_000);
    }

    #[test]
    fn rewind_cursor_rewinds_even_when_almost_caught_up() {
        let floor = 800_000 - 14 * 144;
        assert_eq!(rewind_cursor(799_999, 800_000, 14 * 144), floor);
    }

    #[test]
    fn rewind_cursor_never_skips_unscanned_history() {
        let tip = 800_000;
        assert_eq!(rewind_cursor(0, tip, 14 * 144), 0);
    }
}
