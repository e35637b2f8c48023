//! Open handler (C4): persists the opening-side on-chain facts once a
//! funding output is located (spec.md §4.4).

use crate::chain::{ChainClient, Tx, TxOut};
use crate::database::Database;
use crate::error::ChainError;
use crate::model::OpenFacts;
use crate::types::ShortChannelId;

/// `fee = Σ input_value_sats − Σ output_value_sats`, where each input's
/// value is looked up with a second RPC call per input (spec.md §4.4).
pub fn compute_fee(chain: &dyn ChainClient, tx: &Tx) -> Result<i64, ChainError> {
    let mut input_sum: i64 = 0;
    for vin in &tx.vin {
        let Some(txid) = &vin.txid else {
            continue;
        };
        let prev = chain.get_tx(txid)?;
        let vout = vin.vout.ok_or_else(|| {
            ChainError::MalformedResponse(format!("input of {} has no vout", tx.txid))
        })?;
        let out: &TxOut = prev.vout.get(vout as usize).ok_or_else(|| {
            ChainError::MalformedResponse(format!("{txid} has no output {vout}"))
        })?;
        input_sum += out.value_sat();
    }
    let output_sum: i64 = tx.vout.iter().map(|o| o.value_sat()).sum();
    Ok(input_sum - output_sum)
}

/// Record that `scid`'s funding output was found in `tx.vout[vout_index]`
/// at `(block_height, block_time)`, inserting the channel row if it
/// doesn't exist yet (spec.md §4.4).
pub fn handle_open(
    db: &mut dyn Database,
    chain: &dyn ChainClient,
    scid: &ShortChannelId,
    block_height: u32,
    block_time: u32,
    tx: &Tx,
    vout_index: u32,
    gossip_hint: Option<([String; 2], u64)>,
) -> Result<(), ChainError> {
    let vout = tx.vout.get(vout_index as usize).ok_or_else(|| {
        ChainError::MalformedResponse(format!("{} has no output {vout_index}", tx.txid))
    })?;
    let address = vout
        .script_pub_key
        .addresses
        .first()
        .cloned()
        .unwrap_or_default();
    let fee = compute_fee(chain, tx)?;

    if db.get_channel(scid).map_err(db_err)?.is_none() {
        if let Some((nodes, satoshis)) = gossip_hint {
            let channel = crate::model::Channel::new(scid.clone(), nodes, satoshis, block_time as i64);
            db.insert_channel_if_missing(&channel).map_err(db_err)?;
        }
    }

    let funding_txids: Vec<String> = tx.vin.iter().filter_map(|v| v.txid.clone()).collect();

    db.set_open(
        scid,
        OpenFacts {
            block: block_height,
            txid: tx.txid.clone(),
            address,
            time: block_time,
            fee,
        },
        &funding_txids,
    )
    .map_err(db_err)
}

fn db_err(e: rusqlite::Error) -> ChainError {
    ChainError::MalformedResponse(format!("database error: {e}"))
}
