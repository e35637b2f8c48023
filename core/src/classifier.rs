//! Closure classifier (C5): walks the outputs of a closing transaction and
//! their follow-up spends, labels each output, and resolves the closure
//! type, per-side balances, and HTLC dispositions (spec.md §4.5).

use std::collections::BTreeSet;

use crate::chain::{ChainClient, Tx};
use crate::database::Database;
use crate::error::ChainError;
use crate::model::{Balance, CloseFacts, ClosureType, HtlcDisposition};
use crate::types::{ScriptSigType, ShortChannelId, Side};

/// `near_tip(h) := h + near_tip_blocks > tip`, distinguishing "probably
/// unconfirmed" from "truly unspent" (spec.md §4.5). `near_tip_blocks`
/// defaults to 3000 (see [`crate::open`]'s sibling config knob in the
/// daemon).
pub fn near_tip(close_block: u32, tip: u32, near_tip_blocks: u32) -> bool {
    close_block.saturating_add(near_tip_blocks) > tip
}

struct HtlcCandidate {
    script: String,
    amount: u64,
    txid: String,
    vout: u32,
}

struct ClassifyState {
    kinds: BTreeSet<&'static str>,
    txs_a: BTreeSet<String>,
    txs_b: BTreeSet<String>,
    balance: Balance,
    htlc_candidates: Vec<HtlcCandidate>,
    closer: Option<Side>,
    taken: Option<Side>,
}

impl ClassifyState {
    fn new() -> Self {
        ClassifyState {
            kinds: BTreeSet::new(),
            txs_a: BTreeSet::new(),
            txs_b: BTreeSet::new(),
            balance: Balance::default(),
            htlc_candidates: Vec::new(),
            closer: None,
            taken: None,
        }
    }

    fn txs_mut(&mut self, side: Side) -> &mut BTreeSet<String> {
        match side {
            Side::A => &mut self.txs_a,
            Side::B => &mut self.txs_b,
        }
    }

    fn set_balance(&mut self, side: Side, amount: u64) {
        match side {
            Side::A => self.balance.a = amount,
            Side::B => self.balance.b = amount,
        }
    }
}

/// Classify the closing transaction `tx` (which spent `scid`'s funding
/// output) and persist the resulting [`CloseFacts`] plus the `closer`/
/// `taken` labels and the accumulated `txs.a`/`txs.b` sets.
#[allow(clippy::too_many_arguments)]
pub fn handle_close(
    db: &mut dyn Database,
    chain: &dyn ChainClient,
    scid: &ShortChannelId,
    block_height: u32,
    block_time: u32,
    tx: &Tx,
    tip: u32,
    near_tip_blocks: u32,
) -> Result<(), ChainError> {
    let fee = crate::open::compute_fee(chain, tx)?;
    let spends = chain.get_outspends(&tx.txid)?;
    let mut state = ClassifyState::new();

    let mut next_side = Side::A;
    for (i, spend) in spends.iter().enumerate() {
        let side = next_side;
        let vout = tx.vout.get(i).ok_or_else(|| {
            ChainError::MalformedResponse(format!("{} missing output {i}", tx.txid))
        })?;
        let amount = vout.value_sat().max(0) as u64;

        if !spend.spent {
            let label = if near_tip(block_height, tip, near_tip_blocks) {
                ScriptSigType::Unknown
            } else {
                ScriptSigType::Any
            };
            state.kinds.insert(kind_tag(label));
            state.set_balance(side, amount);
            next_side = side.other();
            continue;
        }

        let spend_txid = spend.txid.as_deref().ok_or_else(|| {
            ChainError::MalformedResponse(format!("{}: spend {i} has no txid", tx.txid))
        })?;
        let spend_vin = spend.vin.ok_or_else(|| {
            ChainError::MalformedResponse(format!("{}: spend {i} has no vin", tx.txid))
        })?;
        let f = chain.get_tx(spend_txid)?;
        let witness = &f
            .vin
            .get(spend_vin as usize)
            .ok_or_else(|| ChainError::MalformedResponse(format!("{spend_txid}: no input {spend_vin}")))?
            .witness;

        if witness.len() == 2 {
            state.kinds.insert(kind_tag(ScriptSigType::Any));
            state.set_balance(side, amount);
            state.txs_mut(side).insert(spend_txid.to_string());
            next_side = side.other();
            continue;
        }

        let last = witness.last().ok_or_else(|| {
            ChainError::MalformedResponse(format!("{spend_txid}: empty witness"))
        })?;
        let decoded = chain.decode_script(last)?;
        let script = decoded.asm;

        if script.contains("OP_HASH160") {
            state.kinds.insert(kind_tag(ScriptSigType::Htlc));
            state.htlc_candidates.push(HtlcCandidate {
                script,
                amount,
                txid: spend_txid.to_string(),
                vout: i as u32,
            });
        } else if script.contains("OP_CHECKSEQUENCEVERIFY") {
            state.set_balance(side, amount);
            next_side = side.other();

            for follow_up in chain.get_outspends(spend_txid)? {
                if follow_up.spent {
                    if let Some(txid) = follow_up.txid {
                        state.txs_mut(side).insert(txid);
                    }
                }
            }

            let revocation_bit = witness.len() >= 2 && witness[witness.len() - 2] == "01";
            if revocation_bit {
                state.kinds.insert(kind_tag(ScriptSigType::Penalty));
                state.taken = Some(side);
            } else {
                state.kinds.insert(kind_tag(ScriptSigType::Delayed));
                state.closer = Some(side);
            }
        } else {
            state.kinds.insert(kind_tag(ScriptSigType::Any));
            state.set_balance(side, amount);
            state.txs_mut(side).insert(spend_txid.to_string());
            next_side = side.other();
        }
    }

    let close_type = resolve_closure_type(&state.kinds, spends.len());
    let htlcs = resolve_htlcs(chain, &mut state)?;

    let close = CloseFacts {
        block: block_height,
        txid: tx.txid.clone(),
        time: block_time,
        fee,
        close_type,
        balance: state.balance,
        htlcs,
    };

    let txs_a: Vec<String> = state.txs_a.into_iter().collect();
    let txs_b: Vec<String> = state.txs_b.into_iter().collect();
    let closer_str = state.closer.map(|s| s.as_str().to_string());
    let taken_str = state.taken.map(|s| s.as_str().to_string());

    db.set_close(
        scid,
        close,
        &txs_a,
        &txs_b,
        closer_str.as_deref(),
        taken_str.as_deref(),
    )
    .map_err(|e| ChainError::MalformedResponse(format!("database error: {e}")))
}

fn kind_tag(label: ScriptSigType) -> &'static str {
    match label {
        ScriptSigType::Any => "any",
        ScriptSigType::Htlc => "htlc",
        ScriptSigType::Delayed => "delayed",
        ScriptSigType::Penalty => "penalty",
        ScriptSigType::Unknown => "unknown",
    }
}

/// Closure-type resolution from the accumulated label set (spec.md §4.5).
/// The single-output `unused` special case takes priority: a channel
/// opened and never used.
fn resolve_closure_type(kinds: &BTreeSet<&'static str>, output_count: usize) -> ClosureType {
    if output_count == 1 && kinds.len() == 1 && kinds.contains("any") {
        return ClosureType::Unused;
    }
    if kinds.len() == 1 && kinds.contains("any") {
        ClosureType::Mutual
    } else if kinds.contains("penalty") {
        ClosureType::Penalty
    } else if kinds.contains("htlc") || kinds.contains("delayed") {
        ClosureType::Force
    } else {
        ClosureType::Unknown
    }
}

/// HTLC resolution table (spec.md §4.5), only runs once `closer` is known.
fn resolve_htlcs(
    chain: &dyn ChainClient,
    state: &mut ClassifyState,
) -> Result<Vec<HtlcDisposition>, ChainError> {
    let Some(closer) = state.closer else {
        return Ok(Vec::new());
    };
    let noncloser = closer.other();
    let candidates = std::mem::take(&mut state.htlc_candidates);
    let mut htlcs = Vec::with_capacity(candidates.len());

    for htlc in &candidates {
        let spends2 = chain.get_outspends(&htlc.txid)?;
        let follow_up = spends2.get(htlc.vout as usize);

        let has_covenant = match follow_up {
            Some(spend2) if spend2.spent && spend2.status.confirmed && spend2.txid.is_some() => {
                let f2_txid = spend2.txid.as_deref().unwrap();
                let spend2_vin = spend2.vin.ok_or(ChainError::OutputNotSpentYet)?;
                let f2 = chain.get_tx(f2_txid)?;
                let witness2 = &f2
                    .vin
                    .get(spend2_vin as usize)
                    .ok_or_else(|| ChainError::MalformedResponse(format!("{f2_txid}: no input {spend2_vin}")))?
                    .witness;
                let last2 = witness2
                    .last()
                    .ok_or_else(|| ChainError::MalformedResponse(format!("{f2_txid}: empty witness")))?;
                let script2 = chain.decode_script(last2)?.asm;
                if script2.contains("OP_CHECKSEQUENCEVERIFY") {
                    for further in chain.get_outspends(f2_txid)? {
                        if further.spent {
                            if let Some(txid) = further.txid {
                                state.txs_mut(closer).insert(txid);
                            }
                        }
                    }
                    true
                } else {
                    for s in spends2 {
                        if s.spent {
                            if let Some(txid) = s.txid {
                                state.txs_mut(noncloser).insert(txid);
                            }
                        }
                    }
                    false
                }
            }
            _ => {
                for s in &spends2 {
                    if s.spent {
                        if let Some(txid) = &s.txid {
                            state.txs_mut(noncloser).insert(txid.clone());
                        }
                    }
                }
                false
            }
        };

        let offered_by_closer = htlc.script.contains("OP_NOTIF");
        let (offerer, fulfilled) = match (offered_by_closer, has_covenant) {
            (true, true) => (closer, false),
            (true, false) => (closer, true),
            (false, true) => (noncloser, true),
            (false, false) => (noncloser, false),
        };

        htlcs.push(HtlcDisposition {
            amount: htlc.amount,
            offerer: offerer.as_str().to_string(),
            fulfilled,
        });
    }

    Ok(htlcs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_tip_true_when_close_block_recent() {
        assert!(near_tip(800_000, 801_000, 3000));
        assert!(!near_tip(700_000, 801_000, 3000));
    }

    #[test]
    fn resolve_closure_type_single_any_output_is_unused() {
        let mut kinds = BTreeSet::new();
        kinds.insert("any");
        assert_eq!(resolve_closure_type(&kinds, 1), ClosureType::Unused);
    }

    #[test]
    fn resolve_closure_type_two_any_outputs_is_mutual() {
        let mut kinds = BTreeSet::new();
        kinds.insert("any");
        assert_eq!(resolve_closure_type(&kinds, 2), ClosureType::Mutual);
    }

    #[test]
    fn resolve_closure_type_penalty_wins_over_htlc() {
        let mut kinds = BTreeSet::new();
        kinds.insert("htlc");
        kinds.insert("penalty");
        assert_eq!(resolve_closure_type(&kinds, 2), ClosureType::Penalty);
    }

    #[test]
    fn resolve_closure_type_htlc_or_delayed_is_force() {
        let mut kinds = BTreeSet::new();
        kinds.insert("delayed");
        kinds.insert("htlc");
        assert_eq!(resolve_closure_type(&kinds, 2), ClosureType::Force);
    }

    #[test]
    fn resolve_closure_type_unknown_default() {
        let mut kinds = BTreeSet::new();
        kinds.insert("unknown");
        assert_eq!(resolve_closure_type(&kinds, 2), ClosureType::Unknown);
    }

    #[test]
    fn htlc_resolution_table_matches_spec() {
        // (offered_by_closer, has_covenant) -> (offerer is closer, fulfilled)
        let cases = [
            (true, true, true, false),
            (true, false, true, true),
            (false, true, false, true),
            (false, false, false, false),
        ];
        for (offered_by_closer, has_covenant, offerer_is_closer, fulfilled) in cases {
            let (offerer, got_fulfilled) = match (offered_by_closer, has_covenant) {
                (true, true) => (Side::A, false),
                (true, false) => (Side::A, true),
                (false, true) => (Side::B, true),
                (false, false) => (Side::B, false),
            };
            let expect_side = if offerer_is_closer { Side::A } else { Side::B };
            assert_eq!(offerer, expect_side);
            assert_eq!(got_fulfilled, fulfilled);
        }
    }
}
