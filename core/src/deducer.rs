//! Chain-analysis deducer (C6): propagates `a`/`b`/`funder` identity facts
//! across channels that share an on-chain transaction (spec.md §4.6).
//!
//! The SQL source this was distilled from pushes the set intersections
//! into temporary SQL functions (`inter`/`diff`/`matches`); spec.md §9
//! allows doing the same work as plain set operations over fetched rows,
//! which is what this module does.

use std::collections::BTreeSet;

use rand::Rng;

use crate::database::Database;
use crate::error::CoreError;
use crate::model::{Channel, ClosureType};
use crate::types::ShortChannelId;

pub const DEFAULT_WORKERS: u32 = 5;

/// `idx(arr, v)`: 0 if `v` is `arr[0]`, else 1.
fn idx(nodes: &[String; 2], v: &str) -> u8 {
    if nodes[0] == v {
        0
    } else {
        1
    }
}

/// The single shared node between `x` and `y`, or `None` if they share
/// none or are the same pair (spec.md §4.6: "`x.nodes ∩ y.nodes ≠ ∅` AND
/// `x.nodes ≠ y.nodes`").
fn common_node(x: &Channel, y: &Channel) -> Option<String> {
    if x.nodes == y.nodes {
        return None;
    }
    x.nodes.iter().find(|n| y.nodes.contains(n)).cloned()
}

/// Rules 1–3: candidate updates to `x` derived from a shared transaction
/// with `y`.
fn derive_pair_updates(x: &Channel, y: &Channel) -> Vec<(String, u8)> {
    let mut updates = Vec::new();
    let Some(common) = common_node(x, y) else {
        return updates;
    };
    let Some(close) = &x.close else {
        return updates;
    };
    let value = idx(&x.nodes, &common);
    let y_all = y.txs.all();

    if close.close_type == ClosureType::Penalty {
        // Rule 2: a penalty close's "a" and "b" txs both belong to the
        // same peer, so a match on either side labels both.
        if !x.txs.a.is_disjoint(&y_all) || !x.txs.b.is_disjoint(&y_all) {
            updates.push(("ab".to_string(), value));
        }
    } else {
        // Rule 1.
        if !x.txs.a.is_disjoint(&y_all) {
            updates.push(("a".to_string(), value));
        }
        if !x.txs.b.is_disjoint(&y_all) {
            updates.push(("b".to_string(), value));
        }
    }

    // Rule 3.
    if !x.txs.funding.is_disjoint(&y_all) {
        updates.push(("funder".to_string(), value));
    }

    updates
}

/// Rule 4: single-balance closes let `funder`/`a` imply each other,
/// without needing a second channel at all.
fn derive_self_updates(x: &Channel) -> Vec<(String, u8)> {
    let mut updates = Vec::new();
    let Some(close) = &x.close else {
        return updates;
    };
    if close.balance.b != 0 || close.close_type == ClosureType::Penalty {
        return updates;
    }
    if let Some(funder) = x.funder {
        updates.push(("a".to_string(), funder.as_usize() as u8));
    }
    if let Some(a) = x.a {
        updates.push(("funder".to_string(), a.as_usize() as u8));
    }
    updates
}

/// Rule 5: implication closure. Every `a` update implies the mirrored `b`
/// update and vice-versa, for non-penalty channels.
fn with_implications(updates: Vec<(String, u8)>, penalty: bool) -> Vec<(String, u8)> {
    if penalty {
        return updates;
    }
    let mirrored: Vec<(String, u8)> = updates
        .iter()
        .filter_map(|(label, value)| match label.as_str() {
            "a" => Some(("b".to_string(), 1 - value)),
            "b" => Some(("a".to_string(), 1 - value)),
            _ => None,
        })
        .collect();
    let mut all = updates;
    all.extend(mirrored);
    all
}

/// Run every rule for a single channel `x` against every channel sharing a
/// node with it, then write the surviving, deduplicated updates — each
/// write still goes through [`Database::set_label_if_null`], so a prior
/// non-null value always wins (conservative monotone refinement).
pub fn run_for_channel(db: &mut dyn Database, scid: &ShortChannelId) -> Result<(), CoreError> {
    let Some(x) = db.get_channel(scid)? else {
        return Ok(());
    };
    let Some(close) = &x.close else {
        return Ok(());
    };
    let penalty = close.close_type == ClosureType::Penalty;

    let mut candidate_updates = derive_self_updates(&x);
    for y in db.channels_sharing_a_node(scid)? {
        candidate_updates.extend(derive_pair_updates(&x, &y));
    }
    let candidate_updates = with_implications(candidate_updates, penalty);

    let deduped: BTreeSet<(String, u8)> = candidate_updates.into_iter().collect();
    for (label, value) in deduped {
        if label == "ab" {
            db.set_label_if_null(scid, "a", value)?;
            db.set_label_if_null(scid, "b", value)?;
        } else {
            db.set_label_if_null(scid, &label, value)?;
        }
    }
    Ok(())
}

fn partition_by_block_mod(candidates: Vec<ShortChannelId>, workers: u32) -> Vec<Vec<ShortChannelId>> {
    let workers = workers.max(1);
    let mut buckets: Vec<Vec<ShortChannelId>> = (0..workers).map(|_| Vec::new()).collect();
    for scid in candidates {
        let bucket = (scid.block % workers) as usize;
        buckets[bucket].push(scid);
    }
    buckets
}

/// Run the deducer over every channel with an incomplete identity,
/// fanning out across `workers` threads partitioned by `block mod
/// workers` (spec.md §4.6). Each worker opens its own database connection
/// via `make_db`; workers share nothing and communicate only through the
/// database.
pub fn run(
    make_db: &(dyn Fn() -> Result<Box<dyn Database>, CoreError> + Send + Sync),
    workers: u32,
    sample_probability: f64,
) -> Result<(), CoreError> {
    let mut candidates = {
        let mut db = make_db()?;
        db.channels_pending_deduction()?
    };

    if sample_probability < 1.0 {
        let mut rng = rand::thread_rng();
        candidates.retain(|_| rng.gen::<f64>() < sample_probability);
    }
    log::info!("deducer: running over {} candidate channels", candidates.len());

    let partitions = partition_by_block_mod(candidates, workers);

    std::thread::scope(|scope| {
        let handles: Vec<_> = partitions
            .into_iter()
            .enumerate()
            .map(|(worker_id, partition)| {
                scope.spawn(move || -> Result<(), CoreError> {
                    let mut db = make_db()?;
                    for scid in partition {
                        if let Err(e) = run_for_channel(db.as_mut(), &scid) {
                            log::warn!("deducer[{worker_id}]: {scid} failed: {e}");
                        }
                    }
                    Ok(())
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("deducer worker thread panicked")?;
        }
        Ok(())
    })
}
