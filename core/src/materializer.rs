//! Materializer (C7): recomputes the `nodes`, `globalstats`, and
//! `closetypes` aggregate tables from the current channel set (spec.md
//! §4.7, grounded in `original_source/getdata/materialize.py`).
//!
//! spec.md treats the materializer as an external collaborator except for
//! its trigger contract ("refresh all derived views after C3/C5 commit");
//! this module *is* that trigger, computing the aggregates in application
//! code rather than via the source's ad-hoc SQL views, so it needs nothing
//! beyond what `rusqlite` already gives us.

use std::collections::HashMap;

use rusqlite::{params, Connection};

use crate::model::{ClosureType, OpenFacts};

struct NodeAgg {
    alias: Option<String>,
    oldest_channel: Option<u32>,
    open_channels: u64,
    closed_channels: u64,
    capacity: u64,
    duration_sum: u64,
    duration_count: u64,
    open_fee_sum: i64,
    open_fee_count: u64,
    close_fee_sum: i64,
    close_fee_count: u64,
}

impl NodeAgg {
    fn new() -> Self {
        NodeAgg {
            alias: None,
            oldest_channel: None,
            open_channels: 0,
            closed_channels: 0,
            capacity: 0,
            duration_sum: 0,
            duration_count: 0,
            open_fee_sum: 0,
            open_fee_count: 0,
            close_fee_sum: 0,
            close_fee_count: 0,
        }
    }

    fn avg_duration(&self) -> Option<i64> {
        (self.duration_count > 0).then(|| (self.duration_sum / self.duration_count) as i64)
    }

    fn avg_open_fee(&self) -> Option<i64> {
        (self.open_fee_count > 0).then(|| self.open_fee_sum / self.open_fee_count as i64)
    }

    fn avg_close_fee(&self) -> Option<i64> {
        (self.close_fee_count > 0).then(|| self.close_fee_sum / self.close_fee_count as i64)
    }
}

#[derive(Default)]
struct GlobalMax {
    last_block: Option<u32>,
    max_channel_duration: i64,
    max_channel_open_fee: i64,
    max_channel_close_fee: i64,
    max_channel_satoshis: i64,
    max_node_capacity: i64,
    max_node_openchannels: i64,
    max_node_closedchannels: i64,
    max_node_allchannels: i64,
}

/// Rebuild every derived table. Run as a single transaction so readers
/// never observe a half-refreshed set of aggregates.
pub fn recompute(conn: &mut Connection) -> rusqlite::Result<()> {
    let channels = fetch_channel_facts(conn)?;
    let aliases = fetch_latest_aliases(conn)?;

    let mut nodes: HashMap<String, NodeAgg> = HashMap::new();
    let mut global = GlobalMax::default();
    let mut closetype_buckets: HashMap<i64, [u64; 6]> = HashMap::new();

    for ch in &channels {
        global.last_block = max_opt(global.last_block, ch.open.as_ref().map(|o| o.block));
        global.last_block = max_opt(global.last_block, ch.close_block);
        global.max_channel_satoshis = global.max_channel_satoshis.max(ch.satoshis as i64);
        if let Some(open) = &ch.open {
            global.max_channel_open_fee = global.max_channel_open_fee.max(open.fee);
        }
        if let Some(fee) = ch.close_fee {
            global.max_channel_close_fee = global.max_channel_close_fee.max(fee);
        }
        if let (Some(open), Some(close_block)) = (&ch.open, ch.close_block) {
            let duration = close_block.saturating_sub(open.block) as i64;
            global.max_channel_duration = global.max_channel_duration.max(duration);
        }

        for pubkey in &ch.nodes {
            let agg = nodes.entry(pubkey.clone()).or_insert_with(NodeAgg::new);
            agg.capacity += ch.satoshis;
            if ch.close_block.is_none() {
                agg.open_channels += 1;
            } else {
                agg.closed_channels += 1;
            }
            if let Some(open) = &ch.open {
                agg.oldest_channel = Some(match agg.oldest_channel {
                    Some(existing) => existing.min(open.block),
                    None => open.block,
                });
                agg.open_fee_sum += open.fee;
                agg.open_fee_count += 1;
                let end_block = ch.close_block.unwrap_or(open.block);
                agg.duration_sum += end_block.saturating_sub(open.block) as u64;
                agg.duration_count += 1;
            }
            if let Some(fee) = ch.close_fee {
                agg.close_fee_sum += fee;
                agg.close_fee_count += 1;
            }
        }

        if let Some(close_block) = ch.close_block {
            let bucket = (close_block as i64 / 1000) * 1000;
            let entry = closetype_buckets.entry(bucket).or_insert([0; 6]);
            let effective_type = if ch.close_type == Some(ClosureType::Force) && ch.close_balance_b == Some(0) {
                "force_unused"
            } else {
                ch.close_type.map(|t| t.as_str()).unwrap_or("unknown")
            };
            let slot = match effective_type {
                "unknown" => 0,
                "unused" => 1,
                "mutual" => 2,
                "force" => 3,
                "force_unused" => 4,
                "penalty" => 5,
                _ => 0,
            };
            entry[slot] += 1;
        }
    }

    for agg in nodes.values() {
        global.max_node_capacity = global.max_node_capacity.max(agg.capacity as i64);
        global.max_node_openchannels = global.max_node_openchannels.max(agg.open_channels as i64);
        global.max_node_closedchannels = global.max_node_closedchannels.max(agg.closed_channels as i64);
        global.max_node_allchannels = global
            .max_node_allchannels
            .max((agg.open_channels + agg.closed_channels) as i64);
    }

    for (pubkey, agg) in nodes.iter_mut() {
        agg.alias = aliases.get(pubkey).cloned();
    }

    let tx = conn.transaction()?;
    tx.execute("DELETE FROM nodes", [])?;
    tx.execute("DELETE FROM globalstats", [])?;
    tx.execute("DELETE FROM closetypes", [])?;

    for (pubkey, agg) in &nodes {
        tx.execute(
            "INSERT INTO nodes \
             (pubkey, alias, oldestchannel, openchannels, closedchannels, capacity, \
              avg_duration, avg_open_fee, avg_close_fee) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                pubkey,
                agg.alias,
                agg.oldest_channel,
                agg.open_channels as i64,
                agg.closed_channels as i64,
                agg.capacity as i64,
                agg.avg_duration(),
                agg.avg_open_fee(),
                agg.avg_close_fee(),
            ],
        )?;
    }

    tx.execute(
        "INSERT INTO globalstats \
         (last_block, max_channel_duration, max_channel_open_fee, max_channel_close_fee, \
          max_channel_satoshis, max_node_capacity, max_node_openchannels, \
          max_node_closedchannels, max_node_allchannels) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            global.last_block,
            global.max_channel_duration,
            global.max_channel_open_fee,
            global.max_channel_close_fee,
            global.max_channel_satoshis,
            global.max_node_capacity,
            global.max_node_openchannels,
            global.max_node_closedchannels,
            global.max_node_allchannels,
        ],
    )?;

    for (blockgroup, counts) in &closetype_buckets {
        tx.execute(
            "INSERT INTO closetypes \
             (blockgroup, unknown, unused, mutual, force, force_unused, penalty) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                blockgroup,
                counts[0] as i64,
                counts[1] as i64,
                counts[2] as i64,
                counts[3] as i64,
                counts[4] as i64,
                counts[5] as i64,
            ],
        )?;
    }

    tx.commit()
}

struct ChannelFacts {
    nodes: [String; 2],
    satoshis: u64,
    open: Option<OpenFacts>,
    close_block: Option<u32>,
    close_fee: Option<i64>,
    close_type: Option<ClosureType>,
    close_balance_b: Option<u64>,
}

fn fetch_channel_facts(conn: &Connection) -> rusqlite::Result<Vec<ChannelFacts>> {
    let mut stmt = conn.prepare("SELECT node0, node1, satoshis, open, close FROM channels")?;
    let rows = stmt.query_map([], |row| {
        let node0: String = row.get(0)?;
        let node1: String = row.get(1)?;
        let satoshis: i64 = row.get(2)?;
        let open_json: Option<String> = row.get(3)?;
        let close_json: Option<String> = row.get(4)?;
        Ok((node0, node1, satoshis, open_json, close_json))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (node0, node1, satoshis, open_json, close_json) = row?;
        let open: Option<OpenFacts> = open_json.and_then(|s| serde_json::from_str(&s).ok());
        let close: Option<crate::model::CloseFacts> =
            close_json.and_then(|s| serde_json::from_str(&s).ok());
        out.push(ChannelFacts {
            nodes: [node0, node1],
            satoshis: satoshis as u64,
            open,
            close_block: close.as_ref().map(|c| c.block),
            close_fee: close.as_ref().map(|c| c.fee),
            close_type: close.as_ref().map(|c| c.close_type),
            close_balance_b: close.as_ref().map(|c| c.balance.b),
        });
    }
    Ok(out)
}

fn fetch_latest_aliases(conn: &Connection) -> rusqlite::Result<HashMap<String, String>> {
    let mut stmt = conn.prepare(
        "SELECT pubkey, alias FROM nodealiases a \
         WHERE first_seen = (SELECT max(first_seen) FROM nodealiases b WHERE b.pubkey = a.pubkey)",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    let mut map = HashMap::new();
    for row in rows {
        let (pubkey, alias) = row?;
        map.insert(pubkey, alias);
    }
    Ok(map)
}

fn max_opt(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::SqliteDb;
    use crate::database::Database;
    use crate::model::{Balance, CloseFacts};

    #[test]
    fn recompute_produces_node_aggregate() {
        let mut db = SqliteDb::open_in_memory().unwrap();
        let scid: crate::types::ShortChannelId = "500000x1x0".parse().unwrap();
        db.upsert_channel_from_gossip(&scid, &["alice".to_string(), "bob".to_string()], 100_000, 0)
            .unwrap();
        db.set_open(
            &scid,
            OpenFacts {
                block: 500_000,
                txid: "fundingtx".to_string(),
                address: "addr".to_string(),
                time: 0,
                fee: 500,
            },
            &[],
        )
        .unwrap();
        db.set_close(
            &scid,
            CloseFacts {
                block: 500_100,
                txid: "closetx".to_string(),
                time: 0,
                fee: 200,
                close_type: ClosureType::Mutual,
                balance: Balance { a: 60_000, b: 40_000 },
                htlcs: vec![],
            },
            &[],
            &[],
            None,
            None,
        )
        .unwrap();

        db.recompute_aggregates().unwrap();

        let count: i64 = db
            .conn()
            .query_row("SELECT count(*) FROM nodes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }
}
