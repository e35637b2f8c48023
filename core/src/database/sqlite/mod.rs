//! SQLite-backed [`Database`] implementation.
//!
//! Follows the teacher's `database::sqlite` conventions: a small
//! `db_exec`/`db_query` helper pair, a `DB_VERSION` with a migration ladder
//! (currently a single version, since this is the first release of the
//! schema), and `open_or_create` that lays down the full schema in one
//! shot for a brand new database file.

mod schema;
mod utils;

use std::collections::HashMap;
use std::path;

use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::model::{
    Balance, Channel, ChannelTxs, CloseFacts, ClosureType, HtlcDisposition, NodeAlias,
    NodeFeatures, OpenFacts, Policy, TryLater,
};
use crate::types::ShortChannelId;

use utils::{db_exec, db_query};

pub const DB_VERSION: i64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SqliteDbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported database version {0}, expected {DB_VERSION}")]
    UnsupportedVersion(i64),
    #[error("could not create database file: {0}")]
    Io(#[from] std::io::Error),
}

pub struct SqliteDb {
    conn: rusqlite::Connection,
}

impl SqliteDb {
    /// Open an existing database, or create and initialize a fresh one at
    /// `path` if it doesn't exist yet.
    pub fn open_or_create(path: &path::Path) -> Result<Self, SqliteDbError> {
        let fresh = !path.exists();
        let mut conn = rusqlite::Connection::open(path)?;
        if fresh {
            Self::create_fresh(&mut conn)?;
        } else {
            Self::maybe_apply_migration(&mut conn)?;
        }
        Ok(SqliteDb { conn })
    }

    pub fn open_in_memory() -> Result<Self, SqliteDbError> {
        let mut conn = rusqlite::Connection::open_in_memory()?;
        Self::create_fresh(&mut conn)?;
        Ok(SqliteDb { conn })
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &rusqlite::Connection {
        &self.conn
    }

    fn create_fresh(conn: &mut rusqlite::Connection) -> Result<(), SqliteDbError> {
        db_exec(conn, |tx| {
            tx.execute_batch(schema::SCHEMA)?;
            tx.execute("INSERT INTO version (version) VALUES (?1)", params![DB_VERSION])?;
            Ok(())
        })?;
        Ok(())
    }

    fn maybe_apply_migration(conn: &mut rusqlite::Connection) -> Result<(), SqliteDbError> {
        let version: i64 = conn.query_row("SELECT version FROM version", [], |row| row.get(0))?;
        match version {
            DB_VERSION => {
                log::debug!("database is up to date (version {version})");
                Ok(())
            }
            other => Err(SqliteDbError::UnsupportedVersion(other)),
        }
    }

    fn row_to_channel(
        scid: ShortChannelId,
        node0: String,
        node1: String,
        satoshis: i64,
        last_seen: i64,
        open_json: Option<String>,
        close_json: Option<String>,
        txs_json: String,
        a: Option<i64>,
        b: Option<i64>,
        funder: Option<i64>,
        closer: Option<String>,
        taken: Option<String>,
    ) -> rusqlite::Result<Channel> {
        let open: Option<OpenFacts> = open_json
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(json_err)?;
        let close: Option<CloseFacts> = close_json
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(json_err)?;
        let txs: ChannelTxs = serde_json::from_str(&txs_json).map_err(json_err)?;
        Ok(Channel {
            short_channel_id: scid,
            nodes: [node0, node1],
            satoshis: satoshis as u64,
            last_seen,
            open,
            close,
            txs,
            a: a.map(node_index_from_i64),
            b: b.map(node_index_from_i64),
            funder: funder.map(node_index_from_i64),
            closer,
            taken,
        })
    }
}

fn node_index_from_i64(v: i64) -> crate::types::NodeIndex {
    crate::types::NodeIndex::from_bool_is_zero(v == 0)
}

fn json_err(e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(e))
}

const CHANNEL_COLUMNS: &str = "short_channel_id, node0, node1, satoshis, last_seen, open, close, txs, a, b, funder, closer, taken";

fn query_channel_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Channel> {
    let scid_str: String = row.get(0)?;
    let scid: ShortChannelId = scid_str
        .parse()
        .map_err(|_| rusqlite::Error::InvalidColumnType(0, "short_channel_id".into(), rusqlite::types::Type::Text))?;
    SqliteDb::row_to_channel(
        scid,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
    )
}

impl Database for SqliteDb {
    fn upsert_channel_from_gossip(
        &mut self,
        scid: &ShortChannelId,
        nodes: &[String; 2],
        satoshis: u64,
        now: i64,
    ) -> rusqlite::Result<bool> {
        let scid_str = scid.to_string();
        let existed: bool = self
            .conn
            .query_row(
                "SELECT 1 FROM channels WHERE short_channel_id = ?1",
                params![scid_str],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);

        if existed {
            self.conn.execute(
                "UPDATE channels SET last_seen = ?1 WHERE short_channel_id = ?2",
                params![now, scid_str],
            )?;
        } else {
            self.conn.execute(
                "INSERT INTO channels (short_channel_id, node0, node1, satoshis, last_seen) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![scid_str, nodes[0], nodes[1], satoshis as i64, now],
            )?;
        }
        Ok(!existed)
    }

    fn latest_policy(
        &mut self,
        scid: &ShortChannelId,
        direction: u8,
    ) -> rusqlite::Result<Option<Policy>> {
        self.conn
            .query_row(
                "SELECT base_fee_millisatoshi, fee_per_millionth, delay, update_time \
                 FROM policies WHERE short_channel_id = ?1 AND direction = ?2 \
                 ORDER BY update_time DESC LIMIT 1",
                params![scid.to_string(), direction],
                |row| {
                    Ok(Policy {
                        base_fee_millisatoshi: row.get::<_, i64>(0)? as u64,
                        fee_per_millionth: row.get::<_, i64>(1)? as u64,
                        delay: row.get::<_, i64>(2)? as u32,
                        update_time: row.get(3)?,
                    })
                },
            )
            .optional()
    }

    fn insert_policy(
        &mut self,
        scid: &ShortChannelId,
        direction: u8,
        policy: Policy,
    ) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO policies \
             (short_channel_id, direction, base_fee_millisatoshi, fee_per_millionth, delay, update_time) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                scid.to_string(),
                direction,
                policy.base_fee_millisatoshi as i64,
                policy.fee_per_millionth as i64,
                policy.delay,
                policy.update_time,
            ],
        )?;
        Ok(())
    }

    fn latest_alias(&mut self, pubkey: &str) -> rusqlite::Result<Option<(String, String)>> {
        self.conn
            .query_row(
                "SELECT alias, color FROM nodealiases WHERE pubkey = ?1 \
                 ORDER BY first_seen DESC LIMIT 1",
                params![pubkey],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
    }

    fn insert_alias(&mut self, row: NodeAlias) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO nodealiases (pubkey, alias, color, first_seen, last_seen) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![row.pubkey, row.alias, row.color, row.first_seen, row.last_seen],
        )?;
        Ok(())
    }

    fn latest_features(&mut self, pubkey: &str) -> rusqlite::Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT features FROM features WHERE pubkey = ?1 \
                 ORDER BY first_seen DESC LIMIT 1",
                params![pubkey],
                |row| row.get(0),
            )
            .optional()
    }

    fn insert_features(&mut self, row: NodeFeatures) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO features (pubkey, features, first_seen, last_seen) VALUES (?1, ?2, ?3, ?4)",
            params![row.pubkey, row.features, row.first_seen, row.last_seen],
        )?;
        Ok(())
    }

    fn funding_outpoint_map(&mut self) -> rusqlite::Result<HashMap<String, ShortChannelId>> {
        let rows: Vec<(String, Option<String>)> = db_query(
            &self.conn,
            "SELECT short_channel_id, open FROM channels",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let mut map = HashMap::with_capacity(rows.len());
        for (scid_str, open_json) in rows {
            let scid: ShortChannelId = match scid_str.parse() {
                Ok(s) => s,
                Err(_) => continue,
            };
            // Channels with no `open` yet have no funding txid to index by;
            // they stay out of the map until C4 fills it in.
            let funding_txid = open_json
                .and_then(|json| serde_json::from_str::<OpenFacts>(&json).ok())
                .map(|o| o.txid);
            if let Some(txid) = funding_txid {
                map.insert(txid, scid);
            }
        }
        Ok(map)
    }

    fn get_channel(&mut self, scid: &ShortChannelId) -> rusqlite::Result<Option<Channel>> {
        self.conn
            .query_row(
                &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE short_channel_id = ?1"),
                params![scid.to_string()],
                query_channel_row,
            )
            .optional()
    }

    fn insert_channel_if_missing(&mut self, channel: &Channel) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO channels (short_channel_id, node0, node1, satoshis, last_seen) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT (short_channel_id) DO NOTHING",
            params![
                channel.short_channel_id.to_string(),
                channel.nodes[0],
                channel.nodes[1],
                channel.satoshis as i64,
                channel.last_seen,
            ],
        )?;
        Ok(())
    }

    fn set_open(
        &mut self,
        scid: &ShortChannelId,
        open: OpenFacts,
        funding_txids: &[String],
    ) -> rusqlite::Result<()> {
        let scid_str = scid.to_string();
        db_exec(&mut self.conn, |tx| {
            let mut txs: ChannelTxs = tx
                .query_row(
                    "SELECT txs FROM channels WHERE short_channel_id = ?1",
                    params![scid_str],
                    |row| row.get::<_, String>(0),
                )
                .map(|s| serde_json::from_str(&s).unwrap_or_default())
                .unwrap_or_default();
            txs.funding.extend(funding_txids.iter().cloned());

            let open_json = serde_json::to_string(&open).map_err(json_err)?;
            let txs_json = serde_json::to_string(&txs).map_err(json_err)?;
            tx.execute(
                "UPDATE channels SET open = ?1, txs = ?2 WHERE short_channel_id = ?3",
                params![open_json, txs_json, scid_str],
            )?;
            Ok(())
        })
    }

    fn set_close(
        &mut self,
        scid: &ShortChannelId,
        close: CloseFacts,
        txs_a: &[String],
        txs_b: &[String],
        closer: Option<&str>,
        taken: Option<&str>,
    ) -> rusqlite::Result<()> {
        let scid_str = scid.to_string();
        db_exec(&mut self.conn, |tx| {
            let mut txs: ChannelTxs = tx
                .query_row(
                    "SELECT txs FROM channels WHERE short_channel_id = ?1",
                    params![scid_str],
                    |row| row.get::<_, String>(0),
                )
                .map(|s| serde_json::from_str(&s).unwrap_or_default())
                .unwrap_or_default();
            txs.a.extend(txs_a.iter().cloned());
            txs.b.extend(txs_b.iter().cloned());

            let close_json = serde_json::to_string(&close).map_err(json_err)?;
            let txs_json = serde_json::to_string(&txs).map_err(json_err)?;
            tx.execute(
                "UPDATE channels SET close = ?1, txs = ?2, closer = ?3, taken = ?4 \
                 WHERE short_channel_id = ?5",
                params![close_json, txs_json, closer, taken, scid_str],
            )?;
            Ok(())
        })
    }

    fn upsert_try_later(&mut self, scid: &ShortChannelId, txid: &str) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO try_later (short_channel_id, txid, tries) VALUES (?1, ?2, 0) \
             ON CONFLICT (short_channel_id) DO UPDATE SET tries = try_later.tries + 1",
            params![scid.to_string(), txid],
        )?;
        Ok(())
    }

    fn try_later_candidates(&mut self, max_tries: u32) -> rusqlite::Result<Vec<TryLater>> {
        db_query(
            &self.conn,
            "SELECT short_channel_id, txid, tries FROM try_later WHERE tries < ?1",
            params![max_tries],
            |row| {
                let scid_str: String = row.get(0)?;
                let scid = scid_str.parse().map_err(|_| {
                    rusqlite::Error::InvalidColumnType(
                        0,
                        "short_channel_id".into(),
                        rusqlite::types::Type::Text,
                    )
                })?;
                Ok(TryLater {
                    short_channel_id: scid,
                    txid: row.get(1)?,
                    tries: row.get::<_, i64>(2)? as u32,
                })
            },
        )
    }

    fn channels_pending_deduction(&mut self) -> rusqlite::Result<Vec<ShortChannelId>> {
        let rows: Vec<String> = db_query(
            &self.conn,
            "SELECT short_channel_id FROM channels \
             WHERE close IS NOT NULL AND (a IS NULL OR funder IS NULL)",
            [],
            |row| row.get(0),
        )?;
        Ok(rows.into_iter().filter_map(|s| s.parse().ok()).collect())
    }

    fn channels_sharing_a_node(&mut self, scid: &ShortChannelId) -> rusqlite::Result<Vec<Channel>> {
        let channel = match self.get_channel(scid)? {
            Some(c) => c,
            None => return Ok(vec![]),
        };
        db_query(
            &self.conn,
            &format!(
                "SELECT {CHANNEL_COLUMNS} FROM channels \
                 WHERE short_channel_id != ?1 AND (node0 IN (?2, ?3) OR node1 IN (?2, ?3))"
            ),
            params![scid.to_string(), channel.nodes[0], channel.nodes[1]],
            query_channel_row,
        )
    }

    fn set_label_if_null(
        &mut self,
        scid: &ShortChannelId,
        label: &str,
        value: u8,
    ) -> rusqlite::Result<bool> {
        let column = match label {
            "a" => "a",
            "b" => "b",
            "funder" => "funder",
            other => {
                return Err(rusqlite::Error::InvalidParameterName(other.to_string()));
            }
        };
        let updated = self.conn.execute(
            &format!(
                "UPDATE channels SET {column} = ?1 WHERE short_channel_id = ?2 AND {column} IS NULL"
            ),
            params![value, scid.to_string()],
        )?;
        Ok(updated > 0)
    }

    fn recompute_aggregates(&mut self) -> rusqlite::Result<()> {
        crate::materializer::recompute(&mut self.conn)
    }
}
