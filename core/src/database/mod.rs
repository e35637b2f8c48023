//! Persistence boundary. `sqlite` is the only implementation but every
//! other module talks to the [`Database`] trait so the pipeline stages can
//! be tested against an in-memory database.

pub mod sqlite;

use std::collections::HashMap;

use crate::model::{Channel, CloseFacts, NodeAlias, NodeFeatures, OpenFacts, Policy, TryLater};
use crate::types::ShortChannelId;

/// Everything the pipeline needs to persist or look up, matching the data
/// model of spec.md §3.
pub trait Database: Send {
    // --- Gossip importer (C2) ---

    /// Upsert a channel row from a gossip listing. Returns `true` if the
    /// channel is newly created (no prior row existed).
    fn upsert_channel_from_gossip(
        &mut self,
        scid: &ShortChannelId,
        nodes: &[String; 2],
        satoshis: u64,
        now: i64,
    ) -> rusqlite::Result<bool>;

    fn latest_policy(
        &mut self,
        scid: &ShortChannelId,
        direction: u8,
    ) -> rusqlite::Result<Option<Policy>>;

    fn insert_policy(
        &mut self,
        scid: &ShortChannelId,
        direction: u8,
        policy: Policy,
    ) -> rusqlite::Result<()>;

    fn latest_alias(&mut self, pubkey: &str) -> rusqlite::Result<Option<(String, String)>>;

    fn insert_alias(&mut self, row: NodeAlias) -> rusqlite::Result<()>;

    fn latest_features(&mut self, pubkey: &str) -> rusqlite::Result<Option<String>>;

    fn insert_features(&mut self, row: NodeFeatures) -> rusqlite::Result<()>;

    // --- Block scanner (C3) / open handler (C4) / closure classifier (C5) ---
    //
    // The scan cursor itself is not part of this trait: spec.md §6 is
    // explicit that it is "a single file whose only content is the ASCII
    // decimal cursor", so it's owned by the daemon's `cursor` module
    // instead of the database.

    /// `funding_txid -> scid` for every channel that has either an on-chain
    /// `open.txid` or (absent that) a gossip-derived scid, per spec.md §4.3.
    fn funding_outpoint_map(&mut self) -> rusqlite::Result<HashMap<String, ShortChannelId>>;

    fn get_channel(&mut self, scid: &ShortChannelId) -> rusqlite::Result<Option<Channel>>;

    fn insert_channel_if_missing(&mut self, channel: &Channel) -> rusqlite::Result<()>;

    /// Write `open`, union the given txids into `txs.funding`.
    fn set_open(
        &mut self,
        scid: &ShortChannelId,
        open: OpenFacts,
        funding_txids: &[String],
    ) -> rusqlite::Result<()>;

    /// Write `close`, union txids into `txs.a`/`txs.b`, and set
    /// `closer`/`taken`.
    fn set_close(
        &mut self,
        scid: &ShortChannelId,
        close: CloseFacts,
        txs_a: &[String],
        txs_b: &[String],
        closer: Option<&str>,
        taken: Option<&str>,
    ) -> rusqlite::Result<()>;

    fn upsert_try_later(&mut self, scid: &ShortChannelId, txid: &str) -> rusqlite::Result<()>;

    fn try_later_candidates(&mut self, max_tries: u32) -> rusqlite::Result<Vec<TryLater>>;

    // --- Chain-analysis deducer (C6) ---

    /// Channels with a known close block but an incomplete identity
    /// (`a` or `funder` still null).
    fn channels_pending_deduction(&mut self) -> rusqlite::Result<Vec<ShortChannelId>>;

    /// Every channel sharing at least one node pubkey with `scid`, other
    /// than `scid` itself.
    fn channels_sharing_a_node(&mut self, scid: &ShortChannelId) -> rusqlite::Result<Vec<Channel>>;

    /// Set `label` (`"a"`, `"b"`, `"funder"`) on `scid` to `value`, but only
    /// if it is currently null (conservative monotone refinement).
    fn set_label_if_null(
        &mut self,
        scid: &ShortChannelId,
        label: &str,
        value: u8,
    ) -> rusqlite::Result<bool>;

    // --- Materializer (C7) ---

    fn recompute_aggregates(&mut self) -> rusqlite::Result<()>;
}
