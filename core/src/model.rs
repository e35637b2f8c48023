//! The data model described in spec.md §3.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{NodeIndex, ShortChannelId};

/// One of the five closure-type labels a close can resolve to (plus the
/// derived `force_unused` bucket, which only the materializer computes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClosureType {
    Unknown,
    Unused,
    Mutual,
    Force,
    Penalty,
}

impl ClosureType {
    pub fn as_str(self) -> &'static str {
        match self {
            ClosureType::Unknown => "unknown",
            ClosureType::Unused => "unused",
            ClosureType::Mutual => "mutual",
            ClosureType::Force => "force",
            ClosureType::Penalty => "penalty",
        }
    }
}

/// Immutable once set: the on-chain facts of a channel's funding
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFacts {
    pub block: u32,
    pub txid: String,
    pub address: String,
    pub time: u32,
    pub fee: i64,
}

/// A single HTLC output's eventual disposition, resolved once the closer
/// side is known (spec.md §4.5).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtlcDisposition {
    pub amount: u64,
    /// The side that offered this HTLC.
    pub offerer: String,
    pub fulfilled: bool,
}

/// Per-side settlement in a close: satoshis that ended up on `a`'s side and
/// `b`'s side respectively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub a: u64,
    pub b: u64,
}

/// Written once: the on-chain facts of the transaction that spent the
/// funding output, plus the classifier's verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseFacts {
    pub block: u32,
    pub txid: String,
    pub time: u32,
    pub fee: i64,
    #[serde(rename = "type")]
    pub close_type: ClosureType,
    pub balance: Balance,
    pub htlcs: Vec<HtlcDisposition>,
}

/// Set-of-txids partitioned by which side of the channel they belong to,
/// append-only (set union on update).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelTxs {
    #[serde(default)]
    pub a: BTreeSet<String>,
    #[serde(default)]
    pub b: BTreeSet<String>,
    #[serde(default)]
    pub funding: BTreeSet<String>,
}

impl ChannelTxs {
    /// All txids belonging to side `a`, `b`, or the funding set — used by
    /// the deducer's match rules (`y.txs.a ∪ y.txs.b ∪ y.txs.funding`).
    pub fn all(&self) -> BTreeSet<String> {
        self.a
            .union(&self.b)
            .cloned()
            .collect::<BTreeSet<_>>()
            .union(&self.funding)
            .cloned()
            .collect()
    }
}

/// The central entity: a payment channel, keyed by its short_channel_id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub short_channel_id: ShortChannelId,
    /// Endpoints sorted lexicographically so indexing is stable.
    pub nodes: [String; 2],
    pub satoshis: u64,
    pub last_seen: i64,
    pub open: Option<OpenFacts>,
    pub close: Option<CloseFacts>,
    #[serde(default)]
    pub txs: ChannelTxs,
    pub a: Option<NodeIndex>,
    pub b: Option<NodeIndex>,
    pub funder: Option<NodeIndex>,
    /// `null`, `"a"`, `"b"`, or (for penalty closes) the appropriated side.
    pub closer: Option<String>,
    /// Only set for penalty closes: the side whose output was swept by the
    /// counterparty.
    pub taken: Option<String>,
}

impl Channel {
    pub fn new(scid: ShortChannelId, nodes: [String; 2], satoshis: u64, last_seen: i64) -> Self {
        Channel {
            short_channel_id: scid,
            nodes,
            satoshis,
            last_seen,
            open: None,
            close: None,
            txs: ChannelTxs::default(),
            a: None,
            b: None,
            funder: None,
            closer: None,
            taken: None,
        }
    }

    pub fn node_at(&self, idx: NodeIndex) -> &str {
        &self.nodes[idx.as_usize()]
    }

    /// Invariant from spec.md §3: when both `a` and `b` are known and the
    /// channel is not a penalty close, they must disagree.
    pub fn satisfies_ab_invariant(&self) -> bool {
        match (self.a, self.b, &self.close) {
            (Some(a), Some(b), Some(close)) if close.close_type != ClosureType::Penalty => {
                a.as_usize() != b.as_usize()
            }
            _ => true,
        }
    }
}

/// A row in the node alias history: appended only when the alias/color
/// differs from the latest row for that pubkey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAlias {
    pub pubkey: String,
    pub alias: String,
    pub color: String,
    pub first_seen: i64,
    pub last_seen: i64,
}

/// A row in the feature-bitstring history, same append-on-change pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFeatures {
    pub pubkey: String,
    pub features: String,
    pub first_seen: i64,
    pub last_seen: i64,
}

/// A fee policy row for one direction of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub base_fee_millisatoshi: u64,
    pub fee_per_millionth: u64,
    pub delay: u32,
    pub update_time: i64,
}

/// `(short_channel_id, txid, tries)`: candidate opens seen on-chain that
/// aren't (yet) in the gossip set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TryLater {
    pub short_channel_id: ShortChannelId,
    pub txid: String,
    pub tries: u32,
}

pub const TRY_LATER_MAX_TRIES: u32 = 7;
