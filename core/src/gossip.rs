//! Gossip importer (C2): pulls `listchannels`/`listnodes` from a node-RPC
//! endpoint and upserts the channel/node tables (spec.md §4.2, §6).

use serde::Deserialize;

use crate::database::Database;
use crate::error::GossipError;
use crate::model::{NodeAlias, NodeFeatures, Policy};
use crate::types::ShortChannelId;

#[derive(Debug, Deserialize)]
struct ListChannelsResponse {
    channels: Vec<GossipChannel>,
}

#[derive(Debug, Deserialize)]
struct GossipChannel {
    short_channel_id: String,
    source: String,
    destination: String,
    public: bool,
    satoshis: u64,
    last_update: i64,
    base_fee_millisatoshi: u64,
    fee_per_millionth: u64,
    delay: u32,
}

#[derive(Debug, Deserialize)]
struct ListNodesResponse {
    nodes: Vec<GossipNode>,
}

#[derive(Debug, Deserialize)]
struct GossipNode {
    nodeid: String,
    #[serde(default)]
    alias: Option<String>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    features: Option<String>,
}

/// The gossip RPC surface the importer needs. A bearer-style `X-Access`
/// header is the node's own auth scheme, not ours to interpret.
pub trait GossipClient: Send + Sync {
    fn list_channels(&self) -> Result<Vec<GossipChannelInfo>, GossipError>;
    fn list_nodes(&self) -> Result<Vec<GossipNodeInfo>, GossipError>;
}

/// Public, already-parsed shape handed to [`import_channels`] — kept
/// separate from the wire DTOs above so callers (and tests) don't need the
/// `serde` plumbing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipChannelInfo {
    pub short_channel_id: ShortChannelId,
    pub source: String,
    pub destination: String,
    pub public: bool,
    pub satoshis: u64,
    pub last_update: i64,
    pub base_fee_millisatoshi: u64,
    pub fee_per_millionth: u64,
    pub delay: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipNodeInfo {
    pub pubkey: String,
    pub alias: Option<String>,
    pub color: Option<String>,
    pub features: Option<String>,
}

/// HTTP implementation: `POST {url}` with header `X-Access: {token}` and a
/// JSON body `{"method": "listchannels"|"listnodes"}`.
pub struct HttpGossipClient {
    url: String,
    token: String,
}

impl HttpGossipClient {
    pub fn new(url: String, token: String) -> Self {
        HttpGossipClient { url, token }
    }

    fn call<T: serde::de::DeserializeOwned>(&self, method: &str) -> Result<T, GossipError> {
        let response = minreq::post(&self.url)
            .with_header("X-Access", &self.token)
            .with_json(&serde_json::json!({ "method": method }))
            .map_err(|e| GossipError::MalformedResponse(e.to_string()))?
            .with_timeout(30)
            .send()
            .map_err(|e| GossipError::TransientRpc(format!("{method}: {e}")))?;
        if response.status_code != 200 {
            return Err(GossipError::TransientRpc(format!(
                "{method}: HTTP {}",
                response.status_code
            )));
        }
        response
            .json::<T>()
            .map_err(|e| GossipError::MalformedResponse(format!("{method}: {e}")))
    }
}

impl GossipClient for HttpGossipClient {
    fn list_channels(&self) -> Result<Vec<GossipChannelInfo>, GossipError> {
        let resp: ListChannelsResponse = self.call("listchannels")?;
        resp.channels
            .into_iter()
            .map(|ch| {
                let scid = ch
                    .short_channel_id
                    .parse()
                    .map_err(|_| GossipError::MalformedResponse(format!(
                        "invalid short_channel_id '{}'",
                        ch.short_channel_id
                    )))?;
                Ok(GossipChannelInfo {
                    short_channel_id: scid,
                    source: ch.source,
                    destination: ch.destination,
                    public: ch.public,
                    satoshis: ch.satoshis,
                    last_update: ch.last_update,
                    base_fee_millisatoshi: ch.base_fee_millisatoshi,
                    fee_per_millionth: ch.fee_per_millionth,
                    delay: ch.delay,
                })
            })
            .collect()
    }

    fn list_nodes(&self) -> Result<Vec<GossipNodeInfo>, GossipError> {
        let resp: ListNodesResponse = self.call("listnodes")?;
        Ok(resp
            .nodes
            .into_iter()
            .map(|n| GossipNodeInfo {
                pubkey: n.nodeid,
                alias: n.alias,
                color: n.color,
                features: n.features,
            })
            .collect())
    }
}

/// Upsert every publicly-advertised channel, appending a new policy row
/// only when the advertised fee terms differ from the latest known one
/// (spec.md §4.2). Returns the scids that were newly created with no
/// `open` yet, for the caller to hand to the open handler (C4) if it
/// already has on-chain evidence, or leave for the scanner to discover.
pub fn import_channels(
    db: &mut dyn Database,
    listing: &[GossipChannelInfo],
    now: i64,
) -> rusqlite::Result<Vec<ShortChannelId>> {
    let mut newly_created = Vec::new();

    for ch in listing {
        if !ch.public {
            continue;
        }
        let (node0, node1, direction) = if ch.source < ch.destination {
            (ch.source.clone(), ch.destination.clone(), 1u8)
        } else {
            (ch.destination.clone(), ch.source.clone(), 0u8)
        };

        let is_new =
            db.upsert_channel_from_gossip(&ch.short_channel_id, &[node0, node1], ch.satoshis, now)?;

        let up_to_date = db
            .latest_policy(&ch.short_channel_id, direction)?
            .is_some_and(|p| {
                p.base_fee_millisatoshi == ch.base_fee_millisatoshi
                    && p.fee_per_millionth == ch.fee_per_millionth
                    && p.delay == ch.delay
            });
        if !up_to_date {
            db.insert_policy(
                &ch.short_channel_id,
                direction,
                Policy {
                    base_fee_millisatoshi: ch.base_fee_millisatoshi,
                    fee_per_millionth: ch.fee_per_millionth,
                    delay: ch.delay,
                    update_time: ch.last_update,
                },
            )?;
        }

        if is_new {
            if let Some(channel) = db.get_channel(&ch.short_channel_id)? {
                if channel.open.is_none() {
                    newly_created.push(ch.short_channel_id.clone());
                }
            }
        }
    }

    Ok(newly_created)
}

/// Append-on-change alias/feature history for every advertised node
/// (spec.md §4.2, §3).
pub fn import_nodes(
    db: &mut dyn Database,
    listing: &[GossipNodeInfo],
    now: i64,
) -> rusqlite::Result<()> {
    for node in listing {
        if let Some(alias) = &node.alias {
            let color = node.color.clone().unwrap_or_default();
            let unchanged = db
                .latest_alias(&node.pubkey)?
                .is_some_and(|(latest_alias, _)| &latest_alias == alias);
            if !unchanged {
                db.insert_alias(NodeAlias {
                    pubkey: node.pubkey.clone(),
                    alias: alias.clone(),
                    color,
                    first_seen: now,
                    last_seen: now,
                })?;
            }
        }

        if let Some(features) = &node.features {
            let unchanged = db
                .latest_features(&node.pubkey)?
                .is_some_and(|latest| &latest == features);
            if !unchanged {
                db.insert_features(NodeFeatures {
                    pubkey: node.pubkey.clone(),
                    features: features.clone(),
                    first_seen: now,
                    last_seen: now,
                })?;
            }
        }
    }
    Ok(())
}
