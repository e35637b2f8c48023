//! Error kinds, one per external boundary, following spec.md §7.
//!
//! Nothing about a single channel is allowed to poison the whole pipeline:
//! callers match on these and either skip the current item or, for
//! [`CoreError::Database`], abort the run.

use crate::types::ShortChannelId;

/// Errors talking to the chain client (bitcoind RPC or Esplora HTTP).
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("transient RPC failure: {0}")]
    TransientRpc(String),

    #[error("funding output for {0} is not spent yet (channel still open)")]
    ChannelStillOpen(ShortChannelId),

    #[error("a close output's follow-up spend is not confirmed yet")]
    OutputNotSpentYet,

    #[error("malformed RPC response: {0}")]
    MalformedResponse(String),
}

/// Errors talking to the gossip RPC node.
#[derive(Debug, thiserror::Error)]
pub enum GossipError {
    #[error("transient gossip RPC failure: {0}")]
    TransientRpc(String),

    #[error("malformed gossip response: {0}")]
    MalformedResponse(String),
}

/// Top-level error for the pipeline runner (the daemon binds this into
/// `anyhow::Error` at its boundary).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("chain client error: {0}")]
    Chain(#[from] ChainError),

    #[error("gossip client error: {0}")]
    Gossip(#[from] GossipError),

    #[error("database unreachable: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database unreachable: {0}")]
    DatabaseMessage(String),
}
