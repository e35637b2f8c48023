//! Ingestion and chain-analysis pipeline for a Bitcoin-anchored
//! payment-channel network.
//!
//! This crate implements the core, trust-the-full-node pipeline: pull the
//! public gossip graph, walk the chain to detect channel closures, classify
//! each closure by its witness shape, and run a cross-channel identity
//! deducer. Everything that talks to the outside world (the gossip node,
//! bitcoind, Esplora, the database file) is behind a small trait so the
//! algorithms can be tested without any of it running.

pub mod chain;
pub mod classifier;
pub mod database;
pub mod deducer;
pub mod error;
pub mod gossip;
pub mod materializer;
pub mod model;
pub mod open;
pub mod scanner;
pub mod types;

pub use error::{ChainError, CoreError, GossipError};
pub use types::{ScriptSigType, ShortChannelId, Side};
