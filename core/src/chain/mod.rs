//! Interface to the blockchain: a full node for block/tx/script data, and
//! Esplora for the spend-graph queries a full node doesn't expose
//! (spec.md §4.1, §6).

pub mod bitcoind;
pub mod esplora;

use serde::{Deserialize, Serialize};

use crate::error::ChainError;

/// Converts a bitcoind-style BTC decimal amount into satoshis, rounding as
/// spec.md §4.5 requires ("Values carrying fractional satoshis must be
/// rounded via integer conversion of `value × 10⁸`, never stored as
/// floats").
pub fn btc_to_sat(value: f64) -> i64 {
    (value * 100_000_000.0).round() as i64
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScriptPubKey {
    #[serde(rename = "type")]
    pub script_type: String,
    #[serde(default)]
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TxOut {
    pub value: f64,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
}

impl TxOut {
    pub fn value_sat(&self) -> i64 {
        btc_to_sat(self.value)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TxIn {
    /// Absent for a coinbase input.
    pub txid: Option<String>,
    pub vout: Option<u32>,
    #[serde(default, rename = "txinwitness")]
    pub witness: Vec<String>,
}

impl TxIn {
    pub fn is_coinbase(&self) -> bool {
        self.txid.is_none()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Tx {
    pub txid: String,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    /// Present on txs returned as part of a full block fetch.
    #[serde(default)]
    pub blocktime: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Block {
    pub hash: String,
    pub height: u32,
    pub time: u32,
    pub tx: Vec<Tx>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DecodedScript {
    pub asm: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpendStatus {
    #[serde(default)]
    pub confirmed: bool,
    pub block_height: Option<u32>,
    pub block_time: Option<u32>,
}

/// One entry of an Esplora `/tx/{txid}/outspends` response, indexed by
/// output index.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutSpend {
    pub spent: bool,
    pub txid: Option<String>,
    pub vin: Option<u32>,
    #[serde(default)]
    pub status: SpendStatus,
}

impl Default for SpendStatus {
    fn default() -> Self {
        SpendStatus {
            confirmed: false,
            block_height: None,
            block_time: None,
        }
    }
}

/// The pipeline's view of the blockchain. Implemented by [`bitcoind::Bitcoind`]
/// (full-node RPC) composed with [`esplora::Esplora`] (the spend-graph
/// queries no full node RPC exposes).
pub trait ChainClient: Send + Sync {
    /// Current chain tip height, captured once at run start (spec.md §9:
    /// "treat `tip` as a value captured at run start, not re-read mid-scan,
    /// to keep the `near_tip` predicate stable").
    fn tip(&self) -> Result<u32, ChainError>;

    /// Fetch a block with full transactions.
    fn get_block_at(&self, height: u32) -> Result<Block, ChainError>;

    /// Fetch a single transaction.
    fn get_tx(&self, txid: &str) -> Result<Tx, ChainError>;

    /// Decode a script's hex into its ASM representation.
    fn decode_script(&self, hex: &str) -> Result<DecodedScript, ChainError>;

    /// Fetch the outspends of a transaction, indexed by output index.
    fn get_outspends(&self, txid: &str) -> Result<Vec<OutSpend>, ChainError>;
}

/// Production [`ChainClient`]: bitcoind for block/tx/script data, Esplora
/// for the spend graph.
pub struct Chain {
    pub bitcoind: bitcoind::Bitcoind,
    pub esplora: esplora::Esplora,
}

impl Chain {
    pub fn new(bitcoind: bitcoind::Bitcoind, esplora: esplora::Esplora) -> Self {
        Chain { bitcoind, esplora }
    }
}

impl ChainClient for Chain {
    fn tip(&self) -> Result<u32, ChainError> {
        self.bitcoind.tip()
    }

    fn get_block_at(&self, height: u32) -> Result<Block, ChainError> {
        self.bitcoind.get_block_at(height)
    }

    fn get_tx(&self, txid: &str) -> Result<Tx, ChainError> {
        self.bitcoind.get_tx(txid)
    }

    fn decode_script(&self, hex: &str) -> Result<DecodedScript, ChainError> {
        self.bitcoind.decode_script(hex)
    }

    fn get_outspends(&self, txid: &str) -> Result<Vec<OutSpend>, ChainError> {
        self.esplora.get_outspends(txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn btc_to_sat_rounds_fractional_satoshis() {
        // 0.00000001999 BTC is 1.999 sat, must round to 2, never truncate
        // and never be kept as a float.
        assert_eq!(btc_to_sat(0.000_000_019_99), 2);
        assert_eq!(btc_to_sat(1.23456789), 123_456_789);
        assert_eq!(btc_to_sat(0.0), 0);
    }
}
