//! Bitcoin full-node RPC client (spec.md §4.1, §6).
//!
//! Wraps the `jsonrpc` crate's blocking minreq transport, the same way the
//! teacher daemon talks to bitcoind. A persistent failure here aborts the
//! current block: the caller (the scanner) simply does not advance its
//! cursor past it.

use std::time::Duration;

use jsonrpc::simple_http::{self, SimpleHttpTransport};
use jsonrpc::Client as RpcClient;
use serde::Serialize;
use serde_json::value::RawValue;

use super::{Block, DecodedScript, Tx};
use crate::error::ChainError;

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Bitcoind {
    client: RpcClient,
}

impl Bitcoind {
    pub fn new(url: &str, user: &str, password: &str) -> Result<Self, ChainError> {
        let transport = SimpleHttpTransport::builder()
            .url(url)
            .map_err(|e| ChainError::MalformedResponse(e.to_string()))?
            .timeout(RPC_TIMEOUT)
            .auth(user, Some(password))
            .build();
        Ok(Bitcoind {
            client: RpcClient::with_transport(transport),
        })
    }

    fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: &[Box<RawValue>],
    ) -> Result<T, ChainError> {
        let request = self.client.build_request(method, params);
        let response = self
            .client
            .send_request(request)
            .map_err(|e| classify_rpc_error(method, e))?;
        response
            .result()
            .map_err(|e| ChainError::MalformedResponse(format!("{method}: {e}")))
    }

    pub fn tip(&self) -> Result<u32, ChainError> {
        #[derive(serde::Deserialize)]
        struct BlockchainInfo {
            blocks: u32,
        }
        let info: BlockchainInfo = self.call("getblockchaininfo", &[])?;
        Ok(info.blocks)
    }

    pub fn get_block_at(&self, height: u32) -> Result<Block, ChainError> {
        let height_param = serde_json::value::to_raw_value(&height)
            .map_err(|e| ChainError::MalformedResponse(e.to_string()))?;
        let hash: String = self.call("getblockhash", &[height_param])?;
        let hash_param = serde_json::value::to_raw_value(&hash)
            .map_err(|e| ChainError::MalformedResponse(e.to_string()))?;
        let verbosity_param = serde_json::value::to_raw_value(&2u8)
            .map_err(|e| ChainError::MalformedResponse(e.to_string()))?;
        let mut block: Block = self.call("getblock", &[hash_param, verbosity_param])?;
        block.height = height;
        Ok(block)
    }

    pub fn get_tx(&self, txid: &str) -> Result<Tx, ChainError> {
        let params = raw_params(&(txid, true))?;
        self.call("getrawtransaction", &params)
    }

    pub fn decode_script(&self, hex: &str) -> Result<DecodedScript, ChainError> {
        let params = raw_params(&(hex,))?;
        self.call("decodescript", &params)
    }
}

/// Builds a tuple's fields into a `Vec<Box<RawValue>>` parameter list,
/// matching `jsonrpc::Client::build_request`'s expected shape.
fn raw_params<T: Serialize>(args: &T) -> Result<Vec<Box<RawValue>>, ChainError> {
    let value = serde_json::to_value(args).map_err(|e| ChainError::MalformedResponse(e.to_string()))?;
    let array = value
        .as_array()
        .cloned()
        .unwrap_or_else(|| vec![value.clone()]);
    array
        .into_iter()
        .map(|v| RawValue::from_string(v.to_string()).map_err(|e| ChainError::MalformedResponse(e.to_string())))
        .collect()
}

fn classify_rpc_error(method: &str, err: jsonrpc::Error) -> ChainError {
    match err {
        jsonrpc::Error::Transport(_) => {
            ChainError::TransientRpc(format!("{method}: transport error"))
        }
        jsonrpc::Error::Rpc(rpc_err) => {
            ChainError::MalformedResponse(format!("{method}: {rpc_err:?}"))
        }
        other => ChainError::TransientRpc(format!("{method}: {other}")),
    }
}

impl From<simple_http::Error> for ChainError {
    fn from(e: simple_http::Error) -> Self {
        ChainError::TransientRpc(e.to_string())
    }
}
