//! Esplora HTTP client with mirror failover (spec.md §4.1, §6).
//!
//! A full node doesn't expose "what spent this output", so the pipeline
//! leans on an Esplora-compatible HTTP API for that one query. Persistent
//! failure across every configured mirror is the only thing that becomes a
//! hard error here; a single mirror's hiccup just moves on to the next one,
//! tried in random order per spec.md §6.

use rand::seq::SliceRandom;

use super::OutSpend;
use crate::error::ChainError;

pub struct Esplora {
    mirrors: Vec<String>,
}

impl Esplora {
    pub fn new(mirrors: Vec<String>) -> Self {
        assert!(!mirrors.is_empty(), "at least one esplora mirror is required");
        Esplora { mirrors }
    }

    pub fn get_outspends(&self, txid: &str) -> Result<Vec<OutSpend>, ChainError> {
        let path = format!("/tx/{txid}/outspends");
        self.call(&path)
    }

    fn call<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ChainError> {
        let mut order: Vec<&String> = self.mirrors.iter().collect();
        order.shuffle(&mut rand::thread_rng());

        let mut last_err = None;
        for base in order {
            match self.call_one(base, path) {
                Ok(value) => return Ok(value),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            ChainError::TransientRpc("no esplora mirrors configured".to_string())
        }))
    }

    fn call_one<T: serde::de::DeserializeOwned>(
        &self,
        base: &str,
        path: &str,
    ) -> Result<T, ChainError> {
        let url = format!("{base}{path}");
        let response = minreq::get(&url)
            .with_timeout(20)
            .send()
            .map_err(|e| ChainError::TransientRpc(format!("{url}: {e}")))?;
        if response.status_code != 200 {
            return Err(ChainError::TransientRpc(format!(
                "{url}: HTTP {}",
                response.status_code
            )));
        }
        response
            .json::<T>()
            .map_err(|e| ChainError::MalformedResponse(format!("{url}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "at least one esplora mirror")]
    fn rejects_empty_mirror_list() {
        Esplora::new(vec![]);
    }
}
