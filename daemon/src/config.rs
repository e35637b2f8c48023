//! Daemon configuration: a `Config` struct deserialized from TOML, with
//! defaults for everything the operator doesn't have to think about on day
//! one (spec.md §6, ambient config layer added around it).

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("could not read bitcoind cookie file {path}: {source}")]
    Cookie {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("bitcoind cookie file {0} does not contain a 'user:password' pair")]
    MalformedCookie(PathBuf),
}

fn default_deducer_workers() -> u32 {
    lnchannels_core::deducer::DEFAULT_WORKERS
}

fn default_deducer_sample_probability() -> f64 {
    1.0
}

fn default_rewind_blocks() -> u32 {
    lnchannels_core::scanner::REWIND_BLOCKS
}

fn default_near_tip_blocks() -> u32 {
    lnchannels_core::scanner::DEFAULT_NEAR_TIP_BLOCKS
}

/// bitcoind only validates scripts we already classify ourselves, so the
/// network tag exists purely for display and logging, not consensus rules.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Bitcoin,
    Testnet,
    Signet,
    Regtest,
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Network::Bitcoin => "bitcoin",
            Network::Testnet => "testnet",
            Network::Signet => "signet",
            Network::Regtest => "regtest",
        };
        f.write_str(s)
    }
}

/// Either a cookie file (the default bitcoind auth) or an explicit
/// username/password pair.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BitcoindAuth {
    CookieFile { cookie_path: PathBuf },
    UserPass { rpc_user: String, rpc_password: String },
}

impl BitcoindAuth {
    pub fn resolve(&self) -> Result<(String, String), ConfigError> {
        match self {
            BitcoindAuth::UserPass { rpc_user, rpc_password } => {
                Ok((rpc_user.clone(), rpc_password.clone()))
            }
            BitcoindAuth::CookieFile { cookie_path } => {
                let contents = fs::read_to_string(cookie_path).map_err(|source| ConfigError::Cookie {
                    path: cookie_path.clone(),
                    source,
                })?;
                let (user, password) = contents
                    .trim()
                    .split_once(':')
                    .ok_or_else(|| ConfigError::MalformedCookie(cookie_path.clone()))?;
                Ok((user.to_string(), password.to_string()))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BitcoindConfig {
    pub url: String,
    #[serde(flatten)]
    pub auth: BitcoindAuth,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GossipConfig {
    pub url: String,
    pub access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub network: Network,
    pub bitcoind: BitcoindConfig,
    pub esplora_mirrors: Vec<String>,
    pub gossip: GossipConfig,
    pub database_path: PathBuf,
    pub cursor_path: PathBuf,

    #[serde(default = "default_deducer_workers")]
    pub deducer_workers: u32,
    #[serde(default = "default_deducer_sample_probability")]
    pub deducer_sample_probability: f64,
    #[serde(default = "default_rewind_blocks")]
    pub rewind_blocks: u32,
    #[serde(default = "default_near_tip_blocks")]
    pub near_tip_blocks: u32,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let toml = r#"
            network = "bitcoin"
            esplora_mirrors = ["https://blockstream.info/api"]
            database_path = "/tmp/lnchannels.sqlite"
            cursor_path = "/tmp/lnchannels.cursor"

            [bitcoind]
            url = "http://127.0.0.1:8332"
            cookie_path = "/tmp/.cookie"

            [gossip]
            url = "http://127.0.0.1:9736/gossip"
            access_token = "secret"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.network, Network::Bitcoin);
        assert_eq!(config.deducer_workers, lnchannels_core::deducer::DEFAULT_WORKERS);
        assert_eq!(config.deducer_sample_probability, 1.0);
        assert_eq!(config.rewind_blocks, lnchannels_core::scanner::REWIND_BLOCKS);
        assert_eq!(config.near_tip_blocks, lnchannels_core::scanner::DEFAULT_NEAR_TIP_BLOCKS);
    }

    #[test]
    fn userpass_auth_resolves_directly() {
        let auth = BitcoindAuth::UserPass {
            rpc_user: "alice".to_string(),
            rpc_password: "hunter2".to_string(),
        };
        assert_eq!(auth.resolve().unwrap(), ("alice".to_string(), "hunter2".to_string()));
    }

    #[test]
    fn cookie_auth_splits_on_colon() {
        let dir = tempfile::tempdir().unwrap();
        let cookie_path = dir.path().join(".cookie");
        fs::write(&cookie_path, "__cookie__:deadbeef\n").unwrap();
        let auth = BitcoindAuth::CookieFile { cookie_path };
        assert_eq!(
            auth.resolve().unwrap(),
            ("__cookie__".to_string(), "deadbeef".to_string())
        );
    }

    #[test]
    fn malformed_cookie_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cookie_path = dir.path().join(".cookie");
        fs::write(&cookie_path, "no-colon-here").unwrap();
        let auth = BitcoindAuth::CookieFile { cookie_path };
        assert!(auth.resolve().is_err());
    }
}
