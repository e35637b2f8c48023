//! Small shared value types used across the pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A channel's canonical identifier: `{block}x{tx_index}x{vout}`, pointing
/// at the funding output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShortChannelId {
    pub block: u32,
    pub tx_index: u32,
    pub output_index: u32,
}

impl ShortChannelId {
    pub fn new(block: u32, tx_index: u32, output_index: u32) -> Self {
        ShortChannelId {
            block,
            tx_index,
            output_index,
        }
    }
}

impl fmt::Display for ShortChannelId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}x{}", self.block, self.tx_index, self.output_index)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid short_channel_id '{0}'")]
pub struct ParseScidError(String);

impl FromStr for ShortChannelId {
    type Err = ParseScidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('x');
        let (block, tx_index, output_index) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(b), Some(t), Some(o), None) => (b, t, o),
                _ => return Err(ParseScidError(s.to_string())),
            };
        let block = block.parse().map_err(|_| ParseScidError(s.to_string()))?;
        let tx_index = tx_index.parse().map_err(|_| ParseScidError(s.to_string()))?;
        let output_index = output_index
            .parse()
            .map_err(|_| ParseScidError(s.to_string()))?;
        Ok(ShortChannelId {
            block,
            tx_index,
            output_index,
        })
    }
}

impl TryFrom<String> for ShortChannelId {
    type Error = ParseScidError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ShortChannelId> for String {
    fn from(scid: ShortChannelId) -> String {
        scid.to_string()
    }
}

/// An opaque channel-side label, as used at classification time before the
/// deducer maps it to an index into `Channel::nodes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::A => "a",
            Side::B => "b",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An index (0 or 1) into `Channel::nodes`, as assigned by the deducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeIndex {
    Zero = 0,
    One = 1,
}

impl NodeIndex {
    pub fn from_bool_is_zero(is_zero: bool) -> Self {
        if is_zero {
            NodeIndex::Zero
        } else {
            NodeIndex::One
        }
    }

    pub fn flip(self) -> Self {
        match self {
            NodeIndex::Zero => NodeIndex::One,
            NodeIndex::One => NodeIndex::Zero,
        }
    }

    pub fn as_usize(self) -> usize {
        self as u8 as usize
    }
}

/// Label assigned to a single output of a closing transaction while
/// classifying it, see [`crate::classifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptSigType {
    /// Paid out directly to a pubkey-style or other "any" address: a
    /// mutual-close-style output.
    Any,
    /// A hash-time-locked contract output.
    Htlc,
    /// A unilateral-close delayed-balance output, further split into
    /// `penalty`/`delayed` once the revocation witness bit is known.
    Delayed,
    Penalty,
    /// Still not confirmed spent and we're near the chain tip: can't tell
    /// yet whether this is a mutual close or will turn out to be an HTLC.
    Unknown,
}
