// src/quantity.rs
//! Integer normalization for values crossing the JSON boundary.
//!
//! Bundlers disagree on how they encode integers: `0x`-prefixed hex,
//! decimal strings and bare JSON numbers all show up. Everything inbound goes
//! through [`parse_quantity`]; everything outbound is minimal lowercase hex.

use std::fmt;

use ethers::types::U256;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::CodecError;

pub fn parse_quantity(value: &Value) -> Result<U256, CodecError> {
    match value {
        Value::String(s) => parse_quantity_str(s),
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| CodecError::InvalidQuantity(n.to_string())),
        other => Err(CodecError::InvalidQuantity(other.to_string())),
    }
}

pub fn parse_quantity_str(s: &str) -> Result<U256, CodecError> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some("") => return Ok(U256::zero()),
        Some(digits) => U256::from_str_radix(digits, 16).ok(),
        None => U256::from_dec_str(s).ok(),
    };
    parsed.ok_or_else(|| CodecError::InvalidQuantity(s.to_string()))
}

/// `0x` + lowercase hex, no leading zeros, `0x0` for zero.
pub fn to_hex_quantity(value: U256) -> String {
    format!("{value:#x}")
}

/// A U256 that deserializes leniently and serializes as a hex quantity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity(pub U256);

impl From<U256> for Quantity {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl From<Quantity> for U256 {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

impl From<u64> for Quantity {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_hex_quantity(self.0))
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        parse_quantity(&value).map(Quantity).map_err(de::Error::custom)
    }
}
