// src/codec.rs
//! Fixed-width packing for v0.7 user operation fields.
//!
//! These layouts are checked bit-for-bit by the on-chain verifier.

use ethers::types::{Address, Bytes, U256};

use crate::error::CodecError;
use crate::types::PaymasterData;

/// Length of the fixed `paymasterAndData` prefix: address ‖ verification gas ‖ post-op gas.
pub const PAYMASTER_DATA_OFFSET: usize = 52;

const ADDRESS_LEN: usize = 20;
const U128_LEN: usize = 16;
const U48_LEN: usize = 6;

fn checked_u128(value: U256, field: &'static str) -> Result<u128, CodecError> {
    if value.bits() > 128 {
        return Err(CodecError::ValueTooLarge {
            field,
            value,
            bits: 128,
        });
    }
    Ok(value.low_u128())
}

fn checked_u48(value: u64, field: &'static str) -> Result<[u8; U48_LEN], CodecError> {
    if value >> 48 != 0 {
        return Err(CodecError::ValueTooLarge {
            field,
            value: U256::from(value),
            bits: 48,
        });
    }
    let mut out = [0u8; U48_LEN];
    out.copy_from_slice(&value.to_be_bytes()[8 - U48_LEN..]);
    Ok(out)
}

/// Packs two 128-bit values into one word: `high` in bytes [0,16), `low` in [16,32).
pub fn pack_pair(high: U256, low: U256) -> Result<[u8; 32], CodecError> {
    let high = checked_u128(high, "high")?;
    let low = checked_u128(low, "low")?;

    let mut word = [0u8; 32];
    word[..U128_LEN].copy_from_slice(&high.to_be_bytes());
    word[U128_LEN..].copy_from_slice(&low.to_be_bytes());
    Ok(word)
}

pub fn unpack_pair(word: &[u8]) -> Result<(U256, U256), CodecError> {
    if word.len() != 32 {
        return Err(CodecError::InvalidLength {
            field: "packed pair",
            expected: 32,
            actual: word.len(),
        });
    }
    Ok((
        U256::from_big_endian(&word[..U128_LEN]),
        U256::from_big_endian(&word[U128_LEN..]),
    ))
}

pub fn pack_paymaster_data(
    paymaster: Address,
    verification_gas_limit: U256,
    post_op_gas_limit: U256,
    payload: &[u8],
) -> Result<Bytes, CodecError> {
    let verification = checked_u128(verification_gas_limit, "paymasterVerificationGasLimit")?;
    let post_op = checked_u128(post_op_gas_limit, "paymasterPostOpGasLimit")?;

    let mut data = Vec::with_capacity(PAYMASTER_DATA_OFFSET + payload.len());
    data.extend_from_slice(paymaster.as_bytes());
    data.extend_from_slice(&verification.to_be_bytes());
    data.extend_from_slice(&post_op.to_be_bytes());
    data.extend_from_slice(payload);
    Ok(Bytes::from(data))
}

pub fn unpack_paymaster_data(data: &[u8]) -> Result<PaymasterData, CodecError> {
    if data.len() < PAYMASTER_DATA_OFFSET {
        return Err(CodecError::TooShort {
            field: "paymasterAndData",
            minimum: PAYMASTER_DATA_OFFSET,
            actual: data.len(),
        });
    }
    let gas_start = ADDRESS_LEN;
    let post_op_start = gas_start + U128_LEN;

    Ok(PaymasterData {
        paymaster: Address::from_slice(&data[..ADDRESS_LEN]),
        verification_gas_limit: U256::from_big_endian(&data[gas_start..post_op_start]),
        post_op_gas_limit: U256::from_big_endian(&data[post_op_start..PAYMASTER_DATA_OFFSET]),
        payload: Bytes::from(data[PAYMASTER_DATA_OFFSET..].to_vec()),
    })
}

/// Payload for a token-priced paymaster: gas token ‖ validUntil (u48) ‖ validAfter (u48).
pub fn token_paymaster_payload(
    token: Address,
    valid_until: u64,
    valid_after: u64,
) -> Result<Bytes, CodecError> {
    let mut data = Vec::with_capacity(ADDRESS_LEN + 2 * U48_LEN);
    data.extend_from_slice(token.as_bytes());
    data.extend_from_slice(&checked_u48(valid_until, "validUntil")?);
    data.extend_from_slice(&checked_u48(valid_after, "validAfter")?);
    Ok(Bytes::from(data))
}

/// Payload for a multi-tenant paymaster: operator ‖ maxRate (u256).
pub fn operator_paymaster_payload(operator: Address, max_rate: U256) -> Bytes {
    let mut rate = [0u8; 32];
    max_rate.to_big_endian(&mut rate);

    let mut data = Vec::with_capacity(ADDRESS_LEN + 32);
    data.extend_from_slice(operator.as_bytes());
    data.extend_from_slice(&rate);
    Bytes::from(data)
}

/// Splits `initCode` into factory address and factory data. Empty means no factory.
pub fn split_init_code(init_code: &[u8]) -> Result<Option<(Address, Bytes)>, CodecError> {
    if init_code.is_empty() {
        return Ok(None);
    }
    if init_code.len() < ADDRESS_LEN {
        return Err(CodecError::TooShort {
            field: "initCode",
            minimum: ADDRESS_LEN,
            actual: init_code.len(),
        });
    }
    Ok(Some((
        Address::from_slice(&init_code[..ADDRESS_LEN]),
        Bytes::from(init_code[ADDRESS_LEN..].to_vec()),
    )))
}

pub fn join_init_code(factory: Address, factory_data: &[u8]) -> Bytes {
    let mut data = factory.as_bytes().to_vec();
    data.extend_from_slice(factory_data);
    Bytes::from(data)
}
