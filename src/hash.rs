// src/hash.rs
use ethers::abi::{encode, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;

use crate::types::UserOperation;

/// Hash of the operation fields alone, before domain separation.
pub fn packed_user_operation_hash(op: &UserOperation) -> H256 {
    let encoded = encode(&[
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::FixedBytes(keccak256(&op.init_code).to_vec()),
        Token::FixedBytes(keccak256(&op.call_data).to_vec()),
        Token::FixedBytes(op.account_gas_limits.to_vec()),
        Token::Uint(op.pre_verification_gas),
        Token::FixedBytes(op.gas_fees.to_vec()),
        Token::FixedBytes(keccak256(&op.paymaster_and_data).to_vec()),
    ]);
    H256(keccak256(encoded))
}

/// The v0.7 user operation hash an account signs: the packed hash bound to
/// one entry point on one chain. The signature is not part of it.
pub fn user_operation_hash(op: &UserOperation, entry_point: Address, chain_id: u64) -> H256 {
    let inner = packed_user_operation_hash(op);
    H256(keccak256(encode(&[
        Token::FixedBytes(inner.as_bytes().to_vec()),
        Token::Address(entry_point),
        Token::Uint(U256::from(chain_id)),
    ])))
}
