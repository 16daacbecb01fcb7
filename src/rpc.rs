// src/rpc.rs
use ethers::types::{Address, Bytes, Log, H256, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec;
use crate::error::{BundlerError, CodecError, RpcError};
use crate::quantity::Quantity;
use crate::types::UserOperation;

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Interprets a raw bundler response body.
///
/// HTTP 429 is a rate limit whatever the body says. Otherwise a JSON-RPC
/// `error` member wins over the HTTP status. A missing `result` is an error;
/// an explicit `null` result is returned as `Value::Null`.
pub fn parse_response(method: &str, status: u16, body: &str) -> Result<Value, BundlerError> {
    if status == 429 {
        return Err(BundlerError::Http {
            status,
            body: body.to_string(),
        });
    }

    let envelope = serde_json::from_str::<Value>(body).ok();

    if let Some(error) = envelope.as_ref().and_then(|e| e.get("error")) {
        if !error.is_null() {
            let error: JsonRpcErrorObject =
                serde_json::from_value(error.clone()).map_err(|e| {
                    BundlerError::InvalidResponse {
                        method: method.to_string(),
                        reason: format!("malformed error object: {e}"),
                    }
                })?;
            return Err(BundlerError::Rpc(RpcError::new(
                error.code,
                error.message,
                error.data,
            )));
        }
    }

    if !(200..300).contains(&status) {
        return Err(BundlerError::Http {
            status,
            body: body.to_string(),
        });
    }

    let Some(envelope) = envelope else {
        return Err(BundlerError::InvalidResponse {
            method: method.to_string(),
            reason: "body is not JSON".to_string(),
        });
    };
    envelope
        .get("result")
        .cloned()
        .ok_or_else(|| BundlerError::EmptyResult {
            method: method.to_string(),
        })
}

/// The decomposed v0.7 user operation bundlers accept over JSON-RPC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcUserOperation {
    pub sender: Address,
    pub nonce: Quantity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory_data: Option<Bytes>,
    pub call_data: Bytes,
    pub call_gas_limit: Quantity,
    pub verification_gas_limit: Quantity,
    pub pre_verification_gas: Quantity,
    pub max_fee_per_gas: Quantity,
    pub max_priority_fee_per_gas: Quantity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_data: Option<Bytes>,
    pub signature: Bytes,
}

impl TryFrom<&UserOperation> for RpcUserOperation {
    type Error = CodecError;

    fn try_from(op: &UserOperation) -> Result<Self, Self::Error> {
        let (verification_gas_limit, call_gas_limit) = codec::unpack_pair(&op.account_gas_limits)?;
        let (max_priority_fee_per_gas, max_fee_per_gas) = codec::unpack_pair(&op.gas_fees)?;
        let factory = codec::split_init_code(&op.init_code)?;
        let paymaster = op.paymaster_data()?;

        Ok(Self {
            sender: op.sender,
            nonce: op.nonce.into(),
            factory: factory.as_ref().map(|(address, _)| *address),
            factory_data: factory.map(|(_, data)| data),
            call_data: op.call_data.clone(),
            call_gas_limit: call_gas_limit.into(),
            verification_gas_limit: verification_gas_limit.into(),
            pre_verification_gas: op.pre_verification_gas.into(),
            max_fee_per_gas: max_fee_per_gas.into(),
            max_priority_fee_per_gas: max_priority_fee_per_gas.into(),
            paymaster: paymaster.as_ref().map(|p| p.paymaster),
            paymaster_verification_gas_limit: paymaster
                .as_ref()
                .map(|p| p.verification_gas_limit.into()),
            paymaster_post_op_gas_limit: paymaster.as_ref().map(|p| p.post_op_gas_limit.into()),
            paymaster_data: paymaster.map(|p| p.payload),
            signature: op.signature.clone(),
        })
    }
}

impl TryFrom<RpcUserOperation> for UserOperation {
    type Error = CodecError;

    fn try_from(op: RpcUserOperation) -> Result<Self, Self::Error> {
        let init_code = match op.factory {
            Some(factory) if !factory.is_zero() => {
                codec::join_init_code(factory, &op.factory_data.unwrap_or_default())
            }
            _ => Bytes::new(),
        };
        let paymaster_and_data = match op.paymaster {
            Some(paymaster) if !paymaster.is_zero() => codec::pack_paymaster_data(
                paymaster,
                op.paymaster_verification_gas_limit.unwrap_or_default().0,
                op.paymaster_post_op_gas_limit.unwrap_or_default().0,
                &op.paymaster_data.unwrap_or_default(),
            )?,
            _ => Bytes::new(),
        };

        Ok(UserOperation {
            sender: op.sender,
            nonce: op.nonce.0,
            init_code,
            call_data: op.call_data,
            account_gas_limits: codec::pack_pair(
                op.verification_gas_limit.0,
                op.call_gas_limit.0,
            )?,
            pre_verification_gas: op.pre_verification_gas.0,
            gas_fees: codec::pack_pair(op.max_priority_fee_per_gas.0, op.max_fee_per_gas.0)?,
            paymaster_and_data,
            signature: op.signature,
        })
    }
}

/// Result of `eth_getUserOperationReceipt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    pub user_op_hash: H256,
    #[serde(default)]
    pub entry_point: Option<Address>,
    pub sender: Address,
    pub nonce: Quantity,
    #[serde(default)]
    pub paymaster: Option<Address>,
    pub actual_gas_cost: Quantity,
    pub actual_gas_used: Quantity,
    pub success: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub logs: Vec<Log>,
    /// The bundle transaction receipt, left untyped since bundlers vary in what they include.
    #[serde(default)]
    pub receipt: Option<Value>,
}

impl UserOperationReceipt {
    pub fn transaction_hash(&self) -> Option<H256> {
        self.receipt
            .as_ref()
            .and_then(|r| r.get("transactionHash"))
            .and_then(|h| serde_json::from_value(h.clone()).ok())
    }

    pub fn actual_gas_cost(&self) -> U256 {
        self.actual_gas_cost.0
    }
}

/// Result of `eth_getUserOperationByHash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationRecord {
    pub user_operation: RpcUserOperation,
    pub entry_point: Address,
    #[serde(default)]
    pub block_number: Option<Quantity>,
    #[serde(default)]
    pub block_hash: Option<H256>,
    #[serde(default)]
    pub transaction_hash: Option<H256>,
}
