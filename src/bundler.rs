// src/bundler.rs
use std::time::Duration;

use ethers::types::{Address, H256, U256};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::time;
use tracing::{debug, info};

use crate::config::BundlerConfig;
use crate::dialect::{BundlerKind, RawGasEstimate};
use crate::error::{BundlerError, Result, SponsorError};
use crate::quantity::parse_quantity;
use crate::retry::{with_retries, RetryPolicy};
use crate::rpc::{RpcUserOperation, UserOperationReceipt, UserOperationRecord};
use crate::transport::{HttpTransport, JsonRpcTransport};
use crate::types::UserOperation;

/// ERC-4337 bundler client bound to one endpoint and one entry point.
pub struct BundlerClient<T = HttpTransport> {
    transport: T,
    entry_point: Address,
    kind: BundlerKind,
    retry: RetryPolicy,
    receipt_poll_interval: Duration,
    receipt_max_polls: u32,
}

impl BundlerClient<HttpTransport> {
    pub fn new(config: &BundlerConfig, entry_point: Address) -> Result<Self> {
        let transport = HttpTransport::new(config.url.clone(), config.request_timeout)?;
        Ok(Self::with_transport(transport, config, entry_point))
    }
}

impl<T: JsonRpcTransport> BundlerClient<T> {
    pub fn with_transport(transport: T, config: &BundlerConfig, entry_point: Address) -> Self {
        let kind = BundlerKind::detect(&config.url);
        info!("Using {} bundler for entry point {:?}", kind, entry_point);
        Self {
            transport,
            entry_point,
            kind,
            retry: config.retry,
            receipt_poll_interval: config.receipt_poll_interval,
            receipt_max_polls: config.receipt_max_polls,
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, BundlerError> {
        with_retries(method, &self.retry, || {
            self.transport.request(method, params.clone())
        })
        .await
    }

    /// Like `call`, but a null result is an error.
    async fn call_required(&self, method: &str, params: Value) -> Result<Value, BundlerError> {
        match self.call(method, params).await? {
            Value::Null => Err(BundlerError::EmptyResult {
                method: method.to_string(),
            }),
            value => Ok(value),
        }
    }

    /// Like `call`, but a null result means "not found".
    async fn call_optional<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<R>, BundlerError> {
        match self.call(method, params).await? {
            Value::Null => Ok(None),
            value => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| BundlerError::InvalidResponse {
                    method: method.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    fn op_params(&self, op: &UserOperation) -> Result<Value> {
        let op = RpcUserOperation::try_from(op)?;
        Ok(json!([op, self.entry_point]))
    }

    pub async fn send_user_operation(&self, op: &UserOperation) -> Result<H256> {
        const METHOD: &str = "eth_sendUserOperation";
        debug!("Sending user operation for sender {:?}", op.sender);
        let params = self.op_params(op)?;
        let value = self.call_required(METHOD, params).await?;
        let hash = serde_json::from_value(value).map_err(|e| BundlerError::InvalidResponse {
            method: METHOD.to_string(),
            reason: e.to_string(),
        })?;
        Ok(hash)
    }

    pub async fn estimate_user_operation_gas(&self, op: &UserOperation) -> Result<RawGasEstimate> {
        debug!("Estimating gas for sender {:?} via {}", op.sender, self.kind);
        let params = self.op_params(op)?;
        let value = self
            .call_required("eth_estimateUserOperationGas", params)
            .await?;
        Ok(RawGasEstimate::from_response(self.kind, value)?)
    }

    pub async fn get_user_operation_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<UserOperationReceipt>> {
        Ok(self
            .call_optional(
                "eth_getUserOperationReceipt",
                json!([hash, self.entry_point]),
            )
            .await?)
    }

    pub async fn get_user_operation_by_hash(
        &self,
        hash: H256,
    ) -> Result<Option<UserOperationRecord>> {
        Ok(self
            .call_optional("eth_getUserOperationByHash", json!([hash, self.entry_point]))
            .await?)
    }

    pub async fn supported_entry_points(&self) -> Result<Vec<Address>> {
        const METHOD: &str = "eth_supportedEntryPoints";
        let value = self.call_required(METHOD, json!([])).await?;
        let entry_points =
            serde_json::from_value(value).map_err(|e| BundlerError::InvalidResponse {
                method: METHOD.to_string(),
                reason: e.to_string(),
            })?;
        Ok(entry_points)
    }

    /// Fails unless the bundler lists the entry point this client targets.
    pub async fn ensure_entry_point_supported(&self) -> Result<()> {
        let supported = self.supported_entry_points().await?;
        if supported.contains(&self.entry_point) {
            Ok(())
        } else {
            Err(SponsorError::InvalidParameters(format!(
                "bundler does not support entry point {:?} (supports {:?})",
                self.entry_point, supported
            )))
        }
    }

    pub async fn chain_id(&self) -> Result<u64> {
        const METHOD: &str = "eth_chainId";
        let value = self.call_required(METHOD, json!([])).await?;
        let chain_id: U256 = parse_quantity(&value)?;
        let chain_id = u64::try_from(chain_id).map_err(|_| BundlerError::InvalidResponse {
            method: METHOD.to_string(),
            reason: format!("chain id {chain_id} does not fit in 64 bits"),
        })?;
        Ok(chain_id)
    }

    /// Polls for a receipt until it shows up or the poll budget runs out.
    pub async fn wait_for_receipt(&self, hash: H256) -> Result<Option<UserOperationReceipt>> {
        for poll in 1..=self.receipt_max_polls {
            if let Some(receipt) = self.get_user_operation_receipt(hash).await? {
                info!(
                    "User operation {:?} included (success: {})",
                    hash, receipt.success
                );
                return Ok(Some(receipt));
            }
            debug!(
                "No receipt for {:?} yet (poll {}/{})",
                hash, poll, self.receipt_max_polls
            );
            if poll < self.receipt_max_polls {
                time::sleep(self.receipt_poll_interval).await;
            }
        }
        Ok(None)
    }
}
