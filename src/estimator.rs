// src/estimator.rs
use std::cmp;
use std::sync::Arc;

use ethers::types::{Address, Bytes, U256};
use tracing::{debug, warn};

use crate::bundler::BundlerClient;
use crate::chain::ChainReader;
use crate::codec;
use crate::config::{SafetyBuffer, SponsorConfig};
use crate::error::Result;
use crate::transport::{HttpTransport, JsonRpcTransport};
use crate::types::{GasEstimate, GasFees, GasLimits, UserOperation};

/// Placeholder signature for simulation. The shape recovers to some address
/// under ECDSA so accounts fail validation softly instead of reverting.
const DUMMY_SIGNATURE: [u8; 65] = {
    let mut sig = [0u8; 65];
    let mut i = 0;
    while i < 15 {
        sig[i] = 0xff;
        i += 1;
    }
    sig[15] = 0xf0;
    sig[32] = 0x7a;
    i = 33;
    while i < 64 {
        sig[i] = 0xaa;
        i += 1;
    }
    sig[64] = 0x1c;
    sig
};

/// Where gas limits come from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EstimateMode {
    /// Ask the bundler, then pad the result with the safety buffer.
    #[default]
    Auto,
    /// Caller-tuned limits, used verbatim without a bundler round trip.
    Manual(GasEstimate),
}

pub struct GasEstimator<C, T = HttpTransport> {
    chain: Arc<C>,
    bundler: Arc<BundlerClient<T>>,
    config: Arc<SponsorConfig>,
}

impl<C: ChainReader, T: JsonRpcTransport> GasEstimator<C, T> {
    pub fn new(chain: Arc<C>, bundler: Arc<BundlerClient<T>>, config: Arc<SponsorConfig>) -> Self {
        Self {
            chain,
            bundler,
            config,
        }
    }

    /// Network fee suggestion scaled by the fee policy. Falls back to fixed
    /// values when the chain can't provide one.
    pub async fn current_fees(&self) -> GasFees {
        let policy = &self.config.fees;
        match self.chain.fee_data().await {
            Ok(fees) => {
                let scale = |value: U256| {
                    value.saturating_mul(policy.multiplier_percent.into()) / U256::from(100)
                };
                let priority = cmp::max(
                    scale(fees.max_priority_fee_per_gas),
                    policy.min_priority_fee,
                );
                GasFees {
                    max_fee_per_gas: cmp::max(scale(fees.max_fee_per_gas), priority),
                    max_priority_fee_per_gas: priority,
                }
            }
            Err(e) => {
                warn!("Fee estimation failed, using fallback fees: {}", e);
                GasFees {
                    max_fee_per_gas: policy.fallback_max_fee,
                    max_priority_fee_per_gas: policy.fallback_priority_fee,
                }
            }
        }
    }

    /// Operation with a fresh nonce and the given fees, packed with `limits`.
    /// The signature is the simulation placeholder.
    pub async fn operation(
        &self,
        sender: Address,
        init_code: Bytes,
        call_data: Bytes,
        limits: &GasLimits,
        fees: &GasFees,
        now: u64,
    ) -> Result<UserOperation> {
        let nonce = self
            .chain
            .nonce(self.config.entry_point, sender, self.config.nonce_key)
            .await?;
        let payload = self
            .config
            .paymaster_kind
            .payload(self.config.gas_token, now)?;

        Ok(UserOperation {
            sender,
            nonce,
            init_code,
            call_data,
            account_gas_limits: codec::pack_pair(
                limits.verification_gas_limit,
                limits.call_gas_limit,
            )?,
            pre_verification_gas: limits.pre_verification_gas,
            gas_fees: codec::pack_pair(fees.max_priority_fee_per_gas, fees.max_fee_per_gas)?,
            paymaster_and_data: codec::pack_paymaster_data(
                self.config.paymaster,
                limits.paymaster_verification_gas_limit,
                limits.paymaster_post_op_gas_limit,
                &payload,
            )?,
            signature: Bytes::from(DUMMY_SIGNATURE.to_vec()),
        })
    }

    /// Operation submitted for simulation: every gas field zeroed.
    pub async fn partial_operation(
        &self,
        sender: Address,
        init_code: Bytes,
        call_data: Bytes,
        fees: &GasFees,
        now: u64,
    ) -> Result<UserOperation> {
        let zero = GasLimits {
            pre_verification_gas: U256::zero(),
            verification_gas_limit: U256::zero(),
            call_gas_limit: U256::zero(),
            paymaster_verification_gas_limit: U256::zero(),
            paymaster_post_op_gas_limit: U256::zero(),
        };
        self.operation(sender, init_code, call_data, &zero, fees, now)
            .await
    }

    /// Gas limits for a call. `Manual` makes no network calls at all.
    pub async fn estimate(
        &self,
        sender: Address,
        init_code: Bytes,
        call_data: Bytes,
        mode: &EstimateMode,
        now: u64,
    ) -> Result<GasEstimate> {
        if let EstimateMode::Manual(limits) = mode {
            debug!("Using caller-supplied gas limits for {:?}", sender);
            return Ok(limits.clone());
        }

        let fees = self.current_fees().await;
        let op = self
            .partial_operation(sender, init_code, call_data, &fees, now)
            .await?;
        let raw = self.bundler.estimate_user_operation_gas(&op).await?;
        let estimate = raw.normalize()?;
        debug!("{} estimate for {:?}: {:?}", raw.kind(), sender, estimate);
        Ok(estimate)
    }
}

/// Adds the fixed buffer to the verification and paymaster post-op limits.
/// Missing fields stay missing.
pub fn apply_safety_buffer(estimate: &GasEstimate, buffer: &SafetyBuffer) -> GasEstimate {
    GasEstimate {
        verification_gas_limit: estimate
            .verification_gas_limit
            .map(|gas| gas.saturating_add(buffer.verification_gas)),
        paymaster_post_op_gas_limit: estimate
            .paymaster_post_op_gas_limit
            .map(|gas| gas.saturating_add(buffer.paymaster_post_op_gas)),
        ..estimate.clone()
    }
}
