// src/types.rs
use std::fmt;

use ethers::types::{Address, Bytes, TxHash, U256};
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::CodecError;

/// Packed ERC-4337 v0.7 user operation, exactly as the entry point sees it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    /// verificationGasLimit (high 128 bits) ‖ callGasLimit (low 128 bits)
    pub account_gas_limits: [u8; 32],
    pub pre_verification_gas: U256,
    /// maxPriorityFeePerGas (high 128 bits) ‖ maxFeePerGas (low 128 bits)
    pub gas_fees: [u8; 32],
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// Returns `(verification_gas_limit, call_gas_limit)`.
    pub fn gas_limits(&self) -> (U256, U256) {
        split_word(&self.account_gas_limits)
    }

    /// Returns `(max_priority_fee_per_gas, max_fee_per_gas)`.
    pub fn fees(&self) -> (U256, U256) {
        split_word(&self.gas_fees)
    }

    pub fn paymaster_data(&self) -> Result<Option<PaymasterData>, CodecError> {
        if self.paymaster_and_data.is_empty() {
            return Ok(None);
        }
        codec::unpack_paymaster_data(&self.paymaster_and_data).map(Some)
    }
}

fn split_word(word: &[u8; 32]) -> (U256, U256) {
    (
        U256::from_big_endian(&word[..16]),
        U256::from_big_endian(&word[16..]),
    )
}

/// Decomposed `paymasterAndData`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymasterData {
    pub paymaster: Address,
    pub verification_gas_limit: U256,
    pub post_op_gas_limit: U256,
    pub payload: Bytes,
}

/// Gas values as reported by a bundler; any of them may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimate {
    pub pre_verification_gas: Option<U256>,
    pub verification_gas_limit: Option<U256>,
    pub call_gas_limit: Option<U256>,
    pub paymaster_verification_gas_limit: Option<U256>,
    pub paymaster_post_op_gas_limit: Option<U256>,
}

impl GasEstimate {
    pub fn or_defaults(&self, defaults: &GasLimits) -> GasLimits {
        GasLimits {
            pre_verification_gas: self
                .pre_verification_gas
                .unwrap_or(defaults.pre_verification_gas),
            verification_gas_limit: self
                .verification_gas_limit
                .unwrap_or(defaults.verification_gas_limit),
            call_gas_limit: self.call_gas_limit.unwrap_or(defaults.call_gas_limit),
            paymaster_verification_gas_limit: self
                .paymaster_verification_gas_limit
                .unwrap_or(defaults.paymaster_verification_gas_limit),
            paymaster_post_op_gas_limit: self
                .paymaster_post_op_gas_limit
                .unwrap_or(defaults.paymaster_post_op_gas_limit),
        }
    }
}

/// Concrete limits used to build an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasLimits {
    pub pre_verification_gas: U256,
    pub verification_gas_limit: U256,
    pub call_gas_limit: U256,
    pub paymaster_verification_gas_limit: U256,
    pub paymaster_post_op_gas_limit: U256,
}

impl Default for GasLimits {
    fn default() -> Self {
        Self {
            pre_verification_gas: U256::from(50_000u64),
            verification_gas_limit: U256::from(150_000u64),
            call_gas_limit: U256::from(500_000u64),
            paymaster_verification_gas_limit: U256::from(150_000u64),
            paymaster_post_op_gas_limit: U256::from(100_000u64),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GasFees {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// `EntryPoint.getDepositInfo` for one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DepositInfo {
    pub deposit: U256,
    pub staked: bool,
    pub stake: U256,
    pub unstake_delay_sec: u32,
    pub withdraw_time: u64,
}

/// Paymaster's cached native-token/USD price.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CachedPrice {
    pub price: U256,
    pub updated_at: u64,
}

/// Chain readings a readiness report is derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessDetails {
    pub entry_point: DepositInfo,
    pub cached_price: CachedPrice,
    /// Seconds since `cached_price.updated_at`, `None` when never updated.
    pub price_age_secs: Option<u64>,
    /// Only read for token-priced paymasters.
    pub token_price: Option<U256>,
    pub sponsor_token_balance: U256,
    pub sponsor_paymaster_deposit: U256,
    pub sponsor_allowance: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessIssue {
    EntryPointDepositLow { deposit: U256, minimum: U256 },
    NotStaked,
    StakeLow { stake: U256, minimum: U256 },
    UnstakeDelayTooShort { delay_sec: u32, minimum_sec: u32 },
    StakeUnlocking { withdraw_time: u64 },
    PriceNotInitialized,
    PriceStale { age_secs: u64, threshold_secs: u64 },
    TokenPriceNotSet,
    NoTokenBalance,
    PaymasterDepositLow { balance: U256, minimum: U256 },
    AllowanceShortfall { allowance: U256, required: U256 },
}

impl ReadinessIssue {
    /// The transaction that fixes this issue, if the sponsor can fix it.
    pub fn remediation(&self) -> Option<RemediationKind> {
        match self {
            ReadinessIssue::PriceNotInitialized | ReadinessIssue::PriceStale { .. } => {
                Some(RemediationKind::UpdatePrice)
            }
            ReadinessIssue::AllowanceShortfall { .. } => Some(RemediationKind::Approve),
            ReadinessIssue::PaymasterDepositLow { .. } => Some(RemediationKind::Deposit),
            _ => None,
        }
    }
}

impl fmt::Display for ReadinessIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessIssue::EntryPointDepositLow { deposit, minimum } => write!(
                f,
                "Paymaster deposit in EntryPoint is {deposit} wei, below the {minimum} wei floor"
            ),
            ReadinessIssue::NotStaked => f.write_str("Paymaster is not staked in EntryPoint"),
            ReadinessIssue::StakeLow { stake, minimum } => write!(
                f,
                "Paymaster stake in EntryPoint is {stake} wei, below the {minimum} wei floor"
            ),
            ReadinessIssue::UnstakeDelayTooShort {
                delay_sec,
                minimum_sec,
            } => write!(
                f,
                "Paymaster unstake delay is {delay_sec}s, less than {minimum_sec}s"
            ),
            ReadinessIssue::StakeUnlocking { withdraw_time } => write!(
                f,
                "Paymaster stake is unlocking (withdrawable at {withdraw_time})"
            ),
            ReadinessIssue::PriceNotInitialized => {
                f.write_str("Paymaster ETH/USD price not initialized")
            }
            ReadinessIssue::PriceStale {
                age_secs,
                threshold_secs,
            } => write!(
                f,
                "Paymaster cached price is {age_secs}s old, older than the {threshold_secs}s threshold"
            ),
            ReadinessIssue::TokenPriceNotSet => f.write_str("Token price not set in Paymaster"),
            ReadinessIssue::NoTokenBalance => f.write_str("Sponsor holds no gas token"),
            ReadinessIssue::PaymasterDepositLow { balance, minimum } => write!(
                f,
                "Sponsor deposit in Paymaster is {balance}, below the required {minimum}"
            ),
            ReadinessIssue::AllowanceShortfall {
                allowance,
                required,
            } => write!(
                f,
                "Gas token allowance toward Paymaster is {allowance}, {required} required"
            ),
        }
    }
}

/// Result of a gasless readiness diagnosis. Recomputed on every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessReport {
    pub is_ready: bool,
    pub issues: Vec<ReadinessIssue>,
    pub details: ReadinessDetails,
}

impl ReadinessReport {
    pub fn messages(&self) -> Vec<String> {
        self.issues.iter().map(ToString::to_string).collect()
    }

    /// Transactions needed to fix the remediable issues, in dependency order.
    pub fn remediation_plan(&self) -> Vec<RemediationKind> {
        let mut plan: Vec<RemediationKind> = self
            .issues
            .iter()
            .filter_map(ReadinessIssue::remediation)
            .collect();
        plan.sort();
        plan.dedup();
        plan
    }

    /// Issues no remediation transaction can fix.
    pub fn unremediable(&self) -> impl Iterator<Item = &ReadinessIssue> {
        self.issues.iter().filter(|issue| issue.remediation().is_none())
    }
}

/// Remediation transactions, ordered by the dependency between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RemediationKind {
    UpdatePrice,
    Approve,
    Deposit,
}

impl fmt::Display for RemediationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RemediationKind::UpdatePrice => "UpdatePrice",
            RemediationKind::Approve => "ApproveGasToken",
            RemediationKind::Deposit => "DepositCollateral",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemediationStep {
    pub step: RemediationKind,
    pub hash: TxHash,
}
