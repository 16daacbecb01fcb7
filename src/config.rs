// src/config.rs
use std::time::Duration;

use ethers::types::{Address, Bytes, H160, U256};

use crate::codec;
use crate::error::CodecError;
use crate::retry::RetryPolicy;
use crate::types::GasLimits;

/// Canonical ERC-4337 v0.7 entry point, 0x0000000071727De22E5E9d8BAf0edAc6f37da032.
pub const ENTRY_POINT_V07: Address = H160([
    0x00, 0x00, 0x00, 0x00, 0x71, 0x72, 0x7d, 0xe2, 0x2e, 0x5e, 0x9d, 0x8b, 0xaf, 0x0e, 0xda,
    0xc6, 0xf3, 0x7d, 0xa0, 0x32,
]);

const GWEI: u64 = 1_000_000_000;
const TENTH_ETH: u64 = 100_000_000_000_000_000;

/// Which paymaster-specific payload follows the fixed `paymasterAndData` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymasterKind {
    /// Token-priced paymaster: gas token ‖ validUntil ‖ validAfter.
    TokenPriced {
        /// Seconds the sponsorship stays valid after signing.
        validity_window: u64,
    },
    /// Multi-tenant paymaster: operator ‖ maxRate.
    MultiTenant { operator: Address, max_rate: U256 },
}

impl PaymasterKind {
    /// Seconds subtracted from `now` for `validAfter` to tolerate clock skew.
    pub const VALID_AFTER_GRACE: u64 = 100;

    pub fn token_priced() -> Self {
        PaymasterKind::TokenPriced {
            validity_window: 3600,
        }
    }

    pub fn multi_tenant(operator: Address) -> Self {
        PaymasterKind::MultiTenant {
            operator,
            max_rate: U256::MAX,
        }
    }

    pub fn payload(&self, gas_token: Address, now: u64) -> Result<Bytes, CodecError> {
        match self {
            PaymasterKind::TokenPriced { validity_window } => codec::token_paymaster_payload(
                gas_token,
                now.saturating_add(*validity_window),
                now.saturating_sub(Self::VALID_AFTER_GRACE),
            ),
            PaymasterKind::MultiTenant { operator, max_rate } => {
                Ok(codec::operator_paymaster_payload(*operator, *max_rate))
            }
        }
    }

    pub fn reads_token_price(&self) -> bool {
        matches!(self, PaymasterKind::TokenPriced { .. })
    }
}

/// Floors a sponsor's on-chain state must clear to be considered ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessThresholds {
    pub min_entry_point_deposit: U256,
    pub min_stake: U256,
    pub min_unstake_delay_sec: u32,
    pub price_staleness_threshold: Duration,
    /// Minimum sponsor deposit held inside the paymaster. Zero balances always fail.
    pub min_sponsor_deposit: U256,
}

impl Default for ReadinessThresholds {
    fn default() -> Self {
        Self {
            min_entry_point_deposit: U256::from(TENTH_ETH),
            min_stake: U256::from(TENTH_ETH),
            min_unstake_delay_sec: 86_400,
            price_staleness_threshold: Duration::from_secs(3600),
            min_sponsor_deposit: U256::one(),
        }
    }
}

/// Amounts used by the remediation transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemediationAmounts {
    pub approve_amount: U256,
    pub deposit_amount: U256,
}

impl Default for RemediationAmounts {
    fn default() -> Self {
        let ten_tokens = U256::from(10u64) * U256::exp10(18);
        Self {
            approve_amount: U256::MAX,
            deposit_amount: ten_tokens,
        }
    }
}

/// Fixed padding added on top of bundler estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyBuffer {
    pub verification_gas: U256,
    pub paymaster_post_op_gas: U256,
}

impl Default for SafetyBuffer {
    fn default() -> Self {
        Self {
            verification_gas: U256::from(20_000u64),
            paymaster_post_op_gas: U256::from(10_000u64),
        }
    }
}

/// How network fee suggestions are turned into `gasFees`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
    pub multiplier_percent: u64,
    pub min_priority_fee: U256,
    pub fallback_max_fee: U256,
    pub fallback_priority_fee: U256,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            multiplier_percent: 150,
            min_priority_fee: U256::from(GWEI / 2),
            fallback_max_fee: U256::from(30 * GWEI),
            fallback_priority_fee: U256::from(GWEI),
        }
    }
}

/// Everything the orchestrator needs to know about one sponsorship setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SponsorConfig {
    pub entry_point: Address,
    pub paymaster: Address,
    pub gas_token: Address,
    pub paymaster_kind: PaymasterKind,
    /// Key half of the two-dimensional entry point nonce.
    pub nonce_key: U256,
    pub readiness: ReadinessThresholds,
    pub remediation: RemediationAmounts,
    pub safety_buffer: SafetyBuffer,
    pub default_limits: GasLimits,
    pub fees: FeePolicy,
}

impl SponsorConfig {
    pub fn new(paymaster: Address, gas_token: Address, paymaster_kind: PaymasterKind) -> Self {
        Self {
            entry_point: ENTRY_POINT_V07,
            paymaster,
            gas_token,
            paymaster_kind,
            nonce_key: U256::zero(),
            readiness: ReadinessThresholds::default(),
            remediation: RemediationAmounts::default(),
            safety_buffer: SafetyBuffer::default(),
            default_limits: GasLimits::default(),
            fees: FeePolicy::default(),
        }
    }

    pub fn with_entry_point(mut self, entry_point: Address) -> Self {
        self.entry_point = entry_point;
        self
    }
}

/// Bundler endpoint and transport behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlerConfig {
    pub url: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub receipt_poll_interval: Duration,
    pub receipt_max_polls: u32,
}

impl BundlerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            receipt_poll_interval: Duration::from_secs(2),
            receipt_max_polls: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_priced_payload_carries_validity_window() {
        let token = Address::repeat_byte(0x44);
        let payload = PaymasterKind::token_priced().payload(token, 10_000).unwrap();
        let u48 = |bytes: &[u8]| {
            let mut word = [0u8; 8];
            word[2..].copy_from_slice(bytes);
            u64::from_be_bytes(word)
        };
        assert_eq!(&payload[..20], token.as_bytes());
        assert_eq!(u48(&payload[20..26]), 13_600);
        assert_eq!(u48(&payload[26..32]), 9_900);
    }

    #[test]
    fn multi_tenant_payload_ignores_gas_token() {
        let operator = Address::repeat_byte(0x55);
        let payload = PaymasterKind::multi_tenant(operator)
            .payload(Address::repeat_byte(0x44), 0)
            .unwrap();
        assert_eq!(payload.len(), 52);
        assert_eq!(&payload[..20], operator.as_bytes());
        assert!(payload[20..].iter().all(|b| *b == 0xff));
    }

    #[test]
    fn entry_point_constant_matches_canonical_address() {
        let parsed: Address = "0x0000000071727De22E5E9d8BAf0edAc6f37da032".parse().unwrap();
        assert_eq!(parsed, ENTRY_POINT_V07);
    }
}
