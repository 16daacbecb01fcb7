// src/test_utils.rs
use std::sync::{Arc, Mutex};

use ethers::types::{Address, Bytes, TransactionReceipt, TxHash, H160, H256, U256, U64};
use serde_json::Value;

pub use crate::chain::{MockChainReader, MockChainWriter, MockUserOpSigner};
pub use crate::transport::MockJsonRpcTransport;

use crate::error::{BundlerError, SponsorError};
use crate::types::{CachedPrice, DepositInfo, GasFees};

pub const SPONSOR: Address = H160([0x5a; 20]);
pub const CHAIN_ID: u64 = 11_155_111;
pub const SIGNATURE: [u8; 65] = [0x5e; 65];

/// What a mocked chain reports. `None` readings fail.
#[derive(Clone, Default)]
pub struct ChainReadings {
    pub deposit_info: DepositInfo,
    pub cached_price: Option<CachedPrice>,
    pub token_price: U256,
    pub token_balance: U256,
    pub allowance: U256,
    pub paymaster_balance: U256,
    pub nonce: U256,
    pub fees: Option<GasFees>,
}

impl ChainReadings {
    /// A sponsor that passes every readiness check at `now`.
    pub fn ready(now: u64) -> Self {
        Self {
            deposit_info: DepositInfo {
                deposit: U256::exp10(18),
                staked: true,
                stake: U256::exp10(18),
                unstake_delay_sec: 86_400,
                withdraw_time: 0,
            },
            cached_price: Some(CachedPrice {
                price: U256::from(2000),
                updated_at: now,
            }),
            token_price: U256::one(),
            token_balance: U256::from(1000),
            allowance: U256::zero(),
            paymaster_balance: U256::from(500),
            nonce: U256::from(3),
            fees: Some(GasFees {
                max_fee_per_gas: U256::from(2_000_000_000u64),
                max_priority_fee_per_gas: U256::from(100_000_000u64),
            }),
        }
    }

    /// A sponsor with nothing set up.
    pub fn empty() -> Self {
        Self {
            cached_price: Some(CachedPrice::default()),
            ..Default::default()
        }
    }

    /// Reader answering every query, any number of times, from these readings.
    pub fn reader(self) -> MockChainReader {
        let mut reader = MockChainReader::new();
        reader.expect_chain_id().returning(|| Ok(CHAIN_ID));
        reader
            .expect_deposit_info()
            .returning(move |_, _| Ok(self.deposit_info));
        reader.expect_cached_price().returning(move |_| {
            self.cached_price
                .ok_or_else(|| SponsorError::EthereumProviderError("execution reverted".into()))
        });
        reader
            .expect_token_price()
            .returning(move |_, _| Ok(self.token_price));
        reader
            .expect_token_balance()
            .returning(move |_, _| Ok(self.token_balance));
        reader
            .expect_token_allowance()
            .returning(move |_, _, _| Ok(self.allowance));
        reader
            .expect_paymaster_balance()
            .returning(move |_, _, _| Ok(self.paymaster_balance));
        reader.expect_nonce().returning(move |_, _, _| Ok(self.nonce));
        reader.expect_fee_data().returning(move || {
            self.fees
                .ok_or_else(|| SponsorError::EthereumProviderError("fee history unavailable".into()))
        });
        reader
    }
}

/// Expects `method` exactly `times` times. `respond` gets the one-based call
/// number for that method; params are appended to `log`.
pub fn expect_method(
    transport: &mut MockJsonRpcTransport,
    method: &'static str,
    times: usize,
    log: &RequestLog,
    mut respond: impl FnMut(usize) -> Result<Value, BundlerError> + Send + 'static,
) {
    let log = log.clone();
    let mut calls = 0;
    transport
        .expect_request()
        .withf(move |m, _| m == method)
        .times(times)
        .returning(move |m, params| {
            log.lock().unwrap().push((m.to_string(), params));
            calls += 1;
            respond(calls)
        });
}

pub fn transport_for(
    method: &'static str,
    times: usize,
    log: &RequestLog,
    respond: impl FnMut(usize) -> Result<Value, BundlerError> + Send + 'static,
) -> MockJsonRpcTransport {
    let mut transport = MockJsonRpcTransport::new();
    expect_method(&mut transport, method, times, log, respond);
    transport
}

pub type RequestLog = Arc<Mutex<Vec<(String, Value)>>>;

/// Signer returning [`SIGNATURE`]. Signed hashes are appended to `log`.
pub fn signer(log: &Arc<Mutex<Vec<H256>>>) -> MockUserOpSigner {
    let log = log.clone();
    let mut signer = MockUserOpSigner::new();
    signer.expect_sign_user_op_hash().returning(move |hash| {
        log.lock().unwrap().push(hash);
        Ok(Bytes::from(SIGNATURE.to_vec()))
    });
    signer
}

pub fn tx_hash(n: u64) -> TxHash {
    H256::from_low_u64_be(n)
}

pub fn receipt(hash: TxHash, success: bool) -> TransactionReceipt {
    TransactionReceipt {
        transaction_hash: hash,
        status: Some(U64::from(u64::from(success))),
        ..Default::default()
    }
}
