// src/paymaster.rs
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use ethers::contract::{parse_log, EthEvent};
use ethers::types::{Address, Bytes, TxHash, H256, U256, U64};
use tracing::{debug, info, warn};

use crate::bindings::gasless_paymaster::PostOpProcessedFilter;
use crate::bundler::BundlerClient;
use crate::chain::{ChainReader, ChainWriter, UserOpSigner};
use crate::config::SponsorConfig;
use crate::error::{Result, SponsorError};
use crate::estimator::{apply_safety_buffer, EstimateMode, GasEstimator};
use crate::hash::user_operation_hash;
use crate::rpc::UserOperationReceipt;
use crate::transport::{HttpTransport, JsonRpcTransport};
use crate::types::{
    CachedPrice, GasFees, ReadinessDetails, ReadinessIssue, ReadinessReport, RemediationKind,
    RemediationStep, UserOperation,
};

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// One sponsored call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitRequest {
    pub sender: Address,
    pub call_data: Bytes,
    /// Factory ‖ factory data for accounts not deployed yet.
    pub init_code: Bytes,
    pub gas: EstimateMode,
    /// Overrides the network fee suggestion.
    pub fees: Option<GasFees>,
}

impl SubmitRequest {
    pub fn new(sender: Address, call_data: Bytes) -> Self {
        Self {
            sender,
            call_data,
            ..Default::default()
        }
    }
}

/// What the paymaster charged, from its `PostOpProcessed` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymasterFee {
    pub user: Address,
    pub token: Address,
    pub actual_gas_cost_wei: U256,
    pub token_cost: U256,
    pub protocol_revenue: U256,
}

impl ReadinessReport {
    /// Judges chain readings against the configured floors. Issues keep the
    /// order the checks run in.
    pub fn assess(details: ReadinessDetails, config: &SponsorConfig, now: u64) -> Self {
        let thresholds = &config.readiness;
        let entry_point = &details.entry_point;
        let mut issues = Vec::new();

        if entry_point.deposit < thresholds.min_entry_point_deposit {
            issues.push(ReadinessIssue::EntryPointDepositLow {
                deposit: entry_point.deposit,
                minimum: thresholds.min_entry_point_deposit,
            });
        }
        if !entry_point.staked {
            issues.push(ReadinessIssue::NotStaked);
        } else {
            if entry_point.stake < thresholds.min_stake {
                issues.push(ReadinessIssue::StakeLow {
                    stake: entry_point.stake,
                    minimum: thresholds.min_stake,
                });
            }
            if entry_point.unstake_delay_sec < thresholds.min_unstake_delay_sec {
                issues.push(ReadinessIssue::UnstakeDelayTooShort {
                    delay_sec: entry_point.unstake_delay_sec,
                    minimum_sec: thresholds.min_unstake_delay_sec,
                });
            }
        }
        if entry_point.withdraw_time != 0 {
            issues.push(ReadinessIssue::StakeUnlocking {
                withdraw_time: entry_point.withdraw_time,
            });
        }

        let price = &details.cached_price;
        if price.price.is_zero() || price.updated_at == 0 {
            issues.push(ReadinessIssue::PriceNotInitialized);
        } else {
            let age_secs = now.saturating_sub(price.updated_at);
            let threshold_secs = thresholds.price_staleness_threshold.as_secs();
            if age_secs > threshold_secs {
                issues.push(ReadinessIssue::PriceStale {
                    age_secs,
                    threshold_secs,
                });
            }
        }

        if config.paymaster_kind.reads_token_price()
            && details.token_price.map_or(true, |p| p.is_zero())
        {
            issues.push(ReadinessIssue::TokenPriceNotSet);
        }
        if details.sponsor_token_balance.is_zero() {
            issues.push(ReadinessIssue::NoTokenBalance);
        }

        // A zero deposit never passes, whatever the configured floor.
        let minimum_deposit = thresholds.min_sponsor_deposit.max(U256::one());
        if details.sponsor_paymaster_deposit < minimum_deposit {
            issues.push(ReadinessIssue::PaymasterDepositLow {
                balance: details.sponsor_paymaster_deposit,
                minimum: minimum_deposit,
            });
            let required = config.remediation.deposit_amount;
            if details.sponsor_allowance < required {
                issues.push(ReadinessIssue::AllowanceShortfall {
                    allowance: details.sponsor_allowance,
                    required,
                });
            }
        }

        Self {
            is_ready: issues.is_empty(),
            issues,
            details,
        }
    }
}

/// Drives a sponsored operation from readiness checks through submission.
pub struct SponsorshipOrchestrator<C, W, S, T = HttpTransport> {
    chain: Arc<C>,
    writer: Arc<W>,
    signer: Arc<S>,
    bundler: Arc<BundlerClient<T>>,
    estimator: GasEstimator<C, T>,
    config: Arc<SponsorConfig>,
}

impl<C, W, S, T> SponsorshipOrchestrator<C, W, S, T>
where
    C: ChainReader,
    W: ChainWriter,
    S: UserOpSigner,
    T: JsonRpcTransport,
{
    pub fn new(
        chain: Arc<C>,
        writer: Arc<W>,
        signer: Arc<S>,
        bundler: Arc<BundlerClient<T>>,
        config: SponsorConfig,
    ) -> Self {
        let config = Arc::new(config);
        let estimator = GasEstimator::new(chain.clone(), bundler.clone(), config.clone());
        Self {
            chain,
            writer,
            signer,
            bundler,
            estimator,
            config,
        }
    }

    pub fn config(&self) -> &SponsorConfig {
        &self.config
    }

    pub fn bundler(&self) -> &BundlerClient<T> {
        &self.bundler
    }

    /// Reads the sponsorship state for `sponsor` fresh from the chain.
    pub async fn check_gasless_readiness(&self, sponsor: Address) -> Result<ReadinessReport> {
        let config = &self.config;
        let now = unix_now();

        let entry_point = self
            .chain
            .deposit_info(config.entry_point, config.paymaster)
            .await?;
        let cached_price = match self.chain.cached_price(config.paymaster).await {
            Ok(price) => price,
            Err(e) => {
                warn!("Could not read cached price from {:?}: {}", config.paymaster, e);
                CachedPrice::default()
            }
        };
        let token_price = if config.paymaster_kind.reads_token_price() {
            Some(
                self.chain
                    .token_price(config.paymaster, config.gas_token)
                    .await?,
            )
        } else {
            None
        };
        let sponsor_token_balance = self.chain.token_balance(config.gas_token, sponsor).await?;
        let sponsor_paymaster_deposit = self
            .chain
            .paymaster_balance(config.paymaster, sponsor, config.gas_token)
            .await?;
        let sponsor_allowance = self
            .chain
            .token_allowance(config.gas_token, sponsor, config.paymaster)
            .await?;

        let details = ReadinessDetails {
            entry_point,
            price_age_secs: (cached_price.updated_at != 0)
                .then(|| now.saturating_sub(cached_price.updated_at)),
            cached_price,
            token_price,
            sponsor_token_balance,
            sponsor_paymaster_deposit,
            sponsor_allowance,
        };
        let report = ReadinessReport::assess(details, config, now);
        debug!(
            "Readiness of {:?}: ready={} issues={}",
            sponsor,
            report.is_ready,
            report.issues.len()
        );
        Ok(report)
    }

    /// Sends the transactions that fix the sponsor's remediable issues, each
    /// confirmed before the next. Returns the steps taken.
    pub async fn prepare_gasless_environment(&self) -> Result<Vec<RemediationStep>> {
        let sponsor = self.writer.address();
        let report = self.check_gasless_readiness(sponsor).await?;
        if report.is_ready {
            info!("Sponsor {:?} is already ready", sponsor);
            return Ok(Vec::new());
        }
        for issue in report.unremediable() {
            warn!("Cannot remediate automatically: {}", issue);
        }

        let mut steps = Vec::new();
        for step in report.remediation_plan() {
            info!("Running remediation step {}", step);
            let hash = self.send_remediation(step, sponsor).await?;
            self.confirm(step, hash).await?;
            info!("{} confirmed in {:?}", step, hash);
            steps.push(RemediationStep { step, hash });
        }
        Ok(steps)
    }

    async fn send_remediation(&self, step: RemediationKind, sponsor: Address) -> Result<TxHash> {
        let config = &self.config;
        let sent = match step {
            RemediationKind::UpdatePrice => self.writer.update_price(config.paymaster).await,
            RemediationKind::Approve => {
                self.writer
                    .approve(
                        config.gas_token,
                        config.paymaster,
                        config.remediation.approve_amount,
                    )
                    .await
            }
            RemediationKind::Deposit => {
                self.writer
                    .deposit_for(
                        config.paymaster,
                        sponsor,
                        config.gas_token,
                        config.remediation.deposit_amount,
                    )
                    .await
            }
        };
        sent.map_err(|e| SponsorError::RemediationFailed {
            step,
            reason: e.to_string(),
        })
    }

    async fn confirm(&self, step: RemediationKind, hash: TxHash) -> Result<()> {
        let receipt = self
            .writer
            .wait_for_receipt(hash)
            .await
            .map_err(|e| SponsorError::RemediationFailed {
                step,
                reason: e.to_string(),
            })?;
        match receipt {
            Some(receipt) if receipt.status == Some(U64::zero()) => {
                Err(SponsorError::RemediationFailed {
                    step,
                    reason: format!("transaction {hash:?} reverted"),
                })
            }
            Some(_) => Ok(()),
            None => Err(SponsorError::RemediationFailed {
                step,
                reason: format!("transaction {hash:?} was not confirmed"),
            }),
        }
    }

    /// Final, unsigned operation for `request`.
    pub async fn build_user_operation(&self, request: &SubmitRequest) -> Result<UserOperation> {
        if request.sender.is_zero() {
            return Err(SponsorError::InvalidParameters(
                "sender must not be the zero address".to_string(),
            ));
        }
        let now = unix_now();
        let estimate = self
            .estimator
            .estimate(
                request.sender,
                request.init_code.clone(),
                request.call_data.clone(),
                &request.gas,
                now,
            )
            .await?;
        let estimate = match request.gas {
            EstimateMode::Auto => apply_safety_buffer(&estimate, &self.config.safety_buffer),
            EstimateMode::Manual(_) => estimate,
        };
        let limits = estimate.or_defaults(&self.config.default_limits);
        let fees = match request.fees {
            Some(fees) => fees,
            None => self.estimator.current_fees().await,
        };

        let mut op = self
            .estimator
            .operation(
                request.sender,
                request.init_code.clone(),
                request.call_data.clone(),
                &limits,
                &fees,
                now,
            )
            .await?;
        op.signature = Bytes::new();
        Ok(op)
    }

    /// Builds, signs and sends `request`. Returns the user operation hash;
    /// inclusion is observed separately through the receipt.
    pub async fn submit(&self, request: &SubmitRequest) -> Result<H256> {
        let mut op = self.build_user_operation(request).await?;
        let chain_id = self.chain.chain_id().await?;
        let hash = user_operation_hash(&op, self.config.entry_point, chain_id);
        op.signature = self.signer.sign_user_op_hash(hash).await?;

        let returned = self.bundler.send_user_operation(&op).await?;
        if returned != hash {
            warn!(
                "Bundler returned hash {:?}, locally computed {:?}",
                returned, hash
            );
        }
        info!("Submitted user operation {:?} for {:?}", returned, op.sender);
        Ok(returned)
    }

    pub async fn wait_for_user_operation(
        &self,
        hash: H256,
    ) -> Result<Option<UserOperationReceipt>> {
        self.bundler.wait_for_receipt(hash).await
    }
}

/// Decodes the paymaster's charge from an operation receipt.
pub fn fee_from_receipt(receipt: &UserOperationReceipt, paymaster: Address) -> Option<PaymasterFee> {
    let signature = PostOpProcessedFilter::signature();
    receipt
        .logs
        .iter()
        .filter(|log| log.address == paymaster && log.topics.first() == Some(&signature))
        .find_map(|log| parse_log::<PostOpProcessedFilter>(log.clone()).ok())
        .map(|event| PaymasterFee {
            user: event.user,
            token: event.token,
            actual_gas_cost_wei: event.actual_gas_cost_wei,
            token_cost: event.token_cost,
            protocol_revenue: event.protocol_revenue,
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use ethers::abi::{self, Token};
    use ethers::types::{Log, H160};
    use mockall::predicate::eq;
    use mockall::Sequence;
    use serde_json::{json, Value};

    use super::*;
    use crate::config::{BundlerConfig, PaymasterKind};
    use crate::error::{BundlerError, RpcError};
    use crate::rpc::RpcUserOperation;
    use crate::test_utils::{
        expect_method, receipt, signer, transport_for, tx_hash, ChainReadings, MockChainReader,
        MockChainWriter, MockJsonRpcTransport, MockUserOpSigner, RequestLog, CHAIN_ID, SIGNATURE,
        SPONSOR,
    };
    use crate::types::GasEstimate;

    const PAYMASTER: Address = H160([0xab; 20]);
    const TOKEN: Address = H160([0x44; 20]);

    type Orchestrator = SponsorshipOrchestrator<
        MockChainReader,
        MockChainWriter,
        MockUserOpSigner,
        MockJsonRpcTransport,
    >;

    fn config() -> SponsorConfig {
        SponsorConfig::new(PAYMASTER, TOKEN, PaymasterKind::token_priced())
    }

    fn orchestrator(
        reader: MockChainReader,
        writer: MockChainWriter,
        signer: MockUserOpSigner,
        transport: MockJsonRpcTransport,
    ) -> Orchestrator {
        let config = config();
        let bundler = BundlerClient::with_transport(
            transport,
            &BundlerConfig::new("https://api.pimlico.io/v2/sepolia/rpc"),
            config.entry_point,
        );
        SponsorshipOrchestrator::new(
            Arc::new(reader),
            Arc::new(writer),
            Arc::new(signer),
            Arc::new(bundler),
            config,
        )
    }

    fn reading_only(readings: ChainReadings) -> Orchestrator {
        orchestrator(
            readings.reader(),
            MockChainWriter::new(),
            MockUserOpSigner::new(),
            MockJsonRpcTransport::new(),
        )
    }

    fn expect_send(
        writer: &mut MockChainWriter,
        seq: &mut Sequence,
        step: RemediationKind,
        hash: TxHash,
    ) {
        match step {
            RemediationKind::UpdatePrice => {
                writer
                    .expect_update_price()
                    .with(eq(PAYMASTER))
                    .times(1)
                    .in_sequence(seq)
                    .returning(move |_| Ok(hash));
            }
            RemediationKind::Approve => {
                writer
                    .expect_approve()
                    .withf(|token, spender, _| *token == TOKEN && *spender == PAYMASTER)
                    .times(1)
                    .in_sequence(seq)
                    .returning(move |_, _, _| Ok(hash));
            }
            RemediationKind::Deposit => {
                writer
                    .expect_deposit_for()
                    .withf(|paymaster, user, token, _| {
                        *paymaster == PAYMASTER && *user == SPONSOR && *token == TOKEN
                    })
                    .times(1)
                    .in_sequence(seq)
                    .returning(move |_, _, _, _| Ok(hash));
            }
        }
    }

    /// Writer that must send and confirm `steps` in this order. The receipt
    /// of `reverting` reports failure. Anything else sent fails the test.
    fn writer_for(
        steps: &[RemediationKind],
        reverting: Option<RemediationKind>,
    ) -> MockChainWriter {
        let mut writer = MockChainWriter::new();
        let mut seq = Sequence::new();
        writer.expect_address().return_const(SPONSOR);
        for (i, &step) in steps.iter().enumerate() {
            let hash = tx_hash(i as u64 + 1);
            expect_send(&mut writer, &mut seq, step, hash);
            let success = reverting != Some(step);
            writer
                .expect_wait_for_receipt()
                .with(eq(hash))
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |hash| Ok(Some(receipt(hash, success))));
        }
        writer
    }

    fn sent_operation(log: &RequestLog) -> UserOperation {
        let requests = log.lock().unwrap();
        let (_, params) = requests
            .iter()
            .find(|(method, _)| method == "eth_sendUserOperation")
            .expect("operation was not sent");
        let op: RpcUserOperation = serde_json::from_value(params[0].clone()).unwrap();
        UserOperation::try_from(op).unwrap()
    }

    #[tokio::test]
    async fn empty_sponsor_is_not_ready() {
        let orchestrator = reading_only(ChainReadings::empty());

        let report = orchestrator.check_gasless_readiness(SPONSOR).await.unwrap();

        assert!(!report.is_ready);
        assert!(report.issues.contains(&ReadinessIssue::PriceNotInitialized));
        assert!(report.issues.contains(&ReadinessIssue::NoTokenBalance));
        assert_eq!(report.details.price_age_secs, None);
    }

    #[tokio::test]
    async fn funded_sponsor_is_ready() {
        let orchestrator = reading_only(ChainReadings::ready(unix_now()));

        let report = orchestrator.check_gasless_readiness(SPONSOR).await.unwrap();

        assert!(report.is_ready, "issues: {:?}", report.messages());
        assert!(report.issues.is_empty());
        assert_eq!(report.details.sponsor_paymaster_deposit, U256::from(500));
        assert_eq!(report.details.token_price, Some(U256::one()));
    }

    #[tokio::test]
    async fn unreadable_price_counts_as_uninitialized() {
        let orchestrator = reading_only(ChainReadings {
            cached_price: None,
            ..ChainReadings::ready(unix_now())
        });
        let report = orchestrator.check_gasless_readiness(SPONSOR).await.unwrap();
        assert_eq!(report.issues, vec![ReadinessIssue::PriceNotInitialized]);
    }

    #[test]
    fn assessment_flags_stale_price_and_unlocking_stake() {
        let now = 1_700_000_000;
        let mut details = ReadinessDetails {
            cached_price: CachedPrice {
                price: U256::from(2000),
                updated_at: now - 7200,
            },
            token_price: Some(U256::one()),
            sponsor_token_balance: U256::one(),
            sponsor_paymaster_deposit: U256::one(),
            ..Default::default()
        };
        details.entry_point.deposit = U256::exp10(18);
        details.entry_point.staked = true;
        details.entry_point.stake = U256::exp10(18);
        details.entry_point.unstake_delay_sec = 86_400;
        details.entry_point.withdraw_time = now + 10;

        let report = ReadinessReport::assess(details, &config(), now);

        assert_eq!(
            report.issues,
            vec![
                ReadinessIssue::StakeUnlocking {
                    withdraw_time: now + 10
                },
                ReadinessIssue::PriceStale {
                    age_secs: 7200,
                    threshold_secs: 3600
                },
            ]
        );
    }

    #[test]
    fn multi_tenant_assessment_ignores_token_price() {
        let now = 1_700_000_000;
        let config = SponsorConfig::new(
            PAYMASTER,
            Address::repeat_byte(0x44),
            PaymasterKind::multi_tenant(Address::repeat_byte(0x77)),
        );
        let mut details = ReadinessDetails {
            cached_price: CachedPrice {
                price: U256::from(2000),
                updated_at: now,
            },
            sponsor_token_balance: U256::one(),
            sponsor_paymaster_deposit: U256::one(),
            ..Default::default()
        };
        details.entry_point.deposit = U256::exp10(18);
        details.entry_point.staked = true;
        details.entry_point.stake = U256::exp10(18);
        details.entry_point.unstake_delay_sec = 86_400;

        assert!(ReadinessReport::assess(details, &config, now).is_ready);
    }

    #[tokio::test]
    async fn remediation_updates_price_before_approve_and_deposit() {
        let readings = ChainReadings {
            cached_price: Some(CachedPrice {
                price: U256::from(2000),
                updated_at: unix_now() - 7200,
            }),
            paymaster_balance: U256::zero(),
            allowance: U256::zero(),
            ..ChainReadings::ready(unix_now())
        };
        let plan = [
            RemediationKind::UpdatePrice,
            RemediationKind::Approve,
            RemediationKind::Deposit,
        ];
        let orchestrator = orchestrator(
            readings.reader(),
            writer_for(&plan, None),
            MockUserOpSigner::new(),
            MockJsonRpcTransport::new(),
        );

        let steps = orchestrator.prepare_gasless_environment().await.unwrap();

        let kinds: Vec<_> = steps.iter().map(|s| s.step).collect();
        assert_eq!(kinds, plan);
        assert_eq!(steps[0].hash, tx_hash(1));
        assert_eq!(steps[2].hash, tx_hash(3));
    }

    #[tokio::test]
    async fn satisfied_allowance_is_not_reapproved() {
        let readings = ChainReadings {
            paymaster_balance: U256::zero(),
            allowance: U256::MAX,
            ..ChainReadings::ready(unix_now())
        };
        let orchestrator = orchestrator(
            readings.reader(),
            writer_for(&[RemediationKind::Deposit], None),
            MockUserOpSigner::new(),
            MockJsonRpcTransport::new(),
        );

        let steps = orchestrator.prepare_gasless_environment().await.unwrap();

        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].step, RemediationKind::Deposit);
    }

    #[tokio::test]
    async fn reverted_step_aborts_the_rest() {
        let readings = ChainReadings {
            cached_price: Some(CachedPrice::default()),
            paymaster_balance: U256::zero(),
            ..ChainReadings::ready(unix_now())
        };
        let orchestrator = orchestrator(
            readings.reader(),
            writer_for(
                &[RemediationKind::UpdatePrice, RemediationKind::Approve],
                Some(RemediationKind::Approve),
            ),
            MockUserOpSigner::new(),
            MockJsonRpcTransport::new(),
        );

        let err = orchestrator.prepare_gasless_environment().await.unwrap_err();

        match err {
            SponsorError::RemediationFailed { step, reason } => {
                assert_eq!(step, RemediationKind::Approve);
                assert!(reason.contains("reverted"), "{reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_send_aborts_before_waiting() {
        let readings = ChainReadings {
            cached_price: Some(CachedPrice::default()),
            paymaster_balance: U256::zero(),
            ..ChainReadings::ready(unix_now())
        };
        let mut writer = MockChainWriter::new();
        writer.expect_address().return_const(SPONSOR);
        writer.expect_update_price().times(1).returning(|_| {
            Err(SponsorError::EthereumProviderError(
                "insufficient funds for gas".into(),
            ))
        });
        let orchestrator = orchestrator(
            readings.reader(),
            writer,
            MockUserOpSigner::new(),
            MockJsonRpcTransport::new(),
        );

        let err = orchestrator.prepare_gasless_environment().await.unwrap_err();

        match err {
            SponsorError::RemediationFailed { step, reason } => {
                assert_eq!(step, RemediationKind::UpdatePrice);
                assert!(reason.contains("insufficient funds"), "{reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unconfirmed_transaction_aborts() {
        let readings = ChainReadings {
            paymaster_balance: U256::zero(),
            allowance: U256::MAX,
            ..ChainReadings::ready(unix_now())
        };
        let mut writer = MockChainWriter::new();
        writer.expect_address().return_const(SPONSOR);
        writer
            .expect_deposit_for()
            .times(1)
            .returning(|_, _, _, _| Ok(tx_hash(9)));
        writer
            .expect_wait_for_receipt()
            .with(eq(tx_hash(9)))
            .times(1)
            .returning(|_| Ok(None));
        let orchestrator = orchestrator(
            readings.reader(),
            writer,
            MockUserOpSigner::new(),
            MockJsonRpcTransport::new(),
        );

        let err = orchestrator.prepare_gasless_environment().await.unwrap_err();

        assert_eq!(err.kind().code(), "E2001");
        match err {
            SponsorError::RemediationFailed { step, reason } => {
                assert_eq!(step, RemediationKind::Deposit);
                assert!(reason.contains("not confirmed"), "{reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn ready_sponsor_needs_no_remediation() {
        let orchestrator = orchestrator(
            ChainReadings::ready(unix_now()).reader(),
            writer_for(&[], None),
            MockUserOpSigner::new(),
            MockJsonRpcTransport::new(),
        );
        assert!(orchestrator
            .prepare_gasless_environment()
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn auto_submission_buffers_the_bundler_estimate() {
        let returned = H256::repeat_byte(0x77);
        let log = RequestLog::default();
        let mut transport = transport_for("eth_estimateUserOperationGas", 1, &log, |_| {
            Ok(json!({
                "preVerificationGas": "0xc350",
                "verificationGasLimit": "0x186a0",
                "callGasLimit": "0x11170",
                "paymasterVerificationGasLimit": "0x13880",
                "paymasterPostOpGasLimit": "0xc350"
            }))
        });
        expect_method(&mut transport, "eth_sendUserOperation", 1, &log, move |_| {
            Ok(json!(returned))
        });
        let signed = Arc::new(Mutex::new(Vec::new()));
        let orchestrator = orchestrator(
            ChainReadings::ready(unix_now()).reader(),
            MockChainWriter::new(),
            signer(&signed),
            transport,
        );
        let request =
            SubmitRequest::new(Address::repeat_byte(0x01), Bytes::from(vec![0xca, 0xfe]));

        let hash = orchestrator.submit(&request).await.unwrap();
        assert_eq!(hash, returned);

        let op = sent_operation(&log);
        let (verification, call) = op.gas_limits();
        assert_eq!(verification, U256::from(120_000));
        assert_eq!(call, U256::from(70_000));
        let paymaster = op.paymaster_data().unwrap().unwrap();
        assert_eq!(paymaster.paymaster, PAYMASTER);
        assert_eq!(paymaster.verification_gas_limit, U256::from(80_000));
        assert_eq!(paymaster.post_op_gas_limit, U256::from(60_000));
        assert_eq!(op.nonce, U256::from(3));
        assert_eq!(op.signature.to_vec(), SIGNATURE.to_vec());

        let unsigned = UserOperation {
            signature: Bytes::new(),
            ..op
        };
        assert_eq!(
            *signed.lock().unwrap(),
            vec![user_operation_hash(
                &unsigned,
                orchestrator.config().entry_point,
                CHAIN_ID
            )]
        );
    }

    #[tokio::test]
    async fn manual_submission_uses_limits_verbatim() {
        let log = RequestLog::default();
        let transport =
            transport_for("eth_sendUserOperation", 1, &log, |_| Ok(json!(H256::zero())));
        let signed = Arc::new(Mutex::new(Vec::new()));
        let orchestrator = orchestrator(
            ChainReadings::ready(unix_now()).reader(),
            MockChainWriter::new(),
            signer(&signed),
            transport,
        );
        let request = SubmitRequest {
            gas: EstimateMode::Manual(GasEstimate {
                verification_gas_limit: Some(U256::from(120_000)),
                call_gas_limit: Some(U256::from(90_000)),
                ..Default::default()
            }),
            fees: Some(GasFees {
                max_fee_per_gas: U256::from(7),
                max_priority_fee_per_gas: U256::from(2),
            }),
            ..SubmitRequest::new(Address::repeat_byte(0x01), Bytes::from(vec![0x01]))
        };

        orchestrator.submit(&request).await.unwrap();

        let op = sent_operation(&log);
        assert_eq!(op.gas_limits(), (U256::from(120_000), U256::from(90_000)));
        assert_eq!(op.fees(), (U256::from(2), U256::from(7)));
        assert_eq!(op.pre_verification_gas, U256::from(50_000));
    }

    #[tokio::test]
    async fn bundler_rejection_surfaces_after_signing() {
        let log = RequestLog::default();
        let transport = transport_for("eth_sendUserOperation", 1, &log, |_| {
            Err(BundlerError::Rpc(RpcError::new(-32500, "AA33 reverted", None)))
        });
        let signed = Arc::new(Mutex::new(Vec::new()));
        let orchestrator = orchestrator(
            ChainReadings::ready(unix_now()).reader(),
            MockChainWriter::new(),
            signer(&signed),
            transport,
        );
        let request = SubmitRequest {
            gas: EstimateMode::Manual(GasEstimate::default()),
            ..SubmitRequest::new(Address::repeat_byte(0x01), Bytes::new())
        };

        let err = orchestrator.submit(&request).await.unwrap_err();

        assert_eq!(err.kind().code(), "E5002");
        assert_eq!(signed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn zero_sender_is_rejected_before_any_call() {
        let orchestrator = orchestrator(
            MockChainReader::new(),
            MockChainWriter::new(),
            MockUserOpSigner::new(),
            MockJsonRpcTransport::new(),
        );
        let request = SubmitRequest::new(Address::zero(), Bytes::from(vec![0x01]));

        let err = orchestrator.submit(&request).await.unwrap_err();

        assert!(matches!(err, SponsorError::InvalidParameters(_)));
        assert_eq!(err.kind().code(), "E1003");
    }

    #[test]
    fn decodes_paymaster_fee_from_receipt_logs() {
        let user = Address::repeat_byte(0x01);
        let token = Address::repeat_byte(0x44);
        let event = Log {
            address: PAYMASTER,
            topics: vec![
                PostOpProcessedFilter::signature(),
                H256::from(user),
                H256::from(token),
            ],
            data: abi::encode(&[
                Token::Uint(U256::exp10(15)),
                Token::Uint(U256::from(2_500_000u64)),
                Token::Uint(U256::from(25_000u64)),
            ])
            .into(),
            ..Default::default()
        };
        let unrelated = Log {
            address: Address::repeat_byte(0x99),
            topics: vec![PostOpProcessedFilter::signature()],
            ..Default::default()
        };
        let receipt: UserOperationReceipt = serde_json::from_value(json!({
            "userOpHash": H256::repeat_byte(0x09),
            "sender": user,
            "nonce": "0x1",
            "actualGasCost": "0x38d7ea4c68000",
            "actualGasUsed": "0x186a0",
            "success": true,
            "logs": [unrelated, event],
            "receipt": Value::Null
        }))
        .unwrap();

        let fee = fee_from_receipt(&receipt, PAYMASTER).unwrap();
        assert_eq!(fee.user, user);
        assert_eq!(fee.token, token);
        assert_eq!(fee.actual_gas_cost_wei, U256::exp10(15));
        assert_eq!(fee.token_cost, U256::from(2_500_000u64));
        assert_eq!(fee.protocol_revenue, U256::from(25_000u64));

        assert!(fee_from_receipt(&receipt, Address::repeat_byte(0x98)).is_none());
    }
}
