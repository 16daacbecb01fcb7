// src/chain.rs
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use tracing::debug;

use crate::bindings::{EntryPoint, GasToken, GaslessPaymaster};
use crate::error::{Result, SponsorError};
use crate::types::{CachedPrice, DepositInfo, GasFees};

/// Read-only chain access the core depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;

    async fn deposit_info(&self, entry_point: Address, account: Address) -> Result<DepositInfo>;

    async fn cached_price(&self, paymaster: Address) -> Result<CachedPrice>;

    async fn token_price(&self, paymaster: Address, token: Address) -> Result<U256>;

    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256>;

    async fn token_allowance(&self, token: Address, owner: Address, spender: Address)
        -> Result<U256>;

    /// The sponsor's deposit held inside the paymaster.
    async fn paymaster_balance(&self, paymaster: Address, user: Address, token: Address)
        -> Result<U256>;

    async fn nonce(&self, entry_point: Address, sender: Address, key: U256) -> Result<U256>;

    /// Suggested `(max_fee_per_gas, max_priority_fee_per_gas)`.
    async fn fee_data(&self) -> Result<GasFees>;
}

/// Transaction-sending chain access used for remediation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainWriter: Send + Sync {
    /// Account the transactions are sent from.
    fn address(&self) -> Address;

    async fn update_price(&self, paymaster: Address) -> Result<TxHash>;

    async fn approve(&self, token: Address, spender: Address, amount: U256) -> Result<TxHash>;

    async fn deposit_for(
        &self,
        paymaster: Address,
        user: Address,
        token: Address,
        amount: U256,
    ) -> Result<TxHash>;

    /// `None` if the transaction was dropped before it was mined.
    async fn wait_for_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>>;
}

/// Produces the account signature over a user operation hash.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserOpSigner: Send + Sync {
    async fn sign_user_op_hash(&self, hash: H256) -> Result<Bytes>;
}

#[async_trait]
impl UserOpSigner for LocalWallet {
    async fn sign_user_op_hash(&self, hash: H256) -> Result<Bytes> {
        let signature = self
            .sign_message(hash.as_bytes())
            .await
            .map_err(|e| SponsorError::Signer(e.to_string()))?;
        Ok(Bytes::from(signature.to_vec()))
    }
}

fn provider_error(e: impl Display) -> SponsorError {
    SponsorError::EthereumProviderError(e.to_string())
}

/// [`ChainReader`] and [`ChainWriter`] over any ethers middleware.
pub struct EthersChain<M> {
    client: Arc<M>,
    sender: Address,
    confirmation_interval: Duration,
    /// Lookups of an unknown transaction before it counts as dropped.
    confirmation_retries: usize,
}

impl<M: Middleware + 'static> EthersChain<M> {
    pub fn new(client: Arc<M>, sender: Address) -> Self {
        Self {
            client,
            sender,
            confirmation_interval: Duration::from_secs(2),
            confirmation_retries: 10,
        }
    }

    fn paymaster(&self, address: Address) -> GaslessPaymaster<M> {
        GaslessPaymaster::new(address, self.client.clone())
    }

    fn token(&self, address: Address) -> GasToken<M> {
        GasToken::new(address, self.client.clone())
    }
}

#[async_trait]
impl<M: Middleware + 'static> ChainReader for EthersChain<M> {
    async fn chain_id(&self) -> Result<u64> {
        let chain_id = self.client.get_chainid().await.map_err(provider_error)?;
        u64::try_from(chain_id)
            .map_err(|_| provider_error(format!("chain id {chain_id} does not fit in 64 bits")))
    }

    async fn deposit_info(&self, entry_point: Address, account: Address) -> Result<DepositInfo> {
        let (deposit, staked, stake, unstake_delay_sec, withdraw_time) =
            EntryPoint::new(entry_point, self.client.clone())
                .get_deposit_info(account)
                .call()
                .await
                .map_err(provider_error)?;
        Ok(DepositInfo {
            deposit,
            staked,
            stake: U256::from(stake),
            unstake_delay_sec,
            withdraw_time,
        })
    }

    async fn cached_price(&self, paymaster: Address) -> Result<CachedPrice> {
        let (price, updated_at) = self
            .paymaster(paymaster)
            .cached_price()
            .call()
            .await
            .map_err(provider_error)?;
        Ok(CachedPrice { price, updated_at })
    }

    async fn token_price(&self, paymaster: Address, token: Address) -> Result<U256> {
        self.paymaster(paymaster)
            .token_prices(token)
            .call()
            .await
            .map_err(provider_error)
    }

    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256> {
        self.token(token)
            .balance_of(owner)
            .call()
            .await
            .map_err(provider_error)
    }

    async fn token_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256> {
        self.token(token)
            .allowance(owner, spender)
            .call()
            .await
            .map_err(provider_error)
    }

    async fn paymaster_balance(
        &self,
        paymaster: Address,
        user: Address,
        token: Address,
    ) -> Result<U256> {
        self.paymaster(paymaster)
            .balances(user, token)
            .call()
            .await
            .map_err(provider_error)
    }

    async fn nonce(&self, entry_point: Address, sender: Address, key: U256) -> Result<U256> {
        EntryPoint::new(entry_point, self.client.clone())
            .get_nonce(sender, key)
            .call()
            .await
            .map_err(provider_error)
    }

    async fn fee_data(&self) -> Result<GasFees> {
        let (max_fee_per_gas, max_priority_fee_per_gas) = self
            .client
            .estimate_eip1559_fees(None)
            .await
            .map_err(provider_error)?;
        Ok(GasFees {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        })
    }
}

#[async_trait]
impl<M: Middleware + 'static> ChainWriter for EthersChain<M> {
    fn address(&self) -> Address {
        self.sender
    }

    async fn update_price(&self, paymaster: Address) -> Result<TxHash> {
        let call = self.paymaster(paymaster).update_price();
        let pending = call.send().await.map_err(provider_error)?;
        Ok(pending.tx_hash())
    }

    async fn approve(&self, token: Address, spender: Address, amount: U256) -> Result<TxHash> {
        let call = self.token(token).approve(spender, amount);
        let pending = call.send().await.map_err(provider_error)?;
        Ok(pending.tx_hash())
    }

    async fn deposit_for(
        &self,
        paymaster: Address,
        user: Address,
        token: Address,
        amount: U256,
    ) -> Result<TxHash> {
        let call = self.paymaster(paymaster).deposit_for(user, token, amount);
        let pending = call.send().await.map_err(provider_error)?;
        Ok(pending.tx_hash())
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>> {
        debug!("Waiting for transaction {:?}", hash);
        PendingTransaction::new(hash, self.client.provider())
            .interval(self.confirmation_interval)
            .retries(self.confirmation_retries)
            .await
            .map_err(provider_error)
    }
}
