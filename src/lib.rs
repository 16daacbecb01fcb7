// src/lib.rs
//! Client-side ERC-4337 v0.7 sponsorship: packs and hashes user operations,
//! talks to bundlers, checks and repairs a sponsor's paymaster setup, and
//! submits sponsored operations.

pub mod bindings;
pub mod bundler;
pub mod chain;
pub mod codec;
pub mod config;
pub mod dialect;
pub mod error;
pub mod estimator;
pub mod hash;
pub mod paymaster;
pub mod quantity;
pub mod retry;
pub mod rpc;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_utils;

pub use bundler::BundlerClient;
pub use chain::{ChainReader, ChainWriter, EthersChain, UserOpSigner};
pub use config::{BundlerConfig, PaymasterKind, SponsorConfig, ENTRY_POINT_V07};
pub use error::{ErrorKind, Result, SponsorError};
pub use estimator::{EstimateMode, GasEstimator};
pub use paymaster::{fee_from_receipt, PaymasterFee, SponsorshipOrchestrator, SubmitRequest};
pub use types::{GasEstimate, ReadinessReport, RemediationStep, UserOperation};
