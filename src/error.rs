// src/error.rs
use std::fmt;

use ethers::types::U256;
use serde_json::Value;
use thiserror::Error;

use crate::types::RemediationKind;

pub type Result<T, E = SponsorError> = std::result::Result<T, E>;

/// Machine-readable error classification shared by every error in the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidParameter,
    ValueOutOfRange,
    InvalidLength,
    ContractRevert,
    NetworkTimeout,
    RpcError,
    ConnectionRefused,
    SignerError,
    InternalError,
    BundlerError,
    UserOpReverted,
    SignatureInvalid,
    InsufficientFunds,
    NonceTooLow,
    RateLimited,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidParameter => "E1003",
            ErrorKind::ValueOutOfRange => "E1002",
            ErrorKind::InvalidLength => "E1005",
            ErrorKind::ContractRevert => "E2001",
            ErrorKind::NetworkTimeout => "E3001",
            ErrorKind::RpcError => "E3002",
            ErrorKind::ConnectionRefused => "E3003",
            ErrorKind::SignerError => "E4001",
            ErrorKind::InternalError => "E4002",
            ErrorKind::BundlerError => "E5001",
            ErrorKind::UserOpReverted => "E5002",
            ErrorKind::SignatureInvalid => "E5003",
            ErrorKind::InsufficientFunds => "E5004",
            ErrorKind::NonceTooLow => "E5005",
            ErrorKind::RateLimited => "E5006",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Failures of the pure packing and hashing layer. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("{field} value {value} exceeds {bits} bits")]
    ValueTooLarge {
        field: &'static str,
        value: U256,
        bits: u32,
    },

    #[error("{field} must be exactly {expected} bytes, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{field} must be at least {minimum} bytes, got {actual}")]
    TooShort {
        field: &'static str,
        minimum: usize,
        actual: usize,
    },

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),
}

impl CodecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CodecError::ValueTooLarge { .. } => ErrorKind::ValueOutOfRange,
            CodecError::InvalidLength { .. } | CodecError::TooShort { .. } => {
                ErrorKind::InvalidLength
            }
            CodecError::InvalidQuantity(_) => ErrorKind::InvalidParameter,
        }
    }
}

/// Category of a JSON-RPC error object returned by a bundler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorKind {
    SignatureInvalid,
    UserOpReverted,
    InsufficientFunds,
    NonceTooLow,
    RateLimited,
    Other,
}

/// A well-formed JSON-RPC error object, classified by code and message.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
    pub kind: RpcErrorKind,
}

impl RpcError {
    pub const RATE_LIMIT_CODE: i64 = -32604;
    /// Some providers echo the HTTP status as the JSON-RPC code.
    pub const HTTP_RATE_LIMIT_CODE: i64 = 429;

    pub fn new(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        let message = message.into();
        let kind = Self::classify(code, &message);
        Self {
            code,
            message,
            data,
            kind,
        }
    }

    fn classify(code: i64, message: &str) -> RpcErrorKind {
        let msg = message.to_lowercase();
        if msg.contains("aa10") || msg.contains("invalid signature") {
            RpcErrorKind::SignatureInvalid
        } else if msg.contains("aa21") || msg.contains("aa25") || msg.contains("reverted") {
            RpcErrorKind::UserOpReverted
        } else if msg.contains("aa31")
            || msg.contains("aa33")
            || msg.contains("paymaster deposit too low")
        {
            RpcErrorKind::InsufficientFunds
        } else if msg.contains("aa24") || msg.contains("nonce too low") {
            RpcErrorKind::NonceTooLow
        } else if code == Self::RATE_LIMIT_CODE
            || code == Self::HTTP_RATE_LIMIT_CODE
            || msg.contains("rate limit")
        {
            RpcErrorKind::RateLimited
        } else {
            RpcErrorKind::Other
        }
    }

    pub fn error_kind(&self) -> ErrorKind {
        match self.kind {
            RpcErrorKind::SignatureInvalid => ErrorKind::SignatureInvalid,
            RpcErrorKind::UserOpReverted => ErrorKind::UserOpReverted,
            RpcErrorKind::InsufficientFunds => ErrorKind::InsufficientFunds,
            RpcErrorKind::NonceTooLow => ErrorKind::NonceTooLow,
            RpcErrorKind::RateLimited => ErrorKind::RateLimited,
            RpcErrorKind::Other => ErrorKind::BundlerError,
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            RpcErrorKind::SignatureInvalid => "AA10: Invalid UserOperation signature",
            RpcErrorKind::UserOpReverted => "AA2x: UserOperation execution reverted",
            RpcErrorKind::InsufficientFunds => "AA3x: Paymaster or account insufficient funds",
            RpcErrorKind::NonceTooLow => "AA24: Nonce too low or already used",
            RpcErrorKind::RateLimited => "Bundler rate limit exceeded",
            RpcErrorKind::Other => "Bundler error",
        };
        write!(f, "{label} ({}: {})", self.code, self.message)
    }
}

/// Failures talking to a bundler endpoint.
#[derive(Error, Debug, Clone)]
pub enum BundlerError {
    #[error("{0}")]
    Rpc(RpcError),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Could not connect to bundler: {0}")]
    ConnectionRefused(String),

    #[error("Bundler request timed out: {0}")]
    Timeout(String),

    #[error("Bundler transport error: {0}")]
    Transport(String),

    #[error("bundler returned empty result for {method}")]
    EmptyResult { method: String },

    #[error("Malformed bundler response for {method}: {reason}")]
    InvalidResponse { method: String, reason: String },
}

impl BundlerError {
    /// Rate limits and transient network failures are worth another attempt.
    /// Everything else, validation rejections included, is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            BundlerError::Rpc(rpc) => rpc.kind == RpcErrorKind::RateLimited,
            BundlerError::Http { status, .. } => *status == 429,
            BundlerError::ConnectionRefused(_) | BundlerError::Timeout(_) => true,
            _ => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BundlerError::Rpc(rpc) => rpc.error_kind(),
            BundlerError::Http { status: 429, .. } => ErrorKind::RateLimited,
            BundlerError::Http { .. } => ErrorKind::RpcError,
            BundlerError::ConnectionRefused(_) => ErrorKind::ConnectionRefused,
            BundlerError::Timeout(_) => ErrorKind::NetworkTimeout,
            BundlerError::Transport(_) | BundlerError::InvalidResponse { .. } => {
                ErrorKind::RpcError
            }
            BundlerError::EmptyResult { .. } => ErrorKind::InternalError,
        }
    }
}

#[derive(Error, Debug)]
pub enum SponsorError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Bundler(#[from] BundlerError),

    #[error("Ethereum provider error: {0}")]
    EthereumProviderError(String),

    #[error("Signer error: {0}")]
    Signer(String),

    #[error("Remediation step {step} failed: {reason}")]
    RemediationFailed { step: RemediationKind, reason: String },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

impl SponsorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SponsorError::Codec(e) => e.kind(),
            SponsorError::Bundler(e) => e.kind(),
            SponsorError::EthereumProviderError(_) => ErrorKind::RpcError,
            SponsorError::Signer(_) => ErrorKind::SignerError,
            SponsorError::RemediationFailed { .. } => ErrorKind::ContractRevert,
            SponsorError::InvalidParameters(_) => ErrorKind::InvalidParameter,
        }
    }
}
