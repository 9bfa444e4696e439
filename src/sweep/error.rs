use thiserror::Error;

use crate::ln;

/// Consensus or relay policy reasons a single fee tier can't be built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("sweep output {value} sat is below the dust limit of {dust_limit} sat")]
    OutputBelowDust { value: u64, dust_limit: u64 },
    #[error("fee of {fee} sat exceeds the swept value of {total} sat")]
    FeeExceedsValue { fee: u64, total: u64 },
    #[error("output value {0} sat is out of range")]
    ValueOutOfRange(u64),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("cannot send coins to pubkeys")]
    PubkeyDestinationRejected,
    #[error("no fee estimate available for a {0} block target")]
    FeeEstimationUnavailable(u32),
    #[error("unsupported utxo address type {0}")]
    UnsupportedAddressType(String),
    #[error("utxo is malformed: {0}")]
    MalformedUtxo(String),
    #[error("no confirmed coins to sweep")]
    NoInputs,
    #[error(transparent)]
    Policy(#[from] PolicyViolation),
    #[error("{context}: {source}")]
    Rpc {
        context: String,
        #[source]
        source: ln::Error,
    },
    #[error("signer returned an empty response for {0}")]
    EmptySignerResponse(&'static str),
    #[error("signer returned an invalid signature: {0}")]
    InvalidSignature(#[from] bitcoin::secp256k1::Error),
    #[error("signer returned an invalid sighash midstate")]
    InvalidSigHashes,
    #[error("fee accounting failed: inputs {inputs} sat, outputs {outputs} sat")]
    FeeAccounting { inputs: u64, outputs: u64 },
    #[error("transaction was rejected: {reason}")]
    BroadcastRejected { reason: String },
    #[error("invalid lock time: {0}")]
    LockTime(String),
}

impl Error {
    pub(crate) fn rpc(context: impl Into<String>) -> impl FnOnce(ln::Error) -> Self {
        let context = context.into();
        move |source| Self::Rpc { context, source }
    }
}
