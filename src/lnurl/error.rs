use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No LNURL could be found in the scanned text
    #[error("'{0}' does not contain an LNURL")]
    NotFound(String),
    #[error("invalid LNURL")]
    InvalidLnUrl,
    /// The service answered with `{"status": "ERROR"}`
    #[error("service reported an error: {reason}")]
    Protocol { reason: String },
    #[error("unsupported LNURL response: {0}")]
    UnsupportedResponse(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Bip32(#[from] bitcoin::bip32::Error),
    #[error("link key derivation exhausted its attempt budget")]
    KeyDerivationExhausted,
    #[error("invalid k1 challenge: {0}")]
    InvalidChallenge(String),
    #[error("no withdraw request has been resolved")]
    NoPendingWithdraw,
    #[error("no pay request has been resolved")]
    NoPendingPay,
    #[error("invalid invoice: {0}")]
    InvalidInvoice(String),
    #[error("invoice description hash {actual} does not match metadata hash {expected}")]
    HashMismatch { expected: String, actual: String },
    #[error("invoice amount {invoice_msat:?} msat does not match the requested {requested_msat} msat")]
    AmountMismatch {
        requested_msat: u64,
        invoice_msat: Option<u64>,
    },
    #[error("unknown success action: {0}")]
    UnsupportedSuccessAction(String),
    #[error("no pay info stored for payment hash {0}")]
    PayInfoNotFound(String),
    #[error("success action can't be decrypted: {0}")]
    NotDecryptable(String),
    #[error("preimage does not match the payment hash")]
    PreimageMismatch,
    #[error(transparent)]
    Store(#[from] crate::database::Error),
}
