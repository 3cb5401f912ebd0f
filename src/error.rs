//! Error types for trustline.

use thiserror::Error;

/// Errors produced while resolving a payment target or driving a zap.
///
/// Variants split along what the user has to do next: fix their input
/// (`InvalidTarget`, `UnsupportedTarget`, `AmountOutOfRange`), retry later
/// (`Timeout`, `Network`, `Upstream`), or give up on this recipient
/// (`MalformedResponse`, `PaymentFailed`).
#[derive(Error, Debug)]
pub enum PayError {
    /// Input is neither an invoice nor a lightning address.
    #[error("invalid payment target: {0}")]
    InvalidTarget(String),

    /// Input was recognized but the endpoint type is not payable here.
    #[error("unsupported payment target: {0}")]
    UnsupportedTarget(String),

    /// The pay-request document from the endpoint failed validation.
    #[error("malformed endpoint response: {0}")]
    MalformedResponse(String),

    /// The endpoint did not answer within the fetch deadline.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Non-2xx HTTP status from the endpoint.
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// Transport-level failure before any HTTP status was received.
    #[error("network error: {0}")]
    Network(String),

    /// Requested amount falls outside the endpoint's sendable range.
    #[error("amount {amount_msats} msat outside [{min_msats}, {max_msats}]")]
    AmountOutOfRange {
        amount_msats: u64,
        min_msats: u64,
        max_msats: u64,
    },

    /// The backend accepted the invoice but settlement did not confirm.
    #[error("payment failed: {0}")]
    PaymentFailed(String),

    /// Local signing/identity failure while building the zap request.
    #[error("signing error: {0}")]
    Signing(String),
}

/// Errors from social-graph edge fetches.
///
/// Cloneable so a single in-flight refresh can report the same failure to
/// every caller that joined it.
#[derive(Error, Debug, Clone)]
pub enum GraphError {
    /// Transport failure while fetching an actor's edges.
    #[error("graph fetch failed: {0}")]
    Network(String),

    /// Actor identifier is not a 64-char lowercase hex public key.
    #[error("invalid actor id: {0}")]
    InvalidActor(String),
}

/// Errors from the ecash ledger reconciler.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// An unexpired quote already exists for the same mint/amount/purpose.
    #[error("duplicate quote for {mint_url} ({amount_sats} sat, {purpose})")]
    DuplicateQuote {
        mint_url: String,
        amount_sats: u64,
        purpose: String,
    },

    /// No quote with that id was ever recorded.
    #[error("unknown quote: {0}")]
    UnknownQuote(String),

    /// A melt-out confirmation would drive the mint balance negative.
    #[error("insufficient balance at {mint_url}: have {have} sat, need {need} sat")]
    InsufficientFunds {
        mint_url: String,
        have: u64,
        need: u64,
    },

    /// Mint is not in the trusted registry and no override was given.
    #[error("mint not trusted: {0}")]
    UntrustedMint(String),

    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
