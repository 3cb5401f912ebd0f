//! Payment target resolution.
//!
//! Turns user input — a bolt11 invoice or a lightning address — into a
//! [`PayEndpoint`] descriptor. Invoices decode locally; addresses go through
//! the LNURL-pay well-known lookup over HTTPS with a bounded timeout.

use crate::error::PayError;
use crate::graph::ActorId;
use crate::schema;
use chrono::{DateTime, Utc};
use log::debug;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Default deadline for LNURL lookups and callback calls.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Sendable ceiling for any-amount invoices: 1 BTC in msat.
pub const MAX_ANY_AMOUNT_MSAT: u64 = 100_000_000_000;

const BECH32_CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";

const MSATS_PER_BTC: u128 = 100_000_000_000;

/// HTTP fetch boundary. Implementations block; async callers bridge through
/// `spawn_blocking`. Non-2xx statuses are returned, not errors.
pub trait Fetch: Send + Sync {
    fn get_json(&self, url: &str) -> Result<FetchResponse, PayError>;
}

pub struct FetchResponse {
    pub status: u16,
    pub body: Value,
}

/// `ureq`-backed fetcher with the bounded timeout applied to every call.
pub struct UreqFetch {
    agent: ureq::Agent,
}

impl UreqFetch {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent }
    }
}

impl Default for UreqFetch {
    fn default() -> Self {
        Self::new(FETCH_TIMEOUT)
    }
}

impl Fetch for UreqFetch {
    fn get_json(&self, url: &str) -> Result<FetchResponse, PayError> {
        match self.agent.get(url).call() {
            Ok(resp) => {
                let status = resp.status();
                let body = resp
                    .into_json::<Value>()
                    .map_err(|e| PayError::MalformedResponse(format!("bad json: {e}")))?;
                Ok(FetchResponse { status, body })
            }
            Err(ureq::Error::Status(status, resp)) => Ok(FetchResponse {
                status,
                body: resp.into_json::<Value>().unwrap_or(Value::Null),
            }),
            Err(ureq::Error::Transport(t)) => {
                let msg = t.to_string();
                if msg.contains("timed out") || msg.contains("timeout") {
                    Err(PayError::Timeout(msg))
                } else {
                    Err(PayError::Network(msg))
                }
            }
        }
    }
}

/// Resolved payment endpoint. Immutable; holders should re-resolve instead of
/// reusing a descriptor long after `resolved_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayEndpoint {
    pub callback: String,
    pub min_sendable: u64,
    pub max_sendable: u64,
    pub metadata: Option<String>,
    pub comment_allowed: u32,
    pub allows_zap: bool,
    pub zap_pubkey: Option<ActorId>,
    pub resolved_at: DateTime<Utc>,
    /// Set when the target was already an invoice; settlement skips the
    /// callback round-trip and pays this directly.
    pub fixed_invoice: Option<String>,
}

/// Classified form of the raw user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayTarget {
    /// bolt11 invoice with its embedded amount, if fixed.
    Invoice {
        raw: String,
        amount_msats: Option<u64>,
    },
    /// `local@domain` lightning address.
    Address { local: String, domain: String },
}

/// First-match classification: invoice, then address, else invalid.
pub fn classify_target(input: &str) -> Result<PayTarget, PayError> {
    let trimmed = input.trim();
    let stripped = trimmed
        .strip_prefix("lightning:")
        .or_else(|| trimmed.strip_prefix("LIGHTNING:"))
        .unwrap_or(trimmed);
    let lower = stripped.to_ascii_lowercase();

    if lower.starts_with("lnurl1") {
        return Err(PayError::UnsupportedTarget(
            "bare lnurl payloads are not supported; use a lightning address".into(),
        ));
    }
    if ["lnbcrt", "lntbs", "lnbc", "lntb"]
        .iter()
        .any(|p| lower.starts_with(p))
    {
        let amount_msats = parse_invoice_amount(&lower)?;
        return Ok(PayTarget::Invoice {
            raw: lower,
            amount_msats,
        });
    }
    if let Some((local, domain)) = split_address(stripped) {
        return Ok(PayTarget::Address { local, domain });
    }
    Err(PayError::InvalidTarget(format!(
        "not an invoice or lightning address: {trimmed}"
    )))
}

/// Extract the amount from a bolt11 human-readable part without a full
/// bech32 decode. Returns `None` for any-amount invoices.
fn parse_invoice_amount(invoice: &str) -> Result<Option<u64>, PayError> {
    let sep = invoice
        .rfind('1')
        .ok_or_else(|| PayError::InvalidTarget("invoice missing separator".into()))?;
    let (hrp, data) = invoice.split_at(sep);
    let data = &data[1..];
    if data.len() < 6 || !data.chars().all(|c| BECH32_CHARSET.contains(c)) {
        return Err(PayError::InvalidTarget("invoice data part malformed".into()));
    }

    let prefix_len = ["lnbcrt", "lntbs", "lnbc", "lntb"]
        .iter()
        .find(|p| hrp.starts_with(*p))
        .map_or(0, |p| p.len());
    let amount_part = &hrp[prefix_len..];
    if amount_part.is_empty() {
        return Ok(None);
    }

    let (digits, divisor) = match amount_part.chars().last() {
        Some('m') => (&amount_part[..amount_part.len() - 1], 1_000u128),
        Some('u') => (&amount_part[..amount_part.len() - 1], 1_000_000),
        Some('n') => (&amount_part[..amount_part.len() - 1], 1_000_000_000),
        Some('p') => (&amount_part[..amount_part.len() - 1], 1_000_000_000_000),
        _ => (amount_part, 1),
    };
    let n: u128 = digits
        .parse()
        .map_err(|_| PayError::InvalidTarget(format!("bad invoice amount: {amount_part}")))?;
    let msats = n
        .checked_mul(MSATS_PER_BTC)
        .ok_or_else(|| PayError::InvalidTarget(format!("invoice amount overflows: {amount_part}")))?;
    if msats % divisor != 0 {
        return Err(PayError::InvalidTarget(
            "invoice amount below msat precision".into(),
        ));
    }
    let msats = msats / divisor;
    u64::try_from(msats)
        .map(Some)
        .map_err(|_| PayError::InvalidTarget("invoice amount overflows".into()))
}

fn split_address(input: &str) -> Option<(String, String)> {
    let (local, domain) = input.split_once('@')?;
    let local_ok = !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.+".contains(c));
    let domain_ok = domain.contains('.')
        && !domain.ends_with('.')
        && domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if local_ok && domain_ok {
        Some((local.to_ascii_lowercase(), domain.to_ascii_lowercase()))
    } else {
        None
    }
}

#[must_use]
pub fn well_known_url(local: &str, domain: &str) -> String {
    let local = utf8_percent_encode(local, NON_ALPHANUMERIC).to_string();
    format!("https://{domain}/.well-known/lnurlp/{local}")
}

pub struct PaymentResolver {
    fetch: Arc<dyn Fetch>,
}

impl PaymentResolver {
    #[must_use]
    pub fn new(fetch: Arc<dyn Fetch>) -> Self {
        Self { fetch }
    }

    /// Resolve user input into a payment endpoint descriptor. Invoices never
    /// touch the network; addresses perform one well-known lookup.
    pub async fn resolve(&self, input: &str) -> Result<PayEndpoint, PayError> {
        match classify_target(input)? {
            PayTarget::Invoice { raw, amount_msats } => {
                let (min, max) = match amount_msats {
                    Some(a) => (a, a),
                    None => (1, MAX_ANY_AMOUNT_MSAT),
                };
                Ok(PayEndpoint {
                    callback: String::new(),
                    min_sendable: min,
                    max_sendable: max,
                    metadata: None,
                    comment_allowed: 0,
                    allows_zap: false,
                    zap_pubkey: None,
                    resolved_at: Utc::now(),
                    fixed_invoice: Some(raw),
                })
            }
            PayTarget::Address { local, domain } => {
                let url = well_known_url(&local, &domain);
                debug!("resolving {local}@{domain} via {url}");
                let resp = self.get(url).await?;
                endpoint_from_document(resp)
            }
        }
    }

    pub(crate) async fn get(&self, url: String) -> Result<FetchResponse, PayError> {
        let fetch = Arc::clone(&self.fetch);
        tokio::task::spawn_blocking(move || fetch.get_json(&url))
            .await
            .map_err(|e| PayError::Network(format!("fetch task aborted: {e}")))?
    }
}

fn endpoint_from_document(resp: FetchResponse) -> Result<PayEndpoint, PayError> {
    if !(200..300).contains(&resp.status) {
        return Err(PayError::Upstream {
            status: resp.status,
            message: upstream_reason(&resp.body),
        });
    }
    let Value::Object(_) = &resp.body else {
        return Err(PayError::InvalidTarget(
            "endpoint returned no payment-request document".into(),
        ));
    };
    if resp.body.get("status").and_then(Value::as_str) == Some("ERROR") {
        return Err(PayError::Upstream {
            status: resp.status,
            message: upstream_reason(&resp.body),
        });
    }
    if let Some(tag) = resp.body.get("tag").and_then(Value::as_str) {
        if tag != "payRequest" {
            return Err(PayError::UnsupportedTarget(format!(
                "endpoint tag is {tag}, not payRequest"
            )));
        }
    }
    schema::validate_pay_request(&resp.body)
        .map_err(|e| PayError::MalformedResponse(e.to_string()))?;

    let doc = &resp.body;
    let callback = doc
        .get("callback")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if !callback.starts_with("https://") {
        return Err(PayError::MalformedResponse(format!(
            "callback is not https: {callback}"
        )));
    }
    let min_sendable = doc
        .get("minSendable")
        .and_then(Value::as_u64)
        .unwrap_or(1);
    let max_sendable = doc
        .get("maxSendable")
        .and_then(Value::as_u64)
        .unwrap_or(MAX_ANY_AMOUNT_MSAT);
    if min_sendable > max_sendable {
        return Err(PayError::MalformedResponse(format!(
            "minSendable {min_sendable} exceeds maxSendable {max_sendable}"
        )));
    }
    let zap_pubkey = doc
        .get("nostrPubkey")
        .and_then(Value::as_str)
        .and_then(|s| ActorId::parse(s).ok());

    Ok(PayEndpoint {
        callback,
        min_sendable,
        max_sendable,
        metadata: doc
            .get("metadata")
            .and_then(Value::as_str)
            .map(str::to_string),
        comment_allowed: doc
            .get("commentAllowed")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0),
        allows_zap: doc
            .get("allowsNostr")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        zap_pubkey,
        resolved_at: Utc::now(),
        fixed_invoice: None,
    })
}

fn upstream_reason(body: &Value) -> String {
    body.get("reason")
        .and_then(Value::as_str)
        .unwrap_or("upstream rejected the request")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) struct MockFetch {
        pub calls: AtomicUsize,
        pub response: Value,
        pub status: u16,
    }

    impl MockFetch {
        pub fn ok(response: Value) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                response,
                status: 200,
            }
        }
    }

    impl Fetch for MockFetch {
        fn get_json(&self, _url: &str) -> Result<FetchResponse, PayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchResponse {
                status: self.status,
                body: self.response.clone(),
            })
        }
    }

    #[test]
    fn classifies_invoice_with_amount() {
        // 10u = 10 / 1e6 BTC = 1_000_000 msat
        let t = classify_target("lnbc10u1qqqqqqqqqq").unwrap();
        assert_eq!(
            t,
            PayTarget::Invoice {
                raw: "lnbc10u1qqqqqqqqqq".into(),
                amount_msats: Some(1_000_000),
            }
        );
    }

    #[test]
    fn classifies_any_amount_invoice() {
        let t = classify_target("LNBC1QQQQQQQQQQ").unwrap();
        match t {
            PayTarget::Invoice { amount_msats, .. } => assert_eq!(amount_msats, None),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn sub_msat_precision_is_rejected() {
        // 1p = 0.1 msat
        assert!(matches!(
            classify_target("lnbc1p1qqqqqqqqqq"),
            Err(PayError::InvalidTarget(_))
        ));
    }

    #[test]
    fn oversized_invoice_amount_is_rejected() {
        let target = format!("lnbc{}u1qqqqqqqqqq", "9".repeat(30));
        assert!(matches!(
            classify_target(&target),
            Err(PayError::InvalidTarget(_))
        ));
    }

    #[test]
    fn classifies_lightning_address() {
        let t = classify_target("Alice@Domain.Com").unwrap();
        assert_eq!(
            t,
            PayTarget::Address {
                local: "alice".into(),
                domain: "domain.com".into(),
            }
        );
    }

    #[test]
    fn garbage_is_invalid_target() {
        assert!(matches!(
            classify_target("not a target"),
            Err(PayError::InvalidTarget(_))
        ));
        assert!(matches!(
            classify_target("@nodomain"),
            Err(PayError::InvalidTarget(_))
        ));
    }

    #[test]
    fn lnurl_payload_is_unsupported() {
        assert!(matches!(
            classify_target("lnurl1dp68gurn8ghj7um9wfmxjcm99e5k7"),
            Err(PayError::UnsupportedTarget(_))
        ));
    }

    #[test]
    fn well_known_url_encodes_local_part() {
        assert_eq!(
            well_known_url("alice+tips", "ln.example.com"),
            "https://ln.example.com/.well-known/lnurlp/alice%2Btips"
        );
    }

    #[tokio::test]
    async fn invoice_resolution_makes_no_fetch() {
        let fetch = Arc::new(MockFetch::ok(json!({})));
        let resolver = PaymentResolver::new(fetch.clone());
        let ep = resolver.resolve("lnbc10u1qqqqqqqqqq").await.unwrap();
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 0);
        assert_eq!(ep.min_sendable, 1_000_000);
        assert_eq!(ep.max_sendable, 1_000_000);
        assert!(ep.fixed_invoice.is_some());
    }

    #[tokio::test]
    async fn address_resolution_reads_document() {
        let fetch = Arc::new(MockFetch::ok(json!({
            "tag": "payRequest",
            "callback": "https://domain.com/cb",
            "minSendable": 1000,
            "maxSendable": 100_000_000_000u64,
            "metadata": "[[\"text/plain\",\"hi\"]]",
            "commentAllowed": 144,
            "allowsNostr": true,
        })));
        let resolver = PaymentResolver::new(fetch);
        let ep = resolver.resolve("user@domain.com").await.unwrap();
        assert_eq!(ep.callback, "https://domain.com/cb");
        assert_eq!(ep.min_sendable, 1000);
        assert!(ep.allows_zap);
        assert_eq!(ep.comment_allowed, 144);
    }

    #[tokio::test]
    async fn wrong_tag_is_unsupported() {
        let fetch = Arc::new(MockFetch::ok(json!({
            "tag": "withdrawRequest",
            "callback": "https://domain.com/cb",
        })));
        let resolver = PaymentResolver::new(fetch);
        assert!(matches!(
            resolver.resolve("user@domain.com").await,
            Err(PayError::UnsupportedTarget(_))
        ));
    }

    #[tokio::test]
    async fn min_above_max_is_malformed() {
        let fetch = Arc::new(MockFetch::ok(json!({
            "tag": "payRequest",
            "callback": "https://domain.com/cb",
            "minSendable": 5000,
            "maxSendable": 1000,
        })));
        let resolver = PaymentResolver::new(fetch);
        assert!(matches!(
            resolver.resolve("user@domain.com").await,
            Err(PayError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn non_2xx_is_upstream_error() {
        let fetch = Arc::new(MockFetch {
            calls: AtomicUsize::new(0),
            response: json!({"status": "ERROR", "reason": "no such user"}),
            status: 404,
        });
        let resolver = PaymentResolver::new(fetch);
        match resolver.resolve("user@domain.com").await {
            Err(PayError::Upstream { status, message }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "no such user");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
