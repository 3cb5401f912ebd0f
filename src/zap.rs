//! Zap orchestration.
//!
//! Drives one payment attempt end to end: resolve the target, validate the
//! amount against the endpoint bounds before any side effect, optionally
//! attach a signed zap request, fetch the invoice from the callback, and hand
//! it to the payment backend. One `execute` call issues at most one callback
//! and one settlement.

use crate::error::PayError;
use crate::graph::ActorId;
use crate::resolver::{Fetch, PayEndpoint, PaymentResolver};
use crate::schema;
use base64::Engine as _;
use blake3::Hasher;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Keypair, PublicKey, Signature, Signer, Verifier};
use log::{debug, info};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One zap intent as entered by the user. `target` is the raw input string;
/// resolution happens inside `execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZapRequest {
    pub recipient: ActorId,
    pub amount_msats: u64,
    pub target: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub related_event_id: Option<String>,
    #[serde(default)]
    pub relays: Vec<String>,
}

impl ZapRequest {
    /// Stable identity of this logical attempt, for caller-side dedup.
    #[must_use]
    pub fn idempotency_key(&self) -> String {
        let mut h = Hasher::new();
        h.update(self.recipient.as_str().as_bytes());
        h.update(&self.amount_msats.to_le_bytes());
        h.update(self.target.as_bytes());
        if let Some(e) = &self.related_event_id {
            h.update(e.as_bytes());
        }
        hex::encode(h.finalize().as_bytes())
    }
}

/// Settlement proof from the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentProof {
    pub preimage: String,
}

/// Payment settlement boundary (Lightning node, ecash mint melt, ...).
/// Implementations block; `execute` bridges through `spawn_blocking`.
pub trait PaymentBackend: Send + Sync {
    fn pay_invoice(&self, invoice: &str) -> Result<PaymentProof, PayError>;
}

/// Invoice ready for settlement, produced by [`ZapOrchestrator::prepare`].
#[derive(Debug, Clone)]
pub struct PreparedZap {
    pub invoice: String,
    pub amount_msats: u64,
}

/// Result of a confirmed zap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub id: String,
    pub preimage: String,
    pub amount_msats: u64,
    pub settled_at: DateTime<Utc>,
}

pub struct ZapOrchestrator {
    resolver: PaymentResolver,
    fetch: Arc<dyn Fetch>,
    backend: Arc<dyn PaymentBackend>,
    keypair: Option<Keypair>,
}

impl ZapOrchestrator {
    #[must_use]
    pub fn new(
        fetch: Arc<dyn Fetch>,
        backend: Arc<dyn PaymentBackend>,
        keypair: Option<Keypair>,
    ) -> Self {
        Self {
            resolver: PaymentResolver::new(Arc::clone(&fetch)),
            fetch,
            backend,
            keypair,
        }
    }

    /// Resolve, validate, and fetch the invoice without settling.
    ///
    /// # Errors
    ///
    /// `AmountOutOfRange` before any side effect when the amount violates the
    /// endpoint bounds; resolver errors pass through.
    pub async fn prepare(&self, request: &ZapRequest) -> Result<PreparedZap, PayError> {
        let endpoint = self.resolver.resolve(&request.target).await?;
        check_amount(request.amount_msats, &endpoint)?;
        debug!(
            "zap {} msat to {} (key {})",
            request.amount_msats,
            request.recipient,
            request.idempotency_key()
        );

        let invoice = match &endpoint.fixed_invoice {
            Some(inv) => inv.clone(),
            None => self.request_invoice(request, &endpoint).await?,
        };
        Ok(PreparedZap {
            invoice,
            amount_msats: request.amount_msats,
        })
    }

    /// Run one payment attempt. No automatic retry; the caller decides.
    ///
    /// # Errors
    ///
    /// Everything `prepare` surfaces, plus `PaymentFailed` when the backend
    /// does not confirm settlement.
    pub async fn execute(&self, request: &ZapRequest) -> Result<Receipt, PayError> {
        let prepared = self.prepare(request).await?;
        let proof = self.settle(prepared.invoice).await?;
        info!(
            "zap settled: {} msat to {}",
            request.amount_msats, request.recipient
        );
        Ok(Receipt {
            id: ulid::Ulid::new().to_string(),
            preimage: proof.preimage,
            amount_msats: request.amount_msats,
            settled_at: Utc::now(),
        })
    }

    async fn request_invoice(
        &self,
        request: &ZapRequest,
        endpoint: &PayEndpoint,
    ) -> Result<String, PayError> {
        let mut url = format!(
            "{}{}amount={}",
            endpoint.callback,
            if endpoint.callback.contains('?') { "&" } else { "?" },
            request.amount_msats
        );
        if let Some(comment) = truncated_comment(request.comment.as_deref(), endpoint) {
            url.push_str("&comment=");
            url.push_str(&utf8_percent_encode(&comment, NON_ALPHANUMERIC).to_string());
        }
        if endpoint.allows_zap && endpoint.zap_pubkey.is_some() {
            if let Some(kp) = &self.keypair {
                let event = build_zap_request_event(kp, request)?;
                let encoded = serde_json::to_string(&event)
                    .map_err(|e| PayError::Signing(e.to_string()))?;
                url.push_str("&nostr=");
                url.push_str(&utf8_percent_encode(&encoded, NON_ALPHANUMERIC).to_string());
            }
        }

        let fetch = Arc::clone(&self.fetch);
        let resp = tokio::task::spawn_blocking(move || fetch.get_json(&url))
            .await
            .map_err(|e| PayError::Network(format!("fetch task aborted: {e}")))??;

        if !(200..300).contains(&resp.status) {
            return Err(PayError::Upstream {
                status: resp.status,
                message: resp
                    .body
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("callback rejected the request")
                    .to_string(),
            });
        }
        if resp.body.get("status").and_then(Value::as_str) == Some("ERROR") {
            return Err(PayError::Upstream {
                status: resp.status,
                message: resp
                    .body
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("callback rejected the request")
                    .to_string(),
            });
        }
        schema::validate_invoice_response(&resp.body)
            .map_err(|e| PayError::MalformedResponse(e.to_string()))?;
        Ok(resp
            .body
            .get("pr")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// Settlement is awaited even on slow backends; once the invoice is
    /// handed over, abandoning the call would leave the outcome unknown.
    async fn settle(&self, invoice: String) -> Result<PaymentProof, PayError> {
        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || backend.pay_invoice(&invoice))
            .await
            .map_err(|e| PayError::PaymentFailed(format!("settlement task aborted: {e}")))?
            .map_err(|e| match e {
                PayError::PaymentFailed(m) => PayError::PaymentFailed(m),
                other => PayError::PaymentFailed(other.to_string()),
            })
    }
}

fn check_amount(amount_msats: u64, endpoint: &PayEndpoint) -> Result<(), PayError> {
    if amount_msats == 0
        || amount_msats < endpoint.min_sendable
        || amount_msats > endpoint.max_sendable
    {
        return Err(PayError::AmountOutOfRange {
            amount_msats,
            min_msats: endpoint.min_sendable,
            max_msats: endpoint.max_sendable,
        });
    }
    Ok(())
}

/// Comment trimmed to the endpoint's advertised length; never a rejection.
#[must_use]
pub fn truncated_comment(comment: Option<&str>, endpoint: &PayEndpoint) -> Option<String> {
    let comment = comment?;
    if endpoint.comment_allowed == 0 || comment.is_empty() {
        return None;
    }
    Some(
        comment
            .chars()
            .take(endpoint.comment_allowed as usize)
            .collect(),
    )
}

/// Build and sign the zap-request document attached to the callback call.
///
/// Canonical form: sorted keys, `id`/`sig` stripped, blake3 over the compact
/// JSON; the signature covers the hex digest.
pub fn build_zap_request_event(kp: &Keypair, request: &ZapRequest) -> Result<Value, PayError> {
    let mut tags = vec![json!(["p", request.recipient.as_str()])];
    if let Some(e) = &request.related_event_id {
        tags.push(json!(["e", e]));
    }
    let mut relay_tag = vec![json!("relays")];
    relay_tag.extend(request.relays.iter().map(|r| json!(r)));
    tags.push(Value::Array(relay_tag));
    tags.push(json!(["amount", request.amount_msats.to_string()]));

    let mut event = json!({
        "pubkey": hex::encode(kp.public.as_bytes()),
        "created_at": Utc::now().timestamp(),
        "kind": 9734,
        "tags": tags,
        "content": request.comment.clone().unwrap_or_default(),
    });

    let digest_hex = canonical_digest(&event);
    let sig: Signature = kp.sign(digest_hex.as_bytes());
    let obj = event
        .as_object_mut()
        .ok_or_else(|| PayError::Signing("event is not an object".into()))?;
    obj.insert("id".into(), json!(digest_hex));
    obj.insert(
        "sig".into(),
        json!(base64::engine::general_purpose::STANDARD.encode(sig.to_bytes())),
    );
    Ok(event)
}

/// Check a zap-request document's digest and signature.
#[allow(clippy::missing_errors_doc)]
pub fn verify_zap_request_event(event: &Value) -> Result<(), PayError> {
    let id = event
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| PayError::Signing("missing id".into()))?;
    let sig_b64 = event
        .get("sig")
        .and_then(Value::as_str)
        .ok_or_else(|| PayError::Signing("missing sig".into()))?;
    let pub_hex = event
        .get("pubkey")
        .and_then(Value::as_str)
        .ok_or_else(|| PayError::Signing("missing pubkey".into()))?;

    let digest_hex = canonical_digest(event);
    if digest_hex != id {
        return Err(PayError::Signing("id does not match canonical digest".into()));
    }
    let pub_bytes =
        hex::decode(pub_hex).map_err(|e| PayError::Signing(format!("bad pubkey hex: {e}")))?;
    let sig_bytes = base64::engine::general_purpose::STANDARD
        .decode(sig_b64.as_bytes())
        .map_err(|e| PayError::Signing(format!("bad signature b64: {e}")))?;
    let pk =
        PublicKey::from_bytes(&pub_bytes).map_err(|e| PayError::Signing(format!("bad pubkey: {e}")))?;
    let sig = Signature::from_bytes(&sig_bytes)
        .map_err(|e| PayError::Signing(format!("bad signature: {e}")))?;
    pk.verify(digest_hex.as_bytes(), &sig)
        .map_err(|e| PayError::Signing(format!("signature verify failed: {e}")))
}

fn canonical_digest(event: &Value) -> String {
    let mut v = event.clone();
    if let Value::Object(ref mut m) = v {
        m.remove("id");
        m.remove("sig");
    }
    let v = sort_json(v);
    let mut h = Hasher::new();
    h.update(serde_json::to_string(&v).unwrap_or_default().as_bytes());
    hex::encode(h.finalize().as_bytes())
}

fn sort_json(v: Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut b = BTreeMap::new();
            for (k, val) in map {
                b.insert(k, sort_json(val));
            }
            Value::Object(b.into_iter().collect())
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_json).collect()),
        _ => v,
    }
}
