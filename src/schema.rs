#![allow(
    clippy::missing_errors_doc,
    clippy::explicit_auto_deref,
    clippy::non_std_lazy_statics
)]
use anyhow::{anyhow, Result};
use jsonschema::{Draft, JSONSchema};
use serde_json::json;
use serde_json::Value;

// Minimal schemas to guard document structure; refine over time.
pub static PAY_REQUEST_SCHEMA: std::sync::LazyLock<Value> = std::sync::LazyLock::new(|| {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "https://trustline.dev/schema/pay_request.json",
        "type": "object",
        "required": ["callback", "minSendable", "maxSendable"],
        "properties": {
            "callback": {"type": "string"},
            "minSendable": {"type": "integer", "minimum": 1},
            "maxSendable": {"type": "integer", "minimum": 1},
            "metadata": {"type": "string"},
            "tag": {"type": "string"},
            "commentAllowed": {"type": "integer", "minimum": 0},
            "allowsNostr": {"type": "boolean"},
            "nostrPubkey": {"type": "string"}
        },
        "additionalProperties": true
    })
});

pub static INVOICE_RESPONSE_SCHEMA: std::sync::LazyLock<Value> = std::sync::LazyLock::new(|| {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "https://trustline.dev/schema/invoice_response.json",
        "type": "object",
        "required": ["pr"],
        "properties": {
            "pr": {"type": "string", "minLength": 1},
            "routes": {"type": "array"}
        },
        "additionalProperties": true
    })
});

pub fn validate_pay_request(v: &Value) -> Result<()> {
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&*PAY_REQUEST_SCHEMA)
        .map_err(|e| anyhow!("invalid pay-request schema: {e}"))?;
    if let Err(errs) = compiled.validate(v) {
        let mut msgs = Vec::new();
        for e in errs {
            msgs.push(e.to_string());
        }
        return Err(anyhow!("pay-request schema violation: {}", msgs.join("; ")));
    }
    Ok(())
}

pub fn validate_invoice_response(v: &Value) -> Result<()> {
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&*INVOICE_RESPONSE_SCHEMA)
        .map_err(|e| anyhow!("invalid invoice-response schema: {e}"))?;
    if let Err(errs) = compiled.validate(v) {
        let mut msgs = Vec::new();
        for e in errs {
            msgs.push(e.to_string());
        }
        return Err(anyhow!(
            "invoice-response schema violation: {}",
            msgs.join("; ")
        ));
    }
    Ok(())
}
