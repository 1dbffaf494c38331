//! Webhook authentication.
//!
//! The gateway signs a manifest built from transport metadata (payment id from the
//! query string, the `x-request-id` header and the `ts` part of `x-signature`), not
//! the body. Verification is therefore a pure function of headers, query and secret;
//! the body is handed on untouched and only parsed once the request is authentic.

use std::collections::HashMap;
use std::str::FromStr;

use axum::body::Bytes;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::SignatureError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Parsed `x-signature: ts=<unix-seconds>,v1=<hex>` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub ts: String,
    pub v1: String,
}

impl FromStr for SignatureHeader {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut ts = None;
        let mut v1 = None;

        for part in s.split(',') {
            let (key, value) = part
                .split_once('=')
                .ok_or(SignatureError::MalformedHeader("expected key=value pairs"))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(SignatureError::MalformedHeader("empty key"));
            }
            match key {
                "ts" => ts = Some(value.trim()),
                "v1" => v1 = Some(value.trim()),
                // Other keys are allowed and ignored
                _ => {}
            }
        }

        let ts = ts
            .filter(|t| !t.is_empty())
            .ok_or(SignatureError::MalformedHeader("missing ts"))?;
        let v1 = v1
            .filter(|v| !v.is_empty())
            .ok_or(SignatureError::MalformedHeader("missing v1"))?;

        Ok(Self {
            ts: ts.to_string(),
            v1: v1.to_string(),
        })
    }
}

/// An authenticated notification: the raw body plus the payment id that was signed.
#[derive(Debug, Clone)]
pub struct VerifiedPayload {
    pub payment_id: String,
    pub body: Bytes,
}

/// Canonical string the gateway signs.
pub fn build_manifest(payment_id: &str, request_id: &str, ts: &str) -> String {
    format!("id:{};request-id:{};ts:{};", payment_id, request_id, ts)
}

/// Hex-encoded HMAC-SHA256 of `manifest` keyed with `secret`.
pub fn compute_signature(secret: &str, manifest: &str) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(manifest.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Payment id from the query string, preferring `data.id` over `id`.
pub fn payment_id_from_query(query: &HashMap<String, String>) -> Option<&str> {
    ["data.id", "id"]
        .iter()
        .filter_map(|key| query.get(*key))
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, SignatureError> {
    headers
        .get(name)
        .ok_or(SignatureError::MissingHeader(name))?
        .to_str()
        .map_err(|_| SignatureError::MalformedHeader("header is not valid ASCII"))
}

/// Authenticate a webhook request.
pub fn verify(
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    body: &Bytes,
    secret: &str,
) -> Result<VerifiedPayload, SignatureError> {
    let raw_signature = header_str(headers, SIGNATURE_HEADER)?;
    let request_id = header_str(headers, REQUEST_ID_HEADER)?;

    let signature: SignatureHeader = raw_signature.parse()?;

    let payment_id = payment_id_from_query(query).ok_or(SignatureError::MissingPaymentId)?;

    let manifest = build_manifest(payment_id, request_id, &signature.ts);
    let expected = compute_signature(secret, &manifest)?;

    // Length is not secret (always 64 hex chars), only the content comparison
    // needs to be constant-time.
    let expected_bytes = expected.as_bytes();
    let provided_bytes = signature.v1.as_bytes();
    if expected_bytes.len() != provided_bytes.len()
        || !bool::from(expected_bytes.ct_eq(provided_bytes))
    {
        return Err(SignatureError::HashMismatch);
    }

    Ok(VerifiedPayload {
        payment_id: payment_id.to_string(),
        body: body.clone(),
    })
}
