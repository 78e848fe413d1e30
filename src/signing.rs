// src/signing.rs

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use serde::Serialize;
use sha1::Sha1;
use thiserror::Error;

type HmacSha1 = Hmac<Sha1>;

const S3_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("hmac key rejected")]
    HmacKey,
    #[error("io error reading private key {path}: {source}")]
    KeyIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid private key {path}: {reason}")]
    InvalidKey { path: String, reason: String },
    #[error("rsa signing failed: {0}")]
    Rsa(#[from] rsa::signature::Error),
    #[error("policy serialization failed: {0}")]
    Policy(#[from] serde_json::Error),
}

/// Value of the S3 `Date` header.
pub fn s3_date(now: DateTime<Utc>) -> String {
    now.format(S3_DATE_FORMAT).to_string()
}

/// Canonical string signed for an S3 GET. The three newlines stand for the
/// empty verb-adjacent Content-MD5 and Content-Type lines.
pub fn s3_string_to_sign(bucket: &str, resource: &str, date: &str) -> String {
    format!("GET\n\n\n{}\n/{}{}", date, bucket, resource)
}

/// base64(HMAC-SHA1(secret_key, string_to_sign)).
pub fn s3_signature(secret_key: &str, string_to_sign: &str) -> Result<String, SigningError> {
    let mut mac =
        HmacSha1::new_from_slice(secret_key.as_bytes()).map_err(|_| SigningError::HmacKey)?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

pub fn s3_authorization(access_key: &str, signature: &str) -> String {
    format!("AWS {}:{}", access_key, signature)
}

#[derive(Serialize)]
struct CannedPolicy {
    #[serde(rename = "Statement")]
    statement: Vec<PolicyStatement>,
}

#[derive(Serialize)]
struct PolicyStatement {
    #[serde(rename = "Resource")]
    resource: String,
    #[serde(rename = "Condition")]
    condition: PolicyCondition,
}

#[derive(Serialize)]
struct PolicyCondition {
    #[serde(rename = "DateLessThan")]
    date_less_than: EpochTime,
}

#[derive(Serialize)]
struct EpochTime {
    #[serde(rename = "AWS:EpochTime")]
    epoch_time: u64,
}

/// CloudFront canned policy for `http://<url>` expiring at `expires` (unix seconds).
/// Field order is significant: CloudFront rebuilds this exact document to verify the signature.
pub fn canned_policy(url: &str, expires: u64) -> Result<String, SigningError> {
    let policy = CannedPolicy {
        statement: vec![PolicyStatement {
            resource: format!("http://{}", url),
            condition: PolicyCondition {
                date_less_than: EpochTime { epoch_time: expires },
            },
        }],
    };
    Ok(serde_json::to_string(&policy)?)
}

/// Load an RSA private key stored as PKCS#1 or PKCS#8 PEM.
pub fn load_private_key(path: &Path) -> Result<RsaPrivateKey, SigningError> {
    let display = path.display().to_string();
    let pem = std::fs::read_to_string(path).map_err(|source| SigningError::KeyIo {
        path: display.clone(),
        source,
    })?;
    RsaPrivateKey::from_pkcs1_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&pem))
        .map_err(|e| SigningError::InvalidKey {
            path: display,
            reason: e.to_string(),
        })
}

/// RSASSA-PKCS1-v1_5 / SHA-1 signature over the policy bytes.
pub fn sign_policy(policy: &[u8], key: &RsaPrivateKey) -> Result<Vec<u8>, SigningError> {
    let signing_key = SigningKey::<Sha1>::new(key.clone());
    let signature = signing_key.try_sign(policy)?;
    Ok(signature.to_vec())
}

/// base64 with `+`, `=` and `/` replaced by `-`, `_` and `~`.
pub fn url_safe_base64(bytes: &[u8]) -> String {
    STANDARD
        .encode(bytes)
        .chars()
        .map(|c| match c {
            '+' => '-',
            '=' => '_',
            '/' => '~',
            other => other,
        })
        .collect()
}
