// src/connection.rs

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderValue, InvalidHeaderValue, AUTHORIZATION, DATE, RANGE};
use thiserror::Error;
use tracing::{error, info};

use crate::config::{Limits, DEFAULT_CLOUDFRONT_TTL};
use crate::context::{LockId, LockTable, ProbeContext};
use crate::signing::{self, SigningError};
use crate::stats::{Clock, Statistics};
use crate::transfer::TransferRequest;

const S3_DEFAULT_HOST: &str = "s3.amazonaws.com";

/// Problems that stop a request from being built. The attempt is skipped.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid s3 url '{0}': missing resource")]
    MissingResource(String),
    #[error("invalid s3 auth string, expected '<access-key>:<secret-key>'")]
    S3Auth,
    #[error("invalid cloud front auth string, expected '<key-pair-id>:<private-key-path>'")]
    CloudFrontAuth,
    #[error("signing failed: {0}")]
    Signing(#[from] SigningError),
    #[error("invalid header value: {0}")]
    Header(#[from] InvalidHeaderValue),
}

/// Everything needed to probe one target. Never changes once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSpec {
    /// Target without its `scheme://` prefix.
    pub url: String,
    pub auth: String,
    pub limits: Limits,
}

/// A probe target, one variant per supported scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connection {
    Http(ConnectionSpec),
    S3(ConnectionSpec),
    CloudFront { spec: ConnectionSpec, ttl: Duration },
}

/// Map `scheme://rest` to a connection. Unknown schemes and urls without `://` yield `None`.
pub fn new_connection(url: &str, auth: &str, limits: Limits) -> Option<Connection> {
    let (scheme, rest) = url.split_once("://")?;
    let spec = ConnectionSpec {
        url: rest.to_string(),
        auth: auth.to_string(),
        limits,
    };
    match scheme {
        "http" => Some(Connection::Http(spec)),
        "s3" => Some(Connection::S3(spec)),
        "cf" => Some(Connection::CloudFront {
            spec,
            ttl: DEFAULT_CLOUDFRONT_TTL,
        }),
        _ => None,
    }
}

/// Bucket and key of an S3 target, plus the endpoint when one was given explicitly.
#[derive(Debug, PartialEq, Eq)]
struct S3Target<'a> {
    host: Option<&'a str>,
    bucket: &'a str,
    resource: &'a str,
}

impl<'a> S3Target<'a> {
    /// `[host:]bucket/resource`. The host may carry its own port (`host:port:bucket/key`).
    fn parse(url: &'a str) -> Result<Self, ConnectionError> {
        let slash = url
            .find('/')
            .ok_or_else(|| ConnectionError::MissingResource(url.to_string()))?;
        let (head, resource) = url.split_at(slash);
        let (host, bucket) = match head.rfind(':') {
            Some(colon) => (Some(&head[..colon]), &head[colon + 1..]),
            None => (None, head),
        };
        Ok(Self {
            host,
            bucket,
            resource,
        })
    }

    fn request_url(&self) -> String {
        match self.host {
            Some(host) => format!("http://{}/{}{}", host, self.bucket, self.resource),
            None => format!("http://{}.{}{}", self.bucket, S3_DEFAULT_HOST, self.resource),
        }
    }
}

impl Connection {
    pub fn spec(&self) -> &ConnectionSpec {
        match self {
            Connection::Http(spec) | Connection::S3(spec) => spec,
            Connection::CloudFront { spec, .. } => spec,
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Connection::Http(_) => "http",
            Connection::S3(_) => "s3",
            Connection::CloudFront { .. } => "cf",
        }
    }

    /// Override the lifetime of CloudFront signed urls. No effect on other schemes.
    pub fn with_ttl(self, ttl: Duration) -> Self {
        match self {
            Connection::CloudFront { spec, .. } => Connection::CloudFront { spec, ttl },
            other => other,
        }
    }

    /// Build the authenticated, limited request for an attempt starting at `now`.
    pub fn prepare(
        &self,
        locks: &LockTable,
        now: DateTime<Utc>,
    ) -> Result<TransferRequest, ConnectionError> {
        let mut request = match self {
            Connection::Http(spec) => TransferRequest {
                url: format!("http://{}", spec.url),
                ..Default::default()
            },
            Connection::S3(spec) => s3_request(spec, locks, now)?,
            Connection::CloudFront { spec, ttl } => cloudfront_request(spec, *ttl, locks, now)?,
        };
        apply_limits(&mut request, &self.spec().limits)?;
        Ok(request)
    }

    /// Run one GET against this target, reporting into `stats`.
    ///
    /// When the request cannot be built the error is logged and `stats` is left untouched.
    pub async fn perform_get<C: Clock>(&self, ctx: &ProbeContext, stats: &mut Statistics<C>) {
        let request = match self.prepare(ctx.locks(), Utc::now()) {
            Ok(request) => request,
            Err(e) => {
                error!("{}://{}: {}", self.scheme(), self.spec().url, e);
                return;
            }
        };
        info!("{} url: {}", self.scheme(), request.url);
        stats.set_url(request.url.clone());
        ctx.perform_get(&request, stats).await;
    }
}

fn apply_limits(request: &mut TransferRequest, limits: &Limits) -> Result<(), ConnectionError> {
    if let Some(range) = limits.range.header_value() {
        request.headers.insert(RANGE, HeaderValue::from_str(&range)?);
    }
    request.recv_limit = limits.recv_limit();
    Ok(())
}

fn s3_request(
    spec: &ConnectionSpec,
    locks: &LockTable,
    now: DateTime<Utc>,
) -> Result<TransferRequest, ConnectionError> {
    let target = S3Target::parse(&spec.url)?;
    let (access_key, secret_key) = spec.auth.split_once(':').ok_or(ConnectionError::S3Auth)?;

    let date = signing::s3_date(now);
    let to_sign = signing::s3_string_to_sign(target.bucket, target.resource, &date);
    let signature = locks.with_lock(LockId::Hmac, || signing::s3_signature(secret_key, &to_sign))?;

    let mut request = TransferRequest {
        url: target.request_url(),
        ..Default::default()
    };
    request.headers.insert(DATE, HeaderValue::from_str(&date)?);
    request.headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&signing::s3_authorization(access_key, &signature))?,
    );
    Ok(request)
}

fn cloudfront_request(
    spec: &ConnectionSpec,
    ttl: Duration,
    locks: &LockTable,
    now: DateTime<Utc>,
) -> Result<TransferRequest, ConnectionError> {
    let (key_pair_id, key_path) = spec
        .auth
        .split_once(':')
        .ok_or(ConnectionError::CloudFrontAuth)?;

    let expires = now.timestamp().max(0) as u64 + ttl.as_secs();
    let policy = signing::canned_policy(&spec.url, expires)?;
    let key = signing::load_private_key(Path::new(key_path))?;
    let signature = locks.with_lock(LockId::Rsa, || signing::sign_policy(policy.as_bytes(), &key))?;

    Ok(TransferRequest {
        url: format!(
            "http://{}?Expires={}&Signature={}&Key-Pair-Id={}",
            spec.url,
            expires,
            signing::url_safe_base64(&signature),
            key_pair_id
        ),
        ..Default::default()
    })
}
