//! Remote cache variant: delegates to an external key-value service over HTTP.
//!
//! This is a thin client for a minimal `GET/PUT/DELETE /v1/{namespace}/{key}` protocol. It
//! stands in for whatever concrete remote KV store (Redis, etcd, a proprietary service) a real
//! deployment plugs in; the contract (§4.1) is what the rest of the engine depends on.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use super::{Cache, CacheError};

pub struct RemoteCache {
    client: Client,
    base_url: String,
    namespace: String,
    secret: String,
}

impl RemoteCache {
    pub fn new(base_url: impl Into<String>, namespace: impl Into<String>, secret: impl Into<String>) -> Self {
        RemoteCache {
            client: Client::new(),
            base_url: base_url.into(),
            namespace: namespace.into(),
            secret: secret.into(),
        }
    }

    fn url(&self, key: &str) -> String {
        format!(
            "{}/v1/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.namespace,
            urlencoding_light(key)
        )
    }

    /// Race a request future against cancellation, honouring the caller's token for blocking
    /// calls as required by §4.1 "Remote variant".
    async fn race<T>(
        &self,
        ctx: CancellationToken,
        fut: impl std::future::Future<Output = reqwest::Result<T>>,
    ) -> Result<T, CacheError> {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(CacheError::Operational("cancelled".to_string())),
            result = fut => result.map_err(|e| CacheError::Operational(e.to_string())),
        }
    }
}

/// Minimal percent-encoding sufficient for cache keys, which are caller-controlled strings
/// that may contain path-unsafe characters.
fn urlencoding_light(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[async_trait]
impl Cache for RemoteCache {
    async fn get(&self, key: &str, ctx: CancellationToken) -> Result<Vec<u8>, CacheError> {
        let req = self
            .client
            .get(self.url(key))
            .bearer_auth(&self.secret)
            .send();
        let response = self.race(ctx.clone(), req).await?;
        match response.status() {
            StatusCode::OK => {
                trace!(key, "remote cache hit");
                self.race(ctx, async { response.bytes().await.map(|b| b.to_vec()) }).await
            }
            StatusCode::NOT_FOUND => {
                trace!(key, "remote cache miss");
                Err(CacheError::NotFound)
            }
            status => {
                warn!(key, %status, "remote cache operational error");
                Err(CacheError::Operational(format!("unexpected status {status}")))
            }
        }
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        ctx: CancellationToken,
    ) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return self.delete(key, ctx).await;
        }
        let req = self
            .client
            .put(self.url(key))
            .bearer_auth(&self.secret)
            .query(&[("ttl_secs", ttl.as_secs().to_string())])
            .body(value)
            .send();
        let response = self.race(ctx, req).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(CacheError::Operational(format!("unexpected status {}", response.status())))
        }
    }

    async fn delete(&self, key: &str, ctx: CancellationToken) -> Result<(), CacheError> {
        let req = self
            .client
            .delete(self.url(key))
            .bearer_auth(&self.secret)
            .send();
        let response = self.race(ctx, req).await?;
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(CacheError::Operational(format!("unexpected status {}", response.status())))
        }
    }

    async fn close(&self) {
        // The underlying connection pool is dropped with the client; nothing to join.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_encodes_unsafe_characters() {
        assert_eq!(urlencoding_light("biz/code"), "biz%2Fcode");
        assert_eq!(urlencoding_light("plain-key_1.2"), "plain-key_1.2");
    }
}
