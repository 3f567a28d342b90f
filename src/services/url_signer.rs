//! Presigned download URLs for the local backend.
//!
//! A URL carries its expiry (unix seconds) and an HMAC-SHA256 over
//! `GET\n{bucket}\n{key}\n{expires}` keyed with the gateway's secret key. The
//! router serves such URLs under `/objects/{bucket}/{*key}`.

use crate::services::error::{StorageError, StorageResult};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

pub const EXPIRES_PARAM: &str = "X-Expires";
pub const SIGNATURE_PARAM: &str = "X-Signature";
pub const OBJECTS_PREFIX: &str = "objects";

#[derive(Clone)]
pub struct UrlSigner {
    mac: HmacSha256,
    base_url: Url,
}

impl UrlSigner {
    pub fn new(secret: &[u8], base_url: Url) -> StorageResult<Self> {
        if secret.is_empty() {
            return Err(StorageError::invalid("secret key", "must not be empty"));
        }
        if base_url.cannot_be_a_base() {
            return Err(StorageError::invalid(
                base_url.as_str(),
                "public url cannot carry a path",
            ));
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|_| StorageError::invalid("secret key", "rejected by HMAC"))?;
        Ok(Self { mac, base_url })
    }

    /// `{base}/objects/{bucket}/{key}?X-Expires=..&X-Signature=..`
    pub fn sign_get(&self, bucket: &str, key: &str, expires_at: i64) -> StorageResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::invalid(self.base_url.as_str(), "not a base url"))?
            .pop_if_empty()
            .push(OBJECTS_PREFIX)
            .push(bucket)
            .extend(key.split('/'));
        url.set_query(None);
        url.query_pairs_mut()
            .append_pair(EXPIRES_PARAM, &expires_at.to_string())
            .append_pair(SIGNATURE_PARAM, &self.signature(bucket, key, expires_at));
        Ok(url)
    }

    /// Check a signature previously produced by [`sign_get`](Self::sign_get).
    pub fn verify_get(
        &self,
        bucket: &str,
        key: &str,
        expires_at: i64,
        signature: &str,
        now: i64,
    ) -> StorageResult<()> {
        let provided = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| StorageError::AccessDenied("malformed signature".into()))?;
        self.keyed(bucket, key, expires_at)
            .verify_slice(&provided)
            .map_err(|_| StorageError::AccessDenied("signature mismatch".into()))?;
        if now > expires_at {
            return Err(StorageError::AccessDenied("presigned url expired".into()));
        }
        Ok(())
    }

    fn signature(&self, bucket: &str, key: &str, expires_at: i64) -> String {
        URL_SAFE_NO_PAD.encode(self.keyed(bucket, key, expires_at).finalize().into_bytes())
    }

    fn keyed(&self, bucket: &str, key: &str, expires_at: i64) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(format!("GET\n{bucket}\n{key}\n{expires_at}").as_bytes());
        mac
    }
}

impl fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlSigner")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}
