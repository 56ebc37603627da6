// Blob transport seam. `Adaptor` is the abstract put/get-by-bucket interface
// a content-addressed blob service (S3 or otherwise) implements; callers never
// talk to a concrete backend directly.
//
// `RemoteStore` is an ordinary value a caller owns -- constructed once in
// the node's wiring and passed by reference -- backed by a per-instance
// `DashMap` of confirmed buckets rather than any process-wide global, so
// tests can spin up as many independent stores as they like.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::NetError;

/// Backend-agnostic put/get over named buckets. Implemented once per real
/// transport (S3, GCS, a local filesystem stand-in); `covenant-net`'s
/// exchanger and gossip workers only ever see this trait.
#[async_trait]
pub trait Adaptor: Send + Sync {
    async fn put_binary_to(&self, bucket: &str, key: &str, value: &[u8]) -> Result<(), NetError>;
    async fn get_binary_from(&self, bucket: &str, key: &str) -> Result<Vec<u8>, NetError>;
    async fn put_text_to(&self, bucket: &str, key: &str, value: &str) -> Result<(), NetError>;
    async fn get_text_from(&self, bucket: &str, key: &str) -> Result<String, NetError>;
    /// Create `bucket` if the backend supports/requires explicit creation.
    /// A backend with no such notion (a local directory tree, say) can make
    /// this a no-op.
    async fn create_bucket(&self, bucket: &str) -> Result<(), NetError>;
}

/// Wraps any `Adaptor` with "missing bucket" recovery: a put that fails with
/// `NoSuchBucket` triggers a `create_bucket` then exactly one retry.
/// `known_buckets` caches buckets already confirmed to exist, so repeated
/// puts to the same bucket skip the round trip of discovering that again.
pub struct RemoteStore<A: Adaptor> {
    inner: Arc<A>,
    known_buckets: DashMap<String, ()>,
}

impl<A: Adaptor> RemoteStore<A> {
    pub fn new(inner: Arc<A>) -> Self {
        Self {
            inner,
            known_buckets: DashMap::new(),
        }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    pub async fn put_binary_to(&self, bucket: &str, key: &str, value: &[u8]) -> Result<(), NetError> {
        match self.inner.put_binary_to(bucket, key, value).await {
            Ok(()) => {
                self.known_buckets.insert(bucket.to_string(), ());
                Ok(())
            }
            Err(NetError::NoSuchBucket(_)) if !self.known_buckets.contains_key(bucket) => {
                self.inner.create_bucket(bucket).await?;
                self.known_buckets.insert(bucket.to_string(), ());
                self.inner.put_binary_to(bucket, key, value).await
            }
            Err(e) => Err(e),
        }
    }

    pub async fn put_text_to(&self, bucket: &str, key: &str, value: &str) -> Result<(), NetError> {
        match self.inner.put_text_to(bucket, key, value).await {
            Ok(()) => {
                self.known_buckets.insert(bucket.to_string(), ());
                Ok(())
            }
            Err(NetError::NoSuchBucket(_)) if !self.known_buckets.contains_key(bucket) => {
                self.inner.create_bucket(bucket).await?;
                self.known_buckets.insert(bucket.to_string(), ());
                self.inner.put_text_to(bucket, key, value).await
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_binary_from(&self, bucket: &str, key: &str) -> Result<Vec<u8>, NetError> {
        self.inner.get_binary_from(bucket, key).await
    }

    pub async fn get_text_from(&self, bucket: &str, key: &str) -> Result<String, NetError> {
        self.inner.get_text_from(bucket, key).await
    }
}

/// In-memory `Adaptor` test double: buckets that don't exist yet return
/// `NoSuchBucket` on first write, exercising `RemoteStore`'s create-then-retry
/// path the same way a real backend would.
#[derive(Default)]
pub struct InMemoryAdaptor {
    buckets: DashMap<String, DashMap<String, Vec<u8>>>,
}

impl InMemoryAdaptor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Adaptor for InMemoryAdaptor {
    async fn put_binary_to(&self, bucket: &str, key: &str, value: &[u8]) -> Result<(), NetError> {
        let Some(objects) = self.buckets.get(bucket) else {
            return Err(NetError::NoSuchBucket(bucket.to_string()));
        };
        objects.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get_binary_from(&self, bucket: &str, key: &str) -> Result<Vec<u8>, NetError> {
        let objects = self
            .buckets
            .get(bucket)
            .ok_or_else(|| NetError::NoSuchBucket(bucket.to_string()))?;
        objects
            .get(key)
            .map(|v| v.clone())
            .ok_or_else(|| NetError::NotFound(key.to_string()))
    }

    async fn put_text_to(&self, bucket: &str, key: &str, value: &str) -> Result<(), NetError> {
        self.put_binary_to(bucket, key, value.as_bytes()).await
    }

    async fn get_text_from(&self, bucket: &str, key: &str) -> Result<String, NetError> {
        let bytes = self.get_binary_from(bucket, key).await?;
        String::from_utf8(bytes).map_err(|e| NetError::Malformed(e.to_string()))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), NetError> {
        self.buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_to_missing_bucket_auto_creates_and_retries() {
        let store = RemoteStore::new(Arc::new(InMemoryAdaptor::new()));
        store.put_binary_to("bucket-a", "k", b"v").await.unwrap();
        assert_eq!(store.get_binary_from("bucket-a", "k").await.unwrap(), b"v");
    }

    #[tokio::test]
    async fn get_from_missing_key_is_not_found() {
        let store = RemoteStore::new(Arc::new(InMemoryAdaptor::new()));
        store.put_binary_to("bucket-a", "k", b"v").await.unwrap();
        assert!(matches!(
            store.get_binary_from("bucket-a", "missing").await,
            Err(NetError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn text_round_trips_through_binary_path() {
        let store = RemoteStore::new(Arc::new(InMemoryAdaptor::new()));
        store.put_text_to("bucket-a", "node.latestUpdate", "5,abc").await.unwrap();
        assert_eq!(
            store.get_text_from("bucket-a", "node.latestUpdate").await.unwrap(),
            "5,abc"
        );
    }
}
