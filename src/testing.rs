//! Test doubles shared by unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::{CacheConfig, CacheProbe, CacheStats, Expiry, LocalTier, Tier, Ttl};
use crate::error::{Error, Result};

/// Local tier with call counters, failure switches and an optional delay
pub struct MockTier {
    pub name: &'static str,
    pub inner: LocalTier<String>,
    pub gets: AtomicU64,
    pub puts: AtomicU64,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub unhealthy: AtomicBool,
    pub write_delay_ms: AtomicU64,
}

impl MockTier {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: LocalTier::with_name(name, CacheConfig::default()),
            gets: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            unhealthy: AtomicBool::new(false),
            write_delay_ms: AtomicU64::new(0),
        }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.unhealthy.store(unhealthy, Ordering::SeqCst);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn gets(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::backend(self.name, "read refused"));
        }
        Ok(())
    }

    async fn check_write(&self) -> Result<()> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::backend(self.name, "write refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheProbe for MockTier {
    async fn stats(&self) -> Result<CacheStats> {
        self.check_read()?;
        self.inner.stats().await
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.unhealthy.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl Tier for MockTier {
    type Value = String;

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check_read()?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: String, expiry: Expiry) -> Result<()> {
        self.check_write().await?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, value, expiry).await
    }

    async fn evict(&self, key: &str) -> Result<bool> {
        self.check_write().await?;
        self.inner.evict(key).await
    }

    async fn evict_by_pattern(&self, pattern: &str) -> Result<u64> {
        self.check_write().await?;
        self.inner.evict_by_pattern(pattern).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_read()?;
        self.inner.exists(key).await
    }

    async fn expire(&self, key: &str, expiry: Expiry) -> Result<bool> {
        self.check_write().await?;
        self.inner.expire(key, expiry).await
    }

    async fn ttl(&self, key: &str) -> Result<Ttl> {
        self.check_read()?;
        self.inner.ttl(key).await
    }

    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, String>> {
        self.check_read()?;
        self.inner.multi_get(keys).await
    }

    async fn clear(&self) -> Result<()> {
        self.check_write().await?;
        self.inner.clear().await
    }
}
