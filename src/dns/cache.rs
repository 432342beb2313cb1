//! Answer cache.
//!
//! Maps fully-qualified domain names to their A and AAAA answers. Each record
//! type is tracked independently: its own expiry and the start time of the
//! query that produced it. Updates follow a freshness rule so that a slow,
//! older query cannot overwrite an answer from a query dispatched later.
//!
//! A background sweep removes expired records. It is armed by the first
//! update and disarms itself once the cache is empty, so an idle cache has no
//! timer running.

use crate::base::error::{DnsError, DnsResult};
use crate::dns::notifier::Notifier;
use crate::dns::record::{CachedRecord, DomainRecord, IpRecord, RecordType};
use crate::dns::resolve::IpOption;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default interval between eviction sweeps.
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(60);

struct CacheInner {
    owner: String,
    records: DashMap<String, DomainRecord>,
    notifier: Notifier,
    sweeping: AtomicBool,
    interval: Duration,
}

/// Concurrency-safe answer cache owned by one name server.
#[derive(Clone)]
pub struct AnswerCache {
    inner: Arc<CacheInner>,
}

impl AnswerCache {
    /// Create a cache with the default sweep interval.
    pub fn new(owner: impl Into<String>) -> Self {
        Self::with_interval(owner, DEFAULT_EVICTION_INTERVAL)
    }

    pub fn with_interval(owner: impl Into<String>, interval: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                owner: owner.into(),
                records: DashMap::new(),
                notifier: Notifier::new(),
                sweeping: AtomicBool::new(false),
                interval,
            }),
        }
    }

    /// Notifier published whenever a record is replaced.
    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    /// Cached addresses for `domain` under `option`.
    ///
    /// Record types are read A first, then AAAA. Expired records count as
    /// absent. The result is the union of addresses across requested types.
    /// When there are none, `EmptyResponse` means some requested type has a
    /// live record (a non-success response code included) and `NotFound`
    /// means none has.
    pub fn lookup(&self, domain: &str, option: IpOption) -> DnsResult<Vec<IpAddr>> {
        let Some(entry) = self.inner.records.get(domain) else {
            return Err(DnsError::NotFound);
        };

        let now = Instant::now();
        let mut addresses = Vec::new();
        let mut answered = false;

        for record_type in option.record_types() {
            let Some(cached) = entry.get(record_type) else {
                continue;
            };
            let record = &cached.record;
            if record.is_expired_at(now) {
                continue;
            }
            answered = true;
            if !record.is_success() {
                debug!(
                    server = %self.inner.owner,
                    domain = %domain,
                    record_type = %record_type,
                    rcode = %record.rcode,
                    "cached answer has no addresses"
                );
                continue;
            }

            addresses.extend(
                record
                    .addresses
                    .iter()
                    .filter(|ip| record_type.carries(ip))
                    .copied(),
            );
        }

        if !addresses.is_empty() {
            return Ok(addresses);
        }
        if answered {
            return Err(DnsError::EmptyResponse);
        }
        Err(DnsError::NotFound)
    }

    /// Whether `record_type` of `domain` has a cached record that has not
    /// expired.
    pub fn has_live(&self, domain: &str, record_type: RecordType) -> bool {
        let now = Instant::now();
        self.inner
            .records
            .get(domain)
            .and_then(|entry| entry.get(record_type).map(|c| !c.record.is_expired_at(now)))
            .unwrap_or(false)
    }

    /// Store `record` for `record_type` of `domain` if it is at least as fresh
    /// as what is cached.
    ///
    /// Returns whether the record was stored. A stored record publishes the
    /// `(domain, record_type)` topic and arms the eviction sweep.
    pub fn update(
        &self,
        domain: &str,
        record_type: RecordType,
        record: IpRecord,
        query_start: Instant,
    ) -> bool {
        let updated = {
            let mut entry = self.inner.records.entry(domain.to_string()).or_default();
            let slot = entry.slot_mut(record_type);
            let fresher = match slot {
                Some(cached) => cached.is_superseded_by(query_start),
                None => true,
            };
            if fresher {
                *slot = Some(CachedRecord {
                    record,
                    query_start,
                });
            }
            fresher
        };

        if updated {
            debug!(
                server = %self.inner.owner,
                domain = %domain,
                record_type = %record_type,
                "cache updated"
            );
            self.inner.notifier.publish(&record_type.topic(domain));
            self.arm_sweeper();
        } else {
            debug!(
                server = %self.inner.owner,
                domain = %domain,
                record_type = %record_type,
                "stale answer ignored"
            );
        }
        updated
    }

    /// Remove every expired record, and every domain left with none.
    ///
    /// Returns the number of domains removed.
    pub fn evict(&self) -> usize {
        let now = Instant::now();
        let before = self.inner.records.len();
        self.inner.records.retain(|_, record| {
            record.clear_expired(now);
            !record.is_empty()
        });
        let removed = before.saturating_sub(self.inner.records.len());
        if removed > 0 {
            debug!(
                server = %self.inner.owner,
                removed,
                remaining = self.inner.records.len(),
                "evicted expired records"
            );
        }
        removed
    }

    /// Snapshot of the record set for `domain`.
    pub fn get(&self, domain: &str) -> Option<DomainRecord> {
        self.inner.records.get(domain).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }

    /// Whether the eviction sweep is currently armed.
    pub fn is_sweeping(&self) -> bool {
        self.inner.sweeping.load(Ordering::Acquire)
    }

    fn arm_sweeper(&self) {
        if self
            .inner
            .sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(server = %self.inner.owner, "no runtime, cache sweep not started");
            self.inner.sweeping.store(false, Ordering::Release);
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.interval;
        handle.spawn(sweep(weak, interval));
    }
}

async fn sweep(weak: Weak<CacheInner>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;

        let Some(inner) = weak.upgrade() else {
            return;
        };
        let cache = AnswerCache { inner };
        cache.evict();

        if !cache.is_empty() {
            continue;
        }

        cache.inner.sweeping.store(false, Ordering::Release);
        debug!(server = %cache.inner.owner, "cache empty, sweep stopped");

        // An update may have landed between the emptiness check and the store.
        let rearmed = !cache.is_empty()
            && cache
                .inner
                .sweeping
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
        if !rearmed {
            return;
        }
    }
}

impl std::fmt::Debug for AnswerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerCache")
            .field("owner", &self.inner.owner)
            .field("domains", &self.inner.records.len())
            .field("sweeping", &self.is_sweeping())
            .finish()
    }
}
