use super::models::TemplateMetadata;
use super::service::{DocumentService, ServiceError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Bounded retry with a fixed interval between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            interval: Duration::from_secs(2),
        }
    }
}

type Slot = Arc<Mutex<Option<(Instant, TemplateMetadata)>>>;

/// Template metadata lookups with a dedupe window.
///
/// Each template id gets its own async lock: concurrent callers for the same
/// id wait for the first fetch and reuse its result while it is younger than
/// the window. Transport failures are retried; "not found" is returned at once.
pub struct TemplateMetadataCache {
    service: Arc<dyn DocumentService>,
    ttl: Duration,
    retry: RetryPolicy,
    slots: Mutex<HashMap<String, Slot>>,
}

impl TemplateMetadataCache {
    pub fn new(service: Arc<dyn DocumentService>, ttl: Duration, retry: RetryPolicy) -> Self {
        Self {
            service,
            ttl,
            retry,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, template_id: &str) -> Result<TemplateMetadata, ServiceError> {
        let slot = {
            let mut slots = self.slots.lock().await;
            self.prune(&mut slots, template_id);
            slots.entry(template_id.to_string()).or_default().clone()
        };

        let mut cached = slot.lock().await;
        if let Some((fetched_at, metadata)) = cached.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                debug!("Template {} served from cache", template_id);
                return Ok(metadata.clone());
            }
        }

        let metadata = self.fetch_with_retry(template_id).await?;
        *cached = Some((Instant::now(), metadata.clone()));
        Ok(metadata)
    }

    /// Forget cached metadata so the next `get` fetches again
    pub async fn invalidate(&self, template_id: &str) {
        self.slots.lock().await.remove(template_id);
    }

    /// Drop idle slots whose entry is empty or older than the window
    fn prune(&self, slots: &mut HashMap<String, Slot>, keep: &str) {
        let ttl = self.ttl;
        slots.retain(|id, slot| {
            if id == keep || Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(cached) => {
                    matches!(cached.as_ref(), Some((fetched_at, _)) if fetched_at.elapsed() < ttl)
                }
                Err(_) => true,
            }
        });
    }

    #[cfg(test)]
    async fn slot_count(&self) -> usize {
        self.slots.lock().await.len()
    }

    async fn fetch_with_retry(&self, template_id: &str) -> Result<TemplateMetadata, ServiceError> {
        let mut attempt = 0;
        loop {
            match self.service.get_template(template_id).await {
                Ok(metadata) => return Ok(metadata),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    warn!(
                        "Template {} fetch failed ({}), retry {} of {}",
                        template_id, e, attempt, self.retry.max_retries
                    );
                    tokio::time::sleep(self.retry.interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
