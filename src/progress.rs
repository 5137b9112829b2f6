//! Scan progress counter

use std::sync::atomic::{AtomicU64, Ordering};

/// Incremented once per resource read by a provider
pub trait ProgressCounter: Send + Sync {
    fn inc(&self);
}

#[derive(Debug, Default)]
pub struct Progress {
    count: AtomicU64,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl ProgressCounter for Progress {
    fn inc(&self) {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % 100 == 0 {
            tracing::info!("Read {} resources so far", count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_concurrent_increments() {
        let progress = Arc::new(Progress::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let progress = progress.clone();
                tokio::spawn(async move {
                    for _ in 0..25 {
                        progress.inc();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(progress.count(), 200);
    }
}
