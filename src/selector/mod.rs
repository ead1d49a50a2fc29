use crate::error::{DispatchError, Result};
use crate::sender::Sender;
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Chooses the sender for a request category
#[async_trait]
pub trait Selector: Send + Sync {
    async fn select(&self, category: &str) -> Result<Arc<dyn Sender>>;
}

/// Picks uniformly at random among the senders registered for a category
#[derive(Default)]
pub struct RandomSelector {
    senders: RwLock<HashMap<String, Vec<Arc<dyn Sender>>>>,
}

impl RandomSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sender to a category's pool
    pub async fn add_sender(&self, category: &str, sender: Arc<dyn Sender>) {
        let mut senders = self.senders.write().await;
        let pool = senders.entry(category.to_string()).or_default();
        pool.push(sender);
        info!(category, pool_size = pool.len(), "Registered sender");
    }

    /// Number of senders registered for a category
    pub async fn sender_count(&self, category: &str) -> usize {
        self.senders
            .read()
            .await
            .get(category)
            .map_or(0, |pool| pool.len())
    }
}

#[async_trait]
impl Selector for RandomSelector {
    async fn select(&self, category: &str) -> Result<Arc<dyn Sender>> {
        let senders = self.senders.read().await;
        match senders.get(category) {
            Some(pool) if !pool.is_empty() => {
                let index = rand::thread_rng().gen_range(0..pool.len());
                debug!(category, index, pool_size = pool.len(), "Selected sender");
                Ok(pool[index].clone())
            }
            _ => Err(DispatchError::NoSenderRegistered(category.to_string())),
        }
    }
}
