use std::collections::HashMap;
use std::sync::Arc;

use log::warn;
use serde_json::{Value, json};
use tokio::sync::{Mutex, OnceCell};

use crate::client::{ApiClient, Transport};
use crate::error::Result;

/// Per-run user profile cache shared by all workers. Lookups for the same
/// uncached id coalesce into a single `users.info` call via a per-id
/// `OnceCell`.
#[derive(Default)]
pub struct UserDirectory {
    cache: Mutex<HashMap<String, Arc<OnceCell<Value>>>>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a user profile snapshot, memoized for the run. A failed
    /// lookup degrades to a placeholder carrying only the id; it never
    /// fails the caller's conversation.
    pub async fn resolve<T: Transport>(&self, client: &ApiClient<T>, user_id: &str) -> Value {
        let cell = {
            let mut cache = self.cache.lock().await;
            cache
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        cell.get_or_init(|| async {
            match fetch_profile(client, user_id).await {
                Ok(profile) => profile,
                Err(e) => {
                    warn!("users.info failed for {user_id}: {e}");
                    json!({"id": user_id})
                }
            }
        })
        .await
        .clone()
    }
}

async fn fetch_profile<T: Transport>(client: &ApiClient<T>, user_id: &str) -> Result<Value> {
    let body = client
        .call("users.info", &[("user", user_id.to_string())])
        .await?;
    Ok(body
        .get("user")
        .and_then(|u| u.get("profile"))
        .cloned()
        .unwrap_or_else(|| json!({"id": user_id})))
}
