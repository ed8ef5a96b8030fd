use harvest_core::error::{HarvestError, HarvestResult};
use harvest_core::redis::{decr_unread, get_unread, reset_unread, set_unread, RedisPool};
use harvest_core::store::{MarkRead, Store, INBOX_LIMIT};
use harvest_core::types::{Actor, DeviceToken, Notification, Platform};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnreadCount {
    pub unread: i64,
}

/// A user's notification inbox and registered push devices.
#[derive(Clone)]
pub struct InboxService {
    store: Arc<dyn Store>,
    redis_pool: Option<RedisPool>,
}

impl InboxService {
    pub fn new(store: Arc<dyn Store>, redis_pool: Option<RedisPool>) -> Self {
        Self { store, redis_pool }
    }

    pub async fn list(&self, actor: &Actor) -> HarvestResult<Vec<Notification>> {
        Ok(self.store.list_notifications(actor.id, INBOX_LIMIT).await?)
    }

    /// Only the recipient can mark a notification; anyone else sees NotFound.
    pub async fn mark_read(&self, actor: &Actor, id: Uuid) -> HarvestResult<Notification> {
        match self.store.mark_notification_read(actor.id, id).await? {
            MarkRead::NotFound => return Err(HarvestError::not_found("notification", id)),
            MarkRead::AlreadyRead => {}
            MarkRead::Marked => {
                if let Some(pool) = &self.redis_pool {
                    if let Err(e) = decr_unread(pool, actor.id).await {
                        tracing::warn!("Failed to decrement unread count for {}: {}", actor.id, e);
                    }
                }
            }
        }

        self.store
            .get_notification(id)
            .await?
            .ok_or_else(|| HarvestError::not_found("notification", id))
    }

    pub async fn mark_all_read(&self, actor: &Actor) -> HarvestResult<usize> {
        let updated = self.store.mark_all_notifications_read(actor.id).await?;
        if let Some(pool) = &self.redis_pool {
            if let Err(e) = reset_unread(pool, actor.id).await {
                tracing::warn!("Failed to reset unread count for {}: {}", actor.id, e);
            }
        }
        Ok(updated)
    }

    /// Served from Redis when available. A missing or unreachable counter
    /// falls back to counting rows, and a missing one is re-seeded.
    pub async fn unread_count(&self, actor: &Actor) -> HarvestResult<UnreadCount> {
        if let Some(pool) = &self.redis_pool {
            match get_unread(pool, actor.id).await {
                Ok(Some(unread)) => return Ok(UnreadCount { unread }),
                Ok(None) => {
                    let unread = self.store.count_unread_notifications(actor.id).await?;
                    if let Err(e) = set_unread(pool, actor.id, unread).await {
                        tracing::warn!("Failed to seed unread count for {}: {}", actor.id, e);
                    }
                    return Ok(UnreadCount { unread });
                }
                Err(e) => {
                    tracing::warn!("Redis unread lookup failed for {}: {}", actor.id, e);
                }
            }
        }

        let unread = self.store.count_unread_notifications(actor.id).await?;
        Ok(UnreadCount { unread })
    }

    pub async fn register_device(
        &self,
        actor: &Actor,
        token: &str,
        platform: Platform,
    ) -> HarvestResult<DeviceToken> {
        let token = token.trim();
        if token.is_empty() {
            return Err(HarvestError::Validation("device token is required".into()));
        }
        let device = self.store.upsert_device_token(actor.id, token, platform).await?;
        tracing::debug!("Registered {} device for {}", platform, actor.id);
        Ok(device)
    }

    /// Deactivates the token; unknown tokens are not an error.
    pub async fn unregister_device(&self, actor: &Actor, token: &str) -> HarvestResult<usize> {
        if token.trim().is_empty() {
            return Err(HarvestError::Validation("device token is required".into()));
        }
        Ok(self.store.deactivate_device_token(actor.id, token.trim()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::store::MemoryStore;
    use harvest_core::types::{NotificationKind, Role};

    fn service() -> (Arc<MemoryStore>, InboxService) {
        let store = Arc::new(MemoryStore::new());
        let service = InboxService::new(store.clone(), None);
        (store, service)
    }

    async fn seed(store: &MemoryStore, user: Uuid, n: usize) -> Vec<Uuid> {
        let mut ids = Vec::new();
        for i in 0..n {
            let notification = Notification::new(
                user,
                format!("title {}", i),
                "body",
                NotificationKind::Donation,
                None,
            );
            store.insert_notification(&notification).await.unwrap();
            ids.push(notification.id);
        }
        ids
    }

    #[tokio::test]
    async fn test_mark_read_only_by_recipient() {
        let (store, inbox) = service();
        let owner = Actor::new(Uuid::new_v4(), "Owner", Role::Donor);
        let other = Actor::new(Uuid::new_v4(), "Other", Role::Donor);
        let ids = seed(&store, owner.id, 1).await;

        let err = inbox.mark_read(&other, ids[0]).await.unwrap_err();
        assert!(matches!(err, HarvestError::NotFound { entity: "notification", .. }));

        let marked = inbox.mark_read(&owner, ids[0]).await.unwrap();
        assert!(marked.read);
        // second call is a no-op
        assert!(inbox.mark_read(&owner, ids[0]).await.unwrap().read);
    }

    #[tokio::test]
    async fn test_unread_count_falls_back_to_store() {
        let (store, inbox) = service();
        let user = Actor::new(Uuid::new_v4(), "U", Role::Organization);
        let ids = seed(&store, user.id, 3).await;

        assert_eq!(inbox.unread_count(&user).await.unwrap().unread, 3);
        inbox.mark_read(&user, ids[1]).await.unwrap();
        assert_eq!(inbox.unread_count(&user).await.unwrap().unread, 2);
        assert_eq!(inbox.mark_all_read(&user).await.unwrap(), 2);
        assert_eq!(inbox.unread_count(&user).await.unwrap().unread, 0);
    }

    #[tokio::test]
    async fn test_list_is_limited_to_recipient() {
        let (store, inbox) = service();
        let a = Actor::new(Uuid::new_v4(), "A", Role::Donor);
        let b = Actor::new(Uuid::new_v4(), "B", Role::Donor);
        seed(&store, a.id, 2).await;
        seed(&store, b.id, 1).await;

        let listed = inbox.list(&a).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|n| n.user_id == a.id));
    }

    #[tokio::test]
    async fn test_device_register_and_unregister() {
        let (store, inbox) = service();
        let user = Actor::new(Uuid::new_v4(), "U", Role::Donor);

        let err = inbox.register_device(&user, "  ", Platform::Web).await.unwrap_err();
        assert!(matches!(err, HarvestError::Validation(_)));

        let first = inbox.register_device(&user, "tok", Platform::Ios).await.unwrap();
        assert!(first.active);
        assert_eq!(inbox.unregister_device(&user, "tok").await.unwrap(), 1);
        let again = inbox.register_device(&user, "tok", Platform::Ios).await.unwrap();
        assert!(again.active);
        assert_eq!(again.id, first.id);

        assert_eq!(inbox.unregister_device(&user, "unknown").await.unwrap(), 0);
        let _ = store;
    }
}
