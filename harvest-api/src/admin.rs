use harvest_core::error::{HarvestError, HarvestResult};
use harvest_core::store::Store;
use harvest_core::types::{Actor, Stats, User};
use std::sync::Arc;
use uuid::Uuid;

/// User moderation and platform counts. Every call requires an administrator.
#[derive(Clone)]
pub struct AdminService {
    store: Arc<dyn Store>,
}

fn require_admin(actor: &Actor) -> HarvestResult<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(HarvestError::forbidden("admin access required"))
    }
}

impl AdminService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn list_users(&self, actor: &Actor) -> HarvestResult<Vec<User>> {
        require_admin(actor)?;
        Ok(self.store.list_users().await?)
    }

    pub async fn get_user(&self, actor: &Actor, id: Uuid) -> HarvestResult<User> {
        require_admin(actor)?;
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| HarvestError::not_found("user", id))
    }

    /// Only verified organizations are told about new donations.
    pub async fn set_verified(&self, actor: &Actor, id: Uuid, verified: bool) -> HarvestResult<User> {
        require_admin(actor)?;
        let user = self
            .store
            .set_user_verified(id, verified)
            .await?
            .ok_or_else(|| HarvestError::not_found("user", id))?;
        tracing::info!("{} set verified={} on user {}", actor.name, verified, id);
        Ok(user)
    }

    pub async fn stats(&self, actor: &Actor) -> HarvestResult<Stats> {
        require_admin(actor)?;
        Ok(self.store.stats().await?)
    }
}
