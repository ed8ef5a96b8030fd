use harvest_chat::ChatService;
use harvest_core::HarvestContext;
use harvest_donations::DonationService;
use harvest_notify::InboxService;

use crate::admin::AdminService;

/// Everything a request handler can reach, shared through an `Extension`.
#[derive(Clone)]
pub struct ApiState {
    pub ctx: HarvestContext,
    pub donations: DonationService,
    pub chat: ChatService,
    pub inbox: InboxService,
    pub admin: AdminService,
}

impl ApiState {
    pub fn new(
        ctx: HarvestContext,
        donations: DonationService,
        chat: ChatService,
        inbox: InboxService,
    ) -> Self {
        let admin = AdminService::new(ctx.store.clone());
        ApiState {
            ctx,
            donations,
            chat,
            inbox,
            admin,
        }
    }

    pub fn jwt_secret(&self) -> &str {
        &self.ctx.config.server.jwt_secret
    }
}
