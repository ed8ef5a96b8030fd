pub mod fanout;
pub mod inbox;
pub mod templates;

pub use fanout::{ChannelReport, FanoutEngine, RecipientReport};
pub use inbox::{InboxService, UnreadCount};
