pub mod hub;
pub mod service;

pub use hub::{MemoryRoomHub, RoomTransport, ServerEvent, SessionId};
pub use service::ChatService;
