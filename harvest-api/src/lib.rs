pub mod admin;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod server;
pub mod state;
pub mod websocket;

pub use admin::AdminService;
pub use server::{router, run};
pub use state::ApiState;
