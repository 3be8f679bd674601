pub mod messages;
pub mod websocket;

pub use messages::{ClientMessage, ServerMessage};
pub use websocket::presence_websocket_handler;
