//! Channel protocol
//!
//! JSON text frames exchanged over the task and system WebSocket channels.

mod messages;

pub use messages::*;
