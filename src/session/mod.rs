//! 会话层：消息、会话（thread）与按 thread_id 串行化的会话存储

mod message;
mod store;
mod thread;

pub use message::{Message, Role};
pub use store::{MemorySessionStore, SessionStore, TurnLease};
pub use thread::{keys, Scratch, Session};

pub(crate) use thread::failure_count;
