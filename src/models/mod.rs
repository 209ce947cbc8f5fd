pub mod chat;
pub mod conversation;
pub mod task;

pub use chat::{ChatMessage, ChatSession, MessageRole};
pub use conversation::{ConversationState, FlowMode};
pub use task::{Task, TaskPatch, TaskStatus};
