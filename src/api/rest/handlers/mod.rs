pub mod chat;
pub mod chats;
pub mod prompts;
pub mod share;
