pub mod admin;
pub mod chat_completions;
pub mod embeddings;
pub mod health;
pub mod messages;
pub mod models;
pub mod rerank;
pub mod responses;
