//! Core types, config, errors, task queue and conversation storage for llm-desk.

pub mod config;
pub mod conversation;
pub mod conversation_store;
pub mod error;
pub mod markdown;
pub mod task;
pub mod task_store;
pub mod types;
