pub mod app;
pub mod builtin_providers;
pub mod config;
pub mod conversation;
pub mod credentials;
pub mod exchange;
pub mod message;
pub mod notifications;
pub mod providers;
pub mod sessions;
pub mod storage;
