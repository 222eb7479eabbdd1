//! Parlor is the session orchestration core of a multi-provider chat client.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns runtime state: stored API keys, provider/model selection,
//!   the session catalog, and the conversation state machine with its
//!   request dispatch.
//! - [`api`] defines the backend wire payloads and the [`api::Backend`] trait
//!   with its HTTP implementation.
//! - [`logging`] installs an optional `tracing` subscriber.
//!
//! A presentation layer builds a [`core::app::App`], calls
//! [`core::app::App::bootstrap`] once, and then drives it from user input,
//! feeding exchange outcomes back through [`core::app::App::apply_outcome`].

pub mod api;
pub mod core;
pub mod logging;
pub mod utils;
