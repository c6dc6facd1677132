//! Terminal client runtime: drives an `agentos_core::Workspace` over real
//! WebSockets with the local terminal as its renderer.

pub mod config;
pub mod input;
pub mod runtime;
pub mod socket;
pub mod terminal;
pub mod watchdog;
