//! Core domain + application logic for the WhatsApp bot.
//!
//! This crate is intentionally transport-agnostic. The wire protocol lives
//! behind the [`messaging::port::TransportPort`] trait implemented in adapter
//! crates; everything here routes envelopes, runs commands, and logs.

pub mod config;
pub mod domain;
pub mod errors;
pub mod eval;
pub mod formatting;
pub mod gate;
pub mod intercept;
pub mod logging;
pub mod messaging;
pub mod registry;
pub mod router;

#[cfg(test)]
pub(crate) mod testutil;

pub use errors::{Error, Result};
