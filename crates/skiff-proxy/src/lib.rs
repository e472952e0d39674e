#![deny(unsafe_code)]

//! Proxy bases and dispatch core for calling native objects across a
//! process boundary.
//!
//! A [`ClientProxy`] implements the native interface on one side and
//! forwards each call over a [`Connection`]; a [`ServerProxy`] on the other
//! side decodes it, invokes the wrapped implementation through its method
//! table, and sends the result back. [`Accessor`] metadata describes how
//! each field travels; [`Callback`] wrappers let function values cross the
//! boundary as capabilities of their own.
//!
//! The per-interface glue (typed clients, method tables) is expected from a
//! code generator or hand expansion; `skiff-testkit` carries hand-expanded
//! examples. Transports plug in underneath via the [`Transport`] trait.

#[macro_use]
mod macros;

mod accessor;
mod callback;
mod client;
mod connection;
mod errors;
mod method;
mod server;
mod transport;

pub use skiff_wire::{CALLBACK_CALL, CapabilityId, MethodId, Payload, Request, RequestId, Response};

pub use accessor::*;
pub use callback::*;
pub use client::*;
pub use connection::*;
pub use errors::*;
pub use method::*;
pub use server::*;
pub use transport::*;

#[cfg(test)]
mod tests;
