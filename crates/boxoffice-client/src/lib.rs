//! Client
//!
//! Typed client for the boxoffice protocol. Tracks which account is logged
//! in, validates user input into protocol fields and builds requests.
//!
//! # Architecture
//!
//! [`Client`] follows the same Sans-IO pattern as the server driver: it only
//! builds [`Request`]s and observes [`Response`]s. Sending them is the
//! caller's job.
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, this crate also provides:
//! - [`transport::Connection`]: UDP/TCP exchange with a server

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;

#[cfg(feature = "transport")]
pub mod transport;

pub use boxoffice_proto::{EventState, Request, Response, Status, Verb};
pub use client::{Client, Credentials};
pub use error::ClientError;
