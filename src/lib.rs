#![cfg_attr(docsrs, feature(doc_cfg))]
//! # pacebms_lib
//!
//! This crate provides a library for polling Pace (Pylontech style) battery management
//! systems over RS232/RS485 or a TCP gateway. Requests and replies are ASCII-hex frames
//! (`~` ... `\r`) protected by a length checksum and a frame checksum.
//!
//! The library contains the frame codec, the decoders for the supported commands, the
//! in-memory battery state and the [`session::Session`] that keeps the link alive and polls
//! the BMS on a fixed cadence. Publishing is left to an implementation of
//! [`session::Publisher`].
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `pacebms`
//!   MQTT bridge.
//! - `serialport`: Enables [`transport::SerialTransport`] using the `serialport` crate.
//!   The TCP transport is always available.

/// Contains error types for the library.
mod error;

pub mod client;
/// Frame layout, checksums and return codes.
pub mod frame;
/// Decoders for each supported command.
pub mod protocol;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod transport;

pub use error::{Error, Result};
