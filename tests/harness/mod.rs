//! Test harness: a scripted server end of a WebSocket connection.
//!
//! Tests drive the server side frame by frame to check exactly what the
//! client puts on the wire and how it reacts to what it receives.

#![allow(dead_code)]

mod server;

pub use server::{ServerSide, TestServer, connected_pair, connected_pair_with};
