//! Ready made services.
//!
//! Each service module contains the message types, the [Service](quic_rpc::Service)
//! definition, the server side handlers together with a `serve` function that
//! dispatches requests, and an api type wrapping an [RpcClient](quic_rpc::RpcClient).
//!
//! - [calculator]: one operation per interaction pattern on numbers
//! - [greet]: greetings, including a call with a deadline
//! - [blog]: create, read, update, delete and list blog entries
pub mod blog;
pub mod calculator;
pub mod greet;
mod status;

pub use status::{RpcStatus, StatusCode};
