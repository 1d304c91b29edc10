//! Duplex sessions for streaming rpc, with calculator, greet and blog services
//!
//! # Motivation
//!
//! A bidirectional streaming call gives the client a sink for updates and a
//! stream of responses. Driving it takes two concurrent loops, one feeding the
//! sink and one draining the stream, and some care about which loop decides
//! that the call is over. The [duplex] module packages this into
//! [DuplexSession], which spawns both loops and hands back a single
//! [DuplexHandle] to join.
//!
//! The services in [services] are built on [quic_rpc]. Their bidi calls run as
//! duplex sessions through [DuplexSession::bidi], and their servers run through
//! [rpc::run_server_loop].
//!
//! # Example
//! ```
//! # async fn example() -> anyhow::Result<()> {
//! use duplex_rpc::{
//!     services::calculator::{self, CalculatorApi, CalculatorService},
//!     DuplexSession,
//! };
//! use futures_lite::stream;
//!
//! // an in-memory server and client for the calculator
//! let (server, client) = quic_rpc::flume_channel::<CalculatorService>(1);
//! tokio::spawn(calculator::serve(server));
//! let api = CalculatorApi::new(client);
//!
//! // a single rpc
//! assert_eq!(api.sum(3, 10).await?, 13);
//!
//! // a bidi call: the server answers every number with the running maximum
//! let numbers = stream::iter(vec![3, 1, 5]);
//! let handle = api
//!     .find_maximum(numbers, |max| println!("max {max}"), DuplexSession::new())
//!     .await?;
//! let summary = handle.join().await?;
//! assert_eq!((summary.sent, summary.received), (3, 3));
//! # Ok(())
//! # }
//! ```
//!
//! # Features
#![doc = document_features::document_features!()]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
pub mod duplex;
pub mod rpc;
pub mod services;
pub use duplex::{DuplexHandle, DuplexSession};
