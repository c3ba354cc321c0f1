//! A peer-to-peer database synchronization client: given two mutually trusting endpoints,
//! transfers a subset of authored records from one to the other with causal-ordering
//! correctness, resumability across network failures, and chunked memory-bounded I/O.
//!
//! Four components compose the core, one module each: [`transport`] (authenticated HTTP with
//! retry), [`negotiate`] (session handshake), [`controller`] ("the heart" — the
//! `starting -> queuing -> pushing|pulling -> dequeuing -> completed` state machine), and
//! [`exchanger`] (chunked record I/O). [`collaborators`] defines the trait-only interfaces to
//! the certificate trust model and the record-level merge engine, which this crate does not
//! implement.

pub mod cli;
pub mod collaborators;
pub mod config;
pub mod controller;
pub mod error;
pub mod exchanger;
pub mod model;
pub mod negotiate;
pub mod store;
pub mod transport;
pub mod wire;

pub use config::Config;
pub use error::Error;
pub use negotiate::Negotiator;
