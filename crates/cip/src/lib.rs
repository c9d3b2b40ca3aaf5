//! EtherNet/IP and CIP protocol engine for conformance and fuzz testing.
//!
//! Layered bottom to top: byte-order-aware codecs (`byte`, `epath`, `enip`,
//! `cip`), policy and structural validation (`profile`, `registry`,
//! `validator`), then session/connection bookkeeping plus the dispatch
//! engine (`session`, `handler`, `personality`, `dispatch`). `transport` and
//! `client` are the two I/O-facing entry points built on all of the above.

pub mod byte;
pub mod cip;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod enip;
pub mod epath;
pub mod error;
pub mod fault;
pub mod handler;
pub mod personality;
pub mod profile;
pub mod registry;
pub mod rng;
pub mod session;
pub mod transport;
pub mod validator;

pub use error::{Error, Result};
