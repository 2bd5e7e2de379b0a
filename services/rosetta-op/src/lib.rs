//! rosetta-op service library
//!
//! Supervises the embedded Optimism node and the Rosetta HTTP API as one
//! run: a failure in either, or a termination signal, shuts both down.

pub mod asserter;
pub mod client;
pub mod error;
pub mod http;
pub mod node;
pub mod routes;
pub mod supervisor;

// Re-export commonly used types
pub use asserter::{Asserter, AsserterError};
pub use client::{Client, ClientError, ClientOptions};
pub use error::{SupervisorError, SupervisorResult};
pub use http::{HttpError, HttpServerAdapter, ServerTimeouts};
pub use node::{NodeError, NodeLauncher};
pub use supervisor::Supervisor;
