pub mod config;
pub mod connection;
pub mod context;
pub mod runner;
pub mod signing;
pub mod stats;
pub mod transfer;

/// Convenient type alias exposing common structs.
pub mod prelude {
    pub use crate::config::{ByteRange, Limits, RunOptions, DEFAULT_CLOUDFRONT_TTL};
    pub use crate::connection::{new_connection, Connection, ConnectionSpec};
    pub use crate::context::ProbeContext;
    pub use crate::runner::{Prober, RunSummary};
    pub use crate::stats::Statistics;
}
