//! jobhost: per-node job scheduling and stream routing.

pub mod config;
pub mod error;
pub mod jobs;
pub mod node;
pub mod stream;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use node::{Dispatch, Node, working_directory};
pub use stream::{CommandCode, Stream, StreamFlags, StreamHeader};
