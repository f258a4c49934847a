pub mod channel;
pub mod logger;
pub mod programs;

pub use channel::Mode;

mod aggregate;
pub use aggregate::*;

mod backoff;
pub use backoff::*;

mod barrier;
pub use barrier::*;

mod bootstrap;
pub use bootstrap::*;

mod buffer;
pub use buffer::*;

mod combine;
pub use combine::*;

mod config;
pub use config::*;

mod context;
pub use context::*;

mod error;
pub use error::{Error, Result};

mod graph;
pub use graph::*;

mod master;
pub use master::*;

mod message;
pub use message::*;

mod program;
pub use program::*;

mod protocol;
pub use protocol::*;

mod registry;
pub use registry::*;

mod state;
pub use state::*;

mod stats;
pub use stats::*;

mod supervisor;
pub use supervisor::*;

mod termination;
pub use termination::*;

mod vertex;
pub use vertex::*;

mod worker;
pub use worker::*;
