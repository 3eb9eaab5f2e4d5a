//! Asynchronous notification dispatch.
//!
//! Producers enqueue jobs; the notification worker materializes each record,
//! pushes it to live subscribers and appends it to a Redis write-behind
//! buffer that a recurring flush job drains into Postgres. Emails go through
//! their own queue and worker.

pub mod buffer;
pub mod context;
pub mod email;
pub mod error;
pub mod flush;
pub mod producer;
pub mod realtime;
pub mod store;
pub mod worker;

#[cfg(test)]
mod testing;

pub use context::ServiceContext;
pub use error::{NotifierError, NotifierResult};
pub use realtime::{ChannelServer, ChannelServerHandle, RealtimeHub, RealtimeMessage};
