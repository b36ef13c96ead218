pub mod alloc;
pub mod cluster;
pub mod config;
pub mod error;
pub mod job;
pub mod machine;
pub mod sched;
pub mod sim;
pub mod stats;
pub mod taskmap;

pub use error::{Error, Result};

#[cfg(test)]
mod test;
