pub mod commands;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod instance_id;
pub mod logging;
pub mod model;
pub mod output;
pub mod repo;
pub mod store;

pub use coordinator::{Coordinator, Participant};
pub use error::{CoordError, Result};
pub use instance_id::InstanceId;
