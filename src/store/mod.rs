pub mod decisions;
pub mod document;
pub mod heartbeat;
pub mod lock;
pub mod lock_manager;
pub mod paths;
pub mod registry;
