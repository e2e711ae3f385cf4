pub mod allocator;
pub mod config;
pub mod error;
pub mod known_objects;
pub mod request_tracker;

pub use allocator::ObjectAllocator;
pub use config::{default_config_path, WireConfig};
pub use error::CoreError;
pub use known_objects::{AllocationState, KnownObjects, ObjectData};
pub use request_tracker::{RequestTracker, Resolution};
