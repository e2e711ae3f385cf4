pub mod error;
pub mod null_procs;
pub mod procs;
pub mod registry;
pub mod server;

pub use error::ServerError;
pub use null_procs::NullProcs;
pub use procs::{NativeObject, Procs};
pub use registry::Registry;
pub use server::{Server, DEVICE_HANDLE};
