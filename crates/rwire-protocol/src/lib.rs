pub mod codec;
pub mod commands;
pub mod descriptors;
pub mod error;
pub mod handle;
pub mod provider;
pub mod return_commands;
pub mod types;
pub mod wire;

pub use codec::WIRE_ALIGNMENT;
pub use commands::{Command, CommandId};
pub use error::WireError;
pub use handle::{ObjectHandle, ObjectId, ObjectType};
pub use provider::{ConnectionId, ObjectIdProvider, ObjectIdResolver, Resolved, WireObject};
pub use return_commands::{ReturnCommand, ReturnCommandId};
pub use wire::CmdHeader;
