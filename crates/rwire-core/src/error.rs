use rwire_protocol::{ObjectHandle, ObjectType};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("cannot allocate {object_type:?} {handle}: {reason}")]
    InvalidAllocation {
        object_type: ObjectType,
        handle: ObjectHandle,
        reason: &'static str,
    },

    #[error("{object_type:?} id {id} is not live")]
    NotLive { object_type: ObjectType, id: u32 },

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
