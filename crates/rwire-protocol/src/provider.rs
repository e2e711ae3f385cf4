//! Object id translation at the encode and decode boundaries.

use crate::error::WireError;
use crate::handle::{ObjectHandle, ObjectId, ObjectType};

/// Identifies one client connection. Objects remember the connection that
/// created them so they cannot be smuggled into another one.
pub type ConnectionId = u64;

/// An object that can appear as an argument of an encoded command.
pub trait WireObject {
    fn object_type(&self) -> ObjectType;
    fn wire_handle(&self) -> ObjectHandle;
    fn connection(&self) -> ConnectionId;
}

/// Client side: turns object arguments into wire ids for one connection.
pub trait ObjectIdProvider {
    fn connection_id(&self) -> ConnectionId;

    fn get_id(&self, object: &dyn WireObject) -> Result<ObjectId, WireError> {
        if object.connection() != self.connection_id() {
            return Err(WireError::ForeignObject);
        }
        Ok(object.wire_handle().id)
    }

    fn get_optional_id(&self, object: Option<&dyn WireObject>) -> Result<ObjectId, WireError> {
        match object {
            Some(object) => self.get_id(object),
            None => Ok(0),
        }
    }
}

/// Result of resolving a live id on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved<T> {
    Object(T),
    /// The id names an error object: registered, but with no backend object.
    Error,
}

impl<T> Resolved<T> {
    pub fn object(self) -> Option<T> {
        match self {
            Resolved::Object(object) => Some(object),
            Resolved::Error => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Resolved::Error)
    }
}

/// Server side: turns wire ids back into backend objects.
pub trait ObjectIdResolver {
    type Native: Copy;

    /// Look up a live object. Fails for ids that are unknown, freed, or
    /// merely reserved.
    fn lookup(&self, object_type: ObjectType, id: ObjectId) -> Option<Resolved<Self::Native>>;

    fn get_from_id(
        &self,
        object_type: ObjectType,
        id: ObjectId,
    ) -> Result<Resolved<Self::Native>, WireError> {
        if id == 0 {
            return Err(WireError::InvalidObject { object_type, id });
        }
        self.lookup(object_type, id)
            .ok_or(WireError::InvalidObject { object_type, id })
    }

    /// Like [`get_from_id`](Self::get_from_id), but 0 resolves to `None`.
    fn get_optional_from_id(
        &self,
        object_type: ObjectType,
        id: ObjectId,
    ) -> Result<Option<Resolved<Self::Native>>, WireError> {
        if id == 0 {
            return Ok(None);
        }
        self.get_from_id(object_type, id).map(Some)
    }
}
