use rwire_core::KnownObjects;
use rwire_protocol::{ObjectHandle, ObjectId, ObjectIdResolver, ObjectType, Resolved};

use crate::procs::NativeObject;

/// Per-connection object registry: one [`KnownObjects`] table per
/// object-type category.
pub struct Registry {
    tables: Vec<KnownObjects<NativeObject>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            tables: ObjectType::ALL
                .iter()
                .map(|object_type| KnownObjects::new(*object_type))
                .collect(),
        }
    }

    pub fn table(&self, object_type: ObjectType) -> &KnownObjects<NativeObject> {
        &self.tables[object_type.index()]
    }

    pub fn table_mut(&mut self, object_type: ObjectType) -> &mut KnownObjects<NativeObject> {
        &mut self.tables[object_type.index()]
    }

    /// Backend object of a live handle whose generation still matches.
    pub fn native_of(&self, object_type: ObjectType, handle: ObjectHandle) -> Option<NativeObject> {
        let data = self.table(object_type).get(handle.id)?;
        if data.generation != handle.generation {
            return None;
        }
        data.native
    }

    /// Number of registered (allocated or reserved) objects of a category.
    pub fn live_count(&self, object_type: ObjectType) -> usize {
        self.table(object_type).live_count()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectIdResolver for Registry {
    type Native = NativeObject;

    fn lookup(&self, object_type: ObjectType, id: ObjectId) -> Option<Resolved<NativeObject>> {
        let data = self.table(object_type).get(id)?;
        Some(match data.native {
            Some(native) => Resolved::Object(native),
            None => Resolved::Error,
        })
    }
}
