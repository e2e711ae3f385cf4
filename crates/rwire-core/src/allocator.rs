use rwire_protocol::{ObjectHandle, ObjectId};
use tracing::debug;

struct Slot<T> {
    object: Option<T>,
    /// Generation of the live object, or of the next object for a free slot.
    generation: u32,
}

/// Client-side id allocator for one object-type category.
///
/// Ids are dense indices into a slot vector; id 0 is never handed out.
/// Freed ids are recycled with their generation bumped by one. An id whose
/// generation has reached `u32::MAX` is retired instead of recycled so a
/// handle can never repeat.
pub struct ObjectAllocator<T> {
    slots: Vec<Slot<T>>,
    free: Vec<ObjectId>,
    live: usize,
}

impl<T> ObjectAllocator<T> {
    pub fn new() -> Self {
        Self {
            slots: vec![Slot {
                object: None,
                generation: 0,
            }],
            free: Vec::new(),
            live: 0,
        }
    }

    /// Allocate a handle and store the object built for it.
    pub fn new_object(&mut self, make: impl FnOnce(ObjectHandle) -> T) -> ObjectHandle {
        let handle = match self.free.pop() {
            Some(id) => ObjectHandle::new(id, self.slots[id as usize].generation),
            None => {
                let id = self.slots.len() as ObjectId;
                self.slots.push(Slot {
                    object: None,
                    generation: 0,
                });
                ObjectHandle::new(id, 0)
            }
        };
        self.slots[handle.id as usize].object = Some(make(handle));
        self.live += 1;
        handle
    }

    /// Release an id, returning the object that held it.
    pub fn free(&mut self, id: ObjectId) -> Option<T> {
        debug_assert!(id != 0, "freeing the null id");
        let slot = self.slots.get_mut(id as usize)?;
        let object = slot.object.take();
        debug_assert!(object.is_some(), "double free of id {}", id);
        if object.is_none() {
            return None;
        }
        self.live -= 1;

        if slot.generation == u32::MAX {
            debug!(id, "generation exhausted, retiring id");
        } else {
            slot.generation += 1;
            self.free.push(id);
        }
        object
    }

    pub fn get(&self, id: ObjectId) -> Option<&T> {
        if id == 0 {
            return None;
        }
        self.slots.get(id as usize)?.object.as_ref()
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut T> {
        if id == 0 {
            return None;
        }
        self.slots.get_mut(id as usize)?.object.as_mut()
    }

    /// Like [`get`](Self::get), but the generation must match too.
    pub fn get_by_handle(&self, handle: ObjectHandle) -> Option<&T> {
        let slot = self.slots.get(handle.id as usize)?;
        if handle.id == 0 || slot.generation != handle.generation {
            return None;
        }
        slot.object.as_ref()
    }

    /// Current generation of a live id.
    pub fn generation(&self, id: ObjectId) -> Option<u32> {
        self.get(id)?;
        Some(self.slots[id as usize].generation)
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Live objects in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectHandle, &T)> {
        self.slots.iter().enumerate().filter_map(|(id, slot)| {
            slot.object
                .as_ref()
                .map(|object| (ObjectHandle::new(id as ObjectId, slot.generation), object))
        })
    }

    /// Overwrite the generation of a live id. Lets tests reach the
    /// exhaustion path without billions of allocations.
    #[doc(hidden)]
    pub fn set_generation(&mut self, id: ObjectId, generation: u32) {
        if let Some(slot) = self.slots.get_mut(id as usize) {
            if slot.object.is_some() {
                slot.generation = generation;
            }
        }
    }
}

impl<T> Default for ObjectAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}
