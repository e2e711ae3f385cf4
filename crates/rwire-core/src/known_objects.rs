use rwire_protocol::{ObjectHandle, ObjectId, ObjectType};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationState {
    Free,
    /// Id claimed by an in-flight async creation; not usable yet.
    Reserved,
    Allocated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectData<N> {
    /// `None` while allocated marks an error object.
    pub native: Option<N>,
    pub generation: u32,
    pub state: AllocationState,
}

/// Server-side registry for one object-type category, indexed by the ids
/// the client chose.
pub struct KnownObjects<N> {
    object_type: ObjectType,
    objects: Vec<ObjectData<N>>,
}

impl<N: Copy> KnownObjects<N> {
    pub fn new(object_type: ObjectType) -> Self {
        Self {
            object_type,
            objects: vec![ObjectData {
                native: None,
                generation: 0,
                state: AllocationState::Free,
            }],
        }
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    fn claim(&mut self, handle: ObjectHandle, state: AllocationState) -> Result<(), CoreError> {
        let object_type = self.object_type;
        let reject = |reason| CoreError::InvalidAllocation {
            object_type,
            handle,
            reason,
        };
        let id = handle.id as usize;
        if id == 0 {
            return Err(reject("null id"));
        }
        if id > self.objects.len() {
            return Err(reject("id skips ahead of the registry"));
        }
        let data = ObjectData {
            native: None,
            generation: handle.generation,
            state,
        };
        if id == self.objects.len() {
            self.objects.push(data);
            return Ok(());
        }

        let slot = &mut self.objects[id];
        if slot.state != AllocationState::Free {
            return Err(reject("id still in use"));
        }
        if handle.generation < slot.generation {
            return Err(reject("generation went backwards"));
        }
        *slot = data;
        Ok(())
    }

    /// Register a new object under a client-chosen handle. It starts as an
    /// error object until [`set_native`](Self::set_native) is called.
    pub fn allocate(&mut self, handle: ObjectHandle) -> Result<(), CoreError> {
        self.claim(handle, AllocationState::Allocated)
    }

    pub fn reserve(&mut self, handle: ObjectHandle) -> Result<(), CoreError> {
        self.claim(handle, AllocationState::Reserved)
    }

    /// Attach the backend object. Also turns a reserved slot into an
    /// allocated one.
    pub fn set_native(&mut self, id: ObjectId, native: N) {
        if let Some(slot) = self.objects.get_mut(id as usize) {
            debug_assert!(slot.state != AllocationState::Free);
            slot.native = Some(native);
            slot.state = AllocationState::Allocated;
        }
    }

    /// Turn a reserved slot into an allocated error object.
    pub fn mark_error(&mut self, id: ObjectId) {
        if let Some(slot) = self.objects.get_mut(id as usize) {
            slot.native = None;
            slot.state = AllocationState::Allocated;
        }
    }

    /// Allocated object data; `None` for free, reserved, or unknown ids.
    pub fn get(&self, id: ObjectId) -> Option<&ObjectData<N>> {
        self.objects
            .get(id as usize)
            .filter(|data| id != 0 && data.state == AllocationState::Allocated)
    }

    /// Whether `handle` names the reserved slot of an in-flight creation.
    pub fn is_reserved(&self, handle: ObjectHandle) -> bool {
        self.objects.get(handle.id as usize).is_some_and(|data| {
            data.state == AllocationState::Reserved && data.generation == handle.generation
        })
    }

    /// Full handle of a live or reserved id.
    pub fn handle_of(&self, id: ObjectId) -> Option<ObjectHandle> {
        let data = self.objects.get(id as usize)?;
        (id != 0 && data.state != AllocationState::Free)
            .then(|| ObjectHandle::new(id, data.generation))
    }

    /// Release an id and return what it held. The generation is kept so a
    /// later allocation can be checked against it.
    pub fn free(&mut self, id: ObjectId) -> Result<ObjectData<N>, CoreError> {
        let not_live = CoreError::NotLive {
            object_type: self.object_type,
            id,
        };
        let Some(slot) = self.objects.get_mut(id as usize) else {
            return Err(not_live);
        };
        if id == 0 || slot.state == AllocationState::Free {
            return Err(not_live);
        }
        let data = *slot;
        slot.native = None;
        slot.state = AllocationState::Free;
        Ok(data)
    }

    /// Native objects of every allocated id, in id order.
    pub fn natives(&self) -> impl Iterator<Item = (ObjectId, N)> + '_ {
        self.objects.iter().enumerate().filter_map(|(id, data)| match data.state {
            AllocationState::Allocated => data.native.map(|n| (id as ObjectId, n)),
            _ => None,
        })
    }

    pub fn live_count(&self) -> usize {
        self.objects
            .iter()
            .filter(|data| data.state != AllocationState::Free)
            .count()
    }
}
