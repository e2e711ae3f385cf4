//! Client-side object handles.
//!
//! Every API object is a reference-counted [`ObjectBase`]: cloning a handle
//! adds a reference, dropping the last clone releases the object on the
//! wire. Objects only hold a weak reference to their connection.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use rwire_protocol::descriptors::TextureViewDescriptor;
use rwire_protocol::{Command, ConnectionId, ObjectHandle, ObjectType, WireObject};

use crate::client::{ClientInner, ObjectState};
use crate::error::ClientError;

pub(crate) struct ObjectBase {
    client: Weak<ClientInner>,
    connection: ConnectionId,
    object_type: ObjectType,
    handle: ObjectHandle,
    /// Set when the creating command never reached the wire.
    unsent: Cell<bool>,
}

impl ObjectBase {
    pub(crate) fn new(
        client: Weak<ClientInner>,
        connection: ConnectionId,
        object_type: ObjectType,
        handle: ObjectHandle,
    ) -> Self {
        Self {
            client,
            connection,
            object_type,
            handle,
            unsent: Cell::new(false),
        }
    }

    pub(crate) fn handle(&self) -> ObjectHandle {
        self.handle
    }

    /// Release only the local id on drop; the server has nothing to destroy.
    pub(crate) fn mark_unsent(&self) {
        self.unsent.set(true);
    }

    /// The owning connection, if it is still alive.
    pub(crate) fn client(&self) -> Result<Rc<ClientInner>, ClientError> {
        self.client.upgrade().ok_or(ClientError::Disconnected)
    }
}

impl Drop for ObjectBase {
    fn drop(&mut self) {
        if let Some(client) = self.client.upgrade() {
            client.release(self.object_type, self.handle, !self.unsent.get());
        }
    }
}

macro_rules! client_object {
    ($($(#[$meta:meta])* $name:ident;)*) => {$(
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name(pub(crate) Rc<ObjectBase>);

        impl $name {
            pub(crate) fn from_base(base: ObjectBase) -> Self {
                Self(Rc::new(base))
            }

            /// Wire handle of this object.
            pub fn handle(&self) -> ObjectHandle {
                self.0.handle
            }
        }

        impl WireObject for $name {
            fn object_type(&self) -> ObjectType {
                ObjectType::$name
            }

            fn wire_handle(&self) -> ObjectHandle {
                self.0.handle
            }

            fn connection(&self) -> ConnectionId {
                self.0.connection
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0.handle)
            }
        }
    )*};
}

client_object! {
    /// The device every connection starts with.
    Device;
    Queue;
    Buffer;
    Texture;
    TextureView;
    Sampler;
    ShaderModule;
    BindGroupLayout;
    BindGroup;
    PipelineLayout;
    ComputePipeline;
    RenderPipeline;
    CommandEncoder;
    CommandBuffer;
}

impl Texture {
    pub fn create_view(
        &self,
        descriptor: Option<&TextureViewDescriptor>,
    ) -> Result<TextureView, ClientError> {
        let client = self.0.client()?;
        let texture = client.get_wire_id(self)?;
        let base = client.create_object(ObjectType::TextureView, ObjectState::Plain, |result| {
            Command::TextureCreateView {
                texture,
                result,
                descriptor: descriptor.cloned(),
            }
        })?;
        Ok(TextureView::from_base(base))
    }
}
