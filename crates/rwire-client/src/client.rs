use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, error, info, trace, warn};

use rwire_core::{ObjectAllocator, RequestTracker, Resolution};
use rwire_protocol::types::{
    BufferUsage, CreatePipelineAsyncStatus, DeviceLostReason, FeatureName, Limits,
    MapAsyncStatus, MapMode,
};
use rwire_protocol::{
    Command, ConnectionId, ObjectHandle, ObjectId, ObjectIdProvider, ObjectType, ReturnCommand,
    WireObject,
};
use rwire_transport::{CommandHandler, CommandSerializer};

use crate::error::ClientError;
use crate::objects::{Device, ObjectBase, Queue, Texture};
use crate::requests::{
    DeviceLostCallback, LocalResolution, LoggingCallback, PendingRequest,
    UncapturedErrorCallback,
};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct DeviceState {
    pub(crate) limits: Limits,
    pub(crate) features: Vec<FeatureName>,
    pub(crate) lost: bool,
    pub(crate) lost_callback: Option<DeviceLostCallback>,
    pub(crate) uncaptured_callback: Option<Rc<RefCell<UncapturedErrorCallback>>>,
    pub(crate) logging_callback: Option<Rc<RefCell<LoggingCallback>>>,
    /// Created by the first `get_queue`; later calls share it.
    pub(crate) queue: Option<Queue>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            features: Vec::new(),
            lost: false,
            lost_callback: None,
            uncaptured_callback: None,
            logging_callback: None,
            queue: None,
        }
    }
}

pub(crate) enum MapState {
    Unmapped,
    Pending {
        serial: u64,
        offset: u64,
        size: u64,
    },
    /// `data` is a copy of the server's bytes for read maps and a
    /// zero-initialised shadow for write maps.
    Mapped {
        mode: MapMode,
        offset: u64,
        data: Vec<u8>,
    },
}

pub(crate) struct BufferState {
    pub(crate) device: ObjectId,
    pub(crate) size: u64,
    pub(crate) usage: BufferUsage,
    pub(crate) map: MapState,
    pub(crate) destroyed: bool,
}

/// Client bookkeeping for one live object.
pub(crate) enum ObjectState {
    Device(DeviceState),
    Buffer(BufferState),
    Plain,
}

pub(crate) struct ClientState {
    objects: Vec<ObjectAllocator<ObjectState>>,
    pub(crate) requests: RequestTracker<PendingRequest>,
}

impl ClientState {
    fn new() -> Self {
        Self {
            objects: ObjectType::ALL.iter().map(|_| ObjectAllocator::new()).collect(),
            requests: RequestTracker::new(),
        }
    }

    pub(crate) fn allocator(&self, object_type: ObjectType) -> &ObjectAllocator<ObjectState> {
        &self.objects[object_type.index()]
    }

    pub(crate) fn allocator_mut(
        &mut self,
        object_type: ObjectType,
    ) -> &mut ObjectAllocator<ObjectState> {
        &mut self.objects[object_type.index()]
    }

    pub(crate) fn device(&self, id: ObjectId) -> Option<&DeviceState> {
        match self.allocator(ObjectType::Device).get(id)? {
            ObjectState::Device(device) => Some(device),
            _ => None,
        }
    }

    pub(crate) fn device_mut(&mut self, id: ObjectId) -> Option<&mut DeviceState> {
        match self.allocator_mut(ObjectType::Device).get_mut(id)? {
            ObjectState::Device(device) => Some(device),
            _ => None,
        }
    }

    /// Device addressed by a return command; stale generations miss.
    fn device_by_handle_mut(&mut self, handle: ObjectHandle) -> Option<&mut DeviceState> {
        if self.allocator(ObjectType::Device).generation(handle.id) != Some(handle.generation) {
            return None;
        }
        self.device_mut(handle.id)
    }

    pub(crate) fn buffer(&self, id: ObjectId) -> Option<&BufferState> {
        match self.allocator(ObjectType::Buffer).get(id)? {
            ObjectState::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub(crate) fn buffer_mut(&mut self, id: ObjectId) -> Option<&mut BufferState> {
        match self.allocator_mut(ObjectType::Buffer).get_mut(id)? {
            ObjectState::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    /// Track a request under a fresh serial. A map request also marks its
    /// buffer pending.
    pub(crate) fn track_request(&mut self, entry: PendingRequest) -> u64 {
        let range = entry.map_range();
        let serial = self.requests.track(entry);
        if let Some((handle, offset, size)) = range {
            if let Some(buffer) = self.buffer_mut(handle.id) {
                buffer.map = MapState::Pending {
                    serial,
                    offset,
                    size,
                };
            }
        }
        serial
    }

    /// Withdraw a request whose command was never sent.
    pub(crate) fn cancel_request(&mut self, serial: u64) -> Option<PendingRequest> {
        let entry = self.requests.cancel(serial)?;
        self.clear_pending_map(serial, &entry);
        Some(entry)
    }

    /// Remove the pending requests matching `pred`, in serial order, and
    /// put the buffers of removed map requests back to unmapped.
    pub(crate) fn take_requests(
        &mut self,
        expect_reply: bool,
        pred: impl FnMut(&PendingRequest) -> bool,
    ) -> Vec<(u64, PendingRequest)> {
        let taken = self.requests.take_where(expect_reply, pred);
        for (serial, entry) in &taken {
            self.clear_pending_map(*serial, entry);
        }
        taken
    }

    fn clear_pending_map(&mut self, serial: u64, entry: &PendingRequest) {
        let Some(handle) = entry.mapped_buffer() else {
            return;
        };
        if let Some(buffer) = self.buffer_mut(handle.id) {
            if matches!(buffer.map, MapState::Pending { serial: s, .. } if s == serial) {
                buffer.map = MapState::Unmapped;
            }
        }
    }
}

/// Shared state of one client connection.
pub(crate) struct ClientInner {
    id: ConnectionId,
    this: Weak<ClientInner>,
    device: Device,
    serializer: RefCell<Box<dyn CommandSerializer>>,
    pub(crate) state: RefCell<ClientState>,
    disconnected: Cell<bool>,
    /// Set while the serializer is borrowed.
    busy: Cell<bool>,
    /// Set while return commands are being applied.
    processing: Cell<bool>,
    /// Return-command bytes that arrived while busy or processing.
    inbound: RefCell<VecDeque<Vec<u8>>>,
}

impl ObjectIdProvider for ClientInner {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }
}

impl ClientInner {
    pub(crate) fn is_disconnected(&self) -> bool {
        self.disconnected.get()
    }

    /// Id of the connection's device. Queues and buffers all belong to it.
    pub(crate) fn device_id(&self) -> ObjectId {
        self.device.handle().id
    }

    pub(crate) fn check_connected(&self) -> Result<(), ClientError> {
        if self.disconnected.get() {
            return Err(ClientError::Disconnected);
        }
        Ok(())
    }

    pub(crate) fn get_wire_id(&self, object: &dyn WireObject) -> Result<ObjectId, ClientError> {
        Ok(self.get_id(object)?)
    }

    pub(crate) fn get_optional_wire_id(
        &self,
        object: Option<&dyn WireObject>,
    ) -> Result<ObjectId, ClientError> {
        Ok(self.get_optional_id(object)?)
    }

    fn base(&self, object_type: ObjectType, handle: ObjectHandle) -> ObjectBase {
        ObjectBase::new(self.this.clone(), self.id, object_type, handle)
    }

    fn with_serializer<R>(&self, f: impl FnOnce(&mut dyn CommandSerializer) -> R) -> R {
        let result = {
            let mut serializer = self.serializer.borrow_mut();
            self.busy.set(true);
            let result = f(serializer.as_mut());
            self.busy.set(false);
            result
        };
        self.drain_inbound();
        result
    }

    /// Encode one command. Nothing is written if it does not fit.
    pub(crate) fn encode(&self, command: &Command) -> Result<(), ClientError> {
        self.check_connected()?;
        let name = command.name();
        let size = command.encoded_size();
        let outcome = self.with_serializer(|serializer| {
            if size > serializer.maximum_allocation_size() {
                return Err(ClientError::CommandTooLarge {
                    command: name,
                    size,
                });
            }
            let Some(space) = serializer.get_cmd_space(size) else {
                return Err(ClientError::Disconnected);
            };
            command.serialize(space)?;
            Ok(())
        });
        match &outcome {
            Ok(()) => trace!(command = name, size, "encoded command"),
            Err(ClientError::Disconnected) => {
                error!(command = name, "transport failed, disconnecting");
                self.disconnect();
            }
            Err(err) => warn!(command = name, "command not sent: {}", err),
        }
        outcome
    }

    /// Allocate an id without sending anything.
    pub(crate) fn reserve_object(
        &self,
        object_type: ObjectType,
        state: ObjectState,
    ) -> Result<ObjectBase, ClientError> {
        self.check_connected()?;
        let handle = self
            .state
            .borrow_mut()
            .allocator_mut(object_type)
            .new_object(|_| state);
        Ok(self.base(object_type, handle))
    }

    /// Allocate the result id, then encode the creating command. The id is
    /// freed again if encoding fails.
    pub(crate) fn create_object(
        &self,
        object_type: ObjectType,
        state: ObjectState,
        build: impl FnOnce(ObjectHandle) -> Command,
    ) -> Result<ObjectBase, ClientError> {
        let base = self.reserve_object(object_type, state)?;
        if let Err(err) = self.encode(&build(base.handle())) {
            base.mark_unsent();
            return Err(err);
        }
        debug!(?object_type, handle = %base.handle(), "created object");
        Ok(base)
    }

    /// Track `entry`, then encode the command carrying its serial.
    ///
    /// The entry is registered before anything is written, so its callback
    /// runs exactly once whatever happens to the command: a transport
    /// failure resolves it as disconnected, any other encode failure as
    /// not sent.
    pub(crate) fn send_request(
        &self,
        entry: PendingRequest,
        build: impl FnOnce(u64) -> Command,
    ) -> Result<u64, ClientError> {
        if let Err(err) = self.check_connected() {
            entry.resolve_locally(LocalResolution::Disconnected);
            return Err(err);
        }
        let kind = entry.kind();
        let serial = self.state.borrow_mut().track_request(entry);
        if let Err(err) = self.encode(&build(serial)) {
            let unsent = self.state.borrow_mut().cancel_request(serial);
            if let Some(entry) = unsent {
                debug!(serial, kind, "request not sent: {}", err);
                entry.resolve_locally(LocalResolution::NotSent);
            }
            return Err(err);
        }
        trace!(serial, kind, "request sent");
        Ok(serial)
    }

    /// Last reference to an object went away. `announced` is false when the
    /// server never heard of the object.
    pub(crate) fn release(&self, object_type: ObjectType, handle: ObjectHandle, announced: bool) {
        let disconnected = self.disconnected.get();
        let (taken, freed) = {
            let mut state = self.state.borrow_mut();
            let taken = if object_type == ObjectType::Buffer {
                state.take_requests(!disconnected, |entry| entry.mapped_buffer() == Some(handle))
            } else {
                Vec::new()
            };
            let freed = state.allocator_mut(object_type).free(handle.id);
            (taken, freed)
        };
        drop(freed);

        if !disconnected && announced {
            let command = Command::DestroyObject {
                object_type,
                object_id: handle.id,
            };
            if let Err(err) = self.encode(&command) {
                warn!(?object_type, %handle, "could not release object: {}", err);
            }
        }
        for (serial, entry) in taken {
            debug!(serial, %handle, "map resolved by buffer release");
            entry.resolve_locally(LocalResolution::DestroyedBeforeCallback);
        }
    }

    /// Mark a device lost and resolve everything still pending on it.
    pub(crate) fn lose_device(
        &self,
        device: ObjectHandle,
        reason: DeviceLostReason,
        message: String,
    ) {
        let (taken, callback) = {
            let mut state = self.state.borrow_mut();
            let Some(device_state) = state.device_by_handle_mut(device) else {
                debug!(%device, "device lost for a released device");
                return;
            };
            if device_state.lost {
                return;
            }
            device_state.lost = true;
            let callback = device_state.lost_callback.take();
            let taken = state.take_requests(true, |entry| entry.device() == device.id);
            (taken, callback)
        };
        info!(%device, ?reason, %message, "device lost");
        for (_, entry) in taken {
            entry.resolve_locally(LocalResolution::DeviceLost);
        }
        if let Some(callback) = callback {
            callback(reason, message);
        }
    }

    /// Stop using the transport and resolve every pending request, in
    /// serial order, with its disconnected status.
    pub(crate) fn disconnect(&self) {
        if self.disconnected.replace(true) {
            return;
        }
        let (pending, lost_callbacks) = {
            let mut state = self.state.borrow_mut();
            let pending = state.take_requests(false, |_| true);
            let devices = state.allocator_mut(ObjectType::Device);
            let ids: Vec<ObjectId> = devices.iter().map(|(handle, _)| handle.id).collect();
            let mut lost_callbacks = Vec::new();
            for id in ids {
                if let Some(ObjectState::Device(device)) = devices.get_mut(id) {
                    if !device.lost {
                        device.lost = true;
                        lost_callbacks.extend(device.lost_callback.take());
                    }
                }
            }
            (pending, lost_callbacks)
        };
        info!(
            connection = self.id,
            pending = pending.len(),
            "client disconnected"
        );
        for (serial, entry) in pending {
            debug!(serial, kind = entry.kind(), "resolving request on disconnect");
            entry.resolve_locally(LocalResolution::Disconnected);
        }
        for callback in lost_callbacks {
            callback(DeviceLostReason::Disconnected, "connection lost".to_string());
        }
        self.inbound.borrow_mut().clear();
    }

    fn flush(&self) -> Result<(), ClientError> {
        self.check_connected()?;
        if !self.with_serializer(|serializer| serializer.flush()) {
            error!(connection = self.id, "flush failed, disconnecting");
            self.disconnect();
            return Err(ClientError::Disconnected);
        }
        Ok(())
    }

    fn receive(&self, data: &[u8]) -> bool {
        if self.disconnected.get() {
            return false;
        }
        self.inbound.borrow_mut().push_back(data.to_vec());
        self.drain_inbound();
        !self.disconnected.get()
    }

    /// Apply queued return commands unless an outer frame is busy with the
    /// serializer or already applying.
    fn drain_inbound(&self) {
        if self.busy.get() || self.processing.get() {
            return;
        }
        self.processing.set(true);
        loop {
            let Some(data) = self.inbound.borrow_mut().pop_front() else {
                break;
            };
            if !self.process(&data) {
                break;
            }
        }
        self.processing.set(false);
    }

    fn process(&self, mut data: &[u8]) -> bool {
        while !data.is_empty() {
            if self.disconnected.get() {
                return false;
            }
            let (reply, used) = match ReturnCommand::deserialize(data) {
                Ok(decoded) => decoded,
                Err(err) => {
                    error!(connection = self.id, "malformed return command: {}", err);
                    self.disconnect();
                    return false;
                }
            };
            data = &data[used..];

            let name = reply.name();
            debug!(command = name, "handling return command");
            if let Err(err) = self.apply(reply) {
                error!(connection = self.id, command = name, "fatal return command: {}", err);
                self.disconnect();
                return false;
            }
        }
        true
    }

    /// Consume the reply for `serial`. `None` means it belonged to a request
    /// that was already resolved locally.
    fn take_reply(
        &self,
        command: &'static str,
        serial: u64,
    ) -> Result<Option<PendingRequest>, ClientError> {
        let resolution = self.state.borrow_mut().requests.resolve_reply(serial);
        match resolution {
            Resolution::Pending(entry) => Ok(Some(entry)),
            Resolution::Orphan => {
                warn!(command, serial, "dropping reply for a request resolved locally");
                Ok(None)
            }
            Resolution::Unknown => Err(ClientError::UnknownSerial { command, serial }),
        }
    }

    fn apply(&self, reply: ReturnCommand) -> Result<(), ClientError> {
        const MAP: &str = "BufferMapAsyncCallback";

        match reply {
            ReturnCommand::DeviceInfo {
                device,
                limits,
                features,
            } => {
                let mut state = self.state.borrow_mut();
                match state.device_by_handle_mut(device) {
                    Some(device_state) => {
                        device_state.limits = limits;
                        device_state.features = features;
                    }
                    None => debug!(%device, "device info for a released device"),
                }
                Ok(())
            }

            ReturnCommand::DeviceUncapturedError {
                device,
                error_type,
                message,
            } => {
                let callback = self
                    .state
                    .borrow_mut()
                    .device_by_handle_mut(device)
                    .filter(|d| !d.lost)
                    .and_then(|d| d.uncaptured_callback.clone());
                match callback {
                    Some(callback) => match callback.try_borrow_mut() {
                        Ok(mut callback) => (&mut *callback)(error_type, message),
                        Err(_) => warn!(%device, ?error_type, %message, "uncaptured error raised inside its own callback"),
                    },
                    None => warn!(%device, ?error_type, %message, "uncaptured device error"),
                }
                Ok(())
            }

            ReturnCommand::DeviceLogging {
                device,
                logging_type,
                message,
            } => {
                let callback = self
                    .state
                    .borrow_mut()
                    .device_by_handle_mut(device)
                    .and_then(|d| d.logging_callback.clone());
                match callback {
                    Some(callback) => match callback.try_borrow_mut() {
                        Ok(mut callback) => (&mut *callback)(logging_type, message),
                        Err(_) => debug!(%device, ?logging_type, %message, "log raised inside its own callback"),
                    },
                    None => debug!(%device, ?logging_type, %message, "device log"),
                }
                Ok(())
            }

            ReturnCommand::DeviceLost {
                device,
                reason,
                message,
            } => {
                self.lose_device(device, reason, message);
                Ok(())
            }

            ReturnCommand::BufferMapAsyncCallback {
                buffer,
                request_serial,
                status,
                message,
                read_data,
            } => {
                let Some(entry) = self.take_reply(MAP, request_serial)? else {
                    return Ok(());
                };
                let (expected, mode, callback) = match entry {
                    PendingRequest::Map {
                        buffer,
                        mode,
                        callback,
                        ..
                    } => (buffer, mode, callback),
                    other => return Err(mismatch(other, MAP, "serial belongs to another request kind")),
                };
                if expected != buffer {
                    callback(MapAsyncStatus::Disconnected, "protocol error".to_string());
                    return Err(ClientError::MalformedReply {
                        command: MAP,
                        reason: "reply names a different buffer",
                    });
                }

                let mut status = status;
                let mut message = message;
                {
                    let mut state = self.state.borrow_mut();
                    let pending = state.buffer(buffer.id).and_then(|b| match b.map {
                        MapState::Pending {
                            serial,
                            offset,
                            size,
                        } if serial == request_serial => Some((offset, size)),
                        _ => None,
                    });
                    let Some((offset, size)) = pending else {
                        drop(state);
                        callback(MapAsyncStatus::Disconnected, "protocol error".to_string());
                        return Err(ClientError::MalformedReply {
                            command: MAP,
                            reason: "buffer has no matching pending map",
                        });
                    };
                    let max_shadow = state
                        .buffer(buffer.id)
                        .and_then(|b| state.device(b.device))
                        .map_or(0, |d| d.limits.max_buffer_size);
                    let map = if status != MapAsyncStatus::Success {
                        MapState::Unmapped
                    } else if mode.contains(MapMode::READ) {
                        match read_data {
                            Some(data) if data.len() as u64 == size => {
                                MapState::Mapped { mode, offset, data }
                            }
                            _ => {
                                warn!(%buffer, request_serial, "read map reply without matching data");
                                status = MapAsyncStatus::Unknown;
                                message = "mapped data missing from reply".to_string();
                                MapState::Unmapped
                            }
                        }
                    } else if size > max_shadow {
                        warn!(%buffer, request_serial, size, "write map larger than any buffer");
                        status = MapAsyncStatus::Unknown;
                        message = "mapped range too large for a shadow".to_string();
                        MapState::Unmapped
                    } else {
                        MapState::Mapped {
                            mode,
                            offset,
                            data: vec![0; size as usize],
                        }
                    };
                    if let Some(b) = state.buffer_mut(buffer.id) {
                        b.map = map;
                    }
                }
                callback(status, message);
                Ok(())
            }

            ReturnCommand::DeviceCreateComputePipelineAsyncCallback {
                device,
                request_serial,
                status,
                message,
            } => {
                const NAME: &str = "DeviceCreateComputePipelineAsyncCallback";
                let Some(entry) = self.take_reply(NAME, request_serial)? else {
                    return Ok(());
                };
                let (expected, pipeline, callback) = match entry {
                    PendingRequest::CreateComputePipeline {
                        device,
                        pipeline,
                        callback,
                    } => (device, pipeline, callback),
                    other => return Err(mismatch(other, NAME, "serial belongs to another request kind")),
                };
                if expected != device.id {
                    drop(pipeline);
                    callback(CreatePipelineAsyncStatus::Disconnected, None, "protocol error".to_string());
                    return Err(ClientError::MalformedReply {
                        command: NAME,
                        reason: "reply names a different device",
                    });
                }
                if status == CreatePipelineAsyncStatus::Success {
                    callback(status, Some(pipeline), message);
                } else {
                    drop(pipeline);
                    callback(status, None, message);
                }
                Ok(())
            }

            ReturnCommand::DeviceCreateRenderPipelineAsyncCallback {
                device,
                request_serial,
                status,
                message,
            } => {
                const NAME: &str = "DeviceCreateRenderPipelineAsyncCallback";
                let Some(entry) = self.take_reply(NAME, request_serial)? else {
                    return Ok(());
                };
                let (expected, pipeline, callback) = match entry {
                    PendingRequest::CreateRenderPipeline {
                        device,
                        pipeline,
                        callback,
                    } => (device, pipeline, callback),
                    other => return Err(mismatch(other, NAME, "serial belongs to another request kind")),
                };
                if expected != device.id {
                    drop(pipeline);
                    callback(CreatePipelineAsyncStatus::Disconnected, None, "protocol error".to_string());
                    return Err(ClientError::MalformedReply {
                        command: NAME,
                        reason: "reply names a different device",
                    });
                }
                if status == CreatePipelineAsyncStatus::Success {
                    callback(status, Some(pipeline), message);
                } else {
                    drop(pipeline);
                    callback(status, None, message);
                }
                Ok(())
            }

            ReturnCommand::DevicePopErrorScopeCallback {
                request_serial,
                status,
                error_type,
                message,
                ..
            } => {
                const NAME: &str = "DevicePopErrorScopeCallback";
                let Some(entry) = self.take_reply(NAME, request_serial)? else {
                    return Ok(());
                };
                match entry {
                    PendingRequest::PopErrorScope { callback, .. } => {
                        callback(status, error_type, message);
                        Ok(())
                    }
                    other => Err(mismatch(other, NAME, "serial belongs to another request kind")),
                }
            }

            ReturnCommand::QueueWorkDoneCallback {
                queue,
                request_serial,
                status,
            } => {
                const NAME: &str = "QueueWorkDoneCallback";
                let Some(entry) = self.take_reply(NAME, request_serial)? else {
                    return Ok(());
                };
                match entry {
                    PendingRequest::QueueWorkDone {
                        queue: expected,
                        callback,
                        ..
                    } if expected == queue => {
                        callback(status);
                        Ok(())
                    }
                    other => Err(mismatch(other, NAME, "serial belongs to another request")),
                }
            }
        }
    }
}

/// A reply did not fit its pending request. The request still gets its
/// one callback before the connection goes down.
fn mismatch(entry: PendingRequest, command: &'static str, reason: &'static str) -> ClientError {
    entry.resolve_locally(LocalResolution::Disconnected);
    ClientError::MalformedReply { command, reason }
}

/// Client end of one wire connection. Cloning shares the connection.
#[derive(Clone)]
pub struct Client {
    inner: Rc<ClientInner>,
}

impl Client {
    /// Start a connection that encodes into `serializer`. The device is
    /// registered immediately; its limits and features arrive with the
    /// server's first reply.
    pub fn new(serializer: Box<dyn CommandSerializer>) -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let inner = Rc::new_cyclic(|this: &Weak<ClientInner>| {
            let mut state = ClientState::new();
            let device = state
                .allocator_mut(ObjectType::Device)
                .new_object(|_| ObjectState::Device(DeviceState::default()));
            ClientInner {
                id,
                this: this.clone(),
                device: Device::from_base(ObjectBase::new(
                    this.clone(),
                    id,
                    ObjectType::Device,
                    device,
                )),
                serializer: RefCell::new(serializer),
                state: RefCell::new(state),
                disconnected: Cell::new(false),
                busy: Cell::new(false),
                processing: Cell::new(false),
                inbound: RefCell::new(VecDeque::new()),
            }
        });
        info!(connection = id, "client connected");
        Self { inner }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn device(&self) -> Device {
        self.inner.device.clone()
    }

    /// Handler to register on the server → client transport.
    pub fn handler(&self) -> ClientHandler {
        ClientHandler {
            client: Rc::downgrade(&self.inner),
        }
    }

    /// Send everything encoded so far.
    pub fn flush(&self) -> Result<(), ClientError> {
        self.inner.flush()
    }

    /// Drop the connection: pending requests resolve with their
    /// disconnected status and further calls fail locally.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.is_disconnected()
    }

    /// Requests still waiting for a server reply.
    pub fn pending_requests(&self) -> usize {
        self.inner.state.borrow().requests.len()
    }

    pub fn live_objects(&self, object_type: ObjectType) -> usize {
        self.inner.state.borrow().allocator(object_type).live_count()
    }

    /// Reserve a texture handle without creating anything on the server.
    /// The embedder fills it server-side with `Server::inject_texture`
    /// before the handle is used or released.
    pub fn reserve_texture(&self) -> Result<Texture, ClientError> {
        let base = self
            .inner
            .reserve_object(ObjectType::Texture, ObjectState::Plain)?;
        debug!(handle = %base.handle(), "reserved texture");
        Ok(Texture::from_base(base))
    }
}

/// Receives return commands for a [`Client`]. Holds the client weakly.
pub struct ClientHandler {
    client: Weak<ClientInner>,
}

impl CommandHandler for ClientHandler {
    fn handle_commands(&mut self, data: &[u8]) -> bool {
        match self.client.upgrade() {
            Some(client) => client.receive(data),
            None => false,
        }
    }
}
