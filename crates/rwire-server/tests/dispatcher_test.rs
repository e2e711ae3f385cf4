//! Integration test: server dispatcher
//!
//! Drives `Server<NullProcs>` with hand-encoded commands (no client) and
//! checks fatal id handling, error-object propagation, and the return
//! commands produced from backend completions.
//!
//! Run with: cargo test -p rwire-server --test dispatcher_test

use std::cell::RefCell;
use std::rc::Rc;

use rwire_core::WireConfig;
use rwire_protocol::descriptors::{
    BindGroupDescriptor, BindGroupEntry, BindGroupLayoutDescriptor, BufferDescriptor,
    ChainedStruct, ComputePipelineDescriptor, ProgrammableStage, ShaderModuleDescriptor,
};
use rwire_protocol::types::{
    BufferUsage, CreatePipelineAsyncStatus, ErrorFilter, ErrorType, LoggingType, MapAsyncStatus,
    MapMode, PopErrorScopeStatus,
};
use rwire_protocol::{
    Command, ObjectHandle, ObjectIdResolver, ObjectType, Resolved, ReturnCommand, WireError,
};
use rwire_server::{NullProcs, Server, DEVICE_HANDLE};
use rwire_transport::{CommandHandler, SharedHandler, TerribleCommandBuffer};

/// Collects every return command the server sends.
#[derive(Default)]
struct ReplyLog {
    replies: Rc<RefCell<Vec<ReturnCommand>>>,
}

impl CommandHandler for ReplyLog {
    fn handle_commands(&mut self, mut data: &[u8]) -> bool {
        while !data.is_empty() {
            match ReturnCommand::deserialize(data) {
                Ok((reply, used)) => {
                    self.replies.borrow_mut().push(reply);
                    data = &data[used..];
                }
                Err(err) => panic!("server sent a malformed reply: {}", err),
            }
        }
        true
    }
}

struct Harness {
    server: Server<NullProcs>,
    replies: Rc<RefCell<Vec<ReturnCommand>>>,
}

impl Harness {
    fn new(procs: NullProcs) -> Self {
        rwire_common::init_test_logging();
        let log = ReplyLog::default();
        let replies = log.replies.clone();
        let serializer = TerribleCommandBuffer::with_handler(64 * 1024, SharedHandler::new(log));
        let server = Server::new(procs, Box::new(serializer), &WireConfig::default())
            .expect("server starts");
        let mut harness = Self { server, replies };
        harness.take_replies();
        harness
    }

    fn send(&mut self, commands: &[Command]) -> bool {
        let mut bytes = Vec::new();
        for command in commands {
            let start = bytes.len();
            bytes.resize(start + command.encoded_size(), 0);
            command.serialize(&mut bytes[start..]).expect("command encodes");
        }
        self.server.handle_commands(&bytes)
    }

    fn take_replies(&mut self) -> Vec<ReturnCommand> {
        assert!(self.server.flush());
        self.replies.borrow_mut().drain(..).collect()
    }
}

fn buffer_descriptor(usage: BufferUsage, size: u64) -> BufferDescriptor {
    BufferDescriptor {
        label: None,
        usage,
        size,
        mapped_at_creation: false,
    }
}

fn create_buffer(id: u32, usage: BufferUsage, size: u64) -> Command {
    Command::DeviceCreateBuffer {
        device: DEVICE_HANDLE.id,
        result: ObjectHandle::new(id, 0),
        descriptor: buffer_descriptor(usage, size),
    }
}

fn get_queue(id: u32) -> Command {
    Command::DeviceGetQueue {
        device: DEVICE_HANDLE.id,
        result: ObjectHandle::new(id, 0),
    }
}

fn compute_pipeline_async(serial: u64, id: u32, module: u32) -> Command {
    Command::DeviceCreateComputePipelineAsync {
        device: DEVICE_HANDLE.id,
        request_serial: serial,
        result: ObjectHandle::new(id, 0),
        descriptor: ComputePipelineDescriptor {
            label: None,
            layout: 0,
            compute: ProgrammableStage {
                module,
                entry_point: Some("main".to_string()),
                constants: Vec::new(),
            },
        },
    }
}

fn wgsl_module(id: u32, code: &str) -> Command {
    Command::DeviceCreateShaderModule {
        device: DEVICE_HANDLE.id,
        result: ObjectHandle::new(id, 0),
        descriptor: ShaderModuleDescriptor {
            label: None,
            chain: vec![ChainedStruct::ShaderSourceWgsl {
                code: code.to_string(),
            }],
        },
    }
}

#[test]
fn test_device_info_sent_on_start() {
    let log = ReplyLog::default();
    let replies = log.replies.clone();
    let serializer = TerribleCommandBuffer::with_handler(4096, SharedHandler::new(log));
    let mut server = Server::new(NullProcs::new(), Box::new(serializer), &WireConfig::default())
        .expect("server starts");
    assert!(server.flush());

    let replies = replies.borrow();
    assert_eq!(replies.len(), 1);
    match &replies[0] {
        ReturnCommand::DeviceInfo { device, limits, .. } => {
            assert_eq!(*device, DEVICE_HANDLE);
            assert_eq!(limits.max_bind_groups, 4);
        }
        other => panic!("expected DeviceInfo, got {:?}", other),
    }
    assert_eq!(server.registry().live_count(ObjectType::Device), 1);
}

#[test]
fn test_unknown_device_id_is_fatal() {
    let mut h = Harness::new(NullProcs::new());

    let ok = h.send(&[Command::DeviceCreateBuffer {
        device: 9,
        result: ObjectHandle::new(1, 0),
        descriptor: buffer_descriptor(BufferUsage::COPY_DST, 16),
    }]);
    assert!(!ok);
    assert!(h.server.is_fatal());
    assert_eq!(h.server.procs().call_count("device_create_buffer"), 0);

    // Everything after a fatal error is refused.
    assert!(!h.send(&[Command::DeviceTick { device: 1 }]));
    assert_eq!(h.server.procs().call_count("device_tick"), 0);
}

#[test]
fn test_reusing_live_id_is_fatal() {
    let mut h = Harness::new(NullProcs::new());

    assert!(h.send(&[create_buffer(1, BufferUsage::COPY_DST, 16)]));
    assert!(!h.send(&[create_buffer(1, BufferUsage::COPY_DST, 16)]));
    assert_eq!(h.server.procs().call_count("device_create_buffer"), 1);
}

#[test]
fn test_use_after_destroy_is_fatal() {
    let mut h = Harness::new(NullProcs::new());

    assert!(h.send(&[
        create_buffer(1, BufferUsage::COPY_DST, 16),
        Command::DestroyObject {
            object_type: ObjectType::Buffer,
            object_id: 1,
        },
    ]));
    assert_eq!(h.server.procs().call_count("release"), 1);
    assert_eq!(h.server.registry().live_count(ObjectType::Buffer), 0);

    assert!(!h.send(&[Command::BufferUnmap { buffer: 1 }]));
    assert!(h.server.is_fatal());
}

#[test]
fn test_reallocating_freed_id_with_next_generation() {
    let mut h = Harness::new(NullProcs::new());

    assert!(h.send(&[
        create_buffer(1, BufferUsage::COPY_DST, 16),
        Command::DestroyObject {
            object_type: ObjectType::Buffer,
            object_id: 1,
        },
        Command::DeviceCreateBuffer {
            device: DEVICE_HANDLE.id,
            result: ObjectHandle::new(1, 1),
            descriptor: buffer_descriptor(BufferUsage::COPY_DST, 32),
        },
    ]));
    assert_eq!(
        h.server.registry().table(ObjectType::Buffer).handle_of(1),
        Some(ObjectHandle::new(1, 1))
    );
}

#[test]
fn test_malformed_command_is_fatal() {
    let mut h = Harness::new(NullProcs::new());

    let mut bytes = vec![0u8; 8];
    bytes[..4].copy_from_slice(&8u32.to_le_bytes());
    bytes[4..].copy_from_slice(&999u32.to_le_bytes());
    assert!(!h.server.handle_commands(&bytes));
    assert!(h.server.is_fatal());
}

#[test]
fn test_out_of_memory_buffer_becomes_error_object() {
    let mut h = Harness::new(NullProcs::new());

    assert!(h.send(&[create_buffer(1, BufferUsage::COPY_DST, u64::MAX / 2)]));
    assert_eq!(
        h.server.registry().get_from_id(ObjectType::Buffer, 1),
        Ok(Resolved::Error)
    );

    let replies = h.take_replies();
    match replies.as_slice() {
        [ReturnCommand::DeviceUncapturedError { error_type, .. }] => {
            assert_eq!(*error_type, ErrorType::OutOfMemory);
        }
        other => panic!("expected one uncaptured error, got {:?}", other),
    }
}

#[test]
fn test_error_object_poisons_dependent_commands() {
    let mut h = Harness::new(NullProcs::new());

    assert!(h.send(&[
        create_buffer(1, BufferUsage::COPY_DST, u64::MAX / 2),
        get_queue(1),
        Command::QueueWriteBuffer {
            queue: 1,
            buffer: 1,
            buffer_offset: 0,
            data: vec![0; 4],
        },
        Command::DeviceCreateBindGroupLayout {
            device: DEVICE_HANDLE.id,
            result: ObjectHandle::new(1, 0),
            descriptor: BindGroupLayoutDescriptor {
                label: None,
                entries: Vec::new(),
            },
        },
        Command::DeviceCreateBindGroup {
            device: DEVICE_HANDLE.id,
            result: ObjectHandle::new(1, 0),
            descriptor: BindGroupDescriptor {
                label: None,
                layout: 1,
                entries: vec![BindGroupEntry {
                    binding: 0,
                    buffer: 1,
                    offset: 0,
                    size: 4,
                    sampler: 0,
                    texture_view: 0,
                }],
            },
        },
    ]));
    assert!(!h.server.is_fatal());

    let procs = h.server.procs();
    assert_eq!(procs.call_count("queue_write_buffer"), 0);
    assert_eq!(procs.call_count("device_create_bind_group"), 0);
    assert_eq!(
        h.server.registry().get_from_id(ObjectType::BindGroup, 1),
        Ok(Resolved::Error)
    );

    // OOM from creation, then a validation error for the skipped write.
    let errors: Vec<ErrorType> = h
        .take_replies()
        .into_iter()
        .map(|reply| match reply {
            ReturnCommand::DeviceUncapturedError { error_type, .. } => error_type,
            other => panic!("expected DeviceUncapturedError, got {:?}", other),
        })
        .collect();
    assert_eq!(errors, vec![ErrorType::OutOfMemory, ErrorType::Validation]);
}

#[test]
fn test_map_error_buffer_replies_validation_error() {
    let mut h = Harness::new(NullProcs::new());

    assert!(h.send(&[
        create_buffer(1, BufferUsage::MAP_READ | BufferUsage::COPY_DST, u64::MAX / 2),
        Command::BufferMapAsync {
            buffer: 1,
            request_serial: 7,
            mode: MapMode::READ,
            offset: 0,
            size: 16,
        },
    ]));
    assert_eq!(h.server.procs().call_count("buffer_map_async"), 0);

    let reply = h.take_replies().pop();
    match reply {
        Some(ReturnCommand::BufferMapAsyncCallback {
            request_serial,
            status,
            read_data,
            ..
        }) => {
            assert_eq!(request_serial, 7);
            assert_eq!(status, MapAsyncStatus::ValidationError);
            assert_eq!(read_data, None);
        }
        other => panic!("expected BufferMapAsyncCallback, got {:?}", other),
    }
}

#[test]
fn test_map_read_carries_buffer_contents() {
    let mut h = Harness::new(NullProcs::new());
    let data: Vec<u8> = (1..=8).collect();

    assert!(h.send(&[
        create_buffer(1, BufferUsage::MAP_READ | BufferUsage::COPY_DST, 8),
        get_queue(1),
        Command::QueueWriteBuffer {
            queue: 1,
            buffer: 1,
            buffer_offset: 0,
            data: data.clone(),
        },
        Command::BufferMapAsync {
            buffer: 1,
            request_serial: 1,
            mode: MapMode::READ,
            offset: 0,
            size: 8,
        },
    ]));

    match h.take_replies().as_slice() {
        [ReturnCommand::BufferMapAsyncCallback {
            buffer,
            status,
            read_data,
            ..
        }] => {
            assert_eq!(*buffer, ObjectHandle::new(1, 0));
            assert_eq!(*status, MapAsyncStatus::Success);
            assert_eq!(read_data.as_deref(), Some(data.as_slice()));
        }
        other => panic!("expected one map callback, got {:?}", other),
    }
}

#[test]
fn test_oversized_read_map_is_rejected() {
    let mut h = Harness::new(NullProcs::new());

    // Larger than the 64 KiB reply transport.
    assert!(h.send(&[
        create_buffer(1, BufferUsage::MAP_READ | BufferUsage::COPY_DST, 1 << 20),
        Command::BufferMapAsync {
            buffer: 1,
            request_serial: 1,
            mode: MapMode::READ,
            offset: 0,
            size: 1 << 20,
        },
    ]));
    assert_eq!(h.server.procs().call_count("buffer_map_async"), 0);
    match h.take_replies().as_slice() {
        [ReturnCommand::BufferMapAsyncCallback { status, .. }] => {
            assert_eq!(*status, MapAsyncStatus::ValidationError);
        }
        other => panic!("expected one map callback, got {:?}", other),
    }
}

#[test]
fn test_deferred_async_pipeline_completes_on_tick() {
    let mut h = Harness::new(NullProcs::with_deferred_callbacks());

    assert!(h.send(&[
        wgsl_module(1, "@compute @workgroup_size(1) fn main() {}"),
        compute_pipeline_async(1, 1, 1),
    ]));
    assert!(h.take_replies().is_empty());

    // Reserved ids cannot be used until the creation completes.
    assert_eq!(
        h.server.registry().get_from_id(ObjectType::ComputePipeline, 1),
        Err(WireError::InvalidObject {
            object_type: ObjectType::ComputePipeline,
            id: 1,
        })
    );

    assert!(h.send(&[Command::DeviceTick { device: 1 }]));
    match h.take_replies().as_slice() {
        [ReturnCommand::DeviceCreateComputePipelineAsyncCallback {
            request_serial,
            status,
            ..
        }] => {
            assert_eq!(*request_serial, 1);
            assert_eq!(*status, CreatePipelineAsyncStatus::Success);
        }
        other => panic!("expected one pipeline callback, got {:?}", other),
    }
    match h.server.registry().get_from_id(ObjectType::ComputePipeline, 1) {
        Ok(Resolved::Object(_)) => {}
        other => panic!("expected a live pipeline, got {:?}", other),
    }
}

#[test]
fn test_failed_async_pipeline_becomes_error_object() {
    let mut h = Harness::new(NullProcs::new());

    assert!(h.send(&[wgsl_module(1, "  "), compute_pipeline_async(4, 1, 1)]));
    let replies = h.take_replies();
    match replies.last() {
        Some(ReturnCommand::DeviceCreateComputePipelineAsyncCallback { status, .. }) => {
            assert_eq!(*status, CreatePipelineAsyncStatus::ValidationError);
        }
        other => panic!("expected a pipeline callback, got {:?}", other),
    }
    assert_eq!(
        h.server.registry().get_from_id(ObjectType::ComputePipeline, 1),
        Ok(Resolved::Error)
    );
}

#[test]
fn test_pipeline_released_before_completion() {
    let mut h = Harness::new(NullProcs::with_deferred_callbacks());

    assert!(h.send(&[
        wgsl_module(1, "@compute @workgroup_size(1) fn main() {}"),
        compute_pipeline_async(1, 1, 1),
        Command::DestroyObject {
            object_type: ObjectType::ComputePipeline,
            object_id: 1,
        },
        Command::DeviceTick { device: 1 },
    ]));

    // The reply still goes out; the late backend object is released.
    assert_eq!(h.take_replies().len(), 1);
    assert_eq!(h.server.procs().call_count("release"), 1);
    assert_eq!(h.server.registry().live_count(ObjectType::ComputePipeline), 0);
}

#[test]
fn test_error_scope_captures_validation_error() {
    let mut h = Harness::new(NullProcs::new());

    assert!(h.send(&[
        Command::DevicePushErrorScope {
            device: 1,
            filter: ErrorFilter::VALIDATION,
        },
        create_buffer(1, BufferUsage::MAP_READ | BufferUsage::MAP_WRITE, 16),
        Command::DevicePopErrorScope {
            device: 1,
            request_serial: 3,
        },
    ]));

    match h.take_replies().as_slice() {
        [ReturnCommand::DevicePopErrorScopeCallback {
            request_serial,
            status,
            error_type,
            ..
        }] => {
            assert_eq!(*request_serial, 3);
            assert_eq!(*status, PopErrorScopeStatus::Success);
            assert_eq!(*error_type, ErrorType::Validation);
        }
        other => panic!("expected only the pop callback, got {:?}", other),
    }
}

#[test]
fn test_device_destroy_reports_device_lost() {
    let mut h = Harness::new(NullProcs::new());

    assert!(h.send(&[Command::DeviceDestroy { device: 1 }]));
    match h.take_replies().as_slice() {
        [ReturnCommand::DeviceLost { device, .. }] => assert_eq!(*device, DEVICE_HANDLE),
        other => panic!("expected DeviceLost, got {:?}", other),
    }
}

#[test]
fn test_create_error_buffer_is_silent_and_invalid() {
    let mut h = Harness::new(NullProcs::new());

    assert!(h.send(&[
        Command::DeviceCreateErrorBuffer {
            device: DEVICE_HANDLE.id,
            result: ObjectHandle::new(1, 0),
            descriptor: buffer_descriptor(BufferUsage::MAP_READ, 16),
        },
        Command::BufferMapAsync {
            buffer: 1,
            request_serial: 3,
            mode: MapMode::READ,
            offset: 0,
            size: 16,
        },
    ]));
    assert_eq!(h.server.procs().call_count("device_create_error_buffer"), 1);
    match h.server.registry().get_from_id(ObjectType::Buffer, 1) {
        Ok(Resolved::Object(native)) => assert!(!h.server.procs().is_valid(native)),
        other => panic!("expected a backend buffer, got {:?}", other),
    }

    // Creation raises nothing; only the map is refused.
    match h.take_replies().as_slice() {
        [ReturnCommand::BufferMapAsyncCallback {
            request_serial: 3,
            status: MapAsyncStatus::ValidationError,
            ..
        }] => {}
        other => panic!("expected one refused map, got {:?}", other),
    }
    assert!(!h.server.is_fatal());
}

#[test]
fn test_backend_log_becomes_device_logging() {
    let mut h = Harness::new(NullProcs::new());
    assert_eq!(h.server.procs().call_count("device_set_logging_callback"), 1);

    let device = h.server.device_native();
    h.server
        .procs_mut()
        .emit_log(device, LoggingType::Error, "shader compilation failed");
    h.server.drain_completions().expect("drain completions");

    match h.take_replies().as_slice() {
        [ReturnCommand::DeviceLogging {
            device,
            logging_type: LoggingType::Error,
            message,
        }] => {
            assert_eq!(*device, DEVICE_HANDLE);
            assert_eq!(message, "shader compilation failed");
        }
        other => panic!("expected one DeviceLogging, got {:?}", other),
    }
}
