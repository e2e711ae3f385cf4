//! Integration test: asynchronous callbacks
//!
//! Every asynchronous request resolves exactly once: from the server's
//! reply, or locally when the device is lost or the connection drops.
//!
//! Run with: cargo test -p rwire-client --test async_callbacks_test

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{buffer_descriptor, recorder, Harness};
use rwire_client::{
    ClientError, ComputePipeline, ComputePipelineDescriptor, Device, ProgrammableStage,
    RenderPipelineDescriptor, ShaderModule,
};
use rwire_protocol::descriptors::{ChainedStruct, ShaderModuleDescriptor};
use rwire_protocol::types::{
    BufferUsage, CreatePipelineAsyncStatus, DeviceLostReason, ErrorFilter, ErrorType,
    LoggingType, MapAsyncStatus, MapMode, PopErrorScopeStatus, PrimitiveTopology,
    QueueWorkDoneStatus,
};
use rwire_protocol::ObjectType;
use rwire_server::NullProcs;
use rwire_transport::Deliver;

/// A command id the server does not know; delivering it is fatal.
const GARBAGE: [u8; 16] = [16, 0, 0, 0, 0xEE, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8];

fn wgsl(device: &Device, code: &str) -> ShaderModule {
    device
        .create_shader_module(&ShaderModuleDescriptor {
            label: None,
            chain: vec![ChainedStruct::ShaderSourceWgsl {
                code: code.to_string(),
            }],
        })
        .expect("shader module")
}

fn compute_async(
    device: &Device,
    module: &ShaderModule,
    log: &Rc<RefCell<Vec<(CreatePipelineAsyncStatus, Option<ComputePipeline>)>>>,
) -> Result<(), ClientError> {
    let log = log.clone();
    device.create_compute_pipeline_async(
        &ComputePipelineDescriptor {
            label: Some("async"),
            layout: None,
            compute: ProgrammableStage {
                module,
                entry_point: Some("main"),
                constants: &[],
            },
        },
        move |status, pipeline, _message| log.borrow_mut().push((status, pipeline)),
    )
}

fn compute_descriptor<'a>(module: &'a ShaderModule, label: Option<&'a str>) -> ComputePipelineDescriptor<'a> {
    ComputePipelineDescriptor {
        label,
        layout: None,
        compute: ProgrammableStage {
            module,
            entry_point: Some("main"),
            constants: &[],
        },
    }
}

fn render_descriptor(module: &ShaderModule) -> RenderPipelineDescriptor<'_> {
    RenderPipelineDescriptor {
        label: None,
        layout: None,
        vertex: ProgrammableStage {
            module,
            entry_point: Some("main"),
            constants: &[],
        },
        fragment: None,
        topology: PrimitiveTopology::TRIANGLE_LIST,
    }
}

/// Kill the server, then repeat `request` until a flush of the full client
/// buffer fails and disconnects the client. Returns the number of requests
/// made, the failing one included.
fn requests_until_transport_fails(
    h: &Harness,
    mut request: impl FnMut(usize) -> Result<(), ClientError>,
) -> usize {
    assert!(!h.server.deliver(&GARBAGE));
    assert!(h.server_is_fatal());
    for made in 1..=64 {
        let result = request(made - 1);
        if h.client.is_disconnected() {
            match result {
                Err(ClientError::Disconnected) => return made,
                other => panic!("expected Disconnected from the failing request, got {:?}", other),
            }
        }
        result.expect("request before the transport fails");
    }
    panic!("the client buffer never filled up");
}

#[test]
fn test_work_done_fires_once() {
    let h = Harness::new();
    let queue = h.device.get_queue().expect("queue");
    let log = recorder();
    let sink = log.clone();
    queue
        .on_submitted_work_done(move |status| sink.borrow_mut().push(status))
        .expect("work done");
    assert_eq!(h.client.pending_requests(), 1);

    h.flush();
    h.flush();
    assert_eq!(*log.borrow(), vec![QueueWorkDoneStatus::Success]);
    assert_eq!(h.client.pending_requests(), 0);
}

#[test]
fn test_compute_pipeline_async_success() {
    let h = Harness::new();
    let module = wgsl(&h.device, "@compute @workgroup_size(1) fn main() {}");
    let log = recorder();
    compute_async(&h.device, &module, &log).expect("create async");
    h.flush();

    let results = log.borrow();
    match results.as_slice() {
        [(CreatePipelineAsyncStatus::Success, Some(pipeline))] => {
            assert_eq!(pipeline.handle().generation, 0);
        }
        other => panic!("expected one successful pipeline, got {:?}", other),
    }
    assert_eq!(h.client.live_objects(ObjectType::ComputePipeline), 1);
}

#[test]
fn test_compute_pipeline_async_failure_releases_placeholder() {
    let h = Harness::new();
    let errors = recorder();
    let sink = errors.clone();
    h.device
        .set_uncaptured_error_callback(move |error_type, _| sink.borrow_mut().push(error_type));

    let module = wgsl(&h.device, "   ");
    let log = recorder();
    compute_async(&h.device, &module, &log).expect("create async");
    h.flush();

    match log.borrow().as_slice() {
        [(CreatePipelineAsyncStatus::ValidationError, None)] => {}
        other => panic!("expected a validation failure, got {:?}", other),
    }
    assert_eq!(*errors.borrow(), vec![ErrorType::Validation]);
    assert_eq!(h.client.live_objects(ObjectType::ComputePipeline), 0);
    h.flush();
    assert!(!h.server_is_fatal());
}

#[test]
fn test_error_scope_captures_injected_error() {
    let h = Harness::new();
    let log = recorder();
    let sink = log.clone();
    h.device
        .push_error_scope(ErrorFilter::VALIDATION)
        .expect("push scope");
    h.device
        .inject_error(ErrorType::Validation, "bad draw")
        .expect("inject");
    h.device
        .pop_error_scope(move |status, error_type, message| {
            sink.borrow_mut().push((status, error_type, message))
        })
        .expect("pop scope");
    h.flush();

    assert_eq!(
        *log.borrow(),
        vec![(
            PopErrorScopeStatus::Success,
            ErrorType::Validation,
            "bad draw".to_string()
        )]
    );
}

#[test]
fn test_uncaptured_error_reaches_callback() {
    let h = Harness::new();
    let log = recorder();
    let sink = log.clone();
    h.device
        .set_uncaptured_error_callback(move |error_type, message| {
            sink.borrow_mut().push((error_type, message))
        });
    h.device
        .inject_error(ErrorType::OutOfMemory, "no room")
        .expect("inject");
    h.flush();

    assert_eq!(
        *log.borrow(),
        vec![(ErrorType::OutOfMemory, "no room".to_string())]
    );
}

#[test]
fn test_disconnect_resolves_everything_in_serial_order() {
    let h = Harness::with_procs(NullProcs::with_deferred_callbacks(), 64 * 1024);
    let buffer = h
        .device
        .create_buffer(&buffer_descriptor(BufferUsage::MAP_READ, 8))
        .expect("buffer");
    let queue = h.device.get_queue().expect("queue");
    let module = wgsl(&h.device, "@compute @workgroup_size(1) fn main() {}");
    h.device
        .push_error_scope(ErrorFilter::VALIDATION)
        .expect("push scope");

    let order: Rc<RefCell<Vec<&'static str>>> = recorder();
    let sink = order.clone();
    buffer
        .map_async(MapMode::READ, 0, 8, move |status, _| {
            assert_eq!(status, MapAsyncStatus::Disconnected);
            sink.borrow_mut().push("map");
        })
        .expect("map");
    let sink = order.clone();
    h.device
        .pop_error_scope(move |status, _, _| {
            assert_eq!(status, PopErrorScopeStatus::Disconnected);
            sink.borrow_mut().push("scope");
        })
        .expect("pop");
    let sink = order.clone();
    queue
        .on_submitted_work_done(move |status| {
            assert_eq!(status, QueueWorkDoneStatus::Disconnected);
            sink.borrow_mut().push("work");
        })
        .expect("work done");
    let pipelines = recorder();
    compute_async(&h.device, &module, &pipelines).expect("pipeline");
    let sink = order.clone();
    h.device.set_device_lost_callback(move |reason, _| {
        assert_eq!(reason, DeviceLostReason::Disconnected);
        sink.borrow_mut().push("lost");
    });
    h.flush();
    assert_eq!(h.client.pending_requests(), 4);

    h.client.disconnect();
    assert_eq!(*order.borrow(), vec!["map", "scope", "work", "lost"]);
    match pipelines.borrow().as_slice() {
        [(CreatePipelineAsyncStatus::Disconnected, None)] => {}
        other => panic!("expected a disconnected pipeline, got {:?}", other),
    }
    assert_eq!(h.client.pending_requests(), 0);
    assert!(h.device.is_lost());

    // Disconnecting twice does not call anything again.
    h.client.disconnect();
    assert_eq!(order.borrow().len(), 4);
}

#[test]
fn test_requests_after_disconnect_resolve_immediately() {
    let h = Harness::new();
    let queue = h.device.get_queue().expect("queue");
    h.client.disconnect();

    let log = recorder();
    let sink = log.clone();
    match queue.on_submitted_work_done(move |status| sink.borrow_mut().push(status)) {
        Err(ClientError::Disconnected) => {}
        other => panic!("expected Disconnected, got {:?}", other),
    }
    assert_eq!(*log.borrow(), vec![QueueWorkDoneStatus::Disconnected]);

    let scopes = recorder();
    let sink = scopes.clone();
    match h
        .device
        .pop_error_scope(move |status, _, _| sink.borrow_mut().push(status))
    {
        Err(ClientError::Disconnected) => {}
        other => panic!("expected Disconnected, got {:?}", other),
    }
    assert_eq!(*scopes.borrow(), vec![PopErrorScopeStatus::Disconnected]);
    assert_eq!(h.client.pending_requests(), 0);
}

#[test]
fn test_device_destroy_resolves_pending_with_device_lost() {
    let h = Harness::with_procs(NullProcs::with_deferred_callbacks(), 64 * 1024);
    let buffer = h
        .device
        .create_buffer(&buffer_descriptor(BufferUsage::MAP_READ, 8))
        .expect("buffer");
    let queue = h.device.get_queue().expect("queue");

    let maps = recorder();
    let sink = maps.clone();
    buffer
        .map_async(MapMode::READ, 0, 8, move |status, _| sink.borrow_mut().push(status))
        .expect("map");
    let work = recorder();
    let sink = work.clone();
    queue
        .on_submitted_work_done(move |status| sink.borrow_mut().push(status))
        .expect("work done");
    let lost = recorder();
    let sink = lost.clone();
    h.device
        .set_device_lost_callback(move |reason, message| sink.borrow_mut().push((reason, message)));
    h.flush();

    h.device.destroy().expect("destroy");
    assert_eq!(*maps.borrow(), vec![MapAsyncStatus::DeviceLost]);
    assert_eq!(*work.borrow(), vec![QueueWorkDoneStatus::DeviceLost]);
    assert_eq!(
        *lost.borrow(),
        vec![(DeviceLostReason::Destroyed, "device destroyed".to_string())]
    );

    // The server's own device-lost and map replies arrive afterwards and
    // change nothing.
    h.flush();
    h.device.tick().expect("tick");
    h.flush();
    assert_eq!(maps.borrow().len(), 1);
    assert_eq!(work.borrow().len(), 1);
    assert_eq!(lost.borrow().len(), 1);
    assert!(!h.client.is_disconnected());
    assert!(!h.server_is_fatal());
}

#[test]
fn test_server_side_device_loss() {
    let h = Harness::new();
    let lost = recorder();
    let sink = lost.clone();
    h.device
        .set_device_lost_callback(move |reason, message| sink.borrow_mut().push((reason, message)));

    h.server.with_mut(|s| {
        let device = s.device_native();
        s.procs_mut().lose_device(device, "gpu reset");
        s.drain_completions().expect("drain completions");
    });
    h.flush();

    assert_eq!(
        *lost.borrow(),
        vec![(DeviceLostReason::Unknown, "gpu reset".to_string())]
    );
    assert!(h.device.is_lost());
}

#[test]
fn test_transport_failure_during_encode_resolves_every_request() {
    let capacity = 256;

    let h = Harness::with_procs(NullProcs::new(), capacity);
    let log = recorder();
    let made = requests_until_transport_fails(&h, |_| {
        let sink = log.clone();
        h.device
            .pop_error_scope(move |status, _, _| sink.borrow_mut().push(status))
    });
    assert!(made > 1);
    assert_eq!(*log.borrow(), vec![PopErrorScopeStatus::Disconnected; made]);
    assert_eq!(h.client.pending_requests(), 0);

    let h = Harness::with_procs(NullProcs::new(), capacity);
    let queue = h.device.get_queue().expect("queue");
    h.flush();
    let log = recorder();
    let made = requests_until_transport_fails(&h, |_| {
        let sink = log.clone();
        queue.on_submitted_work_done(move |status| sink.borrow_mut().push(status))
    });
    assert_eq!(*log.borrow(), vec![QueueWorkDoneStatus::Disconnected; made]);
    assert_eq!(h.client.pending_requests(), 0);

    let h = Harness::with_procs(NullProcs::new(), capacity);
    let buffers: Vec<_> = (0..16)
        .map(|_| {
            let buffer = h
                .device
                .create_buffer(&buffer_descriptor(BufferUsage::MAP_READ, 8))
                .expect("buffer");
            h.flush();
            buffer
        })
        .collect();
    let log = recorder();
    let made = requests_until_transport_fails(&h, |i| {
        let sink = log.clone();
        buffers[i].map_async(MapMode::READ, 0, 8, move |status, _| sink.borrow_mut().push(status))
    });
    assert_eq!(*log.borrow(), vec![MapAsyncStatus::Disconnected; made]);
    assert_eq!(h.client.pending_requests(), 0);
    for buffer in &buffers {
        assert_eq!(buffer.map_state(), rwire_client::BufferMapState::Unmapped);
    }

    let h = Harness::with_procs(NullProcs::new(), capacity);
    let module = wgsl(&h.device, "@compute @workgroup_size(1) fn main() {}");
    h.flush();
    let log = recorder();
    let made = requests_until_transport_fails(&h, |_| compute_async(&h.device, &module, &log));
    match log.borrow().as_slice() {
        results if results.len() == made
            && results
                .iter()
                .all(|r| matches!(r, (CreatePipelineAsyncStatus::Disconnected, None))) => {}
        other => panic!("expected {} disconnected pipelines, got {:?}", made, other),
    }
    assert_eq!(h.client.live_objects(ObjectType::ComputePipeline), 0);

    let h = Harness::with_procs(NullProcs::new(), capacity);
    let module = wgsl(&h.device, "@vertex fn main() {}");
    h.flush();
    let log = recorder();
    let made = requests_until_transport_fails(&h, |_| {
        let sink = log.clone();
        h.device.create_render_pipeline_async(
            &render_descriptor(&module),
            move |status, pipeline, _| sink.borrow_mut().push((status, pipeline.is_some())),
        )
    });
    assert_eq!(
        *log.borrow(),
        vec![(CreatePipelineAsyncStatus::Disconnected, false); made]
    );
    assert_eq!(h.client.live_objects(ObjectType::RenderPipeline), 0);
    assert_eq!(h.client.pending_requests(), 0);
}

#[test]
fn test_unsendable_pipeline_request_fails_with_its_callback() {
    let h = Harness::with_procs(NullProcs::new(), 512);
    let module = wgsl(&h.device, "@compute @workgroup_size(1) fn main() {}");
    let label = "x".repeat(4096);
    let log = recorder();
    let sink = log.clone();
    let result = h.device.create_compute_pipeline_async(
        &compute_descriptor(&module, Some(&label)),
        move |status, pipeline, message| sink.borrow_mut().push((status, pipeline, message)),
    );
    match result {
        Err(ClientError::CommandTooLarge { command, .. }) => {
            assert_eq!(command, "DeviceCreateComputePipelineAsync")
        }
        other => panic!("expected CommandTooLarge, got {:?}", other),
    }
    match log.borrow().as_slice() {
        [(CreatePipelineAsyncStatus::ValidationError, None, message)] => {
            assert_eq!(message, "pipeline request could not be sent")
        }
        other => panic!("expected one validation failure, got {:?}", other),
    }
    assert_eq!(h.client.live_objects(ObjectType::ComputePipeline), 0);
    assert_eq!(h.client.pending_requests(), 0);
    assert!(!h.client.is_disconnected());

    // The server never heard of the placeholder, so nothing is destroyed.
    h.flush();
    assert!(!h.server_is_fatal());
    assert_eq!(h.call_count("release"), 0);

    let log = recorder();
    compute_async(&h.device, &module, &log).expect("small pipeline");
    h.flush();
    match log.borrow().as_slice() {
        [(CreatePipelineAsyncStatus::Success, Some(_))] => {}
        other => panic!("expected a pipeline, got {:?}", other),
    };
}

#[test]
fn test_pipeline_with_foreign_module_fails_with_its_callback() {
    let h = Harness::new();
    let other = Harness::new();
    let foreign = wgsl(&other.device, "@compute @workgroup_size(1) fn main() {}");

    let log = recorder();
    match compute_async(&h.device, &foreign, &log) {
        Err(ClientError::ForeignObject) => {}
        other => panic!("expected ForeignObject, got {:?}", other),
    }
    match log.borrow().as_slice() {
        [(CreatePipelineAsyncStatus::ValidationError, None)] => {}
        other => panic!("expected one validation failure, got {:?}", other),
    }

    let seen = recorder();
    let sink = seen.clone();
    match h.device.create_render_pipeline_async(&render_descriptor(&foreign), move |status, _, _| {
        sink.borrow_mut().push(status)
    }) {
        Err(ClientError::ForeignObject) => {}
        other => panic!("expected ForeignObject, got {:?}", other),
    }
    assert_eq!(*seen.borrow(), vec![CreatePipelineAsyncStatus::ValidationError]);
    assert_eq!(h.client.pending_requests(), 0);
    assert_eq!(h.client.live_objects(ObjectType::ComputePipeline), 0);
}

#[test]
fn test_backend_logs_reach_the_logging_callback() {
    let h = Harness::new();
    let log = recorder();
    let sink = log.clone();
    h.device
        .set_logging_callback(move |logging_type, message| sink.borrow_mut().push((logging_type, message)));

    h.server.with_mut(|s| {
        let device = s.device_native();
        s.procs_mut().emit_log(device, LoggingType::Warning, "pipeline cache miss");
        s.procs_mut().emit_log(device, LoggingType::Info, "compiled 1 shader");
        s.drain_completions().expect("drain completions");
    });
    h.flush();

    assert_eq!(
        *log.borrow(),
        vec![
            (LoggingType::Warning, "pipeline cache miss".to_string()),
            (LoggingType::Info, "compiled 1 shader".to_string()),
        ]
    );
    assert!(!h.client.is_disconnected());
}
