//! Pending asynchronous requests and how each kind resolves.
//!
//! Entries live in the connection's [`RequestTracker`](rwire_core::RequestTracker).
//! An entry is resolved by moving it out of the tracker, so each callback
//! runs at most once. Callbacks are always invoked with no client state
//! borrowed; they may call back into the client.

use rwire_protocol::types::{
    CreatePipelineAsyncStatus, DeviceLostReason, ErrorType, LoggingType, MapAsyncStatus,
    MapMode, PopErrorScopeStatus, QueueWorkDoneStatus,
};
use rwire_protocol::{ObjectHandle, ObjectId};

use crate::objects::{ComputePipeline, RenderPipeline};

pub type MapCallback = Box<dyn FnOnce(MapAsyncStatus, String)>;
pub type CreateComputePipelineCallback =
    Box<dyn FnOnce(CreatePipelineAsyncStatus, Option<ComputePipeline>, String)>;
pub type CreateRenderPipelineCallback =
    Box<dyn FnOnce(CreatePipelineAsyncStatus, Option<RenderPipeline>, String)>;
pub type PopErrorScopeCallback = Box<dyn FnOnce(PopErrorScopeStatus, ErrorType, String)>;
pub type WorkDoneCallback = Box<dyn FnOnce(QueueWorkDoneStatus)>;
pub type DeviceLostCallback = Box<dyn FnOnce(DeviceLostReason, String)>;
pub type UncapturedErrorCallback = Box<dyn FnMut(ErrorType, String)>;
pub type LoggingCallback = Box<dyn FnMut(LoggingType, String)>;

/// Why a request is being resolved on the client without a server reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LocalResolution {
    Disconnected,
    DeviceLost,
    DestroyedBeforeCallback,
    UnmappedBeforeCallback,
    /// The command could not be encoded; the server never saw the request.
    NotSent,
}

pub(crate) enum PendingRequest {
    Map {
        device: ObjectId,
        buffer: ObjectHandle,
        mode: MapMode,
        offset: u64,
        size: u64,
        callback: MapCallback,
    },
    CreateComputePipeline {
        device: ObjectId,
        pipeline: ComputePipeline,
        callback: CreateComputePipelineCallback,
    },
    CreateRenderPipeline {
        device: ObjectId,
        pipeline: RenderPipeline,
        callback: CreateRenderPipelineCallback,
    },
    PopErrorScope {
        device: ObjectId,
        callback: PopErrorScopeCallback,
    },
    QueueWorkDone {
        device: ObjectId,
        queue: ObjectHandle,
        callback: WorkDoneCallback,
    },
}

impl PendingRequest {
    pub(crate) fn device(&self) -> ObjectId {
        match self {
            PendingRequest::Map { device, .. }
            | PendingRequest::CreateComputePipeline { device, .. }
            | PendingRequest::CreateRenderPipeline { device, .. }
            | PendingRequest::PopErrorScope { device, .. }
            | PendingRequest::QueueWorkDone { device, .. } => *device,
        }
    }

    /// Buffer targeted by a map request.
    pub(crate) fn mapped_buffer(&self) -> Option<ObjectHandle> {
        match self {
            PendingRequest::Map { buffer, .. } => Some(*buffer),
            _ => None,
        }
    }

    /// Buffer and range of a map request.
    pub(crate) fn map_range(&self) -> Option<(ObjectHandle, u64, u64)> {
        match self {
            PendingRequest::Map {
                buffer,
                offset,
                size,
                ..
            } => Some((*buffer, *offset, *size)),
            _ => None,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            PendingRequest::Map { mode, .. } if mode.contains(MapMode::READ) => "MapRead",
            PendingRequest::Map { .. } => "MapWrite",
            PendingRequest::CreateComputePipeline { .. } => "CreateComputePipelineAsync",
            PendingRequest::CreateRenderPipeline { .. } => "CreateRenderPipelineAsync",
            PendingRequest::PopErrorScope { .. } => "PopErrorScope",
            PendingRequest::QueueWorkDone { .. } => "QueueWorkDone",
        }
    }

    /// Fire the callback with the terminal status matching `why`.
    pub(crate) fn resolve_locally(self, why: LocalResolution) {
        match self {
            PendingRequest::Map { callback, .. } => {
                let (status, message) = match why {
                    LocalResolution::Disconnected => (MapAsyncStatus::Disconnected, "disconnected"),
                    LocalResolution::DeviceLost => (MapAsyncStatus::DeviceLost, "device lost"),
                    LocalResolution::DestroyedBeforeCallback => (
                        MapAsyncStatus::DestroyedBeforeCallback,
                        "buffer destroyed before the map completed",
                    ),
                    LocalResolution::UnmappedBeforeCallback => (
                        MapAsyncStatus::UnmappedBeforeCallback,
                        "buffer unmapped before the map completed",
                    ),
                    LocalResolution::NotSent => {
                        (MapAsyncStatus::ValidationError, "map request could not be sent")
                    }
                };
                callback(status, message.to_string());
            }
            PendingRequest::CreateComputePipeline {
                pipeline, callback, ..
            } => {
                if why == LocalResolution::NotSent {
                    pipeline.0.mark_unsent();
                }
                let (status, message) = pipeline_status(why);
                // The placeholder is released before the callback runs.
                drop(pipeline);
                callback(status, None, message.to_string());
            }
            PendingRequest::CreateRenderPipeline {
                pipeline, callback, ..
            } => {
                if why == LocalResolution::NotSent {
                    pipeline.0.mark_unsent();
                }
                let (status, message) = pipeline_status(why);
                drop(pipeline);
                callback(status, None, message.to_string());
            }
            PendingRequest::PopErrorScope { callback, .. } => {
                let status = match why {
                    LocalResolution::Disconnected | LocalResolution::NotSent => {
                        PopErrorScopeStatus::Disconnected
                    }
                    _ => PopErrorScopeStatus::DeviceLost,
                };
                callback(status, ErrorType::NoError, String::new());
            }
            PendingRequest::QueueWorkDone { callback, .. } => {
                let status = match why {
                    LocalResolution::Disconnected => QueueWorkDoneStatus::Disconnected,
                    LocalResolution::NotSent => QueueWorkDoneStatus::Error,
                    _ => QueueWorkDoneStatus::DeviceLost,
                };
                callback(status);
            }
        }
    }
}

fn pipeline_status(why: LocalResolution) -> (CreatePipelineAsyncStatus, &'static str) {
    match why {
        LocalResolution::Disconnected => (CreatePipelineAsyncStatus::Disconnected, "disconnected"),
        LocalResolution::DeviceLost => (CreatePipelineAsyncStatus::DeviceLost, "device lost"),
        LocalResolution::NotSent => (
            CreatePipelineAsyncStatus::ValidationError,
            "pipeline request could not be sent",
        ),
        _ => (CreatePipelineAsyncStatus::Unknown, "request abandoned"),
    }
}
