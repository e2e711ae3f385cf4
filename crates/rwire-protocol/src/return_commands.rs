//! Server → client commands.

use crate::handle::ObjectHandle;
use crate::types::{
    CreatePipelineAsyncStatus, DeviceLostReason, ErrorType, FeatureName, Limits, LoggingType,
    MapAsyncStatus, PopErrorScopeStatus, QueueWorkDoneStatus,
};
use crate::wire_commands;

wire_commands! {
    /// A decoded server → client command. Targets are full handles so a
    /// reply addressed to a recycled id is recognised as stale.
    pub enum ReturnCommand / ReturnCommandId {
        DeviceInfo = 1 {
            device: ObjectHandle,
            limits: Limits,
            features: Vec<FeatureName>,
        },
        DeviceUncapturedError = 2 {
            device: ObjectHandle,
            error_type: ErrorType,
            message: String,
        },
        DeviceLost = 3 {
            device: ObjectHandle,
            reason: DeviceLostReason,
            message: String,
        },
        /// `read_data` is present only for successful read maps.
        BufferMapAsyncCallback = 4 {
            buffer: ObjectHandle,
            request_serial: u64,
            status: MapAsyncStatus,
            message: String,
            read_data: Option<Vec<u8>>,
        },
        DeviceCreateComputePipelineAsyncCallback = 5 {
            device: ObjectHandle,
            request_serial: u64,
            status: CreatePipelineAsyncStatus,
            message: String,
        },
        DeviceCreateRenderPipelineAsyncCallback = 6 {
            device: ObjectHandle,
            request_serial: u64,
            status: CreatePipelineAsyncStatus,
            message: String,
        },
        DevicePopErrorScopeCallback = 7 {
            device: ObjectHandle,
            request_serial: u64,
            status: PopErrorScopeStatus,
            error_type: ErrorType,
            message: String,
        },
        QueueWorkDoneCallback = 8 {
            queue: ObjectHandle,
            request_serial: u64,
            status: QueueWorkDoneStatus,
        },
        DeviceLogging = 9 {
            device: ObjectHandle,
            logging_type: LoggingType,
            message: String,
        },
    }
}
