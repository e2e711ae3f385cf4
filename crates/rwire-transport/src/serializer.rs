/// Send side of a transport: hands out space for encoded commands and
/// pushes it to the peer on `flush`.
pub trait CommandSerializer {
    /// Largest single command this serializer can hold.
    fn maximum_allocation_size(&self) -> usize;

    /// Reserve `size` bytes for one command. Returns `None` when the command
    /// can never fit, or when making room required a flush that failed.
    fn get_cmd_space(&mut self, size: usize) -> Option<&mut [u8]>;

    /// Deliver everything reserved so far. `false` means the peer rejected
    /// the bytes and the connection is dead.
    fn flush(&mut self) -> bool;
}

/// Receive side of an endpoint.
pub trait CommandHandler {
    /// Process a run of whole commands. `false` signals fatal stream
    /// corruption; the connection must not be used afterwards.
    fn handle_commands(&mut self, data: &[u8]) -> bool;
}

/// Shared-reference delivery target used by transports that do not own
/// their receiving endpoint.
pub trait Deliver {
    fn deliver(&self, data: &[u8]) -> bool;
}
