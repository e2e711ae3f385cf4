//! Shared harness: a client and a `Server<NullProcs>` joined by two
//! in-process transports.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use rwire_client::{Client, ClientHandler, Device};
use rwire_core::{default_config_path, WireConfig};
use rwire_protocol::descriptors::BufferDescriptor;
use rwire_protocol::types::BufferUsage;
use rwire_server::{NullProcs, Server};
use rwire_transport::{Deliver, SharedHandler, TerribleCommandBuffer};

/// Forwards deliveries to a target set after construction, so both ends
/// can be built before they know each other.
#[derive(Default)]
pub struct Link(RefCell<Option<Rc<dyn Deliver>>>);

impl Link {
    pub fn connect(&self, target: Rc<dyn Deliver>) {
        *self.0.borrow_mut() = Some(target);
    }
}

impl Deliver for Link {
    fn deliver(&self, data: &[u8]) -> bool {
        let target = self.0.borrow().clone();
        match target {
            Some(target) => target.deliver(data),
            None => false,
        }
    }
}

pub struct Harness {
    pub client: Client,
    pub device: Device,
    pub server: Rc<SharedHandler<Server<NullProcs>>>,
    pub endpoint: Rc<SharedHandler<ClientHandler>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_procs(NullProcs::new(), 64 * 1024)
    }

    /// `capacity` overrides the configured client transport buffer size.
    pub fn with_procs(procs: NullProcs, capacity: usize) -> Self {
        let mut config = test_config();
        config.transport.buffer_size = capacity;
        config.transport.max_command_size = config.transport.max_command_size.max(capacity);
        Self::with_config(procs, &config)
    }

    pub fn with_config(procs: NullProcs, config: &WireConfig) -> Self {
        rwire_common::init_test_logging();
        let link = Rc::new(Link::default());
        let mut client_out = TerribleCommandBuffer::from_config(&config.transport);
        client_out.set_handler(link.clone());
        let client = Client::new(Box::new(client_out));
        let endpoint = SharedHandler::new(client.handler());
        let server_out = TerribleCommandBuffer::with_handler(64 * 1024, endpoint.clone());
        let server =
            Server::new(procs, Box::new(server_out), config).expect("server starts");
        let server = SharedHandler::new(server);
        link.connect(server.clone());

        let device = client.device();
        let harness = Self {
            client,
            device,
            server,
            endpoint,
        };
        harness.flush_server();
        harness
    }

    pub fn flush_client(&self) {
        self.client.flush().expect("client flush");
    }

    pub fn flush_server(&self) {
        assert!(self.server.with_mut(|s| s.flush()), "server flush");
    }

    /// One full round trip: commands to the server, replies back.
    pub fn flush(&self) {
        self.flush_client();
        self.flush_server();
    }

    pub fn server_is_fatal(&self) -> bool {
        self.server.with(|s| s.is_fatal())
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.server.with(|s| s.procs().call_count(name))
    }
}

/// `$RWIRE_CONFIG` or `./rwire.toml` when present, defaults otherwise.
pub fn test_config() -> WireConfig {
    WireConfig::load_or_default(&default_config_path())
}

pub fn buffer_descriptor(usage: BufferUsage, size: u64) -> BufferDescriptor {
    BufferDescriptor {
        label: None,
        usage,
        size,
        mapped_at_creation: false,
    }
}

/// Shared log a callback can push into.
pub fn recorder<T>() -> Rc<RefCell<Vec<T>>> {
    Rc::new(RefCell::new(Vec::new()))
}
