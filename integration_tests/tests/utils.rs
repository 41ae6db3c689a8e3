#![allow(dead_code)]
use costack_common::messages::CanMessage;
use costack_node::storage::ObjectStorage;
use costack_node::{Network, NetworkConfig, SdoClientResult};
use integration_tests::object_dict1::object_dict1;
use integration_tests::sim_bus::{SimBus, SimChannel};

pub type SimNetwork = Network<SimChannel>;

/// Time step of [`Harness::advance`], in µs
pub const STEP_US: u32 = 1000;

/// Several nodes on one simulated bus, driven with a simulated clock
pub struct Harness {
    pub bus: SimBus,
    pub nodes: Vec<SimNetwork>,
    pub now: u32,
}

impl Harness {
    /// Create one node per entry in `ids`, each with its own copy of the example dictionary
    ///
    /// Node `i` gets serial number `1000 + i`.
    pub fn new(ids: &[u8]) -> Self {
        let bus = SimBus::new();
        let nodes = ids
            .iter()
            .enumerate()
            .map(|(i, &id)| {
                let config = NetworkConfig::new(id, object_dict1(1000 + i as u32));
                Network::new(bus.new_channel(), config).unwrap()
            })
            .collect();
        Self { bus, nodes, now: 0 }
    }

    /// Add a node with a storage backend, returning its position
    pub fn add_node(&mut self, id: u8, serial: u32, storage: &'static dyn ObjectStorage) -> usize {
        let config = NetworkConfig {
            storage: Some(storage),
            ..NetworkConfig::new(id, object_dict1(serial))
        };
        self.nodes
            .push(Network::new(self.bus.new_channel(), config).unwrap());
        self.nodes.len() - 1
    }

    /// Power on every node, in order, delivering the boot-up messages
    pub fn start(&mut self) {
        for i in 0..self.nodes.len() {
            self.nodes[i].start(self.now);
            self.settle();
        }
    }

    /// Deliver frames until the bus is quiet
    pub fn settle(&mut self) {
        for _ in 0..1000 {
            if self.bus.pending() == 0 {
                return;
            }
            for node in self.nodes.iter_mut() {
                node.handle_rx(self.now);
            }
        }
        panic!("bus did not settle");
    }

    /// Run the clock forward by `us`, in steps of [`STEP_US`]
    pub fn advance(&mut self, us: u32) {
        let end = self.now + us;
        while self.now < end {
            self.now += STEP_US;
            for node in self.nodes.iter_mut() {
                node.handle_periodic(self.now);
            }
            self.settle();
        }
    }

    /// Put a frame from an outside device on the bus and deliver it
    pub fn inject(&mut self, msg: CanMessage) {
        self.bus.inject(msg);
        self.settle();
    }

    /// Step the clock until the SDO client of `client` finishes
    pub fn sdo_result(&mut self, client: usize) -> SdoClientResult {
        self.settle();
        for _ in 0..1000 {
            if let Some(result) = self.nodes[client].take_sdo_client_result() {
                return result;
            }
            self.advance(STEP_US);
        }
        panic!("SDO transfer did not finish");
    }

    /// Read `index:sub` of `server` through the SDO client of `client`
    pub fn sdo_read(&mut self, client: usize, server: u8, index: u16, sub: u8) -> SdoClientResult {
        self.nodes[client].sdo_read(server, index, sub).unwrap();
        self.sdo_result(client)
    }

    /// Write `index:sub` of `server` through the SDO client of `client`
    pub fn sdo_write(
        &mut self,
        client: usize,
        server: u8,
        index: u16,
        sub: u8,
        data: &[u8],
    ) -> SdoClientResult {
        self.nodes[client].sdo_write(server, index, sub, data).unwrap();
        self.sdo_result(client)
    }

    /// Frames sent on the bus which match `id`
    pub fn frames_with_id(&self, id: u32) -> Vec<CanMessage> {
        self.bus
            .history()
            .into_iter()
            .filter(|msg| msg.id().raw() == id)
            .collect()
    }
}
