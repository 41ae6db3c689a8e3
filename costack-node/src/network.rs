//! The node instance and its frame dispatch
//!
//! A [`Network`] owns the CAN channel, the protocol state and a reference to the object dictionary.
//! It is single threaded: received frames go through [`Network::process_frame`] (or
//! [`Network::handle_rx`], which drains the channel), and [`Network::handle_periodic`] must be
//! called regularly to run the protocol timers. The [`dispatcher`](crate::dispatcher) module
//! wraps a network in a thread for applications which need to drive it from several threads.

use costack_common::constants::function;
use costack_common::messages::{
    CanId, CanMessage, NmtCommand, NmtCommandCmd, SyncObject, EXTID_MASK,
};
use costack_common::traits::CanChannel;
use costack_common::{NodeId, NodeSet};
use defmt_or_log::{debug, warn};
use snafu::Snafu;

use crate::config::{Callbacks, NetworkConfig};
use crate::emcy::Emcy;
use crate::heartbeat::Heartbeat;
use crate::lss_slave::LssSlave;
use crate::nmt::{Event, State};
use crate::node_guard::NodeGuard;
use crate::object_dict::{DefaultValue, Object};
use crate::pdo::PdoEngine;
use crate::persist::VerifyConfiguration;
use crate::sdo_client::SdoClient;
use crate::sdo_server::SdoServer;
use crate::storage::ObjectStorage;
use crate::sync::SyncProducer;

/// Error returned when a network cannot be created from its configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitError {
    /// The dictionary declares more RPDO communication objects than there are slots
    #[snafu(display("Dictionary has more than {max} RPDOs"))]
    TooManyRxPdos {
        /// Number of RPDO slots
        max: usize,
    },
    /// The dictionary declares more TPDO communication objects than there are slots
    #[snafu(display("Dictionary has more than {max} TPDOs"))]
    TooManyTxPdos {
        /// Number of TPDO slots
        max: usize,
    },
    /// The configured node ID is neither 1..=127 nor 255
    #[snafu(display("Invalid node ID {value}"))]
    InvalidNodeId {
        /// The rejected value
        value: u8,
    },
}

/// A CANopen node attached to one CAN channel
#[allow(missing_debug_implementations)]
pub struct Network<C: CanChannel> {
    pub(crate) channel: C,
    pub(crate) od: &'static [Object],
    pub(crate) defaults: &'static [DefaultValue],
    pub(crate) callbacks: Callbacks,
    pub(crate) storage: Option<&'static dyn ObjectStorage>,
    /// Time of the frame or tick being processed, in µs
    pub(crate) now: u32,
    pub(crate) state: State,
    pub(crate) node: u8,
    pub(crate) bitrate: u32,
    pub(crate) restart_ms: u32,
    pub(crate) sdo_timeout_ms: u32,
    /// Nodes seen through their heartbeat
    pub(crate) nodes: NodeSet,
    pub(crate) emcy: Emcy,
    pub(crate) sync: SyncProducer,
    pub(crate) lss: LssSlave,
    pub(crate) node_guard: NodeGuard,
    pub(crate) heartbeat: Heartbeat,
    pub(crate) pdo: PdoEngine,
    pub(crate) sdo_server: SdoServer,
    pub(crate) sdo_client: SdoClient,
    pub(crate) verify: VerifyConfiguration,
}

impl<C: CanChannel> Network<C> {
    /// Create a network in the `Off` state
    ///
    /// Nothing is sent until [`start`](Self::start) is called.
    pub fn new(channel: C, config: NetworkConfig) -> Result<Self, InitError> {
        let node_id = NodeId::new(config.node_id).map_err(|_| InitError::InvalidNodeId {
            value: config.node_id,
        })?;
        let pdo = PdoEngine::discover(config.od)?;


        Ok(Self {
            channel,
            od: config.od,
            defaults: config.defaults,
            callbacks: config.callbacks,
            storage: config.storage,
            now: 0,
            state: State::Off,
            node: node_id.raw(),
            bitrate: config.bitrate,
            restart_ms: config.restart_ms,
            sdo_timeout_ms: config.sdo_timeout_ms,
            nodes: NodeSet::new(),
            emcy: Emcy::default(),
            sync: SyncProducer::default(),
            lss: LssSlave::new(node_id.raw(), config.bitrate),
            node_guard: NodeGuard::default(),
            heartbeat: Heartbeat::default(),
            pdo,
            sdo_server: SdoServer::default(),
            sdo_client: SdoClient::default(),
            verify: VerifyConfiguration::default(),
        })
    }

    /// Power the node on
    ///
    /// Runs the initialisation sequence: stored values are loaded, the controller is configured
    /// and, if the node has an ID, the boot-up message is sent and the node enters pre-operational.
    pub fn start(&mut self, now: u32) {
        self.now = now;
        self.nmt_event(Event::Reset);
    }

    /// Set the time used by calls which do not take one
    pub fn set_time(&mut self, now: u32) {
        self.now = now;
    }

    /// Process every frame pending on the channel
    pub fn handle_rx(&mut self, now: u32) {
        while let Some(msg) = self.channel.receive() {
            self.process_frame(now, &msg);
        }
    }

    /// Process one received frame
    pub fn process_frame(&mut self, now: u32, msg: &CanMessage) {
        if self.state == State::Off {
            return;
        }
        self.now = now;

        let word = msg.id().cob_word();
        if !msg.rtr && word == self.sync.cobid & EXTID_MASK {
            let counter = (msg.dlc >= 1).then_some(msg.data[0]);
            self.pdo_sync(counter);
            return;
        }

        if msg.id().is_extended() {
            self.pdo_rx(msg);
            self.emcy_rx(msg);
            return;
        }

        let raw = msg.id().raw() as u16;
        let node = (raw & 0x7F) as u8;
        match raw & function::MASK {
            function::NMT => self.nmt_rx(msg),
            function::EMCY if node != 0 => self.emcy_rx(msg),
            f if function::is_pdo(f) => self.pdo_rx(msg),
            function::SDO_TX => self.sdo_client_rx(node, msg),
            function::SDO_RX if node == self.node => self.sdo_server_rx(msg),
            function::NMT_ERR => {
                self.heartbeat_rx(node, msg);
                self.node_guard_rx(msg);
            }
            function::LSS => self.lss_rx(msg),
            _ => debug!("ignoring frame {:x}", raw),
        }
    }

    /// Run the protocol timers
    pub fn handle_periodic(&mut self, now: u32) {
        if self.state == State::Off {
            return;
        }
        self.now = now;
        self.sdo_server_timer();
        self.sdo_client_timer();
        self.pdo_timer();
        self.sync_timer();
        self.heartbeat_timer();
        self.node_guard_timer();
        self.lss_timer();
        self.emcy_handle_can_state();
    }

    pub(crate) fn send(&mut self, msg: CanMessage) {
        let word = msg.cob_word();
        if self.channel.send(msg).is_err() {
            warn!("failed to send frame {:x}", word);
        }
    }

    /// Send an NMT command
    ///
    /// The command is applied locally as well when `node` is this node or 0 (all nodes).
    pub fn nmt(&mut self, cmd: NmtCommandCmd, node: u8) {
        if node == 0 || node == self.node {
            self.nmt_command(cmd);
        }
        self.send(NmtCommand { cmd, node }.into());
    }

    /// Produce a SYNC
    ///
    /// Local PDOs see the SYNC before it is sent to the bus.
    pub fn sync(&mut self) {
        self.pdo_sync(None);
        let id = CanId::from_cob_word(self.sync.cobid & EXTID_MASK);
        self.send(SyncObject::default().to_can_message(id));
    }

    /// Signal an application event on every event driven TPDO
    pub fn pdo_event(&mut self) {
        self.pdo_trigger();
    }

    /// Signal an application event on the TPDOs which map `index`/`sub`
    pub fn pdo_obj_event(&mut self, index: u16, sub: u8) {
        self.pdo_trigger_with_obj(index, sub);
    }

    /// Produce an emergency with an error code and optional manufacturer specific bytes
    pub fn emcy_issue(&mut self, code: u16, info: u16, msef: Option<[u8; 5]>) {
        self.emcy_tx(code, info, msef);
    }

    /// Set bits in the error register (0x1001)
    pub fn error_set(&mut self, mask: u8) {
        self.emcy_register_set(mask);
    }

    /// Clear bits in the error register, sending an error reset emergency if any were set
    pub fn error_clear(&mut self, mask: u8) {
        self.emcy_register_clear(mask);
    }

    /// Read the error register
    pub fn error_get(&self) -> u8 {
        self.emcy_register_get()
    }

    /// Find the first node at or above `from` which has been seen through its heartbeat
    pub fn node_next(&self, from: u8) -> Option<u8> {
        if from > 127 {
            return None;
        }
        self.nodes.next(from)
    }

    /// The active node ID, 0xFF while unconfigured
    pub fn node_id(&self) -> u8 {
        self.node
    }

    /// The current NMT state
    pub fn nmt_state(&self) -> State {
        self.state
    }

    /// The active bit rate
    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }

    /// The CAN channel
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// The CAN channel, mutably
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }
}

#[cfg(test)]
mod tests {
    use costack_common::messages::{CanId, CanMessage, NmtCommandCmd};

    use super::*;
    use crate::test_utils::{test_config, test_network, TestChannel, TEST_NODE};

    #[test]
    fn test_invalid_node_id() {
        let config = NetworkConfig {
            node_id: 0,
            ..test_config()
        };
        let err = Network::new(TestChannel::default(), config).err();
        assert_eq!(Some(InitError::InvalidNodeId { value: 0 }), err);
    }

    #[test]
    fn test_frames_ignored_before_start() {
        let mut net = test_network();
        let cmd = CanMessage::new(CanId::std(0), &[NmtCommandCmd::Start as u8, 0]);
        net.process_frame(0, &cmd);
        net.handle_periodic(1000);
        assert_eq!(State::Off, net.nmt_state());
        assert!(net.channel.sent.is_empty());
    }

    #[test]
    fn test_start_sends_bootup() {
        let mut net = test_network();
        net.start(0);
        assert_eq!(State::PreOp, net.nmt_state());
        assert_eq!(1, net.channel.sent.len());
        let bootup = net.channel.sent[0];
        assert_eq!(CanId::std(0x700 + TEST_NODE as u16), bootup.id());
        assert_eq!(&[0], bootup.data());
        assert!(net.channel.bus_on);
    }

    #[test]
    fn test_nmt_applies_locally() {
        let mut net = test_network();
        net.start(0);
        net.channel.sent.clear();

        net.nmt(NmtCommandCmd::Start, 3);
        assert_eq!(State::PreOp, net.nmt_state());
        assert_eq!(&[1, 3], net.channel.sent[0].data());

        net.nmt(NmtCommandCmd::Start, 0);
        assert_eq!(State::Op, net.nmt_state());
        net.nmt(NmtCommandCmd::Stop, TEST_NODE);
        assert_eq!(State::Stop, net.nmt_state());
    }

    #[test]
    fn test_sync_sends_frame() {
        let mut net = test_network();
        net.start(0);
        net.channel.sent.clear();
        net.sync();
        let frame = net.channel.sent[0];
        assert_eq!(CanId::std(0x80), frame.id());
        assert_eq!(0, frame.dlc);
    }

    #[test]
    fn test_node_next() {
        let mut net = test_network();
        net.start(0);
        for node in [5u8, 20] {
            let hb = CanMessage::new(CanId::std(0x700 + node as u16), &[0x05]);
            net.process_frame(10, &hb);
        }
        assert_eq!(Some(5), net.node_next(0));
        assert_eq!(Some(20), net.node_next(6));
        assert_eq!(None, net.node_next(21));
        assert_eq!(None, net.node_next(200));
    }
}
