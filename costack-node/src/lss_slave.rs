//! LSS slave
//!
//! Lets an LSS master assign the node ID and bit rate. The node takes part in the protocol
//! whatever its NMT state, but configuration commands are only accepted in the LSS
//! configuration state, which is entered by a global switch or a matching selective switch.
//!
//! The LSS store holds the pending node ID as one byte, followed by the bit rate as a
//! little-endian u32.

use costack_common::constants::object_ids;
use costack_common::lss::{bitrate_from_index, LssMatch, LssRequest, LssResponse, LssState};
use costack_common::messages::{CanMessage, LSS_REQ_ID, LSS_RESP_ID};
use costack_common::traits::CanChannel;
use costack_common::util::is_expired;
use costack_common::NodeId;
use defmt_or_log::{debug, info, warn};

use crate::nmt::{Event, State};
use crate::storage::{self, StorageError, Store};
use crate::Network;

/// Match bits for all six identity checks
const MATCH_ALL: u8 = 0x3F;

/// Store configuration result codes
const STORE_NOT_SUPPORTED: u8 = 1;
const STORE_FAILED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activation {
    /// Bus is off, waiting to switch to the new bit rate
    Switching,
    /// New bit rate set, waiting to rejoin the bus
    Rejoining,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LssSlave {
    pub state: LssState,
    /// Pending node ID, applied on the next communication reset
    pub node: u8,
    /// Pending bit rate, applied by activate bit timing
    pub bitrate: u32,
    matched: u8,
    activation: Option<Activation>,
    /// Activation delay in µs
    delay: u32,
    timestamp: u32,
}

impl LssSlave {
    pub(crate) fn new(node: u8, bitrate: u32) -> Self {
        Self {
            state: LssState::Waiting,
            node,
            bitrate,
            matched: 0,
            activation: None,
            delay: 0,
            timestamp: 0,
        }
    }
}

impl<C: CanChannel> Network<C> {
    pub(crate) fn lss_init(&mut self) {
        self.lss.state = LssState::Waiting;
        self.lss.matched = 0;
        self.lss.activation = None;
    }

    fn lss_identity(&self, sub: u8) -> u32 {
        self.read(object_ids::IDENTITY, sub).unwrap_or(0) as u32
    }

    /// Read the stored LSS settings
    fn lss_load(&self) -> Option<(u8, Option<u32>)> {
        let backend = self.storage?;
        let mut node = [0u8; 1];
        let mut bitrate = None;
        let result = backend.load(Store::Lss, &mut |r| {
            storage::read_exact(r, &mut node)?;
            bitrate = storage::read_u32(r).ok();
            Ok(())
        });
        match result {
            // Node ID 0 marks an invalid record
            Ok(()) if node[0] != 0 => Some((node[0], bitrate)),
            Ok(()) | Err(StorageError::Unavailable { .. }) => None,
            Err(e) => {
                warn!("Failed to load LSS settings: {:?}", e);
                None
            }
        }
    }

    /// The stored node ID, or the active node ID when nothing is stored
    pub(crate) fn lss_persistent_node(&self) -> u8 {
        self.lss_load().map(|(node, _)| node).unwrap_or(self.node)
    }

    /// The stored bit rate, or the active bit rate when nothing is stored
    pub(crate) fn lss_persistent_bitrate(&self) -> u32 {
        self.lss_load()
            .and_then(|(_, bitrate)| bitrate)
            .unwrap_or(self.bitrate)
    }

    pub(crate) fn lss_rx(&mut self, msg: &CanMessage) {
        if msg.id() != LSS_REQ_ID || msg.rtr || msg.dlc != 8 {
            return;
        }
        let req = match LssRequest::try_from(msg.data()) {
            Ok(req) => req,
            Err(_) => {
                warn!("unknown lss command {:x}", msg.data[0]);
                return;
            }
        };

        let configuring = self.lss.state == LssState::Configuring;
        let response = match req {
            LssRequest::SwitchModeGlobal { mode } => {
                self.lss_switch_global(mode);
                None
            }
            LssRequest::ConfigureNodeId { node_id } if configuring => {
                Some(self.lss_configure_node_id(node_id))
            }
            LssRequest::ConfigureBitTiming { table, index } if configuring => {
                Some(self.lss_configure_bit_timing(table, index))
            }
            LssRequest::ActivateBitTiming { delay } if configuring => {
                self.lss_activate_bit_timing(delay);
                None
            }
            LssRequest::StoreConfiguration if configuring => Some(self.lss_store_configuration()),
            LssRequest::Inquire { field } if configuring => Some(LssResponse::Inquire {
                field,
                value: match field {
                    0..=3 => self.lss_identity(field + 1),
                    _ => self.node as u32,
                },
            }),
            LssRequest::SwitchSelective { field, value } => {
                self.lss_match(field, value);
                // Revision and serial number are matched as an inclusive range of one
                match field {
                    LssMatch::RevisionLow => self.lss_match(LssMatch::RevisionHigh, value),
                    LssMatch::SerialLow => self.lss_match(LssMatch::SerialHigh, value),
                    _ => (),
                }
                self.lss_take_match().then(|| {
                    debug!("lss state = configuring");
                    self.lss.state = LssState::Configuring;
                    LssResponse::SwitchStateResponse
                })
            }
            LssRequest::IdentifyRemote { field, value } => {
                self.lss_match(field, value);
                self.lss_take_match().then_some(LssResponse::IdentifySlave)
            }
            LssRequest::IdentifyNonConfigured => (self.node == NodeId::UNCONFIGURED)
                .then_some(LssResponse::IdentifyNonConfiguredSlave),
            // Configuration commands outside the configuration state
            _ => None,
        };

        if let Some(response) = response {
            self.send(CanMessage::new(LSS_RESP_ID, &response.to_bytes()));
        }
    }

    /// Accumulate one identity check; a miss clears all previous hits
    fn lss_match(&mut self, field: LssMatch, expected: u32) {
        let bit = 1u8 << field as u8;
        // Checks must arrive in order
        if self.lss.matched & (bit - 1) != bit - 1 {
            return;
        }
        let is_match = match field {
            LssMatch::VendorId => self.lss_identity(1) == expected,
            LssMatch::ProductCode => self.lss_identity(2) == expected,
            LssMatch::RevisionLow => self.lss_identity(3) >= expected,
            LssMatch::RevisionHigh => self.lss_identity(3) <= expected,
            LssMatch::SerialLow => self.lss_identity(4) >= expected,
            LssMatch::SerialHigh => self.lss_identity(4) <= expected,
        };
        if is_match {
            self.lss.matched |= bit;
        } else {
            self.lss.matched = 0;
        }
    }

    /// Returns true, and starts over, once every identity check has matched
    fn lss_take_match(&mut self) -> bool {
        if self.lss.matched == MATCH_ALL {
            self.lss.matched = 0;
            true
        } else {
            false
        }
    }

    fn lss_switch_global(&mut self, mode: u8) {
        let Ok(mode) = LssState::from_byte(mode) else {
            return;
        };
        let previous = self.lss.state;
        self.lss.state = mode;
        debug!("lss state = {:?}", mode);

        // An unconfigured node waits in INIT_COMM until it has been given an ID
        if previous == LssState::Configuring
            && mode == LssState::Waiting
            && self.state == State::InitComm
            && self.lss.node != NodeId::UNCONFIGURED
        {
            self.node = self.lss.node;
            // Recompute the node dependent COB-IDs
            self.od_reset(Store::Comm, 0x1000, 0x1FFF);
            self.nmt_event(Event::InitDone);
        }
    }

    fn lss_configure_node_id(&mut self, node: u8) -> LssResponse {
        if NodeId::new(node).is_ok() {
            info!("lss pending node id {}", node);
            self.lss.node = node;
            LssResponse::ConfigureNodeId { error: 0 }
        } else {
            warn!("lss bad node id {}", node);
            LssResponse::ConfigureNodeId { error: 1 }
        }
    }

    fn lss_configure_bit_timing(&mut self, table: u8, index: u8) -> LssResponse {
        match bitrate_from_index(table, index) {
            Some(bitrate) => {
                debug!("lss pending bitrate {}", bitrate);
                self.lss.bitrate = bitrate;
                LssResponse::ConfigureBitTiming { error: 0 }
            }
            None => {
                warn!("lss bad bit timing {}:{}", table, index);
                LssResponse::ConfigureBitTiming { error: 1 }
            }
        }
    }

    /// Leave the bus for `delay` ms, switch bit rate, and rejoin after another `delay` ms
    fn lss_activate_bit_timing(&mut self, delay: u16) {
        self.channel.bus_off();
        self.lss.activation = Some(Activation::Switching);
        self.lss.delay = 1000 * delay as u32;
        self.lss.timestamp = self.now;
    }

    pub(crate) fn lss_timer(&mut self) {
        let Some(activation) = self.lss.activation else {
            return;
        };
        if !is_expired(self.lss.timestamp, self.lss.delay, self.now) {
            return;
        }
        self.lss.timestamp = self.now;
        match activation {
            Activation::Switching => {
                info!("bitrate = {}", self.lss.bitrate);
                self.bitrate = self.lss.bitrate;
                self.channel.set_bitrate(self.bitrate);
                self.lss.activation = Some(Activation::Rejoining);
            }
            Activation::Rejoining => {
                self.channel.bus_on();
                self.lss.activation = None;
            }
        }
    }

    fn lss_store_configuration(&mut self) -> LssResponse {
        let Some(backend) = self.storage else {
            return LssResponse::StoreConfiguration {
                error: STORE_NOT_SUPPORTED,
            };
        };
        let (node, bitrate) = (self.lss.node, self.lss.bitrate);
        let result = backend.save(Store::Lss, &mut |w| {
            w.write_all(&[node])?;
            w.write_all(&bitrate.to_le_bytes())
        });
        match result {
            Ok(()) => LssResponse::StoreConfiguration { error: 0 },
            Err(e) => {
                warn!("Failed to store LSS settings: {:?}", e);
                LssResponse::StoreConfiguration {
                    error: STORE_FAILED,
                }
            }
        }
    }
}
