//! Heartbeat producer and consumer

use costack_common::constants::{emcy_codes, error_register};
use costack_common::messages::{CanMessage, Heartbeat as HeartbeatMessage};
use costack_common::sdo::AbortCode;
use costack_common::traits::CanChannel;
use costack_common::util::is_expired;
use defmt_or_log::{debug, error};

use crate::config::MAX_HEARTBEATS;
use crate::Network;

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Consumer {
    pub node: u8,
    /// Timeout in ms
    pub time: u16,
    pub timestamp: u32,
    pub is_alive: bool,
    /// Set on expiry, cleared when the node is heard from again
    pub expired: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Heartbeat {
    /// Producer period in ms, 0 disables
    pub producer_time: u16,
    pub timestamp: u32,
    pub consumers: [Consumer; MAX_HEARTBEATS],
}

impl Heartbeat {
    pub fn clear_consumers(&mut self) {
        self.consumers = [Consumer::default(); MAX_HEARTBEATS];
    }
}

impl<C: CanChannel> Network<C> {
    pub(crate) fn heartbeat_rx(&mut self, node: u8, msg: &CanMessage) {
        // Node guarding requests share the function code
        if msg.rtr || msg.dlc == 0 {
            return;
        }
        self.nodes.set(node);

        let now = self.now;
        for consumer in self.heartbeat.consumers.iter_mut() {
            if consumer.node == node && consumer.node != 0 {
                debug!("heartbeat from node {}", node);
                consumer.timestamp = now;
                consumer.is_alive = true;
                consumer.expired = false;
            }
        }
    }

    pub(crate) fn heartbeat_timer(&mut self) {
        if self.state.is_initialising() {
            return;
        }

        let producer_time = self.heartbeat.producer_time as u32;
        if producer_time != 0 && is_expired(self.heartbeat.timestamp, 1000 * producer_time, self.now)
        {
            self.heartbeat.timestamp = self.now;
            let msg = HeartbeatMessage {
                node: self.node,
                toggle: false,
                state: self.state.into(),
            };
            self.send(msg.into());
        }

        let mut heartbeat_error = false;
        for i in 0..MAX_HEARTBEATS {
            let consumer = self.heartbeat.consumers[i];
            if !(1..=127).contains(&consumer.node) || consumer.time == 0 {
                continue;
            }
            if !consumer.is_alive {
                heartbeat_error |= consumer.expired;
                continue;
            }
            if is_expired(consumer.timestamp, 1000 * consumer.time as u32, self.now) {
                self.heartbeat.consumers[i].is_alive = false;
                self.heartbeat.consumers[i].expired = true;
                self.nodes.clear(consumer.node);
                error!("node {} heartbeat expired", consumer.node);
                heartbeat_error = true;
                self.emcy_register_set(error_register::COMMUNICATION);
                self.emcy_tx(emcy_codes::HEARTBEAT, 0, None);
            }
        }
        self.emcy.heartbeat_error = heartbeat_error;
    }

    pub(crate) fn heartbeat_consumer_read(&self, sub: u8) -> Result<u32, AbortCode> {
        let consumer = match sub as usize {
            n @ 1..=MAX_HEARTBEATS => self.heartbeat.consumers[n - 1],
            _ => return Err(AbortCode::BadSubindex),
        };
        Ok(((consumer.node as u32) << 16) | consumer.time as u32)
    }

    pub(crate) fn heartbeat_consumer_write(&mut self, sub: u8, value: u32) -> Result<(), AbortCode> {
        let n = match sub as usize {
            n @ 1..=MAX_HEARTBEATS => n - 1,
            _ => return Err(AbortCode::BadSubindex),
        };
        let node = ((value >> 16) & 0xFF) as u8;
        let time = (value & 0xFFFF) as u16;

        // A node may only be monitored by one slot
        let duplicate = self
            .heartbeat
            .consumers
            .iter()
            .enumerate()
            .any(|(i, c)| i != n && node != 0 && c.node == node);
        if duplicate {
            return Err(AbortCode::ParamIncompatible);
        }

        let consumer = &mut self.heartbeat.consumers[n];
        consumer.node = node;
        consumer.time = time;
        consumer.expired = false;
        Ok(())
    }
}
