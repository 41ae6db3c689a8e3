//! Node guarding slave

use costack_common::constants::{emcy_codes, error_register};
use costack_common::messages::{CanMessage, Heartbeat, HEARTBEAT_ID, RTR_FLAG};
use costack_common::traits::CanChannel;
use costack_common::util::is_expired;
use defmt_or_log::error;

use crate::Network;

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct NodeGuard {
    /// Guard time in ms
    pub guard_time: u16,
    pub life_time_factor: u8,
    pub toggle: bool,
    pub is_alive: bool,
    pub timestamp: u32,
}

impl<C: CanChannel> Network<C> {
    pub(crate) fn node_guard_rx(&mut self, msg: &CanMessage) {
        let expected = RTR_FLAG | (HEARTBEAT_ID as u32 + self.node as u32);
        if msg.cob_word() != expected || msg.dlc != 1 {
            return;
        }

        self.node_guard.is_alive = true;
        self.node_guard.timestamp = self.now;

        // With a heartbeat producer configured, guarding requests are not answered
        if self.heartbeat.producer_time == 0 {
            let toggle = self.node_guard.toggle;
            self.node_guard.toggle = !toggle;
            self.send(
                Heartbeat {
                    node: self.node,
                    toggle,
                    state: self.state.into(),
                }
                .into(),
            );
        }
    }

    pub(crate) fn node_guard_timer(&mut self) {
        if self.state.is_initialising() {
            return;
        }
        // Life time in µs wraps like the microsecond clock
        let life_time = (self.node_guard.guard_time as u32)
            .wrapping_mul(self.node_guard.life_time_factor as u32)
            .wrapping_mul(1000);
        if life_time != 0
            && self.node_guard.is_alive
            && is_expired(self.node_guard.timestamp, life_time, self.now)
        {
            self.node_guard.is_alive = false;
            error!("node guarding expired");
            self.emcy.node_guard_error = true;
            self.emcy_register_set(error_register::COMMUNICATION);
            self.emcy_tx(emcy_codes::HEARTBEAT, 0, None);
        }
    }
}
