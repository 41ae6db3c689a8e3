//! Emergency producer and consumer, error register and CAN controller supervision

use costack_common::constants::{emcy_codes, error_register};
use costack_common::messages::{CanId, CanMessage, EmcyMessage, COBID_INVALID, EXTID_MASK};
use costack_common::sdo::AbortCode;
use costack_common::traits::{CanChannel, CanState};
use costack_common::util::{is_expired, validate_cob_id};
use defmt_or_log::error;

use crate::config::{MAX_EMCY_COBIDS, MAX_ERRORS};
use crate::nmt::{Event, State};
use crate::Network;

/// Register bits owned by the communication supervision
const COMMUNICATION: u8 = error_register::COMMUNICATION;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Emcy {
    pub cobid: u32,
    /// Inhibit time in multiples of 100 µs
    pub inhibit: u16,
    pub timestamp: u32,
    pub error: u8,
    pub errors: [u32; MAX_ERRORS],
    pub number_of_errors: usize,
    pub cobids: [u32; MAX_EMCY_COBIDS],
    pub error_behavior: u8,
    pub can_state: CanState,
    pub bus_off_timestamp: u32,
    pub node_guard_error: bool,
    pub heartbeat_error: bool,
}

impl Default for Emcy {
    fn default() -> Self {
        Self {
            cobid: COBID_INVALID,
            inhibit: 0,
            timestamp: 0,
            error: 0,
            errors: [0; MAX_ERRORS],
            number_of_errors: 0,
            cobids: [COBID_INVALID; MAX_EMCY_COBIDS],
            error_behavior: 0,
            can_state: CanState::default(),
            bus_off_timestamp: 0,
            node_guard_error: false,
            heartbeat_error: false,
        }
    }
}

impl Emcy {
    /// Insert an error at the top of the history, dropping the oldest when full
    fn push_error(&mut self, error: u32) {
        self.errors.copy_within(0..MAX_ERRORS - 1, 1);
        self.errors[0] = error;
        self.number_of_errors = (self.number_of_errors + 1).min(MAX_ERRORS);
    }

    pub fn clear_history(&mut self) {
        self.errors = [0; MAX_ERRORS];
        self.number_of_errors = 0;
    }

    pub fn clear_consumers(&mut self) {
        self.cobids = [COBID_INVALID; MAX_EMCY_COBIDS];
    }
}

impl<C: CanChannel> Network<C> {
    /// Produce an emergency
    ///
    /// The error is recorded in the history (0x1003), sent subject to the inhibit time and passed
    /// to the EMCY callback.
    pub(crate) fn emcy_tx(&mut self, code: u16, info: u16, msef: Option<[u8; 5]>) {
        self.emcy.push_error(((info as u32) << 16) | code as u32);

        let register = self.emcy_register_get();
        let msg = EmcyMessage {
            code,
            register,
            msef: msef.unwrap_or_default(),
        };

        let inhibit_us = 100 * self.emcy.inhibit as u32;
        if self.emcy.cobid & COBID_INVALID == 0
            && is_expired(self.emcy.timestamp, inhibit_us, self.now)
        {
            error!("emcy {:x}", code);
            let id = CanId::from_cob_word(self.emcy.cobid & EXTID_MASK);
            self.send(CanMessage::new(id, &msg.to_bytes()));
            self.emcy.timestamp = self.now;
        }

        let mut escalate = code == emcy_codes::HEARTBEAT;
        if code != emcy_codes::BUS_OFF_RECOVERED {
            if let Some(cb) = self.callbacks.emcy {
                escalate |= cb(self.node, code, register, msef);
            }
        }
        if escalate {
            self.emcy_error_behavior();
        }
    }

    fn emcy_error_behavior(&mut self) {
        match self.emcy.error_behavior {
            0 if self.state == State::Op => self.nmt_event(Event::PreOp),
            2 => self.nmt_event(Event::Stop),
            _ => (),
        }
    }

    pub(crate) fn emcy_rx(&mut self, msg: &CanMessage) {
        let word = msg.cob_word();
        if !self.emcy.cobids.contains(&word) {
            return;
        }
        let Ok(emcy) = EmcyMessage::try_from(msg.data()) else {
            return;
        };
        let node = (msg.id().raw() & 0x7F) as u8;
        for _ in self.emcy.cobids.iter().filter(|&&cobid| cobid == word) {
            if let Some(cb) = self.callbacks.emcy {
                cb(node, emcy.code, emcy.register, Some(emcy.msef));
            }
        }
    }

    /// The error register value, with the generic bit set when any error is present
    pub(crate) fn emcy_register_get(&self) -> u8 {
        let mut register = self.emcy.error;
        if register != 0 {
            register |= error_register::GENERIC;
        }
        register
    }

    pub(crate) fn emcy_register_set(&mut self, mask: u8) {
        self.emcy.error |= mask;
    }

    /// Clear bits of the error register
    ///
    /// An "error reset" emergency is produced if any of the bits were set.
    pub(crate) fn emcy_register_clear(&mut self, mask: u8) {
        if self.emcy.error & mask != 0 {
            self.emcy.error &= !mask;
            self.emcy_tx(emcy_codes::NO_ERROR, 0, None);
        }
    }

    /// Poll the controller state and produce emergencies on error state changes
    pub(crate) fn emcy_handle_can_state(&mut self) {
        let Ok(state) = self.channel.get_state() else {
            return;
        };
        let previous = self.emcy.can_state;
        self.emcy.can_state = state;

        if state.overrun && !previous.overrun {
            self.emcy_register_set(COMMUNICATION);
            self.emcy_tx(emcy_codes::CAN_OVERRUN, 0, None);
        }
        if state.error_passive && !previous.error_passive {
            self.emcy_register_set(COMMUNICATION);
            self.emcy_tx(emcy_codes::CAN_ERROR_PASSIVE, 0, None);
        }
        if state.bus_off && !previous.bus_off {
            // Nothing can be sent while bus off, so only the application is told
            self.emcy_register_set(COMMUNICATION);
            self.emcy.bus_off_timestamp = self.now;
            let register = self.emcy_register_get();
            if let Some(cb) = self.callbacks.emcy {
                cb(self.node, emcy_codes::BUS_OFF_RECOVERED, register, None);
            }
            self.emcy_error_behavior();
        }
        if !state.bus_off && previous.bus_off {
            self.emcy_tx(emcy_codes::BUS_OFF_RECOVERED, 0, None);
        }

        let restart_us = self.restart_ms.saturating_mul(1000);
        if state.bus_off
            && self.restart_ms > 0
            && is_expired(self.emcy.bus_off_timestamp, restart_us, self.now)
        {
            self.channel.bus_on();
            self.emcy.bus_off_timestamp = self.now;
        }

        if !(state.overrun
            || state.error_passive
            || state.bus_off
            || self.emcy.node_guard_error
            || self.emcy.heartbeat_error)
        {
            self.emcy_register_clear(COMMUNICATION);
        }
    }

    pub(crate) fn emcy_history_read(&self, sub: u8) -> Result<u32, AbortCode> {
        let count = self.emcy.number_of_errors;
        match sub as usize {
            0 => Ok(count as u32),
            n if n <= count => Ok(self.emcy.errors[n - 1]),
            n if n <= MAX_ERRORS => Err(AbortCode::NoData),
            _ => Err(AbortCode::BadSubindex),
        }
    }

    pub(crate) fn emcy_history_write(&mut self, sub: u8, value: u32) -> Result<(), AbortCode> {
        match (sub, value) {
            (0, 0) => {
                self.emcy.clear_history();
                Ok(())
            }
            (0, _) => Err(AbortCode::Value),
            _ => Err(AbortCode::AccessRo),
        }
    }

    pub(crate) fn emcy_cobid_write(&mut self, value: u32) -> Result<(), AbortCode> {
        if !validate_cob_id(value) {
            return Err(AbortCode::Value);
        }
        self.emcy.cobid = value;
        Ok(())
    }

    pub(crate) fn emcy_consumer_read(&self, sub: u8) -> Result<u32, AbortCode> {
        match sub as usize {
            n @ 1..=MAX_EMCY_COBIDS => Ok(self.emcy.cobids[n - 1]),
            _ => Err(AbortCode::BadSubindex),
        }
    }

    pub(crate) fn emcy_consumer_write(&mut self, sub: u8, value: u32) -> Result<(), AbortCode> {
        let n = match sub as usize {
            n @ 1..=MAX_EMCY_COBIDS => n - 1,
            _ => return Err(AbortCode::BadSubindex),
        };
        // A valid COB-ID may only be replaced after it has been disabled
        if (self.emcy.cobids[n] | value) & COBID_INVALID == 0 {
            return Err(AbortCode::Value);
        }
        self.emcy.cobids[n] = value;
        Ok(())
    }

    pub(crate) fn error_behavior_read(&self, sub: u8) -> Result<u32, AbortCode> {
        match sub {
            1 => Ok(self.emcy.error_behavior as u32),
            _ => Err(AbortCode::BadSubindex),
        }
    }

    pub(crate) fn error_behavior_write(&mut self, sub: u8, value: u32) -> Result<(), AbortCode> {
        match sub {
            1 => {
                self.emcy.error_behavior = value as u8;
                Ok(())
            }
            _ => Err(AbortCode::BadSubindex),
        }
    }
}
