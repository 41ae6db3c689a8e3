//! Process data objects
//!
//! Each PDO slot mirrors one communication record (0x1400.. / 0x1800..) and one mapping record
//! (0x1600.. / 0x1A00..) in the dictionary. Slots are discovered from the dictionary when the
//! [`Network`] is created, so the number of PDOs is set by the objects the application declares.
//!
//! Mappings are resolved to their dictionary entry when they are written. Packing a TPDO reads
//! each mapped value through [`Network::get_value`], and unpacking an RPDO writes each value
//! through [`Network::set_value`], so handler objects and notify hooks behave the same as for SDO
//! access.
//!
//! # Transmission types
//!
//! | Value      | TPDO                                        | RPDO                        |
//! |------------|---------------------------------------------|-----------------------------|
//! | 0          | sent on the SYNC after an event             | applied on the next SYNC    |
//! | 1..=240    | sent every n-th SYNC                        | applied on the next SYNC    |
//! | 252        | sampled on SYNC, sent on remote request     | -                           |
//! | 253        | sampled and sent on remote request          | -                           |
//! | 254, 255   | sent on event, and by the event timer       | applied on reception        |

use costack_common::constants::emcy_codes;
use costack_common::messages::{CanId, CanMessage, COBID_INVALID, EXTID_MASK};
use costack_common::objects::EntryFlags;
use costack_common::sdo::AbortCode;
use costack_common::traits::CanChannel;
use costack_common::util::{byte_length, is_expired, is_padding, validate_cob_id};
use costack_common::wire::{get_bits, put_bits};
use defmt_or_log::{debug, warn};
use heapless::Vec;

use crate::config::{MAX_PDO_ENTRIES, MAX_RX_PDO, MAX_TX_PDO};
use crate::nmt::State;
use crate::object_dict::{Entry, Object};
use crate::{InitError, Network};

const TT_SYNC_ACYCLIC: u8 = 0;
const TT_SYNC_MAX: u8 = 240;
const TT_RTR_SYNC: u8 = 252;
const TT_RTR_EVENT: u8 = 253;
const TT_EVENT_MFG: u8 = 254;

/// Largest PDO payload in bits
const MAX_PDO_BITS: usize = 64;

fn is_cyclic(tt: u8) -> bool {
    (1..=TT_SYNC_MAX).contains(&tt)
}

fn is_synchronous(tt: u8) -> bool {
    tt <= TT_SYNC_MAX
}

fn is_event(tt: u8) -> bool {
    tt >= TT_EVENT_MFG
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Rx,
    Tx,
}

/// Locate the PDO addressed by a communication or mapping object index
fn decode_index(index: u16) -> Option<(Direction, u16)> {
    match index {
        0x1400..=0x15FF => Some((Direction::Rx, index - 0x1400)),
        0x1600..=0x17FF => Some((Direction::Rx, index - 0x1600)),
        0x1800..=0x19FF => Some((Direction::Tx, index - 0x1800)),
        0x1A00..=0x1BFF => Some((Direction::Tx, index - 0x1A00)),
        _ => None,
    }
}

/// One mapping parameter, with the entry it resolved to
#[derive(Clone, Copy)]
pub(crate) struct Mapping {
    pub word: u32,
    /// None for padding and unused mappings
    pub target: Option<(&'static Object, &'static Entry)>,
}

impl Mapping {
    const EMPTY: Self = Self {
        word: 0,
        target: None,
    };

    fn index(&self) -> u16 {
        (self.word >> 16) as u16
    }

    fn sub(&self) -> u8 {
        (self.word >> 8) as u8
    }

    fn bits(&self) -> usize {
        (self.word & 0xFF) as usize
    }
}

#[derive(Clone, Copy)]
pub(crate) struct Pdo {
    /// PDO number, counting from 0
    pub number: u16,
    pub cobid: u32,
    pub transmission_type: u8,
    /// Inhibit time in multiples of 100 µs
    pub inhibit_time: u16,
    /// Event timer in ms
    pub event_timer: u16,
    pub sync_start: u8,
    pub sync_counter: u8,
    /// Waiting for the SYNC counter to reach `sync_start`
    pub sync_wait: bool,
    /// TPDO: transmission is pending. RPDO: a received frame waits for SYNC.
    pub queued: bool,
    pub timestamp: u32,
    pub frame: [u8; 8],
    pub bitlength: usize,
    pub number_of_mappings: usize,
    pub mappings: [Mapping; MAX_PDO_ENTRIES],
}

impl Pdo {
    fn new(number: u16) -> Self {
        Self {
            number,
            cobid: COBID_INVALID,
            transmission_type: 0xFF,
            inhibit_time: 0,
            event_timer: 0,
            sync_start: 0,
            sync_counter: 0,
            sync_wait: false,
            queued: false,
            timestamp: 0,
            frame: [0; 8],
            bitlength: 0,
            number_of_mappings: 0,
            mappings: [Mapping::EMPTY; MAX_PDO_ENTRIES],
        }
    }

    fn is_valid(&self) -> bool {
        self.cobid & COBID_INVALID == 0
    }

    fn active_mappings(&self) -> &[Mapping] {
        &self.mappings[..self.number_of_mappings.min(MAX_PDO_ENTRIES)]
    }

    fn maps(&self, index: u16, sub: u8) -> bool {
        self.active_mappings()
            .iter()
            .any(|m| m.index() == index && m.sub() == sub)
    }

    /// Set the number of active mappings, checking that they fit in one frame
    fn set_mapping_count(&mut self, count: usize) -> Result<(), AbortCode> {
        if count > MAX_PDO_ENTRIES {
            return Err(AbortCode::PdoLength);
        }
        let bits: usize = self.mappings[..count].iter().map(Mapping::bits).sum();
        if bits > MAX_PDO_BITS {
            return Err(AbortCode::PdoLength);
        }
        self.number_of_mappings = count;
        self.bitlength = bits;
        if is_cyclic(self.sync_start) {
            self.sync_wait = true;
        }
        Ok(())
    }
}

#[allow(missing_debug_implementations)]
pub(crate) struct PdoEngine {
    pub rx: Vec<Pdo, MAX_RX_PDO>,
    pub tx: Vec<Pdo, MAX_TX_PDO>,
    /// Synchronous window length in µs, object 0x1007
    pub sync_window: u32,
    pub sync_timestamp: u32,
}

impl PdoEngine {
    /// Create a slot for every PDO communication object in the dictionary
    pub fn discover(od: &'static [Object]) -> Result<Self, InitError> {
        let mut engine = Self {
            rx: Vec::new(),
            tx: Vec::new(),
            sync_window: 0,
            sync_timestamp: 0,
        };
        for obj in od.iter().take_while(|obj| obj.index != 0) {
            match obj.index {
                0x1400..=0x15FF => engine
                    .rx
                    .push(Pdo::new(obj.index - 0x1400))
                    .map_err(|_| InitError::TooManyRxPdos { max: MAX_RX_PDO })?,
                0x1800..=0x19FF => engine
                    .tx
                    .push(Pdo::new(obj.index - 0x1800))
                    .map_err(|_| InitError::TooManyTxPdos { max: MAX_TX_PDO })?,
                _ => (),
            }
        }
        Ok(engine)
    }

    fn list(&self, dir: Direction) -> &[Pdo] {
        match dir {
            Direction::Rx => &self.rx,
            Direction::Tx => &self.tx,
        }
    }

    fn list_mut(&mut self, dir: Direction) -> &mut [Pdo] {
        match dir {
            Direction::Rx => &mut self.rx,
            Direction::Tx => &mut self.tx,
        }
    }

    fn find(&self, index: u16) -> Option<(Direction, usize)> {
        let (dir, number) = decode_index(index)?;
        let i = self.list(dir).iter().position(|p| p.number == number)?;
        Some((dir, i))
    }

    fn get(&self, index: u16) -> Result<(Direction, &Pdo), AbortCode> {
        let (dir, i) = self.find(index).ok_or(AbortCode::General)?;
        Ok((dir, &self.list(dir)[i]))
    }

    fn get_mut(&mut self, index: u16) -> Result<(Direction, &mut Pdo), AbortCode> {
        let (dir, i) = self.find(index).ok_or(AbortCode::General)?;
        Ok((dir, &mut self.list_mut(dir)[i]))
    }
}

impl<C: CanChannel> Network<C> {
    /// Recompute the mapping lengths of every PDO from its current mapping parameters
    pub(crate) fn pdo_mapping_init(&mut self) {
        for pdo in self.pdo.rx.iter_mut().chain(self.pdo.tx.iter_mut()) {
            let count = pdo.number_of_mappings;
            if pdo.set_mapping_count(count).is_err() {
                warn!("PDO {} mapping exceeds one frame, disabled", pdo.number);
                pdo.number_of_mappings = 0;
                pdo.bitlength = 0;
            }
        }
    }

    fn pdo_pack(&self, pdo: &Pdo) -> [u8; 8] {
        let mut frame = [0u8; 8];
        let mut offset = 0;
        for mapping in pdo.active_mappings() {
            let bits = mapping.bits();
            if offset + bits > MAX_PDO_BITS {
                break;
            }
            if let Some((obj, entry)) = mapping.target {
                let value = self.get_value(obj, entry, mapping.sub()).unwrap_or(0);
                put_bits(&mut frame, offset, bits, &value.to_le_bytes());
            }
            offset += bits;
        }
        frame
    }

    fn pdo_unpack(&mut self, pdo: &Pdo) {
        let mut offset = 0;
        for mapping in pdo.active_mappings() {
            let bits = mapping.bits();
            if offset + bits > MAX_PDO_BITS {
                break;
            }
            if let Some((obj, entry)) = mapping.target {
                let mut value = [0u8; 8];
                get_bits(&pdo.frame, offset, bits, &mut value);
                if let Err(abort) =
                    self.set_value(obj, entry, mapping.sub(), u64::from_le_bytes(value))
                {
                    debug!(
                        "RPDO {} write {:x}:{:x} failed: {:x}",
                        pdo.number,
                        obj.index,
                        mapping.sub(),
                        abort.raw()
                    );
                }
            }
            offset += bits;
        }
    }

    /// Sample and send TPDO `i`, unless its inhibit time is running
    fn pdo_transmit(&mut self, i: usize) {
        let pdo = self.pdo.tx[i];
        if is_event(pdo.transmission_type)
            && !is_expired(pdo.timestamp, 100 * pdo.inhibit_time as u32, self.now)
        {
            // Sent by the timer once the inhibit time is over
            self.pdo.tx[i].queued = true;
            return;
        }
        let frame = self.pdo_pack(&pdo);
        self.pdo_send(i, frame);
    }

    fn pdo_send(&mut self, i: usize, frame: [u8; 8]) {
        let pdo = &mut self.pdo.tx[i];
        pdo.frame = frame;
        pdo.timestamp = self.now;
        pdo.queued = false;

        let id = CanId::from_cob_word(pdo.cobid & EXTID_MASK);
        let len = byte_length(pdo.bitlength);
        let msg = CanMessage::new(id, &frame[..len]);
        self.send(msg);
    }

    /// Signal an event on every TPDO
    pub(crate) fn pdo_trigger(&mut self) {
        self.pdo_trigger_matching(|_| true);
    }

    /// Signal an event on every TPDO which maps `index`/`sub`
    pub(crate) fn pdo_trigger_with_obj(&mut self, index: u16, sub: u8) {
        match self.find_entry(index, sub) {
            Some((_, entry)) if entry.flags.contains(EntryFlags::TPDO) => (),
            _ => return,
        }
        self.pdo_trigger_matching(|pdo| pdo.maps(index, sub));
    }

    fn pdo_trigger_matching(&mut self, filter: impl Fn(&Pdo) -> bool) {
        if self.state != State::Op {
            return;
        }
        for i in 0..self.pdo.tx.len() {
            let pdo = &self.pdo.tx[i];
            if !pdo.is_valid() || !filter(pdo) {
                continue;
            }
            match pdo.transmission_type {
                tt if is_event(tt) => self.pdo_transmit(i),
                TT_SYNC_ACYCLIC => self.pdo.tx[i].queued = true,
                _ => (),
            }
        }
    }

    /// Event timers and inhibit-delayed events
    pub(crate) fn pdo_timer(&mut self) {
        if self.state != State::Op {
            return;
        }
        for i in 0..self.pdo.tx.len() {
            let pdo = &self.pdo.tx[i];
            if !pdo.is_valid() || !is_event(pdo.transmission_type) {
                continue;
            }
            let timer_due = pdo.event_timer != 0
                && is_expired(pdo.timestamp, 1000 * pdo.event_timer as u32, self.now);
            let inhibit_over = pdo.queued
                && is_expired(pdo.timestamp, 100 * pdo.inhibit_time as u32, self.now);
            if timer_due || inhibit_over {
                self.pdo_transmit(i);
            }
        }
    }

    /// Process a SYNC, received or produced locally
    ///
    /// `counter` is the SYNC counter, when the SYNC carries one.
    pub(crate) fn pdo_sync(&mut self, counter: Option<u8>) {
        if self.state != State::Op {
            return;
        }
        self.pdo.sync_timestamp = self.now;
        let overflow = self.sync.overflow;

        for i in 0..self.pdo.tx.len() {
            let pdo = self.pdo.tx[i];
            if !pdo.is_valid() {
                continue;
            }
            let tt = pdo.transmission_type;
            if pdo.queued && is_synchronous(tt) {
                self.pdo_transmit(i);
            } else if is_cyclic(tt) {
                let slot = &mut self.pdo.tx[i];
                if slot.sync_wait && (overflow == 0 || counter == Some(slot.sync_start)) {
                    slot.sync_wait = false;
                }
                if slot.sync_wait {
                    continue;
                }
                slot.sync_counter += 1;
                if slot.sync_counter >= tt {
                    slot.sync_counter = 0;
                    self.pdo_transmit(i);
                }
            } else if tt == TT_RTR_SYNC {
                let frame = self.pdo_pack(&pdo);
                self.pdo.tx[i].frame = frame;
            }
        }

        for i in 0..self.pdo.rx.len() {
            let pdo = self.pdo.rx[i];
            if pdo.is_valid() && pdo.queued {
                self.pdo.rx[i].queued = false;
                self.pdo_unpack(&pdo);
            }
        }

        if let Some(cb) = self.callbacks.sync {
            cb();
        }
    }

    /// Handle a frame addressed to a PDO COB-ID
    pub(crate) fn pdo_rx(&mut self, msg: &CanMessage) {
        if self.state != State::Op {
            return;
        }
        let word = msg.id().cob_word();

        if msg.rtr {
            for i in 0..self.pdo.tx.len() {
                let pdo = self.pdo.tx[i];
                if pdo.cobid != word {
                    continue;
                }
                match pdo.transmission_type {
                    TT_RTR_EVENT => self.pdo_transmit(i),
                    tt if is_event(tt) => self.pdo_transmit(i),
                    // Answered with the frame sampled at the last SYNC
                    tt if is_synchronous(tt) || tt == TT_RTR_SYNC => self.pdo_send(i, pdo.frame),
                    _ => (),
                }
            }
            return;
        }

        for i in 0..self.pdo.rx.len() {
            let pdo = self.pdo.rx[i];
            if pdo.cobid != word {
                continue;
            }
            if (msg.dlc as usize) < byte_length(pdo.bitlength) {
                self.emcy_tx(emcy_codes::PDO_LENGTH, pdo.number, None);
                continue;
            }
            let tt = pdo.transmission_type;
            if is_synchronous(tt)
                && self.pdo.sync_window != 0
                && is_expired(self.pdo.sync_timestamp, self.pdo.sync_window, self.now)
            {
                debug!("RPDO {} outside the sync window", pdo.number);
                continue;
            }

            let slot = &mut self.pdo.rx[i];
            slot.frame = [0; 8];
            slot.frame[..msg.data().len()].copy_from_slice(msg.data());
            slot.timestamp = self.now;
            if is_synchronous(tt) {
                slot.queued = true;
            } else {
                let pdo = *slot;
                self.pdo_unpack(&pdo);
            }
        }
    }

    pub(crate) fn pdo_communication_read(&self, index: u16, sub: u8) -> Result<u32, AbortCode> {
        let (dir, pdo) = self.pdo.get(index)?;
        match sub {
            1 => Ok(pdo.cobid),
            2 => Ok(pdo.transmission_type as u32),
            3 => Ok(pdo.inhibit_time as u32),
            5 => Ok(pdo.event_timer as u32),
            6 if dir == Direction::Tx => Ok(pdo.sync_start as u32),
            _ => Err(AbortCode::BadSubindex),
        }
    }

    pub(crate) fn pdo_communication_write(
        &mut self,
        index: u16,
        sub: u8,
        value: u32,
    ) -> Result<(), AbortCode> {
        // Parameters of a valid PDO are locked outside of initialisation
        let locked = !self.state.is_initialising();
        let (dir, pdo) = self.pdo.get_mut(index)?;
        match sub {
            1 => {
                if !validate_cob_id(value) {
                    return Err(AbortCode::Value);
                }
                if locked && (pdo.cobid | value) & COBID_INVALID == 0 && pdo.cobid != value {
                    return Err(AbortCode::Value);
                }
                pdo.cobid = value;
                pdo.queued = false;
                pdo.sync_counter = 0;
            }
            2 => {
                let tt = u8::try_from(value).map_err(|_| AbortCode::Value)?;
                let allowed = is_synchronous(tt)
                    || is_event(tt)
                    || (dir == Direction::Tx && (tt == TT_RTR_SYNC || tt == TT_RTR_EVENT));
                if !allowed {
                    return Err(AbortCode::Value);
                }
                pdo.transmission_type = tt;
                pdo.sync_counter = 0;
            }
            3 => {
                if dir == Direction::Tx && locked && pdo.is_valid() {
                    return Err(AbortCode::Value);
                }
                pdo.inhibit_time = value as u16;
            }
            5 => pdo.event_timer = value as u16,
            6 if dir == Direction::Tx => {
                if locked && pdo.is_valid() {
                    return Err(AbortCode::Value);
                }
                pdo.sync_start = value as u8;
            }
            _ => return Err(AbortCode::BadSubindex),
        }
        Ok(())
    }

    pub(crate) fn pdo_communication_restore(&mut self, index: u16) {
        let node = self.node as u32;
        let Ok((dir, pdo)) = self.pdo.get_mut(index) else {
            return;
        };
        // The first four PDOs in each direction have pre-defined COB-IDs
        let base = match dir {
            Direction::Rx => 0x200,
            Direction::Tx => 0x180,
        };
        let predefined = if pdo.number < 4 {
            base + 0x100 * pdo.number as u32 + node
        } else {
            0
        };
        pdo.cobid = COBID_INVALID | predefined;
        pdo.transmission_type = 0xFF;
        pdo.inhibit_time = 0;
        pdo.event_timer = 0;
        pdo.sync_start = 0;
        pdo.sync_counter = 0;
        pdo.sync_wait = false;
        pdo.queued = false;
    }

    pub(crate) fn pdo_mapping_read(&self, index: u16, sub: u8) -> Result<u32, AbortCode> {
        let (_, pdo) = self.pdo.get(index)?;
        match sub as usize {
            0 => Ok(pdo.number_of_mappings as u32),
            n @ 1..=MAX_PDO_ENTRIES => Ok(pdo.mappings[n - 1].word),
            _ => Err(AbortCode::BadSubindex),
        }
    }

    pub(crate) fn pdo_mapping_write(
        &mut self,
        index: u16,
        sub: u8,
        value: u32,
    ) -> Result<(), AbortCode> {
        let initialising = self.state.is_initialising();
        let (dir, pdo) = self.pdo.get(index)?;
        let (valid, count) = (pdo.is_valid(), pdo.number_of_mappings);
        if !initialising && valid {
            return Err(AbortCode::General);
        }

        if sub == 0 {
            let (_, pdo) = self.pdo.get_mut(index)?;
            return pdo.set_mapping_count(value as usize);
        }
        if sub as usize > MAX_PDO_ENTRIES {
            return Err(AbortCode::BadSubindex);
        }
        // Mappings only change while the count is zero
        if !initialising && count != 0 {
            return Err(AbortCode::Access);
        }

        let mut mapping = Mapping {
            word: value,
            target: None,
        };
        let (map_index, map_sub, bits) = (mapping.index(), mapping.sub(), mapping.bits());
        if value != 0 && !is_padding(map_index, map_sub) {
            let obj = self.find_object(map_index).ok_or(AbortCode::BadIndex)?;
            let entry = obj.find_entry(map_sub).ok_or(AbortCode::BadSubindex)?;
            let required = match dir {
                Direction::Rx => EntryFlags::RPDO,
                Direction::Tx => EntryFlags::TPDO,
            };
            if !entry.flags.contains(required) || entry.bitlength as usize != bits {
                return Err(AbortCode::Unmappable);
            }
            mapping.target = Some((obj, entry));
        }

        let (_, pdo) = self.pdo.get_mut(index)?;
        pdo.mappings[sub as usize - 1] = mapping;
        Ok(())
    }

    pub(crate) fn pdo_mapping_restore(&mut self, index: u16) {
        let Ok((_, pdo)) = self.pdo.get_mut(index) else {
            return;
        };
        pdo.number_of_mappings = MAX_PDO_ENTRIES;
        pdo.mappings = [Mapping::EMPTY; MAX_PDO_ENTRIES];
        pdo.bitlength = 0;
    }
}
