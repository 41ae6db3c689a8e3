//! Value access on the dictionary owned by a [`Network`]
//!
//! Everything which touches a dictionary value goes through [`Network::get_value`] and
//! [`Network::set_value`]: SDO transfers, PDO packing and unpacking, defaults, persistence and
//! the application. This is where handler objects are routed to their implementation.

use costack_common::objects::EntryFlags;
use costack_common::sdo::AbortCode;
use costack_common::traits::CanChannel;
use defmt_or_log::{debug, warn};

use crate::object_dict::{find_object, Access, Entry, Object, Storage};
use crate::Network;

impl<C: CanChannel> Network<C> {
    /// Find an object in the dictionary
    pub fn find_object(&self, index: u16) -> Option<&'static Object> {
        find_object(self.od, index)
    }

    /// Find an object and the entry describing one of its sub indices
    pub fn find_entry(&self, index: u16, sub: u8) -> Option<(&'static Object, &'static Entry)> {
        let obj = self.find_object(index)?;
        Some((obj, obj.find_entry(sub)?))
    }

    /// Read the value of sub index `sub`, zero extended to 64 bits
    ///
    /// Byte string entries return their first 8 bytes.
    pub fn get_value(&self, obj: &Object, entry: &Entry, sub: u8) -> Result<u64, AbortCode> {
        if obj.access.is_handler() {
            match self.access_read(obj, sub) {
                Err(AbortCode::BadSubindex) if sub == 0 => (),
                result => return result.map(u64::from),
            }
        }
        match entry.storage {
            Storage::None => Ok(entry.value),
            storage => storage.load(entry.element(sub)).ok_or(AbortCode::General),
        }
    }

    /// Write the value of sub index `sub`
    ///
    /// The value is truncated to the width of the storage. The application notify hook is
    /// called for entries flagged [`EntryFlags::NOTIFY`].
    pub fn set_value(
        &mut self,
        obj: &Object,
        entry: &Entry,
        sub: u8,
        value: u64,
    ) -> Result<(), AbortCode> {
        debug!("set {:x}:{:x} = {:x}", obj.index, sub, value);

        let result = if obj.access.is_handler() {
            self.access_write(obj, sub, value as u32)
        } else if entry.datatype.storage_bits().is_some()
            && entry.storage.store(entry.element(sub), value)
        {
            Ok(())
        } else {
            return Err(AbortCode::General);
        };

        self.notify(obj, entry, sub);
        result
    }

    fn notify(&mut self, obj: &Object, entry: &Entry, sub: u8) {
        if !entry.flags.contains(EntryFlags::NOTIFY) {
            return;
        }
        if let Some(cb) = self.callbacks.notify {
            cb(obj.index, sub);
        }
        if entry.flags.contains(EntryFlags::TPDO) {
            self.pdo_trigger_with_obj(obj.index, sub);
        }
    }

    /// Read a value by index and sub index
    pub fn read(&self, index: u16, sub: u8) -> Result<u64, AbortCode> {
        let obj = self.find_object(index).ok_or(AbortCode::BadIndex)?;
        let entry = obj.find_entry(sub).ok_or(AbortCode::BadSubindex)?;
        self.get_value(obj, entry, sub)
    }

    /// Write a value by index and sub index
    pub fn write(&mut self, index: u16, sub: u8, value: u64) -> Result<(), AbortCode> {
        let obj = self.find_object(index).ok_or(AbortCode::BadIndex)?;
        let entry = obj.find_entry(sub).ok_or(AbortCode::BadSubindex)?;
        self.set_value(obj, entry, sub, value)
    }

    /// Copy bytes out of a byte string entry, starting at `offset`
    ///
    /// Returns the number of bytes copied.
    pub fn read_bytes(
        &self,
        obj: &Object,
        entry: &Entry,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<usize, AbortCode> {
        match entry.storage {
            Storage::Bytes(_) if !obj.access.is_handler() => {
                Ok(entry.storage.read_bytes(offset, buf))
            }
            _ => Err(AbortCode::General),
        }
    }

    /// Copy bytes into a byte string entry, starting at `offset`
    pub fn write_bytes(
        &mut self,
        obj: &Object,
        entry: &Entry,
        offset: usize,
        data: &[u8],
    ) -> Result<(), AbortCode> {
        match entry.storage {
            Storage::Bytes(_) if !obj.access.is_handler() => {
                if !entry.storage.write_bytes(offset, data) {
                    return Err(AbortCode::LengthTooHigh);
                }
                self.notify(obj, entry, entry.subindex);
                Ok(())
            }
            _ => Err(AbortCode::General),
        }
    }

    fn objects_in(&self, min: u16, max: u16) -> impl Iterator<Item = &'static Object> {
        let od: &'static [Object] = self.od;
        od.iter()
            .take_while(|obj| obj.index != 0)
            .filter(move |obj| (min..=max).contains(&obj.index))
    }

    /// Reset every object in `min..=max` to its power-on value
    ///
    /// Handler objects are restored by their handler; everything else writable is zeroed.
    pub(crate) fn od_zero(&mut self, min: u16, max: u16) {
        for obj in self.objects_in(min, max) {
            if obj.access.is_handler() {
                self.access_restore(obj);
                continue;
            }
            for entry in obj.entries {
                if entry.flags.contains(EntryFlags::WRITE) {
                    entry.storage.zero();
                }
            }
        }
    }

    /// Apply the configured default values in `min..=max`
    pub(crate) fn od_set_defaults(&mut self, min: u16, max: u16) {
        let defaults = self.defaults;
        for default in defaults
            .iter()
            .filter(|d| (min..=max).contains(&d.index))
        {
            let Some(obj) = self.find_object(default.index) else {
                continue;
            };
            let Some(entry) = obj.find_entry(default.sub) else {
                warn!("bad subindex {:x}:{:x}", default.index, default.sub);
                continue;
            };
            if let Err(abort) = self.set_value(obj, entry, default.sub, default.value) {
                warn!(
                    "default {:x}:{:x} rejected: {:x}",
                    default.index,
                    default.sub,
                    abort.raw()
                );
            }
        }
    }

    pub(crate) fn access_read(&self, obj: &Object, sub: u8) -> Result<u32, AbortCode> {
        match obj.access {
            Access::None => Err(AbortCode::General),
            Access::ErrorRegister => Ok(self.emcy_register_get() as u32),
            Access::ErrorHistory => self.emcy_history_read(sub),
            Access::SyncCobId => Ok(self.sync.cobid),
            Access::SyncPeriod => Ok(self.sync.period),
            Access::SyncWindow => Ok(self.pdo.sync_window),
            Access::GuardTime => Ok(self.node_guard.guard_time as u32),
            Access::LifeTimeFactor => Ok(self.node_guard.life_time_factor as u32),
            Access::StoreParameters | Access::RestoreDefaults => self.storage_command_read(sub),
            Access::EmcyCobId => Ok(self.emcy.cobid),
            Access::EmcyInhibit => Ok(self.emcy.inhibit as u32),
            Access::HeartbeatConsumer => self.heartbeat_consumer_read(sub),
            Access::HeartbeatProducer => Ok(self.heartbeat.producer_time as u32),
            Access::SyncOverflow => Ok(self.sync.overflow as u32),
            Access::VerifyConfiguration => self.verify_configuration_read(sub),
            Access::EmcyConsumer => self.emcy_consumer_read(sub),
            Access::ErrorBehavior => self.error_behavior_read(sub),
            Access::PdoCommunication => self.pdo_communication_read(obj.index, sub),
            Access::PdoMapping => self.pdo_mapping_read(obj.index, sub),
            Access::Application(handler) => handler.read(obj, sub),
        }
    }

    pub(crate) fn access_write(
        &mut self,
        obj: &Object,
        sub: u8,
        value: u32,
    ) -> Result<(), AbortCode> {
        match obj.access {
            Access::None => Err(AbortCode::General),
            // The register is computed from the error state
            Access::ErrorRegister => Ok(()),
            Access::ErrorHistory => self.emcy_history_write(sub, value),
            Access::SyncCobId => self.sync_cobid_write(value),
            Access::SyncPeriod => {
                self.sync.period = value;
                Ok(())
            }
            Access::SyncWindow => {
                self.pdo.sync_window = value;
                Ok(())
            }
            Access::GuardTime => {
                self.node_guard.guard_time = value as u16;
                Ok(())
            }
            Access::LifeTimeFactor => {
                self.node_guard.life_time_factor = value as u8;
                Ok(())
            }
            Access::StoreParameters => self.store_parameters_write(sub, value),
            Access::RestoreDefaults => self.restore_defaults_write(sub, value),
            Access::EmcyCobId => self.emcy_cobid_write(value),
            Access::EmcyInhibit => {
                self.emcy.inhibit = value as u16;
                Ok(())
            }
            Access::HeartbeatConsumer => self.heartbeat_consumer_write(sub, value),
            Access::HeartbeatProducer => {
                self.heartbeat.producer_time = value as u16;
                Ok(())
            }
            Access::SyncOverflow => self.sync_overflow_write(value),
            Access::VerifyConfiguration => self.verify_configuration_write(sub, value),
            Access::EmcyConsumer => self.emcy_consumer_write(sub, value),
            Access::ErrorBehavior => self.error_behavior_write(sub, value),
            Access::PdoCommunication => self.pdo_communication_write(obj.index, sub, value),
            Access::PdoMapping => self.pdo_mapping_write(obj.index, sub, value),
            Access::Application(handler) => handler.write(obj, sub, value),
        }
    }

    pub(crate) fn access_restore(&mut self, obj: &Object) {
        match obj.access {
            Access::None
            | Access::ErrorRegister
            | Access::StoreParameters
            | Access::RestoreDefaults
            | Access::VerifyConfiguration => (),
            Access::ErrorHistory => self.emcy.clear_history(),
            Access::SyncCobId => self.sync.cobid = 0x80,
            Access::SyncPeriod => {
                self.sync.period = 0;
                self.sync.counter = 1;
            }
            Access::SyncWindow => self.pdo.sync_window = 0,
            Access::GuardTime => self.node_guard.guard_time = 0,
            Access::LifeTimeFactor => self.node_guard.life_time_factor = 0,
            Access::EmcyCobId => self.emcy.cobid = 0x80 + self.node as u32,
            Access::EmcyInhibit => self.emcy.inhibit = 0,
            Access::HeartbeatConsumer => self.heartbeat.clear_consumers(),
            Access::HeartbeatProducer => self.heartbeat.producer_time = 0,
            Access::SyncOverflow => self.sync.overflow = 0,
            Access::EmcyConsumer => self.emcy.clear_consumers(),
            Access::ErrorBehavior => self.emcy.error_behavior = 0,
            Access::PdoCommunication => self.pdo_communication_restore(obj.index),
            Access::PdoMapping => self.pdo_mapping_restore(obj.index),
            Access::Application(handler) => handler.restore(obj),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_network, NAME_LEN};

    #[test]
    fn test_get_set_storage() {
        let mut net = test_network();
        net.write(0x2000, 0, 0x1_2345).unwrap();
        assert_eq!(0x2345, net.read(0x2000, 0).unwrap());

        net.write(0x2002, 0, u64::MAX - 1).unwrap();
        assert_eq!(u64::MAX - 1, net.read(0x2002, 0).unwrap());
        net.write(0x2001, 3, 0xDEAD_BEEF).unwrap();
        assert_eq!(0xDEAD_BEEF, net.read(0x2001, 3).unwrap());
        assert_eq!(0, net.read(0x2001, 2).unwrap());

        assert_eq!(Err(AbortCode::BadIndex), net.read(0x2FFF, 0));
        assert_eq!(Err(AbortCode::BadSubindex), net.read(0x2000, 1));
    }

    #[test]
    fn test_string_access() {
        let mut net = test_network();
        let (obj, entry) = net.find_entry(0x2003, 0).unwrap();
        net.write_bytes(obj, entry, 0, b"costack-node").unwrap();
        assert_eq!(
            Err(AbortCode::LengthTooHigh),
            net.write_bytes(obj, entry, 10, b"too long")
        );
        assert_eq!(u64::from_le_bytes(*b"costack-"), net.read(0x2003, 0).unwrap());
        // Strings are not written as integers
        assert_eq!(Err(AbortCode::General), net.write(0x2003, 0, 1));

        let mut buf = [0u8; 4];
        assert_eq!(4, net.read_bytes(obj, entry, 8, &mut buf).unwrap());
        assert_eq!(b"node", &buf);
        assert_eq!(NAME_LEN, entry.storage.byte_len());
    }

    #[test]
    fn test_handler_sub0_falls_through() {
        let net = test_network();
        // 0x1016 declines sub 0, which then reads the constant count
        assert_eq!(8, net.read(0x1016, 0).unwrap());
    }

    #[test]
    fn test_zero_and_defaults() {
        let mut net = test_network();
        net.write(0x2000, 0, 77).unwrap();
        net.write(0x1017, 0, 500).unwrap();

        net.od_zero(0x1000, 0x9FFF);
        assert_eq!(0, net.read(0x2000, 0).unwrap());
        assert_eq!(0, net.read(0x1017, 0).unwrap());

        net.od_set_defaults(0x1000, 0x9FFF);
        // See the defaults table in test_utils
        assert_eq!(0x1111, net.read(0x2000, 0).unwrap());
        assert_eq!(0x00FE, net.read(0x1800, 2).unwrap());
    }
}
