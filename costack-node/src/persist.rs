//! Saving and loading dictionary values
//!
//! A store holds a little-endian record stream:
//!
//! ```text
//! u32 count
//! count × { u16 index, u8 sub, u32 size, size bytes of value }
//! ```
//!
//! Records which do not match a writable, persistent entry of the running dictionary are skipped,
//! so that a store written by a different firmware version still loads everything it can.
//!
//! Objects 0x1010 (store parameters), 0x1011 (restore default parameters) and 0x1020 (verify
//! configuration) are implemented here as well.

use costack_common::constants::values::{LOAD_CMD, SAVE_CMD};
use costack_common::objects::EntryFlags;
use costack_common::sdo::AbortCode;
use costack_common::traits::CanChannel;
use defmt_or_log::{error, warn};

use crate::object_dict::{Entry, Object, Storage};
use crate::storage::{self, StorageError, Store, StoreReader, StoreWriter};
use crate::Network;

/// Index ranges covered by each store
const COMM_RANGE: (u16, u16) = (0x1000, 0x1FFF);
const MFG_RANGE: (u16, u16) = (0x2000, 0x5FFF);
const APP_RANGE: (u16, u16) = (0x6000, 0x9FFF);

const RECORD_HEADER_SIZE: usize = 7;

fn write_all(writer: &mut StoreWriter<'_>, data: &[u8]) -> Result<(), StorageError> {
    writer.write_all(data)
}

/// Verify configuration state, object 0x1020
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct VerifyConfiguration {
    pub dirty: bool,
    pub date: u32,
    pub time: u32,
}

impl<C: CanChannel> Network<C> {
    fn persisted_entries(
        &self,
        min: u16,
        max: u16,
    ) -> impl Iterator<Item = (&'static Object, &'static Entry, u8)> + '_ {
        let od: &'static [Object] = self.od;
        od.iter()
            .take_while(|obj| obj.index != 0)
            .filter(move |obj| (min..=max).contains(&obj.index))
            .flat_map(|obj| {
                (0..=obj.max_subindex)
                    .filter_map(move |sub| obj.find_entry(sub).map(|entry| (obj, entry, sub)))
            })
            .filter(|(_, entry, _)| {
                entry.flags.contains(EntryFlags::WRITE)
                    && !entry.flags.contains(EntryFlags::TRANSIENT)
            })
            .filter(move |(obj, entry, sub)| {
                matches!(entry.storage, Storage::Bytes(_))
                    || self.get_value(obj, entry, *sub).is_ok()
            })
    }

    /// Save every persistent entry in `min..=max` to `store`
    pub fn od_store(&mut self, store: Store, min: u16, max: u16) -> Result<(), AbortCode> {
        let Some(backend) = self.storage else {
            return Err(AbortCode::HwError);
        };

        let result = backend.save(store, &mut |w| {
            let count = self.persisted_entries(min, max).count() as u32;
            write_all(w, &count.to_le_bytes())?;

            for (obj, entry, sub) in self.persisted_entries(min, max) {
                let mut header = [0u8; RECORD_HEADER_SIZE];
                header[0..2].copy_from_slice(&obj.index.to_le_bytes());
                header[2] = sub;

                if let Storage::Bytes(_) = entry.storage {
                    let size = entry.storage.byte_len();
                    header[3..7].copy_from_slice(&(size as u32).to_le_bytes());
                    write_all(w, &header)?;
                    let mut chunk = [0u8; 8];
                    let mut offset = 0;
                    while offset < size {
                        let n = entry.storage.read_bytes(offset, &mut chunk);
                        write_all(w, &chunk[..n])?;
                        offset += n;
                    }
                } else {
                    let size = entry.bytelength().min(8);
                    let value = self.get_value(obj, entry, sub).unwrap_or(0);
                    header[3..7].copy_from_slice(&(size as u32).to_le_bytes());
                    write_all(w, &header)?;
                    write_all(w, &value.to_le_bytes()[..size])?;
                }
            }
            Ok(())
        });

        result.map_err(|e| {
            error!("Failed to store OD: {:?}", e);
            AbortCode::HwError
        })
    }

    /// Load stored values in `min..=max` from `store`
    ///
    /// A missing store is not an error; the current values are kept.
    pub fn od_load(&mut self, store: Store, min: u16, max: u16) -> Result<(), AbortCode> {
        let Some(backend) = self.storage else {
            return Ok(());
        };

        match backend.load(store, &mut |r| self.load_records(r, min, max)) {
            Ok(()) | Err(StorageError::Unavailable { .. }) => Ok(()),
            Err(e) => {
                error!("Failed to load OD: {:?}", e);
                Err(AbortCode::General)
            }
        }
    }

    fn load_records(
        &mut self,
        r: &mut StoreReader<'_>,
        min: u16,
        max: u16,
    ) -> Result<(), StorageError> {
        let count = storage::read_u32(r)?;
        for _ in 0..count {
            let mut header = [0u8; RECORD_HEADER_SIZE];
            storage::read_exact(r, &mut header)?;
            let index = u16::from_le_bytes([header[0], header[1]]);
            let sub = header[2];
            let size = u32::from_le_bytes([header[3], header[4], header[5], header[6]]) as usize;
            if size == 0 {
                return Err(StorageError::InvalidRecord);
            }

            let target = self
                .find_entry(index, sub)
                .filter(|_| (min..=max).contains(&index))
                .filter(|(_, entry)| {
                    entry.flags.contains(EntryFlags::WRITE)
                        && !entry.flags.contains(EntryFlags::TRANSIENT)
                });
            let Some((obj, entry)) = target else {
                storage::skip(r, size)?;
                continue;
            };

            if let Storage::Bytes(_) = entry.storage {
                if size != entry.storage.byte_len() {
                    storage::skip(r, size)?;
                    continue;
                }
                let mut chunk = [0u8; 8];
                let mut offset = 0;
                while offset < size {
                    let n = (size - offset).min(chunk.len());
                    storage::read_exact(r, &mut chunk[..n])?;
                    entry.storage.write_bytes(offset, &chunk[..n]);
                    offset += n;
                }
            } else if size <= 8 {
                let mut buf = [0u8; 8];
                storage::read_exact(r, &mut buf[..size])?;
                if let Err(abort) = self.set_value(obj, entry, sub, u64::from_le_bytes(buf)) {
                    warn!("stored {:x}:{:x} rejected: {:x}", index, sub, abort.raw());
                }
            } else {
                storage::skip(r, size)?;
            }
        }
        Ok(())
    }

    /// Replace the contents of `store` with an empty record set
    pub fn od_restore(&mut self, store: Store) -> Result<(), AbortCode> {
        let Some(backend) = self.storage else {
            return Err(AbortCode::HwError);
        };
        backend
            .save(store, &mut |w| write_all(w, &0u32.to_le_bytes()))
            .map_err(|e| {
                error!("Failed to restore OD: {:?}", e);
                AbortCode::HwError
            })
    }

    /// Zero, apply defaults and load stored values for `min..=max`
    pub fn od_reset(&mut self, store: Store, min: u16, max: u16) {
        self.od_zero(min, max);
        self.od_set_defaults(min, max);
        // Failures are logged; the defaults remain in effect
        let _ = self.od_load(store, min, max);
    }

    fn for_each_store(
        &mut self,
        sub: u8,
        mut f: impl FnMut(&mut Self, Store, (u16, u16)) -> Result<(), AbortCode>,
    ) -> Result<(), AbortCode> {
        match sub {
            1 => {
                f(self, Store::Comm, COMM_RANGE)?;
                f(self, Store::Mfg, MFG_RANGE)?;
                f(self, Store::App, APP_RANGE)
            }
            2 => f(self, Store::Comm, COMM_RANGE),
            3 => f(self, Store::App, APP_RANGE),
            4 => f(self, Store::Mfg, MFG_RANGE),
            _ => Err(AbortCode::BadSubindex),
        }
    }

    /// Read handler shared by 0x1010 and 0x1011
    ///
    /// Every sub index reports that the command is supported.
    pub(crate) fn storage_command_read(&self, sub: u8) -> Result<u32, AbortCode> {
        match sub {
            1..=4 => Ok(1),
            _ => Err(AbortCode::BadSubindex),
        }
    }

    pub(crate) fn store_parameters_write(&mut self, sub: u8, value: u32) -> Result<(), AbortCode> {
        if !(1..=4).contains(&sub) {
            return Err(AbortCode::BadSubindex);
        }
        if value != SAVE_CMD {
            return Err(AbortCode::Write);
        }
        self.for_each_store(sub, |net, store, (min, max)| net.od_store(store, min, max))
    }

    pub(crate) fn restore_defaults_write(&mut self, sub: u8, value: u32) -> Result<(), AbortCode> {
        if !(1..=4).contains(&sub) {
            return Err(AbortCode::BadSubindex);
        }
        if value != LOAD_CMD {
            return Err(AbortCode::Write);
        }
        self.for_each_store(sub, |net, store, _| net.od_restore(store))
    }

    pub(crate) fn verify_configuration_read(&self, sub: u8) -> Result<u32, AbortCode> {
        let verify = &self.verify;
        match sub {
            1 if verify.dirty => Ok(0),
            1 => Ok(verify.date),
            2 if verify.dirty => Ok(0),
            2 => Ok(verify.time),
            _ => Err(AbortCode::BadSubindex),
        }
    }

    pub(crate) fn verify_configuration_write(
        &mut self,
        sub: u8,
        value: u32,
    ) -> Result<(), AbortCode> {
        match sub {
            1 => self.verify.date = value,
            2 => self.verify.time = value,
            _ => return Err(AbortCode::BadSubindex),
        }
        self.verify.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{network_with_storage, NAME_LEN};

    #[test]
    fn test_store_zero_load_roundtrip() {
        let (mut net, storage) = network_with_storage();
        net.write(0x2000, 0, 0xBEEF).unwrap();
        net.write(0x2001, 2, 0x1122_3344).unwrap();
        let (obj, entry) = net.find_entry(0x2003, 0).unwrap();
        net.write_bytes(obj, entry, 0, b"0123456789AB").unwrap();
        net.write(0x1017, 0, 250).unwrap();

        net.od_store(Store::Mfg, 0x2000, 0x5FFF).unwrap();
        net.od_store(Store::Comm, 0x1000, 0x1FFF).unwrap();
        assert!(storage.get(Store::Mfg).is_some());

        net.od_zero(0x1000, 0x5FFF);
        assert_eq!(0, net.read(0x2000, 0).unwrap());
        assert_eq!(0, net.read(0x1017, 0).unwrap());

        net.od_load(Store::Mfg, 0x2000, 0x5FFF).unwrap();
        net.od_load(Store::Comm, 0x1000, 0x1FFF).unwrap();
        assert_eq!(0xBEEF, net.read(0x2000, 0).unwrap());
        assert_eq!(0x1122_3344, net.read(0x2001, 2).unwrap());
        assert_eq!(250, net.read(0x1017, 0).unwrap());
        let mut name = [0u8; NAME_LEN];
        net.read_bytes(obj, entry, 0, &mut name).unwrap();
        assert_eq!(b"0123456789AB", &name);
    }

    #[test]
    fn test_load_skips_unknown_records() {
        let (mut net, storage) = network_with_storage();
        let mut data = vec![];
        data.extend_from_slice(&3u32.to_le_bytes());
        // Unknown object
        data.extend_from_slice(&[0x00, 0x50, 0, 3, 0, 0, 0, 1, 2, 3]);
        // Read-only constant
        data.extend_from_slice(&[0x05, 0x20, 0, 1, 0, 0, 0, 9]);
        // A known entry
        data.extend_from_slice(&[0x00, 0x20, 0, 2, 0, 0, 0, 0x34, 0x12]);
        storage.set(Store::Mfg, data);

        net.od_load(Store::Mfg, 0x2000, 0x5FFF).unwrap();
        assert_eq!(0x1234, net.read(0x2000, 0).unwrap());
    }

    #[test]
    fn test_truncated_store_fails() {
        let (mut net, storage) = network_with_storage();
        storage.set(Store::Mfg, vec![1, 0, 0, 0, 0x00, 0x20]);
        assert_eq!(
            Err(AbortCode::General),
            net.od_load(Store::Mfg, 0x2000, 0x5FFF)
        );

        storage.set(Store::Mfg, vec![1, 0, 0, 0, 0x00, 0x20, 0, 0, 0, 0, 0]);
        assert_eq!(
            Err(AbortCode::General),
            net.od_load(Store::Mfg, 0x2000, 0x5FFF)
        );
    }

    #[test]
    fn test_storage_command_objects() {
        let (mut net, storage) = network_with_storage();
        assert_eq!(1, net.read(0x1010, 2).unwrap());
        assert_eq!(4, net.read(0x1010, 0).unwrap());
        assert_eq!(Err(AbortCode::Write), net.write(0x1010, 1, 0x1234));

        net.write(0x2000, 0, 99).unwrap();
        net.write(0x1010, 4, SAVE_CMD as u64).unwrap();
        assert!(storage.get(Store::Mfg).is_some());
        assert!(storage.get(Store::Comm).is_none());

        net.write(0x1011, 1, LOAD_CMD as u64).unwrap();
        assert_eq!(Some(vec![0, 0, 0, 0]), storage.get(Store::Mfg));
        assert_eq!(Some(vec![0, 0, 0, 0]), storage.get(Store::Comm));
    }

    #[test]
    fn test_verify_configuration() {
        let (mut net, _) = network_with_storage();
        net.write(0x1020, 1, 100).unwrap();
        net.write(0x1020, 2, 200).unwrap();
        assert_eq!(100, net.read(0x1020, 1).unwrap());
        net.verify.dirty = true;
        assert_eq!(0, net.read(0x1020, 1).unwrap());
        assert_eq!(0, net.read(0x1020, 2).unwrap());
        net.write(0x1020, 2, 300).unwrap();
        assert_eq!(100, net.read(0x1020, 1).unwrap());
        assert_eq!(300, net.read(0x1020, 2).unwrap());
    }
}
