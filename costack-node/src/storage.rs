//! Persistent storage backend
//!
//! The stack persists object values in four independent stores, selected by [`Store`]. The
//! application provides the medium by implementing [`ObjectStorage`]; the stack serializes and
//! parses the data itself.
//!
//! Access to a store is bracketed by a closure: the backend opens the store, hands a reader or
//! writer to the closure, and closes the store afterwards. A backend should only commit data
//! written during [`ObjectStorage::save`] if the closure returns `Ok`, so that a failed store
//! leaves the previous contents in place.

use snafu::Snafu;

/// Selects one of the persistent stores
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Store {
    /// Communication objects, 0x1000 to 0x1FFF
    Comm,
    /// Standardized device profile objects, 0x6000 to 0x9FFF
    App,
    /// Manufacturer specific objects, 0x2000 to 0x5FFF
    Mfg,
    /// LSS node ID and bit rate
    Lss,
}

/// Errors reported by a storage backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// The store has never been written, or could not be opened
    #[snafu(display("Store {store:?} is not available"))]
    Unavailable {
        /// The store which was requested
        store: Store,
    },
    /// The stored data ended before a complete record was read
    #[snafu(display("Unexpected end of stored data"))]
    UnexpectedEof,
    /// The stored data is malformed
    #[snafu(display("Invalid record in stored data"))]
    InvalidRecord,
    /// The medium has no room for the data
    #[snafu(display("Storage medium is full"))]
    Full,
    /// The medium reported an error
    #[snafu(display("Storage device error"))]
    Device,
}

impl embedded_io::Error for StorageError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            StorageError::Unavailable { .. } => embedded_io::ErrorKind::NotFound,
            StorageError::UnexpectedEof | StorageError::InvalidRecord => {
                embedded_io::ErrorKind::InvalidData
            }
            StorageError::Full => embedded_io::ErrorKind::OutOfMemory,
            StorageError::Device => embedded_io::ErrorKind::Other,
        }
    }
}

/// A reader over the contents of a store
pub type StoreReader<'a> = dyn embedded_io::Read<Error = StorageError> + 'a;
/// A writer into a store
pub type StoreWriter<'a> = dyn embedded_io::Write<Error = StorageError> + 'a;

/// Implemented by the application to provide persistent storage
pub trait ObjectStorage: Sync {
    /// Open `store` for reading and pass a reader to `f`
    fn load(
        &self,
        store: Store,
        f: &mut dyn FnMut(&mut StoreReader<'_>) -> Result<(), StorageError>,
    ) -> Result<(), StorageError>;

    /// Open `store` for writing and pass a writer to `f`
    ///
    /// The new contents replace the old ones only if `f` returns `Ok`.
    fn save(
        &self,
        store: Store,
        f: &mut dyn FnMut(&mut StoreWriter<'_>) -> Result<(), StorageError>,
    ) -> Result<(), StorageError>;
}

/// Fill `buf` completely from `reader`
pub(crate) fn read_exact(reader: &mut StoreReader<'_>, buf: &mut [u8]) -> Result<(), StorageError> {
    reader.read_exact(buf).map_err(|e| match e {
        embedded_io::ReadExactError::UnexpectedEof => StorageError::UnexpectedEof,
        embedded_io::ReadExactError::Other(e) => e,
    })
}

pub(crate) fn read_u32(reader: &mut StoreReader<'_>) -> Result<u32, StorageError> {
    let mut buf = [0; 4];
    read_exact(reader, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read and discard `len` bytes
pub(crate) fn skip(reader: &mut StoreReader<'_>, mut len: usize) -> Result<(), StorageError> {
    let mut buf = [0; 8];
    while len > 0 {
        let n = len.min(buf.len());
        read_exact(reader, &mut buf[..n])?;
        len -= n;
    }
    Ok(())
}

#[cfg(feature = "std")]
mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    struct SliceReader<'a>(&'a [u8]);

    impl embedded_io::ErrorType for SliceReader<'_> {
        type Error = StorageError;
    }

    impl embedded_io::Read for SliceReader<'_> {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            let n = buf.len().min(self.0.len());
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0 = &self.0[n..];
            Ok(n)
        }
    }

    struct VecWriter(Vec<u8>);

    impl embedded_io::ErrorType for VecWriter {
        type Error = StorageError;
    }

    impl embedded_io::Write for VecWriter {
        fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    /// An [`ObjectStorage`] which keeps every store in memory
    ///
    /// Useful for tests, and for hosted nodes which persist the stores themselves with
    /// [`MemoryStorage::get`] and [`MemoryStorage::set`].
    #[derive(Debug, Default)]
    pub struct MemoryStorage {
        stores: Mutex<HashMap<Store, Vec<u8>>>,
    }

    impl MemoryStorage {
        /// Create an empty storage
        pub fn new() -> Self {
            Self::default()
        }

        /// Get a copy of the raw contents of a store
        pub fn get(&self, store: Store) -> Option<Vec<u8>> {
            self.stores
                .lock()
                .ok()
                .and_then(|stores| stores.get(&store).cloned())
        }

        /// Replace the raw contents of a store
        pub fn set(&self, store: Store, data: Vec<u8>) {
            if let Ok(mut stores) = self.stores.lock() {
                stores.insert(store, data);
            }
        }

        /// Delete a store
        pub fn clear(&self, store: Store) {
            if let Ok(mut stores) = self.stores.lock() {
                stores.remove(&store);
            }
        }
    }

    impl ObjectStorage for MemoryStorage {
        fn load(
            &self,
            store: Store,
            f: &mut dyn FnMut(&mut StoreReader<'_>) -> Result<(), StorageError>,
        ) -> Result<(), StorageError> {
            let data = self.get(store).ok_or(StorageError::Unavailable { store })?;
            f(&mut SliceReader(&data))
        }

        fn save(
            &self,
            store: Store,
            f: &mut dyn FnMut(&mut StoreWriter<'_>) -> Result<(), StorageError>,
        ) -> Result<(), StorageError> {
            let mut writer = VecWriter(Vec::new());
            f(&mut writer)?;
            self.set(store, writer.0);
            Ok(())
        }
    }
}

#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub use memory::MemoryStorage;
