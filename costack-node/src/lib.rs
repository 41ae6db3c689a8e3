//! A CANopen (CiA 301) node stack
//!
//! `costack-node` implements the communication side of a CANopen device: the object dictionary
//! and its persistence, NMT, SDO server and client, PDOs, SYNC, EMCY, heartbeat, node guarding and
//! the LSS slave. It is `no_std` by default when the `std` feature is disabled, and needs no heap.
//!
//! ## Object dictionary
//!
//! The application declares its dictionary as a static table of [`Object`](object_dict::Object)s,
//! sorted by index. Values live in atomics owned by the application, so they can be read and
//! written from outside the stack at any time. The communication objects the stack implements
//! are available ready-made in [`objects`].
//!
//! ## Running a node
//!
//! The stack talks to the controller through the
//! [`CanChannel`](common::traits::CanChannel) trait. Create a [`Network`] from a channel and a
//! [`NetworkConfig`], then call [`Network::start`] once. After that, pass received frames to
//! [`Network::process_frame`] (or let [`Network::handle_rx`] drain the channel) and call
//! [`Network::handle_periodic`] about once per millisecond.
//!
//! ```ignore
//! let mut net = Network::new(channel, NetworkConfig::new(5, &OD))?;
//! net.start(now_us());
//! loop {
//!     net.handle_rx(now_us());
//!     net.handle_periodic(now_us());
//! }
//! ```
//!
//! With the `std` feature, [`dispatcher::Dispatcher`] runs the network on its own thread and
//! hands out a [`dispatcher::Client`] which can be used from any thread.
//!
//! ## Persistence
//!
//! Provide an [`ObjectStorage`](storage::ObjectStorage) implementation in the configuration to
//! support the store (0x1010) and restore (0x1011) commands and to keep LSS assigned node IDs
//! and bit rates across resets.
#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
#![warn(missing_docs, missing_debug_implementations)]
#![allow(clippy::comparison_chain)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod dispatcher;
mod emcy;
mod heartbeat;
mod lss_slave;
mod network;
pub mod nmt;
mod node_guard;
pub mod object_dict;
pub mod objects;
mod od;
mod pdo;
mod persist;
mod sdo_client;
mod sdo_server;
pub mod storage;
mod sync;

#[cfg(test)]
mod test_utils;

pub use costack_common as common;

pub use config::{Callbacks, NetworkConfig};
pub use network::{InitError, Network};
pub use nmt::State;
pub use sdo_client::{SdoClientError, SdoClientResult, SdoData};
