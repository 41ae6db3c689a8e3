//! Common functionality shared among the costack crates.
//!
//! This crate holds the pieces of the CANopen protocol which do not depend on a running node:
//! CAN frame types, the SDO and LSS wire codecs, abort codes, COB-ID helpers and the
//! [`CanChannel`](traits::CanChannel) trait which the node stack drives.
//!
//! Most users will have no reason to depend on this crate directly, as it is re-exported by
//! `costack-node`.
#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs, missing_copy_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod atomic_cell;
pub use atomic_cell::AtomicCell;
pub mod constants;
#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod device_config;
pub mod lss;
pub mod messages;
pub mod node_id;
pub mod node_set;
pub mod objects;
pub mod sdo;
pub mod traits;
pub mod util;
pub mod wire;

pub use node_id::NodeId;
pub use node_set::NodeSet;

pub use messages::{CanId, CanMessage};
