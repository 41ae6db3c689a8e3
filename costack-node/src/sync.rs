//! SYNC producer

use costack_common::messages::{CanId, SyncObject, EXTID_MASK};
use costack_common::sdo::AbortCode;
use costack_common::traits::CanChannel;
use costack_common::util::{is_expired, validate_cob_id};

use crate::nmt::State;
use crate::Network;

/// Bit 30 of the SYNC COB-ID: this node produces SYNC
const SYNC_PRODUCER: u32 = 1 << 30;

#[derive(Debug, Clone, Copy)]
pub(crate) struct SyncProducer {
    pub cobid: u32,
    /// Communication cycle period in µs
    pub period: u32,
    pub overflow: u8,
    pub counter: u8,
    pub timestamp: u32,
}

impl Default for SyncProducer {
    fn default() -> Self {
        Self {
            cobid: 0x80,
            period: 0,
            overflow: 0,
            counter: 1,
            timestamp: 0,
        }
    }
}

impl<C: CanChannel> Network<C> {
    pub(crate) fn sync_timer(&mut self) {
        if !matches!(self.state, State::PreOp | State::Op) {
            return;
        }
        let sync = self.sync;
        if sync.cobid & SYNC_PRODUCER == 0
            || sync.period == 0
            || !is_expired(sync.timestamp, sync.period, self.now)
        {
            return;
        }
        self.sync.timestamp = self.now;

        let id = CanId::from_cob_word(sync.cobid & EXTID_MASK);
        if sync.overflow != 0 {
            self.send(SyncObject::new(sync.counter).to_can_message(id));
            self.pdo_sync(Some(sync.counter));
            self.sync.counter = if sync.counter >= sync.overflow {
                1
            } else {
                sync.counter + 1
            };
        } else {
            self.send(SyncObject::default().to_can_message(id));
            self.pdo_sync(None);
        }
    }

    pub(crate) fn sync_cobid_write(&mut self, value: u32) -> Result<(), AbortCode> {
        if !validate_cob_id(value) {
            return Err(AbortCode::Value);
        }
        // The ID cannot change while this node is producing
        if value & self.sync.cobid & SYNC_PRODUCER != 0 {
            return Err(AbortCode::General);
        }
        self.sync.cobid = value;
        self.sync.timestamp = self.now;
        Ok(())
    }

    pub(crate) fn sync_overflow_write(&mut self, value: u32) -> Result<(), AbortCode> {
        if !self.state.is_initialising() {
            if self.sync.period != 0 {
                return Err(AbortCode::WriteStateDenied);
            }
            if value == 1 || value > 240 {
                return Err(AbortCode::Value);
            }
        }
        self.sync.overflow = value as u8;
        self.sync.timestamp = self.now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::test_network;

    use super::*;

    #[test]
    fn test_producer_counter() {
        let mut net = test_network();
        net.start(0);
        net.write(0x1019, 0, 3).unwrap();
        net.write(0x1006, 0, 1000).unwrap();
        net.write(0x1005, 0, 0x4000_0080).unwrap();
        net.channel.sent.clear();

        for t in 1..=4 {
            net.handle_periodic(t * 1000);
        }
        let counts: Vec<Vec<u8>> = net.channel.sent.iter().map(|m| m.data().to_vec()).collect();
        assert_eq!(vec![vec![1], vec![2], vec![3], vec![1]], counts);
        assert!(net.channel.sent.iter().all(|m| m.id() == CanId::Std(0x80)));
    }

    #[test]
    fn test_producer_without_counter() {
        let mut net = test_network();
        net.start(0);
        net.write(0x1006, 0, 500).unwrap();
        net.write(0x1005, 0, 0x4000_0080).unwrap();
        net.channel.sent.clear();

        net.handle_periodic(499);
        assert!(net.channel.sent.is_empty());
        net.handle_periodic(500);
        assert_eq!(0, net.channel.sent[0].dlc);

        // Producer ID is locked while producing
        assert_eq!(Err(AbortCode::General), net.write(0x1005, 0, 0x4000_0081));
        // Overflow is locked while the period is set
        assert_eq!(
            Err(AbortCode::WriteStateDenied),
            net.write(0x1019, 0, 4)
        );
    }

    #[test]
    fn test_overflow_limits() {
        let mut net = test_network();
        net.start(0);
        assert_eq!(Err(AbortCode::Value), net.write(0x1019, 0, 1));
        assert_eq!(Err(AbortCode::Value), net.write(0x1019, 0, 241));
        net.write(0x1019, 0, 240).unwrap();
        assert_eq!(Err(AbortCode::Value), net.write(0x1005, 0, 0x4000_0701));
    }
}
