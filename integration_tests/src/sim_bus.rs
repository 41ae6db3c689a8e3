//! A simulated CAN bus connecting several channels in one process
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use costack_common::messages::CanMessage;
use costack_common::traits::{CanChannel, CanSendError, CanState, CanStateError};

type Queue = Arc<Mutex<VecDeque<CanMessage>>>;

#[derive(Debug, Default)]
struct Shared {
    queues: Vec<(usize, Queue)>,
    history: Vec<CanMessage>,
    next_id: usize,
}

/// Every frame sent by one channel is delivered to all the others
#[derive(Debug, Clone, Default)]
pub struct SimBus {
    shared: Arc<Mutex<Shared>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new channel to the bus
    pub fn new_channel(&self) -> SimChannel {
        let rx = Queue::default();
        let mut shared = self.shared.lock().unwrap();
        let id = shared.next_id;
        shared.next_id += 1;
        shared.queues.push((id, rx.clone()));
        SimChannel {
            id,
            bus: self.clone(),
            rx,
            bitrate: 0,
            on_bus: false,
            bus_off_count: 0,
        }
    }

    /// All frames sent on the bus so far
    pub fn history(&self) -> Vec<CanMessage> {
        self.shared.lock().unwrap().history.clone()
    }

    pub fn clear_history(&self) {
        self.shared.lock().unwrap().history.clear();
    }

    /// Number of frames waiting in any channel
    pub fn pending(&self) -> usize {
        let shared = self.shared.lock().unwrap();
        shared
            .queues
            .iter()
            .map(|(_, q)| q.lock().unwrap().len())
            .sum()
    }

    /// Put a frame on the bus as if sent by a device which is not simulated
    pub fn inject(&self, msg: CanMessage) {
        self.deliver(usize::MAX, msg);
    }

    fn deliver(&self, from: usize, msg: CanMessage) {
        let mut shared = self.shared.lock().unwrap();
        shared.history.push(msg);
        for (id, queue) in shared.queues.iter() {
            if *id != from {
                queue.lock().unwrap().push_back(msg);
            }
        }
    }
}

#[derive(Debug)]
pub struct SimChannel {
    id: usize,
    bus: SimBus,
    rx: Queue,
    pub bitrate: u32,
    pub on_bus: bool,
    pub bus_off_count: usize,
}

impl CanChannel for SimChannel {
    fn send(&mut self, msg: CanMessage) -> Result<(), CanSendError> {
        if !self.on_bus {
            return Err(CanSendError(msg));
        }
        self.bus.deliver(self.id, msg);
        Ok(())
    }

    fn receive(&mut self) -> Option<CanMessage> {
        self.rx.lock().unwrap().pop_front()
    }

    fn set_bitrate(&mut self, bitrate: u32) {
        self.bitrate = bitrate;
    }

    fn set_filter(&mut self, _ids: &[u16]) {}

    fn bus_on(&mut self) {
        self.on_bus = true;
    }

    fn bus_off(&mut self) {
        self.on_bus = false;
        self.bus_off_count += 1;
    }

    fn get_state(&mut self) -> Result<CanState, CanStateError> {
        Ok(CanState::default())
    }
}
