//! NMT slave state machine
//!
//! The state machine is a dense table indexed by state and event. Each cell holds the next state
//! and an optional action; an action may return a follow-up event, which is processed
//! immediately. This is how a reset cascades through the initialisation states to
//! pre-operational in a single call.

use costack_common::messages::{
    CanMessage, Heartbeat, NmtCommandCmd, NmtState, NMT_CMD_ID,
};
use costack_common::traits::CanChannel;
use costack_common::NodeId;
use defmt_or_log::{error, info};

use crate::storage::Store;
use crate::Network;

/// The NMT state of the local node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Not started
    Off,
    /// Power-on initialisation
    InitPwrOn,
    /// Resetting the application objects
    InitApp,
    /// Resetting the communication objects
    ///
    /// An unconfigured node remains here until an LSS master assigns a node ID.
    InitComm,
    /// Pre-operational
    PreOp,
    /// Operational
    Op,
    /// Stopped
    Stop,
}

impl State {
    /// Returns true in any of the initialisation states
    ///
    /// Communication parameters which are otherwise locked may be written freely while
    /// initialising.
    pub fn is_initialising(&self) -> bool {
        matches!(
            self,
            State::Off | State::InitPwrOn | State::InitApp | State::InitComm
        )
    }
}

impl From<State> for NmtState {
    fn from(value: State) -> Self {
        match value {
            State::Stop => NmtState::Stopped,
            State::Op => NmtState::Operational,
            State::PreOp => NmtState::PreOperational,
            _ => NmtState::Bootup,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    None,
    PowerOn,
    InitDone,
    Start,
    PreOp,
    Stop,
    Reset,
    ResetComm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    PowerOn,
    ResetApp,
    ResetComm,
    Bootup,
    Start,
}

const STATE_COUNT: usize = 7;
const EVENT_COUNT: usize = 8;

const STATES: [State; STATE_COUNT] = [
    State::Off,
    State::InitPwrOn,
    State::InitApp,
    State::InitComm,
    State::PreOp,
    State::Op,
    State::Stop,
];

type Transition = (State, Option<Action>);

const fn build_transitions() -> [[Transition; EVENT_COUNT]; STATE_COUNT] {
    use Action as A;
    use Event as E;
    use State as S;

    // Every event not listed below leaves the state unchanged
    let mut table = [[(S::Off, None); EVENT_COUNT]; STATE_COUNT];
    let mut s = 0;
    while s < STATE_COUNT {
        let mut e = 0;
        while e < EVENT_COUNT {
            table[s][e] = (STATES[s], None);
            e += 1;
        }
        s += 1;
    }

    table[S::Off as usize][E::Reset as usize] = (S::InitPwrOn, Some(A::PowerOn));
    table[S::InitPwrOn as usize][E::InitDone as usize] = (S::InitApp, Some(A::ResetApp));
    table[S::InitApp as usize][E::InitDone as usize] = (S::InitComm, Some(A::ResetComm));
    table[S::InitComm as usize][E::InitDone as usize] = (S::PreOp, Some(A::Bootup));

    table[S::PreOp as usize][E::Start as usize] = (S::Op, Some(A::Start));
    table[S::PreOp as usize][E::Stop as usize] = (S::Stop, None);
    table[S::Op as usize][E::PreOp as usize] = (S::PreOp, None);
    table[S::Op as usize][E::Stop as usize] = (S::Stop, None);
    table[S::Stop as usize][E::Start as usize] = (S::Op, Some(A::Start));
    table[S::Stop as usize][E::PreOp as usize] = (S::PreOp, None);

    let running = [S::PreOp, S::Op, S::Stop];
    let mut i = 0;
    while i < running.len() {
        table[running[i] as usize][E::Reset as usize] = (S::InitApp, Some(A::ResetApp));
        table[running[i] as usize][E::ResetComm as usize] = (S::InitComm, Some(A::ResetComm));
        i += 1;
    }

    table
}

static TRANSITIONS: [[Transition; EVENT_COUNT]; STATE_COUNT] = build_transitions();

impl<C: CanChannel> Network<C> {
    /// Feed an event to the state machine, following up on events raised by actions
    pub(crate) fn nmt_event(&mut self, mut event: Event) {
        while event != Event::None {
            let (next, action) = TRANSITIONS[self.state as usize][event as usize];
            let changed = next != self.state;
            self.state = next;
            if changed {
                info!("state = {:?}", next);
            }

            event = match action {
                Some(action) => self.apply_action(action),
                None => Event::None,
            };

            if changed {
                if let Some(cb) = self.callbacks.nmt {
                    cb(next);
                }
            }
        }
    }

    fn apply_action(&mut self, action: Action) -> Event {
        match action {
            Action::PowerOn => {
                self.lss_init();
                let bitrate = self.lss_persistent_bitrate();
                self.lss.bitrate = bitrate;
                self.bitrate = bitrate;
                Event::InitDone
            }
            Action::ResetApp => {
                self.od_reset(Store::Mfg, 0x2000, 0x5FFF);
                self.od_reset(Store::App, 0x6000, 0x9FFF);
                self.lss.node = self.lss_persistent_node();
                Event::InitDone
            }
            Action::ResetComm => {
                // Adopt the pending ID first, so that restored COB-IDs use it
                let configured = self.lss.node != NodeId::UNCONFIGURED;
                if configured {
                    self.node = self.lss.node;
                }
                self.od_reset(Store::Comm, 0x1000, 0x1FFF);

                self.channel.bus_off();
                self.channel.set_bitrate(self.bitrate);
                self.channel.set_filter(&[]);
                self.channel.bus_on();

                if configured {
                    Event::InitDone
                } else {
                    Event::None
                }
            }
            Action::Bootup => {
                self.send(
                    Heartbeat {
                        node: self.node,
                        toggle: false,
                        state: NmtState::Bootup,
                    }
                    .into(),
                );
                Event::None
            }
            Action::Start => {
                self.pdo_mapping_init();
                self.pdo_trigger();
                Event::None
            }
        }
    }

    /// Apply an NMT command to the local node
    pub(crate) fn nmt_command(&mut self, cmd: NmtCommandCmd) {
        let event = match cmd {
            NmtCommandCmd::Start => Event::Start,
            NmtCommandCmd::Stop => Event::Stop,
            NmtCommandCmd::EnterPreOp => Event::PreOp,
            NmtCommandCmd::ResetApp => {
                if let Some(cb) = self.callbacks.reset {
                    cb();
                }
                Event::Reset
            }
            NmtCommandCmd::ResetComm => Event::ResetComm,
        };
        self.nmt_event(event);
    }

    pub(crate) fn nmt_rx(&mut self, msg: &CanMessage) {
        if msg.id() != NMT_CMD_ID || msg.rtr || msg.dlc != 2 {
            return;
        }
        let node = msg.data[1];
        if node != 0 && node != self.node {
            return;
        }
        match NmtCommandCmd::from_byte(msg.data[0]) {
            Ok(cmd) => self.nmt_command(cmd),
            Err(_) => error!("bad nmt command {:x}", msg.data[0]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_network, TEST_NODE};
    use costack_common::messages::CanId;

    const EVENTS: [Event; EVENT_COUNT] = [
        Event::None,
        Event::PowerOn,
        Event::InitDone,
        Event::Start,
        Event::PreOp,
        Event::Stop,
        Event::Reset,
        Event::ResetComm,
    ];

    #[test]
    fn test_table_is_total() {
        let listed = [
            (State::Off, Event::Reset, State::InitPwrOn),
            (State::InitPwrOn, Event::InitDone, State::InitApp),
            (State::InitApp, Event::InitDone, State::InitComm),
            (State::InitComm, Event::InitDone, State::PreOp),
            (State::PreOp, Event::Start, State::Op),
            (State::PreOp, Event::Stop, State::Stop),
            (State::PreOp, Event::Reset, State::InitApp),
            (State::PreOp, Event::ResetComm, State::InitComm),
            (State::Op, Event::PreOp, State::PreOp),
            (State::Op, Event::Stop, State::Stop),
            (State::Op, Event::Reset, State::InitApp),
            (State::Op, Event::ResetComm, State::InitComm),
            (State::Stop, Event::Start, State::Op),
            (State::Stop, Event::PreOp, State::PreOp),
            (State::Stop, Event::Reset, State::InitApp),
            (State::Stop, Event::ResetComm, State::InitComm),
        ];

        for state in STATES {
            for event in EVENTS {
                let (next, action) = TRANSITIONS[state as usize][event as usize];
                match listed.iter().find(|(s, e, _)| *s == state && *e == event) {
                    Some((_, _, expected)) => assert_eq!(*expected, next),
                    None => {
                        assert_eq!(state, next, "{state:?} {event:?}");
                        assert_eq!(None, action, "{state:?} {event:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_boot_to_preop() {
        let mut net = test_network();
        net.start(0);
        assert_eq!(State::PreOp, net.nmt_state());
        let bootup = net.channel.sent.last().unwrap();
        assert_eq!(CanId::Std(0x700 + TEST_NODE as u16), bootup.id());
        assert_eq!(&[0], bootup.data());
    }

    #[test]
    fn test_nmt_commands() {
        let mut net = test_network();
        net.start(0);

        let start = CanMessage::new(NMT_CMD_ID, &[1, TEST_NODE]);
        net.process_frame(0, &start);
        assert_eq!(State::Op, net.nmt_state());

        // Addressed to another node
        net.process_frame(0, &CanMessage::new(NMT_CMD_ID, &[2, TEST_NODE + 1]));
        assert_eq!(State::Op, net.nmt_state());

        // Broadcast stop
        net.process_frame(0, &CanMessage::new(NMT_CMD_ID, &[2, 0]));
        assert_eq!(State::Stop, net.nmt_state());

        // Wrong length and unknown commands are dropped
        net.process_frame(0, &CanMessage::new(NMT_CMD_ID, &[0x80]));
        net.process_frame(0, &CanMessage::new(NMT_CMD_ID, &[0x33, 0]));
        assert_eq!(State::Stop, net.nmt_state());

        net.process_frame(0, &CanMessage::new(NMT_CMD_ID, &[0x80, 0]));
        assert_eq!(State::PreOp, net.nmt_state());

        net.channel.sent.clear();
        net.process_frame(0, &CanMessage::new(NMT_CMD_ID, &[0x82, 0]));
        assert_eq!(State::PreOp, net.nmt_state());
        // Reset communication ends with a new boot-up message
        assert_eq!(1, net.channel.sent.len());
        assert_eq!(CanId::Std(0x700 + TEST_NODE as u16), net.channel.sent[0].id());
    }
}
