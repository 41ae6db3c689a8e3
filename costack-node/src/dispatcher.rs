//! Threaded dispatcher
//!
//! Runs a [`Network`] on its own thread. Every interaction with the network is a job posted to
//! a bounded queue and processed in order. A second thread posts a tick every [`TICK_US`] to run
//! the protocol timers. Ticks also poll the channel, so a receive notification through
//! [`Client::notify_rx`] only shortens the latency.
//!
//! The [`Client`] handle posts jobs and waits for their completion, either by blocking or through
//! the `_async` variants. It can be cloned and shared between threads.
//!
//! ```ignore
//! let dispatcher = Dispatcher::spawn(Network::new(channel, config)?);
//! let client = dispatcher.client();
//! let device_type = client.sdo_read(5, 0x1000, 0)?;
//! client.nmt(NmtCommandCmd::Start, 0)?;
//! dispatcher.shutdown()?;
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use costack_common::messages::{CanMessage, NmtCommandCmd};
use costack_common::traits::CanChannel;
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use defmt_or_log::{debug, warn};
use futures::channel::oneshot;
use futures::executor::block_on;
use snafu::{ResultExt, Snafu};

use crate::config::{JOB_QUEUE_SIZE, TICK_US};
use crate::sdo_client::{SdoClientError, SdoClientResult, SdoData};
use crate::Network;

/// Error returned by [`Client`] calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
pub enum ClientError {
    /// The dispatcher thread has exited
    #[snafu(display("Dispatcher has stopped"))]
    Stopped,
    /// The SDO transfer failed
    #[snafu(display("SDO transfer failed: {source}"))]
    Sdo {
        /// The transfer error
        source: SdoClientError,
    },
    /// The data does not fit in an SDO transfer buffer
    #[snafu(display("SDO data too long"))]
    TooLong,
}

/// A unit of work for the dispatcher thread
#[derive(Debug)]
pub(crate) enum Job {
    /// Drain frames pending on the channel
    Receive,
    /// Process a frame received elsewhere
    Frame(CanMessage),
    /// Run the protocol timers
    Tick,
    SdoRead {
        node: u8,
        index: u16,
        sub: u8,
        done: oneshot::Sender<SdoClientResult>,
    },
    SdoWrite {
        node: u8,
        index: u16,
        sub: u8,
        data: SdoData,
        done: oneshot::Sender<SdoClientResult>,
    },
    PdoEvent {
        done: oneshot::Sender<()>,
    },
    PdoObjEvent {
        index: u16,
        sub: u8,
        done: oneshot::Sender<()>,
    },
    Emcy {
        code: u16,
        info: u16,
        msef: Option<[u8; 5]>,
        done: oneshot::Sender<()>,
    },
    ErrorSet {
        mask: u8,
        done: oneshot::Sender<()>,
    },
    ErrorClear {
        mask: u8,
        done: oneshot::Sender<()>,
    },
    ErrorGet {
        done: oneshot::Sender<u8>,
    },
    Nmt {
        cmd: NmtCommandCmd,
        node: u8,
        done: oneshot::Sender<()>,
    },
    Sync {
        done: oneshot::Sender<()>,
    },
    NodeNext {
        from: u8,
        done: oneshot::Sender<Option<u8>>,
    },
    NodeId {
        done: oneshot::Sender<u8>,
    },
    Exit,
}

/// Time since `epoch` in µs, wrapping
fn micros_since(epoch: Instant) -> u32 {
    epoch.elapsed().as_micros() as u32
}

struct Worker<C: CanChannel> {
    network: Network<C>,
    epoch: Instant,
    /// Completion of the SDO client transfer in flight
    pending_sdo: Option<oneshot::Sender<SdoClientResult>>,
}

impl<C: CanChannel> Worker<C> {
    fn run(mut self, jobs: Receiver<Job>) {
        self.network.start(micros_since(self.epoch));
        while let Ok(job) = jobs.recv() {
            if matches!(job, Job::Exit) {
                break;
            }
            self.handle(job);
            self.complete_sdo();
        }
        debug!("dispatcher exiting");
    }

    fn handle(&mut self, job: Job) {
        let now = micros_since(self.epoch);
        let net = &mut self.network;
        net.set_time(now);
        // A dropped receiver only means the caller stopped waiting
        match job {
            Job::Receive => net.handle_rx(now),
            Job::Frame(msg) => net.process_frame(now, &msg),
            Job::Tick => {
                net.handle_rx(now);
                net.handle_periodic(now);
            }
            Job::SdoRead {
                node,
                index,
                sub,
                done,
            } => {
                let started = match self.pending_sdo {
                    Some(_) => Err(SdoClientError::Busy),
                    None => net.sdo_read(node, index, sub),
                };
                self.sdo_started(started, done);
            }
            Job::SdoWrite {
                node,
                index,
                sub,
                data,
                done,
            } => {
                let started = match self.pending_sdo {
                    Some(_) => Err(SdoClientError::Busy),
                    None => net.sdo_write(node, index, sub, &data),
                };
                self.sdo_started(started, done);
            }
            Job::PdoEvent { done } => {
                net.pdo_event();
                done.send(()).ok();
            }
            Job::PdoObjEvent { index, sub, done } => {
                net.pdo_obj_event(index, sub);
                done.send(()).ok();
            }
            Job::Emcy {
                code,
                info,
                msef,
                done,
            } => {
                net.emcy_issue(code, info, msef);
                done.send(()).ok();
            }
            Job::ErrorSet { mask, done } => {
                net.error_set(mask);
                done.send(()).ok();
            }
            Job::ErrorClear { mask, done } => {
                net.error_clear(mask);
                done.send(()).ok();
            }
            Job::ErrorGet { done } => {
                done.send(net.error_get()).ok();
            }
            Job::Nmt { cmd, node, done } => {
                net.nmt(cmd, node);
                done.send(()).ok();
            }
            Job::Sync { done } => {
                net.sync();
                done.send(()).ok();
            }
            Job::NodeNext { from, done } => {
                done.send(net.node_next(from)).ok();
            }
            Job::NodeId { done } => {
                done.send(net.node_id()).ok();
            }
            Job::Exit => (),
        }
    }

    fn sdo_started(
        &mut self,
        started: Result<(), SdoClientError>,
        done: oneshot::Sender<SdoClientResult>,
    ) {
        match started {
            Ok(()) => self.pending_sdo = Some(done),
            Err(e) => {
                done.send(Err(e)).ok();
            }
        }
    }

    fn complete_sdo(&mut self) {
        if self.pending_sdo.is_none() {
            return;
        }
        if let Some(result) = self.network.take_sdo_client_result() {
            if let Some(done) = self.pending_sdo.take() {
                done.send(result).ok();
            }
        }
    }
}

/// Handle for posting jobs to a running [`Dispatcher`]
#[derive(Debug, Clone)]
pub struct Client {
    jobs: Sender<Job>,
    overruns: Arc<AtomicU32>,
}

impl Client {
    fn post(&self, job: Job) -> Result<(), ClientError> {
        self.jobs.send(job).map_err(|_| ClientError::Stopped)
    }

    async fn call<T>(&self, job: impl FnOnce(oneshot::Sender<T>) -> Job) -> Result<T, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.post(job(tx))?;
        rx.await.map_err(|_| ClientError::Stopped)
    }

    /// Notify the dispatcher that frames are pending on the channel
    pub fn notify_rx(&self) -> Result<(), ClientError> {
        self.post(Job::Receive)
    }

    /// Pass a received frame to the network
    pub fn process_frame(&self, msg: CanMessage) -> Result<(), ClientError> {
        self.post(Job::Frame(msg))
    }

    /// Number of ticks dropped because the job queue was full
    pub fn overruns(&self) -> u32 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Read an object from a remote node
    pub async fn sdo_read_async(
        &self,
        node: u8,
        index: u16,
        sub: u8,
    ) -> Result<SdoData, ClientError> {
        self.call(|done| Job::SdoRead {
            node,
            index,
            sub,
            done,
        })
        .await?
        .context(SdoSnafu)
    }

    /// Read an object from a remote node, blocking until the transfer completes
    pub fn sdo_read(&self, node: u8, index: u16, sub: u8) -> Result<SdoData, ClientError> {
        block_on(self.sdo_read_async(node, index, sub))
    }

    /// Write an object on a remote node
    pub async fn sdo_write_async(
        &self,
        node: u8,
        index: u16,
        sub: u8,
        data: &[u8],
    ) -> Result<(), ClientError> {
        let data = SdoData::from_slice(data).map_err(|_| ClientError::TooLong)?;
        self.call(|done| Job::SdoWrite {
            node,
            index,
            sub,
            data,
            done,
        })
        .await?
        .context(SdoSnafu)?;
        Ok(())
    }

    /// Write an object on a remote node, blocking until the transfer completes
    pub fn sdo_write(&self, node: u8, index: u16, sub: u8, data: &[u8]) -> Result<(), ClientError> {
        block_on(self.sdo_write_async(node, index, sub, data))
    }

    /// See [`Network::pdo_event`]
    pub async fn pdo_event_async(&self) -> Result<(), ClientError> {
        self.call(|done| Job::PdoEvent { done }).await
    }

    /// See [`Network::pdo_event`]
    pub fn pdo_event(&self) -> Result<(), ClientError> {
        block_on(self.pdo_event_async())
    }

    /// See [`Network::pdo_obj_event`]
    pub async fn pdo_obj_event_async(&self, index: u16, sub: u8) -> Result<(), ClientError> {
        self.call(|done| Job::PdoObjEvent { index, sub, done })
            .await
    }

    /// See [`Network::pdo_obj_event`]
    pub fn pdo_obj_event(&self, index: u16, sub: u8) -> Result<(), ClientError> {
        block_on(self.pdo_obj_event_async(index, sub))
    }

    /// See [`Network::emcy_issue`]
    pub async fn emcy_issue_async(
        &self,
        code: u16,
        info: u16,
        msef: Option<[u8; 5]>,
    ) -> Result<(), ClientError> {
        self.call(|done| Job::Emcy {
            code,
            info,
            msef,
            done,
        })
        .await
    }

    /// See [`Network::emcy_issue`]
    pub fn emcy_issue(&self, code: u16, info: u16, msef: Option<[u8; 5]>) -> Result<(), ClientError> {
        block_on(self.emcy_issue_async(code, info, msef))
    }

    /// See [`Network::error_set`]
    pub fn error_set(&self, mask: u8) -> Result<(), ClientError> {
        block_on(self.call(|done| Job::ErrorSet { mask, done }))
    }

    /// See [`Network::error_clear`]
    pub fn error_clear(&self, mask: u8) -> Result<(), ClientError> {
        block_on(self.call(|done| Job::ErrorClear { mask, done }))
    }

    /// See [`Network::error_get`]
    pub fn error_get(&self) -> Result<u8, ClientError> {
        block_on(self.call(|done| Job::ErrorGet { done }))
    }

    /// See [`Network::nmt`]
    pub async fn nmt_async(&self, cmd: NmtCommandCmd, node: u8) -> Result<(), ClientError> {
        self.call(|done| Job::Nmt { cmd, node, done }).await
    }

    /// See [`Network::nmt`]
    pub fn nmt(&self, cmd: NmtCommandCmd, node: u8) -> Result<(), ClientError> {
        block_on(self.nmt_async(cmd, node))
    }

    /// See [`Network::sync`]
    pub fn sync(&self) -> Result<(), ClientError> {
        block_on(self.call(|done| Job::Sync { done }))
    }

    /// See [`Network::node_next`]
    pub fn node_next(&self, from: u8) -> Result<Option<u8>, ClientError> {
        block_on(self.call(|done| Job::NodeNext { from, done }))
    }

    /// See [`Network::node_id`]
    pub fn node_id(&self) -> Result<u8, ClientError> {
        block_on(self.call(|done| Job::NodeId { done }))
    }
}

/// A network running on its own thread
#[derive(Debug)]
pub struct Dispatcher {
    client: Client,
    worker: JoinHandle<()>,
    ticker: JoinHandle<()>,
}

impl Dispatcher {
    /// Start the network and its tick source
    pub fn spawn<C: CanChannel + Send + 'static>(network: Network<C>) -> Self {
        let (tx, rx) = bounded(JOB_QUEUE_SIZE);
        let overruns = Arc::new(AtomicU32::new(0));

        let worker = Worker {
            network,
            epoch: Instant::now(),
            pending_sdo: None,
        };
        let worker = thread::spawn(move || worker.run(rx));

        let ticks = tx.clone();
        let tick_overruns = overruns.clone();
        let ticker = thread::spawn(move || loop {
            thread::sleep(Duration::from_micros(TICK_US as u64));
            match ticks.try_send(Job::Tick) {
                Ok(()) => (),
                Err(TrySendError::Full(_)) => {
                    let count = tick_overruns.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!("tick overrun ({})", count);
                }
                Err(TrySendError::Disconnected(_)) => break,
            }
        });

        Self {
            client: Client { jobs: tx, overruns },
            worker,
            ticker,
        }
    }

    /// Get a handle for posting jobs
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Stop the dispatcher and wait for its threads to exit
    ///
    /// Clients which are still alive get [`ClientError::Stopped`] from then on.
    pub fn shutdown(self) -> Result<(), ClientError> {
        self.client.post(Job::Exit)?;
        self.worker.join().map_err(|_| ClientError::Stopped)?;
        self.ticker.join().map_err(|_| ClientError::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use costack_common::constants::error_register;

    use super::*;
    use crate::nmt::State;
    use crate::test_utils::{test_network, TEST_NODE};

    #[test]
    fn test_client_calls() {
        let dispatcher = Dispatcher::spawn(test_network());
        let client = dispatcher.client();

        assert_eq!(Ok(TEST_NODE), client.node_id());
        client.error_set(error_register::VOLTAGE).unwrap();
        assert_eq!(
            Ok(error_register::VOLTAGE | error_register::GENERIC),
            client.error_get()
        );
        client.error_clear(error_register::VOLTAGE).unwrap();
        assert_eq!(Ok(0), client.error_get());
        assert_eq!(Ok(None), client.node_next(0));

        dispatcher.shutdown().unwrap();
        assert_eq!(Err(ClientError::Stopped), client.error_get());
    }

    #[test]
    fn test_sdo_read_times_out() {
        let dispatcher = Dispatcher::spawn(test_network());
        let client = dispatcher.client();
        assert_eq!(
            Err(ClientError::Sdo {
                source: SdoClientError::Timeout
            }),
            client.sdo_read(3, 0x1000, 0)
        );
        dispatcher.shutdown().unwrap();
    }

    #[test]
    fn test_worker_busy_sdo() {
        let mut worker = Worker {
            network: test_network(),
            epoch: Instant::now(),
            pending_sdo: None,
        };
        worker.network.start(0);
        let (first, _first_rx) = oneshot::channel();
        worker.handle(Job::SdoRead {
            node: 3,
            index: 0x1000,
            sub: 0,
            done: first,
        });
        let (second, second_rx) = oneshot::channel();
        worker.handle(Job::SdoRead {
            node: 3,
            index: 0x1000,
            sub: 0,
            done: second,
        });
        assert_eq!(Ok(Err(SdoClientError::Busy)), block_on(second_rx));
        assert_eq!(State::PreOp, worker.network.nmt_state());
    }
}
