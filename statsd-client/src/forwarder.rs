use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs as _, UdpSocket},
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_channel::{never, select, tick, Receiver};
use tracing::{debug, error, trace, warn};

use crate::buffer::PacketPool;

/// Forwarder configuration.
#[derive(Clone, Debug)]
pub(crate) struct ForwarderConfiguration {
    /// Remote address in `<host>:<port>` form, resolved again on every connection attempt.
    pub remote_addr: String,

    /// How often to reconnect even without errors, or zero to never do so.
    pub reconnect_interval: Duration,

    /// How long to wait after a failed connection attempt before trying again.
    pub retry_timeout: Duration,

    /// How long a single datagram write may block, or zero to never time out.
    pub write_timeout: Duration,
}

impl ForwarderConfiguration {
    fn connect(&self) -> io::Result<UdpSocket> {
        let mut addrs = self.remote_addr.to_socket_addrs()?.peekable();
        let first = addrs.peek().copied().ok_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "remote address did not resolve to any socket address")
        })?;

        // Only try addresses of the same family as the socket we bind.
        let candidates = addrs.filter(|addr| addr.is_ipv4() == first.is_ipv4()).collect::<Vec<_>>();
        let local_addr = if first.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };

        let socket = UdpSocket::bind(local_addr)?;
        socket.connect(&candidates[..])?;
        if !self.write_timeout.is_zero() {
            socket.set_write_timeout(Some(self.write_timeout))?;
        }
        Ok(socket)
    }
}

enum WorkerState {
    // Forwarder has no socket and should dial.
    Connecting,

    // Forwarder is connected and draining the dispatch queue.
    Ready(UdpSocket),

    // Last dial failed, back off before dialing again.
    Wait,

    // Dispatch queue is closed and drained, or shutdown happened while we couldn't connect.
    Closed,
}

/// A send worker.
///
/// Each worker owns its own socket and drains the shared dispatch queue, writing every packet as a single datagram.
pub(crate) struct Forwarder {
    id: usize,
    config: ForwarderConfiguration,
    queue: Receiver<Vec<u8>>,
    shutdown: Receiver<()>,
    pool: Arc<PacketPool>,
}

impl Forwarder {
    /// Create a new `Forwarder`.
    pub fn new(
        id: usize,
        config: ForwarderConfiguration,
        queue: Receiver<Vec<u8>>,
        shutdown: Receiver<()>,
        pool: Arc<PacketPool>,
    ) -> Self {
        Forwarder { id, config, queue, shutdown, pool }
    }

    /// Runs the forwarder until the dispatch queue is closed and drained.
    pub fn run(self) {
        let reconnect = if self.config.reconnect_interval.is_zero() {
            never()
        } else {
            tick(self.config.reconnect_interval)
        };

        let mut state = WorkerState::Connecting;
        loop {
            state = match state {
                WorkerState::Closed => break,
                state => self.step_with(state, &reconnect),
            };
        }

        debug!(worker = self.id, "Forwarder stopped.");
    }

    #[cfg(test)]
    fn step(&self, state: WorkerState) -> WorkerState {
        self.step_with(state, &never())
    }

    /// Runs a single state transition.
    fn step_with(&self, state: WorkerState, reconnect: &Receiver<Instant>) -> WorkerState {
        match state {
            WorkerState::Connecting => match self.config.connect() {
                Ok(socket) => {
                    debug!(worker = self.id, remote_addr = %self.config.remote_addr, "Connected to StatsD server.");
                    WorkerState::Ready(socket)
                }
                Err(e) => {
                    warn!(
                        worker = self.id,
                        error = %e,
                        remote_addr = %self.config.remote_addr,
                        "Failed to connect to StatsD server."
                    );
                    WorkerState::Wait
                }
            },
            WorkerState::Ready(socket) => self.drain_queue(&socket, reconnect),
            WorkerState::Wait => self.wait(),
            WorkerState::Closed => WorkerState::Closed,
        }
    }

    fn drain_queue(&self, socket: &UdpSocket, reconnect: &Receiver<Instant>) -> WorkerState {
        loop {
            select! {
                recv(self.queue) -> msg => {
                    let packet = match msg {
                        Ok(packet) => packet,
                        Err(_) => return WorkerState::Closed,
                    };

                    let result = send_packet(socket, &packet);
                    self.pool.release(packet);

                    if let Err(e) = result {
                        error!(worker = self.id, error = %e, "Failed to send packet.");
                        return WorkerState::Connecting;
                    }
                },
                recv(reconnect) -> _ => {
                    trace!(worker = self.id, "Periodic reconnect.");
                    return WorkerState::Connecting;
                },
            }
        }
    }

    fn wait(&self) -> WorkerState {
        select! {
            recv(self.shutdown) -> _ => {
                debug!(worker = self.id, "Shutdown requested while disconnected, abandoning queued packets.");
                WorkerState::Closed
            },
            default(self.config.retry_timeout) => WorkerState::Connecting,
        }
    }
}

/// Writes `packet` as a single datagram, minus the trailing line separator.
fn send_packet(socket: &UdpSocket, packet: &[u8]) -> io::Result<()> {
    match packet.split_last() {
        Some((_, payload)) if !payload.is_empty() => socket.send(payload).map(|_| ()),
        _ => Ok(()),
    }
}
