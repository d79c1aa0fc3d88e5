use std::io::Write;
use std::net::Shutdown;
use std::net::SocketAddr;
use std::net::TcpListener;
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use crate::DumpMode;
use crate::PacketDumper;
use crate::Result;
use crate::ethernet::EtherType;
use crate::ethernet::capture_region;
use crate::pcapng::EnhancedPacketBlock;
use crate::pcapng::InterfaceDescriptionBlock;
use crate::pcapng::PcapNgBlock;
use crate::pcapng::SectionHeaderBlockLive;
use crate::pcapng::SimplePacketBlock;
use crate::pcapng::timestamp_micros;

pub const DEFAULT_PORT: u16 = 19000;

/// Notified with the current list of client peer addresses whenever a
/// client connects or is dropped.
pub trait ConnectedUsersChangedCallback: Send + Sync {
    fn on_connected_users_changed(&self, users: Vec<String>);
}

type ClientList = Arc<Mutex<Vec<(TcpStream, SocketAddr)>>>;

/// Streams a live capture to every connected TCP client in the pcapng
/// format. Wireshark can consume it directly:
///
/// ```text
/// wireshark -k -i TCP@<ip address>:<port>
/// ```
///
/// Each accepted client immediately receives the section header and
/// interface description blocks, then every subsequent dump as one packet
/// block. There is no handshake and no authentication.
pub struct PcapNgTcpServerDumper {
    listen_port: u16,
    mode: DumpMode,
    callback: Option<Arc<dyn ConnectedUsersChangedCallback>>,
    is_running: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    accept_thread: Option<JoinHandle<()>>,
    clients: ClientList,
}

impl Default for PcapNgTcpServerDumper {
    fn default() -> Self {
        Self::new(DEFAULT_PORT, DumpMode::Simple, None)
    }
}

impl PcapNgTcpServerDumper {
    /// A server on `listen_port` (0 asks the OS for a free port). The dump
    /// mode is fixed for the lifetime of the server.
    pub fn new(
        listen_port: u16,
        mode: DumpMode,
        callback: Option<Arc<dyn ConnectedUsersChangedCallback>>,
    ) -> Self {
        Self {
            listen_port,
            mode,
            callback,
            is_running: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            accept_thread: None,
            clients: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The bound address while the server is running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Binds the listening socket and spawns the accept loop. Binding
    /// happens on the caller's thread, so a failure aborts startup and the
    /// caller returns with the socket guaranteed bound. Starting a running
    /// server is a logged no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running.load(Ordering::SeqCst) {
            error!("trying to start a server that is already running");
            return Ok(());
        }
        let listener = TcpListener::bind(("0.0.0.0", self.listen_port))?;
        let local_addr = listener.local_addr()?;
        self.is_running.store(true, Ordering::SeqCst);

        let is_running = Arc::clone(&self.is_running);
        let clients = Arc::clone(&self.clients);
        let callback = self.callback.clone();
        let spawned = thread::Builder::new()
            .name(String::from("pcapng-tcp-dumper listener"))
            .spawn(move || accept_loop(listener, is_running, clients, callback));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.is_running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        self.accept_thread = Some(handle);
        self.local_addr = Some(local_addr);
        debug!("pcapng tcp dumper listening on {local_addr}");
        Ok(())
    }

    /// Stops accepting, joins the accept thread and closes every client
    /// connection, swallowing per-connection close errors. Stopping a
    /// stopped server is a logged no-op.
    pub fn stop(&mut self) {
        if !self.is_running.load(Ordering::SeqCst) {
            error!("trying to stop a server that is already stopped");
            return;
        }
        self.is_running.store(false, Ordering::SeqCst);
        // a loopback connection wakes the accept loop so it can observe the flag
        if let Some(addr) = self.local_addr {
            let wake = SocketAddr::from(([127, 0, 0, 1], addr.port()));
            if let Err(e) = TcpStream::connect_timeout(&wake, Duration::from_secs(1)) {
                warn!("could not wake the accept loop: {e}");
            }
        }
        debug!("waiting for the listener thread to finish");
        if let Some(handle) = self.accept_thread.take() {
            if handle.join().is_err() {
                error!("listener thread panicked");
            }
        }
        debug!("closing all client connections");
        match self.clients.lock() {
            Ok(mut clients) => {
                for (stream, peer) in clients.drain(..) {
                    if let Err(e) = stream.shutdown(Shutdown::Both) {
                        debug!("error closing the connection to {peer}: {e}");
                    }
                }
            }
            Err(e) => error!("client list lock poisoned: {e}"),
        }
        self.local_addr = None;
    }

    fn issue_callback(&self, users: Vec<String>) {
        issue_callback(&self.callback, users);
    }
}

impl PacketDumper for PcapNgTcpServerDumper {
    /// Builds one packet block and writes it to every connected client. A
    /// client whose write fails is dropped and the connected-users callback
    /// fires; the other clients are unaffected. With no clients connected
    /// this is a no-op, so no block is built for nobody.
    fn dump_buffer(
        &mut self,
        buffer: &[u8],
        offset: usize,
        length: usize,
        _addresses: bool,
        ether_type: Option<EtherType>,
    ) {
        match self.clients.lock() {
            Ok(clients) => {
                if clients.is_empty() {
                    return;
                }
            }
            Err(e) => {
                error!("client list lock poisoned: {e}");
                return;
            }
        }
        let data = capture_region(buffer, offset, length, ether_type);
        let bytes = match self.mode {
            DumpMode::Simple => SimplePacketBlock::new(&data).to_vec(),
            DumpMode::Enhanced => EnhancedPacketBlock::new(&data, timestamp_micros()).to_vec(),
        };

        let mut dropped_client = false;
        let users = match self.clients.lock() {
            Ok(mut clients) => {
                clients.retain_mut(|(stream, peer)| {
                    match stream.write_all(&bytes).and_then(|()| stream.flush()) {
                        Ok(()) => true,
                        Err(e) => {
                            warn!("error writing to client {peer}, dropping it: {e}");
                            dropped_client = true;
                            false
                        }
                    }
                });
                clients.iter().map(|(_, peer)| peer.to_string()).collect()
            }
            Err(e) => {
                error!("client list lock poisoned: {e}");
                return;
            }
        };
        if dropped_client {
            self.issue_callback(users);
        }
    }
}

fn accept_loop(
    listener: TcpListener,
    is_running: Arc<AtomicBool>,
    clients: ClientList,
    callback: Option<Arc<dyn ConnectedUsersChangedCallback>>,
) {
    while is_running.load(Ordering::SeqCst) {
        let (mut stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("error accepting a connection, possibly shutting down: {e}");
                continue;
            }
        };
        if !is_running.load(Ordering::SeqCst) {
            // woken by stop(); the connection is dropped unanswered
            break;
        }
        trace!("accepted connection from {peer}");

        // the client must see the two header blocks before any packet block
        let mut header = SectionHeaderBlockLive.to_vec();
        header.extend_from_slice(&InterfaceDescriptionBlock::default().to_vec());
        match stream.write_all(&header).and_then(|()| stream.flush()) {
            Ok(()) => {
                let users = match clients.lock() {
                    Ok(mut clients) => {
                        clients.push((stream, peer));
                        clients.iter().map(|(_, peer)| peer.to_string()).collect()
                    }
                    Err(e) => {
                        error!("client list lock poisoned: {e}");
                        continue;
                    }
                };
                issue_callback(&callback, users);
            }
            Err(e) => {
                warn!(
                    "error writing to client {peer}, it may have disconnected \
                     before we wrote the pcapng header: {e}"
                );
                continue;
            }
        }
    }
}

// called outside the client list lock, the callback may call back into the dumper
fn issue_callback(callback: &Option<Arc<dyn ConnectedUsersChangedCallback>>, users: Vec<String>) {
    if let Some(callback) = callback {
        callback.on_connected_users_changed(users);
    }
}
