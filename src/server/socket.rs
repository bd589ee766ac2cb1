//! Dedicated reader thread over an already-accepted TCP socket (§5, §9).
//!
//! Shares the bounded-read-timeout-plus-stop-flag cancellation strategy with
//! [`crate::connection::client::TcpClient`]; the two don't share code because
//! the server side needs a swappable listener (handshake hands off to the
//! network bus connection once it completes) while the client side has
//! exactly one fixed callback for its whole lifetime.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::error;

use crate::connection::client::Client;
use crate::error::TransportError;

const READ_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Notified as raw bytes arrive on the socket, or when it closes. Exactly one
/// listener is active at a time; the handshake handler installs itself first
/// and hands off to the network bus connection on completion.
pub trait SocketListener: Send + Sync {
    fn data_received(&self, bytes: &[u8]);
    fn socket_closed(&self);
}

pub struct TcpSocketDataHandler {
    stream: TcpStream,
    stop: Arc<AtomicBool>,
    listener: Arc<Mutex<Arc<dyn SocketListener>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// A socket that has had its read timeout configured and cloned for the
/// reader thread, but hasn't started reading yet. Splitting construction
/// this way lets a caller build the listener it hands to [`PreparedSocket::spawn`]
/// from the same `Arc` that will eventually hold the handler (the handshake
/// handler needs exactly this: a listener that targets itself before the
/// socket — and therefore the `Arc<TcpSocketDataHandler>` it will store —
/// exists), without `spawn` itself needing to be fallible at that point.
pub struct PreparedSocket {
    stream: TcpStream,
    reader_stream: TcpStream,
}

impl TcpSocketDataHandler {
    pub fn prepare(stream: TcpStream) -> Result<PreparedSocket, TransportError> {
        stream.set_read_timeout(Some(READ_POLL_INTERVAL))?;
        let reader_stream = stream.try_clone()?;
        Ok(PreparedSocket {
            stream,
            reader_stream,
        })
    }

    pub fn spawn(
        stream: TcpStream,
        read_buffer_size: usize,
        listener: Arc<dyn SocketListener>,
    ) -> Result<Arc<Self>, TransportError> {
        Ok(Self::prepare(stream)?.spawn(read_buffer_size, listener))
    }

    /// Replaces the active listener. Used once, by the handshake handler
    /// handing off to the network bus connection on completion; the
    /// handshake handler's only remaining strong reference is then dropped.
    pub fn set_listener(&self, listener: Arc<dyn SocketListener>) {
        *self.listener.lock().unwrap() = listener;
    }

    fn read_loop(
        mut stream: TcpStream,
        buffer_size: usize,
        stop: Arc<AtomicBool>,
        listener: Arc<Mutex<Arc<dyn SocketListener>>>,
    ) {
        let mut buf = vec![0u8; buffer_size];
        loop {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            match stream.read(&mut buf) {
                Ok(0) => {
                    stop.store(true, Ordering::SeqCst);
                    break;
                }
                Ok(n) => {
                    let current = listener.lock().unwrap().clone();
                    current.data_received(&buf[..n]);
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "transport read failed, closing socket");
                    stop.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }
        let current = listener.lock().unwrap().clone();
        current.socket_closed();
    }
}

impl PreparedSocket {
    /// Starts the reader thread. Infallible: the only fallible setup
    /// (timeout, socket clone) already happened in [`TcpSocketDataHandler::prepare`].
    pub fn spawn(self, read_buffer_size: usize, listener: Arc<dyn SocketListener>) -> Arc<TcpSocketDataHandler> {
        let stop = Arc::new(AtomicBool::new(false));
        let listener_cell = Arc::new(Mutex::new(listener));

        let handler = Arc::new(TcpSocketDataHandler {
            stream: self.stream,
            stop: stop.clone(),
            listener: listener_cell.clone(),
            reader: Mutex::new(None),
        });

        let reader_stream = self.reader_stream;
        let handle = thread::spawn(move || {
            TcpSocketDataHandler::read_loop(reader_stream, read_buffer_size, stop, listener_cell);
        });
        *handler.reader.lock().unwrap() = Some(handle);
        handler
    }
}

impl Client for TcpSocketDataHandler {
    fn is_connected(&self) -> bool {
        !self.stop.load(Ordering::SeqCst)
    }

    fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        (&self.stream).write_all(bytes)?;
        Ok(())
    }

    fn close(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
