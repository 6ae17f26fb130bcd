use crate::error::{SessionError, SessionResult};
use crate::protocol::{decode, encode, ControlMessage, ProtocolError};
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Message(ControlMessage),
    Closed,
}

/// Sending half of a control connection. Clones share the socket; a reader
/// thread delivers incoming messages as [`LinkEvent`]s.
#[derive(Debug, Clone)]
pub struct ControlLink {
    writer: Arc<Mutex<TcpStream>>,
    peer: SocketAddr,
}

impl ControlLink {
    pub fn connect(addr: &str, timeout: Duration) -> SessionResult<(Self, Receiver<LinkEvent>)> {
        let mut last_err = None;
        for candidate in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => {
                    tracing::info!(peer = %candidate, "control link connected");
                    return Self::from_stream(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err
            .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, format!("{addr} did not resolve")))
            .into())
    }

    pub fn from_stream(stream: TcpStream) -> SessionResult<(Self, Receiver<LinkEvent>)> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let reader = stream.try_clone()?;
        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("control-link".into())
            .spawn(move || read_loop(reader, peer, tx))?;
        Ok((
            Self {
                writer: Arc::new(Mutex::new(stream)),
                peer,
            },
            rx,
        ))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn send(&self, msg: &ControlMessage) -> SessionResult<()> {
        let mut line = encode(msg)?;
        line.push('\n');
        let mut stream = self.writer.lock().map_err(|_| SessionError::LinkClosed)?;
        stream.write_all(line.as_bytes())?;
        tracing::debug!(peer = %self.peer, action = msg.action(), "control message sent");
        Ok(())
    }

    pub fn shutdown(&self) {
        if let Ok(stream) = self.writer.lock() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

fn read_loop(stream: TcpStream, peer: SocketAddr, tx: Sender<LinkEvent>) {
    for line in BufReader::new(stream).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::debug!(%peer, "control link read ended: {e}");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match decode(line) {
            Ok(msg) => {
                tracing::debug!(%peer, action = msg.action(), "control message received");
                if tx.send(LinkEvent::Message(msg)).is_err() {
                    return;
                }
            }
            Err(ProtocolError::UnknownAction(action)) => {
                tracing::warn!(%peer, %action, "ignoring unknown control action")
            }
            Err(e) => tracing::warn!(%peer, error = %e, "dropping control message"),
        }
    }
    tracing::info!(%peer, "control link closed");
    let _ = tx.send(LinkEvent::Closed);
}

/// Host side of the control channel.
pub struct ControlListener {
    listener: TcpListener,
}

impl ControlListener {
    pub fn bind(addr: &str) -> SessionResult<Self> {
        let listener = TcpListener::bind(addr)?;
        tracing::info!(addr = %listener.local_addr()?, "control channel listening");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> SessionResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Blocks until a client connects.
    pub fn accept(&self) -> SessionResult<(ControlLink, Receiver<LinkEvent>)> {
        let (stream, peer) = self.listener.accept()?;
        tracing::info!(%peer, "control client connected");
        ControlLink::from_stream(stream)
    }
}
