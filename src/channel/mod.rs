mod local;
mod tcp;

use crate::error::{Error, Result};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Local,
    Cluster,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(Mode::Local),
            "cluster" => Ok(Mode::Cluster),
            other => Err(Error::IllegalArgument(format!(
                "unknown mode '{}', expected 'local' or 'cluster'",
                other
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Local => f.write_str("local"),
            Mode::Cluster => f.write_str("cluster"),
        }
    }
}

pub enum Listener {
    Local(local::LocalListener),
    Tcp(tcp::TcpListener),
}

impl Listener {
    pub fn bind(mode: Mode, address: &str) -> Result<Listener> {
        match mode {
            Mode::Local => Ok(Listener::Local(local::LocalListener::bind(address)?)),
            Mode::Cluster => Ok(Listener::Tcp(tcp::TcpListener::bind(address)?)),
        }
    }

    /// The address peers connect to; resolves a `:0` port to the real one.
    pub fn local_address(&self) -> String {
        match self {
            Listener::Local(listener) => listener.address().to_string(),
            Listener::Tcp(listener) => listener.address(),
        }
    }

    /// Waits at most `timeout` for an incoming connection.
    pub fn accept_timeout(&self, timeout: Duration) -> Result<Option<Connection>> {
        match self {
            Listener::Local(listener) => Ok(listener.accept_timeout(timeout)?.map(Connection::Local)),
            Listener::Tcp(listener) => Ok(listener.accept_timeout(timeout)?.map(Connection::Tcp)),
        }
    }
}

pub enum Connection {
    Local(local::LocalStream),
    Tcp(std::net::TcpStream),
}

impl Connection {
    pub fn connect(mode: Mode, address: &str, timeout: Duration) -> Result<Connection> {
        match mode {
            Mode::Local => Ok(Connection::Local(local::connect(address)?)),
            Mode::Cluster => Ok(Connection::Tcp(tcp::connect(address, timeout)?)),
        }
    }

    pub fn split(self, io_timeout: Duration) -> Result<(FrameWriter, FrameReader)> {
        match self {
            Connection::Local(stream) => {
                let (writer, reader) = stream.split();
                Ok((FrameWriter::Local(writer), FrameReader::Local(reader)))
            }
            Connection::Tcp(stream) => {
                let (writer, reader) = tcp::split(stream, io_timeout)?;
                Ok((FrameWriter::Tcp(writer), FrameReader::Tcp(reader)))
            }
        }
    }
}

/// Sending half of a connection.
pub enum FrameWriter {
    Local(local::LocalWriter),
    Tcp(tcp::TcpWriter),
}

impl FrameWriter {
    pub fn send<T: Serialize>(&mut self, frame: &T) -> Result<()> {
        let bytes = bincode::serialize(frame)?;
        match self {
            FrameWriter::Local(writer) => writer.send(bytes),
            FrameWriter::Tcp(writer) => writer.send(&bytes),
        }
    }

    /// Closes both directions so the peer's reader sees the end of stream.
    pub fn close(self) {
        match self {
            FrameWriter::Local(writer) => drop(writer),
            FrameWriter::Tcp(writer) => writer.close(),
        }
    }
}

/// Receiving half of a connection.
pub enum FrameReader {
    Local(local::LocalReader),
    Tcp(tcp::TcpReader),
}

impl FrameReader {
    /// Blocks for the next frame; `None` once the peer closed the connection.
    pub fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        let bytes = match self {
            FrameReader::Local(reader) => reader.recv(),
            FrameReader::Tcp(reader) => reader.recv()?,
        };
        match bytes {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// Accepts connections on a background thread until the returned flag is
/// raised, handing each one to `on_connection`.
pub fn spawn_acceptor<F>(
    name: String,
    listener: Listener,
    poll: Duration,
    mut on_connection: F,
) -> Result<(Arc<AtomicBool>, JoinHandle<()>)>
where
    F: FnMut(Connection) -> bool + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();

    let handle = thread::Builder::new().name(name.clone()).spawn(move || {
        while !flag.load(Ordering::Acquire) {
            match listener.accept_timeout(poll) {
                Ok(Some(connection)) => {
                    if !on_connection(connection) {
                        break;
                    }
                }
                Ok(None) => (),
                Err(e) => {
                    tracing::warn!("{}: accept failed: {}", name, e);
                    thread::sleep(poll);
                }
            }
        }
        tracing::debug!("{} stopped", name);
    })?;

    Ok((stop, handle))
}
