use lazy_static::lazy_static;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

lazy_static! {
    /// Every local listener of this process, by address.
    static ref HUB: Mutex<HashMap<String, Sender<LocalStream>>> = Mutex::new(HashMap::new());
}

static NEXT_PORT: AtomicU64 = AtomicU64::new(1);

fn hub() -> MutexGuard<'static, HashMap<String, Sender<LocalStream>>> {
    HUB.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct LocalListener {
    address: String,
    incoming: Receiver<LocalStream>,
}

impl LocalListener {
    /// Registers `address` in the hub. A trailing `:0` is replaced by a
    /// process-unique suffix, like an ephemeral port.
    pub fn bind(address: &str) -> io::Result<LocalListener> {
        let address = match address.strip_suffix(":0") {
            Some(host) => format!("{}:local-{}", host, NEXT_PORT.fetch_add(1, Ordering::Relaxed)),
            None => address.to_string(),
        };

        let mut hub = hub();
        if hub.contains_key(&address) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("local address {} already bound", address),
            ));
        }

        let (sender, incoming) = mpsc::channel();
        hub.insert(address.clone(), sender);
        Ok(LocalListener { address, incoming })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn accept_timeout(&self, timeout: Duration) -> io::Result<Option<LocalStream>> {
        match self.incoming.recv_timeout(timeout) {
            Ok(stream) => Ok(Some(stream)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "local listener was unregistered",
            )),
        }
    }
}

impl Drop for LocalListener {
    fn drop(&mut self) {
        hub().remove(&self.address);
    }
}

/// One end of an in-process duplex connection.
pub struct LocalStream {
    sender: Sender<Vec<u8>>,
    receiver: Receiver<Vec<u8>>,
}

impl LocalStream {
    pub fn split(self) -> (LocalWriter, LocalReader) {
        (LocalWriter(self.sender), LocalReader(self.receiver))
    }
}

pub struct LocalWriter(Sender<Vec<u8>>);

impl LocalWriter {
    pub fn send(&mut self, bytes: Vec<u8>) -> crate::Result<()> {
        self.0
            .send(bytes)
            .map_err(|_| crate::Error::Disconnected("local peer closed the connection".to_string()))
    }
}

pub struct LocalReader(Receiver<Vec<u8>>);

impl LocalReader {
    pub fn recv(&mut self) -> Option<Vec<u8>> {
        self.0.recv().ok()
    }
}

pub fn connect(address: &str) -> io::Result<LocalStream> {
    let mut hub = hub();
    let listener = hub.get(address).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("no local listener at {}", address),
        )
    })?;

    let (to_listener, from_connector) = mpsc::channel();
    let (to_connector, from_listener) = mpsc::channel();
    let accepted = LocalStream {
        sender: to_connector,
        receiver: from_connector,
    };

    if listener.send(accepted).is_err() {
        hub.remove(address);
        return Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("local listener at {} is gone", address),
        ));
    }

    Ok(LocalStream {
        sender: to_listener,
        receiver: from_listener,
    })
}
