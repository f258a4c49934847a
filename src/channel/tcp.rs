use bufstream::BufStream;
use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

/// Frames are a big-endian `u32` length followed by the payload.
const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

pub struct TcpListener {
    inner: std::net::TcpListener,
}

impl TcpListener {
    pub fn bind(address: &str) -> io::Result<TcpListener> {
        let inner = std::net::TcpListener::bind(address)?;
        inner.set_nonblocking(true)?;
        Ok(TcpListener { inner })
    }

    pub fn address(&self) -> String {
        match self.inner.local_addr() {
            Ok(addr) => addr.to_string(),
            Err(_) => String::from("<unbound>"),
        }
    }

    pub fn accept_timeout(&self, timeout: Duration) -> io::Result<Option<TcpStream>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.inner.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false)?;
                    stream.set_nodelay(true)?;
                    return Ok(Some(stream));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    thread::sleep((deadline - now).min(Duration::from_millis(5)));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

pub fn connect(address: &str, timeout: Duration) -> io::Result<TcpStream> {
    let addrs: Vec<SocketAddr> = address.to_socket_addrs()?.collect();
    let mut last_err = io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{} did not resolve to any address", address),
    );

    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

pub fn split(stream: TcpStream, io_timeout: Duration) -> io::Result<(TcpWriter, TcpReader)> {
    stream.set_write_timeout(Some(io_timeout))?;
    let reader = stream.try_clone()?;
    Ok((
        TcpWriter {
            stream: BufStream::new(stream),
        },
        TcpReader {
            stream: BufStream::new(reader),
        },
    ))
}

pub struct TcpWriter {
    stream: BufStream<TcpStream>,
}

impl TcpWriter {
    pub fn send(&mut self, bytes: &[u8]) -> crate::Result<()> {
        if bytes.len() > MAX_FRAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "frame too large").into());
        }
        self.stream.write_u32::<NetworkEndian>(bytes.len() as u32)?;
        self.stream.write_all(bytes)?;
        self.stream.flush()?;
        Ok(())
    }

    pub fn close(mut self) {
        let _ = self.stream.flush();
        let _ = self.stream.get_ref().shutdown(Shutdown::Both);
    }
}

pub struct TcpReader {
    stream: BufStream<TcpStream>,
}

impl TcpReader {
    pub fn recv(&mut self) -> crate::Result<Option<Vec<u8>>> {
        let len = match self.stream.read_u32::<NetworkEndian>() {
            Ok(len) => len as usize,
            Err(e) if is_closed(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large").into());
        }

        let mut payload = vec![0_u8; len];
        match self.stream.read_exact(&mut payload) {
            Ok(()) => Ok(Some(payload)),
            Err(e) if is_closed(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_carry_a_network_order_length() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = connect(&listener.address(), Duration::from_secs(1)).unwrap();
        let mut server = listener
            .accept_timeout(Duration::from_secs(1))
            .unwrap()
            .expect("connection should be pending");

        let (mut writer, _) = split(client, Duration::from_secs(1)).unwrap();
        writer.send(b"abc").unwrap();
        writer.close();

        let mut raw = Vec::new();
        server.read_to_end(&mut raw).unwrap();
        assert_eq!(raw, vec![0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn truncated_frame_reads_as_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = connect(&listener.address(), Duration::from_secs(1)).unwrap();
        let server = listener
            .accept_timeout(Duration::from_secs(1))
            .unwrap()
            .expect("connection should be pending");

        client.write_u32::<NetworkEndian>(10).unwrap();
        client.write_all(b"abc").unwrap();
        client.shutdown(Shutdown::Both).unwrap();

        let (_, mut reader) = split(server, Duration::from_secs(1)).unwrap();
        assert_eq!(reader.recv().unwrap(), None);
    }
}
