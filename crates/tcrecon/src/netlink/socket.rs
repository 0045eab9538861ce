//! Async wrapper around a `NETLINK_ROUTE` socket.

use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicU32, Ordering};

use netlink_sys::{Socket, SocketAddr, protocols};
use tokio::io::unix::AsyncFd;

use super::error::{Error, Result};

const NETLINK_EXT_ACK: i32 = 11;

/// An async, non-blocking `NETLINK_ROUTE` socket bound to this process.
pub struct NetlinkSocket {
    fd: AsyncFd<Socket>,
    seq: AtomicU32,
    pid: u32,
}

impl NetlinkSocket {
    /// Open a socket, bind it, and request extended acknowledgements so that
    /// kernel rejections carry a human-readable reason (see the error taxonomy).
    pub fn new() -> Result<Self> {
        let mut socket = Socket::new(protocols::NETLINK_ROUTE).map_err(Error::Io)?;
        socket.bind_auto().map_err(Error::Io)?;
        socket.set_non_blocking(true).map_err(Error::Io)?;

        let raw_fd = socket.as_raw_fd();
        // SAFETY: raw_fd is owned by `socket` for the lifetime of this call and
        // setsockopt does not retain it past the call.
        let one: libc::c_int = 1;
        let rc = unsafe {
            libc::setsockopt(
                raw_fd,
                libc::SOL_NETLINK,
                NETLINK_EXT_ACK,
                &one as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }

        let mut local_addr = SocketAddr::new(0, 0);
        socket.get_address(&mut local_addr).map_err(Error::Io)?;
        let pid = local_addr.port_number();

        Ok(Self {
            fd: AsyncFd::new(socket).map_err(Error::Io)?,
            seq: AtomicU32::new(1),
            pid,
        })
    }

    pub fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub async fn send(&self, data: &[u8]) -> Result<()> {
        loop {
            let mut guard = self.fd.writable().await.map_err(Error::Io)?;
            match guard.try_io(|inner| inner.get_ref().send(data, 0)) {
                Ok(result) => {
                    result.map_err(Error::Io)?;
                    return Ok(());
                }
                Err(_would_block) => continue,
            }
        }
    }

    pub async fn recv_msg(&self) -> Result<Vec<u8>> {
        loop {
            let mut guard = self.fd.readable().await.map_err(Error::Io)?;
            let mut buf = vec![0u8; 64 * 1024];
            match guard.try_io(|inner| inner.get_ref().recv(&mut buf, 0)) {
                Ok(result) => {
                    let n = result.map_err(Error::Io)?;
                    buf.truncate(n);
                    return Ok(buf);
                }
                Err(_would_block) => continue,
            }
        }
    }
}
