#![allow(dead_code)]

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::TcpSocket;
use tokio::task::JoinHandle;

/// A run of consecutive loopback ports where chosen offsets have a listener.
///
/// The other ports stay bound without listening for as long as the layout
/// lives, so connects to them are refused and no other process can take them.
pub struct PortLayout {
    pub base: u16,
    pub open: Vec<u16>,
    pub closed: Vec<u16>,
    reserved: Vec<TcpSocket>,
    accept_loops: Vec<JoinHandle<()>>,
}

impl PortLayout {
    pub fn end(&self) -> u16 {
        self.base + (self.open.len() + self.closed.len()) as u16 - 1
    }
}

impl Drop for PortLayout {
    fn drop(&mut self) {
        for h in &self.accept_loops {
            h.abort();
        }
    }
}

fn reserve(port: u16) -> io::Result<TcpSocket> {
    let socket = TcpSocket::new_v4()?;
    socket.bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))?;
    Ok(socket)
}

/// Find `pattern.len()` consecutive ports on 127.0.0.1 and listen on those marked `true`.
pub async fn layout(pattern: &[bool]) -> PortLayout {
    assert!(!pattern.is_empty());
    'attempt: for _ in 0..200 {
        // the kernel picks the first port; it stays bound from here on
        let first = reserve(0).expect("bind ephemeral");
        let base = first.local_addr().unwrap().port();
        if usize::from(base) + pattern.len() > 65536 {
            continue;
        }

        let mut sockets = vec![first];
        for i in 1..pattern.len() {
            let Ok(socket) = reserve(base + i as u16) else {
                continue 'attempt;
            };
            sockets.push(socket);
        }

        let mut open = Vec::new();
        let mut closed = Vec::new();
        let mut reserved = Vec::new();
        let mut accept_loops = Vec::new();
        for (i, (socket, &listen)) in sockets.into_iter().zip(pattern).enumerate() {
            let port = base + i as u16;
            if !listen {
                closed.push(port);
                reserved.push(socket);
                continue;
            }
            let l = socket.listen(128).expect("listen on reserved port");
            open.push(port);
            accept_loops.push(tokio::spawn(async move {
                while let Ok((stream, _)) = l.accept().await {
                    drop(stream);
                }
            }));
        }

        return PortLayout {
            base,
            open,
            closed,
            reserved,
            accept_loops,
        };
    }
    panic!("could not find a free run of {} loopback ports", pattern.len());
}

/// Single listening port.
pub async fn one_open() -> PortLayout {
    layout(&[true]).await
}
