//! Socket option plumbing.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tracing::{debug, warn};

/// Bind a UDP socket for multicast reception on `0.0.0.0:port`.
///
/// Address reuse is enabled (and port reuse on unix) so the viewer can share
/// the port with other local listeners. Joining the group is best effort: when
/// the interface has no multicast route the socket still receives datagrams
/// sent directly to the port.
pub fn bind_multicast(port: u16, group: Ipv4Addr, interface: Ipv4Addr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&bind_addr.into())?;
    socket.set_nonblocking(true)?;
    debug!(addr = %bind_addr, "Multicast socket bound");

    let socket: UdpSocket = socket.into();
    join_group(&socket, group, interface);
    Ok(socket)
}

/// Join `group` on `interface`, logging instead of failing.
fn join_group(socket: &UdpSocket, group: Ipv4Addr, interface: Ipv4Addr) {
    match socket.join_multicast_v4(&group, &interface) {
        Ok(()) => debug!(%group, %interface, "Joined multicast group"),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            // Already joined on the same physical NIC
            debug!(%group, %interface, "Multicast group already joined");
        }
        Err(e) => warn!(
            %group,
            %interface,
            error = %e,
            "Could not join multicast group, only datagrams sent to the port will arrive"
        ),
    }

    if let Err(e) = socket.set_multicast_loop_v4(true) {
        debug!(error = %e, "Could not enable multicast loopback");
    }
}

/// Apply keepalive and no-delay to a freshly connected stream.
pub fn configure_stream(stream: &tokio::net::TcpStream, keepalive: Duration) -> io::Result<()> {
    let params = TcpKeepalive::new().with_time(keepalive);
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos", windows))]
    let params = params.with_interval(keepalive);

    SockRef::from(stream).set_tcp_keepalive(&params)?;
    stream.set_nodelay(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_conflicts_with_exclusive_socket() {
        let exclusive = UdpSocket::bind("0.0.0.0:0").unwrap();
        let port = exclusive.local_addr().unwrap().port();

        let err = bind_multicast(port, Ipv4Addr::new(224, 0, 0, 1), Ipv4Addr::UNSPECIFIED)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
    }

    #[test]
    fn test_bound_socket_receives_unicast() {
        let spare = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = spare.local_addr().unwrap().port();
        drop(spare);

        let socket =
            bind_multicast(port, Ipv4Addr::new(224, 0, 0, 1), Ipv4Addr::UNSPECIFIED).unwrap();
        socket.set_nonblocking(false).unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"ping", ("127.0.0.1", port)).unwrap();

        let mut buf = [0u8; 16];
        let (n, _) = socket.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[tokio::test]
    async fn test_configure_stream() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, _server) = tokio::join!(tokio::net::TcpStream::connect(addr), listener.accept());
        let client = client.unwrap();

        configure_stream(&client, Duration::from_secs(5)).unwrap();
        assert!(SockRef::from(&client).keepalive().unwrap());
        assert!(client.nodelay().unwrap());
    }
}
