use doorlock_core::http::{Endpoint, HttpTransport, TransportError};
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_net::{IpAddress, Ipv4Address, Stack};
use embassy_time::{Duration, with_timeout};
use embedded_io_async::Write;
use log::debug;

const SOCKET_BUFFER: usize = 1024;

/// Plain HTTP/1.1 client exchanges over the embassy-net stack.
///
/// One connection per exchange; the socket buffers are owned so a node can
/// keep one transport per remote without sharing.
pub struct NetTransport<'s> {
    stack: Stack<'s>,
    rx: [u8; SOCKET_BUFFER],
    tx: [u8; SOCKET_BUFFER],
}

impl<'s> NetTransport<'s> {
    pub fn new(stack: Stack<'s>) -> Self {
        Self {
            stack,
            rx: [0; SOCKET_BUFFER],
            tx: [0; SOCKET_BUFFER],
        }
    }
}

impl HttpTransport for NetTransport<'_> {
    async fn exchange(
        &mut self,
        endpoint: &Endpoint<'_>,
        head: &[u8],
        body: &[u8],
        response: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        if !self.stack.is_link_up() {
            return Err(TransportError::LinkDown);
        }

        let address = resolve(self.stack, endpoint.host).await?;
        let mut socket = TcpSocket::new(self.stack, &mut self.rx, &mut self.tx);
        socket.set_timeout(Some(timeout));

        let result = with_timeout(
            timeout,
            exchange_on(&mut socket, (address, endpoint.port), head, body, response),
        )
        .await
        .unwrap_or(Err(TransportError::Timeout));

        socket.close();
        result
    }
}

async fn exchange_on(
    socket: &mut TcpSocket<'_>,
    remote: (IpAddress, u16),
    head: &[u8],
    body: &[u8],
    response: &mut [u8],
) -> Result<usize, TransportError> {
    socket.connect(remote).await.map_err(|e| {
        debug!("connect to {:?} failed: {:?}", remote, e);
        TransportError::Connect
    })?;

    socket.write_all(head).await.map_err(|_| TransportError::Io)?;
    if !body.is_empty() {
        socket.write_all(body).await.map_err(|_| TransportError::Io)?;
    }
    socket.flush().await.map_err(|_| TransportError::Io)?;

    let mut len = 0;
    while len < response.len() {
        match socket.read(&mut response[len..]).await {
            Ok(0) => break,
            Ok(n) => len += n,
            Err(_) => return Err(TransportError::Io),
        }
    }
    Ok(len)
}

/// Literal IPv4 addresses skip the DNS round-trip
async fn resolve(stack: Stack<'_>, host: &str) -> Result<IpAddress, TransportError> {
    if let Ok(ip) = host.parse::<Ipv4Address>() {
        return Ok(IpAddress::Ipv4(ip));
    }

    let addresses = stack
        .dns_query(host, DnsQueryType::A)
        .await
        .map_err(|_| TransportError::Dns)?;
    addresses.first().copied().ok_or(TransportError::Dns)
}
