//! Real sockets: talk to a running backend or serve `/unlock` on the host

use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::thread;

use doorlock_core::actuator::Actuator;
use doorlock_core::gate::{ActuatorGate, GateEvent};
use doorlock_core::http::{Endpoint, HttpTransport, TransportError};
use doorlock_core::unlock_server::{REQUEST_CAPACITY, RESPONSE_CAPACITY, handle_request};
use embassy_time::{Duration, Instant};
use log::{debug, error, info, warn};

fn std_duration(d: Duration) -> std::time::Duration {
    std::time::Duration::from_micros(d.as_micros())
}

fn transport_error(e: io::Error) -> TransportError {
    match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Timeout,
        ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::NotConnected => {
            TransportError::Connect
        }
        _ => TransportError::Io,
    }
}

/// Blocking std TCP; one connection per exchange
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

impl HttpTransport for TcpTransport {
    async fn exchange(
        &mut self,
        endpoint: &Endpoint<'_>,
        head: &[u8],
        body: &[u8],
        response: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let timeout = std_duration(timeout);
        let addr = (endpoint.host, endpoint.port)
            .to_socket_addrs()
            .map_err(|_| TransportError::Dns)?
            .next()
            .ok_or(TransportError::Dns)?;

        let mut stream = TcpStream::connect_timeout(&addr, timeout).map_err(transport_error)?;
        stream
            .set_read_timeout(Some(timeout))
            .and_then(|()| stream.set_write_timeout(Some(timeout)))
            .map_err(transport_error)?;

        stream.write_all(head).map_err(transport_error)?;
        stream.write_all(body).map_err(transport_error)?;

        let mut len = 0;
        while len < response.len() {
            match stream.read(&mut response[len..]) {
                Ok(0) => break,
                Ok(n) => len += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(transport_error(e)),
            }
        }

        debug!("{}:{} replied with {} bytes", endpoint.host, endpoint.port, len);
        Ok(len)
    }
}

/// Serve the lock node's endpoint until the process is killed.
///
/// One loop, as on the device: tick the gate, then accept at most one
/// connection, then sleep out the poll interval.
pub fn serve_lock<A: Actuator>(
    listen: &str,
    gate: &mut ActuatorGate<A>,
    poll: Duration,
) -> io::Result<()> {
    let listener = TcpListener::bind(listen)?;
    listener.set_nonblocking(true)?;
    info!("Lock node listening on {}", listener.local_addr()?);

    loop {
        match gate.tick(Instant::now()) {
            Ok(GateEvent::Relocked) => info!("Gate re-locked"),
            Ok(_) => {}
            Err(e) => error!("Re-lock failed, will retry: {}", e),
        }

        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("Connection from {}", peer);
                if let Err(e) = answer(stream, gate, poll) {
                    warn!("Request from {} failed: {}", peer, e);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }

        thread::sleep(std_duration(poll));
    }
}

fn answer<A: Actuator>(
    mut stream: TcpStream,
    gate: &mut ActuatorGate<A>,
    timeout: Duration,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(std_duration(timeout)))?;

    let mut request = [0u8; REQUEST_CAPACITY];
    let mut len = 0;
    while len < request.len() {
        let n = stream.read(&mut request[len..])?;
        if n == 0 {
            break;
        }
        len += n;
        if request[..len].windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let mut out = [0u8; RESPONSE_CAPACITY];
    let handled = handle_request(&request[..len], gate, Instant::now(), &mut out)
        .map_err(|e| io::Error::other(e.to_string()))?;
    info!("Answered {} ({:?})", handled.status, handled.event);

    stream.write_all(&out[..handled.len])
}
