use doorlock_core::actuator::Actuator;
use doorlock_core::gate::ActuatorGate;
use doorlock_core::http::TransportError;
use doorlock_core::unlock_server::{
    Handled, REQUEST_CAPACITY, RESPONSE_CAPACITY, handle_request,
};
use embassy_net::Stack;
use embassy_net::tcp::TcpSocket;
use embassy_time::{Duration, Instant, with_timeout};
use embedded_io_async::Write;
use log::{debug, info};

const SOCKET_BUFFER: usize = 1024;
/// A connected client gets this long to send its request
const CLIENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Listener for the `/unlock` and `/status` endpoints.
///
/// Serves at most one connection per call so the main loop keeps ticking
/// the gate between clients.
pub struct UnlockListener<'s> {
    stack: Stack<'s>,
    port: u16,
    rx: [u8; SOCKET_BUFFER],
    tx: [u8; SOCKET_BUFFER],
    request: [u8; REQUEST_CAPACITY],
    response: [u8; RESPONSE_CAPACITY],
}

impl<'s> UnlockListener<'s> {
    pub fn new(stack: Stack<'s>, port: u16) -> Self {
        info!("Unlock endpoint on port {}", port);
        Self {
            stack,
            port,
            rx: [0; SOCKET_BUFFER],
            tx: [0; SOCKET_BUFFER],
            request: [0; REQUEST_CAPACITY],
            response: [0; RESPONSE_CAPACITY],
        }
    }

    /// Wait up to `window` for a client and answer it.
    ///
    /// `Ok(None)` when nobody connected in time.
    pub async fn serve_once<A: Actuator>(
        &mut self,
        gate: &mut ActuatorGate<A>,
        window: Duration,
    ) -> Result<Option<Handled>, TransportError> {
        let mut socket = TcpSocket::new(self.stack, &mut self.rx, &mut self.tx);
        socket.set_timeout(Some(CLIENT_TIMEOUT));

        match with_timeout(window, socket.accept(self.port)).await {
            Err(_) => {
                socket.abort();
                return Ok(None);
            }
            Ok(Err(e)) => {
                debug!("accept failed: {:?}", e);
                return Err(TransportError::Connect);
            }
            Ok(Ok(())) => {}
        }

        let len = read_head(&mut socket, &mut self.request).await?;
        let handled = handle_request(&self.request[..len], gate, Instant::now(), &mut self.response)
            .map_err(TransportError::Framing)?;

        socket
            .write_all(&self.response[..handled.len])
            .await
            .map_err(|_| TransportError::Io)?;
        socket.flush().await.map_err(|_| TransportError::Io)?;
        socket.close();

        Ok(Some(handled))
    }
}

/// Read until the blank line ending the header block.
///
/// Request bodies are never needed, so anything after the head is ignored.
async fn read_head(socket: &mut TcpSocket<'_>, buf: &mut [u8]) -> Result<usize, TransportError> {
    let mut len = 0;
    while len < buf.len() {
        match socket.read(&mut buf[len..]).await {
            Ok(0) => break,
            Ok(n) => {
                len += n;
                if buf[..len].windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            Err(_) => return Err(TransportError::Io),
        }
    }
    Ok(len)
}
