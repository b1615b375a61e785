//! Collector transport over an embassy-net TCP socket.
//!
//! Each request opens a fresh connection (`Connection: close`), writes the
//! request head and reads just far enough to see the status line.

use core::net::Ipv4Addr;

use defmt::{debug, warn};
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_net::{IpAddress, Stack};
use embassy_time::{Duration, with_timeout};
use embedded_io_async::Write as _;
use heapless::String;
use meter_core::upload::http::{self, HttpError};
use meter_core::upload::{Request, Response, TARGET_CAPACITY, Transport, TransportError};

const SOCKET_BUFFER_LEN: usize = 1024;
/// Request line plus the fixed headers.
const HEAD_CAPACITY: usize = TARGET_CAPACITY + 192;
const STATUS_BUFFER_LEN: usize = 256;
const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(15);
const CLOSE_GRACE: Duration = Duration::from_millis(250);

pub struct HttpTransport<'a> {
    stack: Stack<'static>,
    host: &'a str,
    port: u16,
    rx_buffer: [u8; SOCKET_BUFFER_LEN],
    tx_buffer: [u8; SOCKET_BUFFER_LEN],
}

impl<'a> HttpTransport<'a> {
    pub const fn new(stack: Stack<'static>, host: &'a str, port: u16) -> Self {
        Self {
            stack,
            host,
            port,
            rx_buffer: [0; SOCKET_BUFFER_LEN],
            tx_buffer: [0; SOCKET_BUFFER_LEN],
        }
    }

    async fn resolve(&self) -> Result<IpAddress, TransportError> {
        if let Ok(address) = self.host.parse::<Ipv4Addr>() {
            return Ok(IpAddress::Ipv4(address));
        }

        let addresses = self
            .stack
            .dns_query(self.host, DnsQueryType::A)
            .await
            .map_err(|err| {
                warn!(
                    "net: DNS lookup of {} failed: {:?}",
                    self.host,
                    defmt::Debug2Format(&err)
                );
                TransportError::Connect
            })?;
        addresses.first().copied().ok_or(TransportError::Connect)
    }
}

impl Transport for HttpTransport<'_> {
    async fn request(&mut self, request: &Request<'_>) -> Result<Response, TransportError> {
        let mut head: String<HEAD_CAPACITY> = String::new();
        http::write_request(&mut head, request, self.host, self.port)
            .map_err(|_| TransportError::RequestTooLarge)?;

        let address = self.resolve().await?;
        let mut socket = TcpSocket::new(self.stack, &mut self.rx_buffer, &mut self.tx_buffer);
        socket.set_timeout(Some(SOCKET_TIMEOUT));

        if let Err(err) = socket.connect((address, self.port)).await {
            warn!(
                "net: connect to {}:{} failed: {:?}",
                self.host,
                self.port,
                defmt::Debug2Format(&err)
            );
            return Err(TransportError::Connect);
        }

        let result = with_timeout(EXCHANGE_TIMEOUT, exchange(&mut socket, head.as_bytes()))
            .await
            .unwrap_or(Err(TransportError::Timeout));

        socket.close();
        let _ = with_timeout(CLOSE_GRACE, socket.flush()).await;
        socket.abort();

        if let Ok(response) = &result {
            debug!("net: {} -> {}", request.target, response.status.as_u16());
        }
        result
    }
}

async fn exchange(socket: &mut TcpSocket<'_>, head: &[u8]) -> Result<Response, TransportError> {
    socket
        .write_all(head)
        .await
        .map_err(|_| TransportError::Io)?;
    socket.flush().await.map_err(|_| TransportError::Io)?;

    let mut buffer = [0u8; STATUS_BUFFER_LEN];
    let mut filled = 0;
    loop {
        if filled == buffer.len() {
            return Err(TransportError::MalformedResponse);
        }

        let count = socket
            .read(&mut buffer[filled..])
            .await
            .map_err(|_| TransportError::Io)?;
        if count == 0 {
            // Closed before a full status line arrived.
            return Err(TransportError::MalformedResponse);
        }
        filled += count;

        match http::parse_status_line(&buffer[..filled]) {
            Ok(line) => return Ok(Response { status: line.status }),
            Err(HttpError::Incomplete) => {}
            Err(HttpError::MalformedStatusLine) => return Err(TransportError::MalformedResponse),
        }
    }
}
