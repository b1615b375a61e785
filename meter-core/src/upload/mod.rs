//! Report delivery to the collector.
//!
//! The uploader makes at most one request per call and classifies the result.
//! It is also the only place the network and upload counters change, so the
//! counting rules live next to the classification they depend on.

pub mod http;
pub mod payload;

use core::fmt;

use heapless::String;

use crate::escalation::ErrorEvent;
use crate::failure::FailureState;
use crate::meter::MeterReading;

use self::payload::{DataReport, ErrorReport};

/// Capacity of a rendered request target (path plus query string).
pub const TARGET_CAPACITY: usize = 768;

/// Maximum device identifier length (a MAC address in text form fits).
pub const DEVICE_ID_CAPACITY: usize = 32;

/// State of the wireless association.
pub trait NetworkLink {
    fn is_connected(&self) -> bool;

    /// Identifier sent with every report.
    fn device_id(&self) -> &str;

    /// Received signal strength in dBm, when associated.
    fn rssi(&self) -> Option<i8>;
}

impl<T: NetworkLink + ?Sized> NetworkLink for &mut T {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn device_id(&self) -> &str {
        (**self).device_id()
    }

    fn rssi(&self) -> Option<i8> {
        (**self).rssi()
    }
}

/// HTTP status code returned by the collector.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusCode(u16);

impl StatusCode {
    pub const OK: Self = Self(200);
    pub const MOVED_PERMANENTLY: Self = Self(301);

    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// The collector answers 301 for accepted reports behind a redirect.
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        self.0 == Self::OK.0 || self.0 == Self::MOVED_PERMANENTLY.0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Method {
    Get,
}

impl Method {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
        }
    }
}

/// A single request handed to the transport.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Request<'a> {
    pub method: Method,
    pub target: &'a str,
}

impl<'a> Request<'a> {
    #[must_use]
    pub const fn get(target: &'a str) -> Self {
        Self {
            method: Method::Get,
            target,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Response {
    pub status: StatusCode,
}

/// Transport failures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// The connection could not be opened; no request was sent.
    Connect,
    Timeout,
    Io,
    MalformedResponse,
    /// The request did not fit the local buffer and was never sent.
    RequestTooLarge,
}

impl TransportError {
    /// `true` when the attempt ran its course on an available link.
    ///
    /// Refused connections and failed lookups still count: only a request
    /// that could not be built leaves the network counter raised.
    #[must_use]
    pub const fn completes_attempt(self) -> bool {
        !matches!(self, TransportError::RequestTooLarge)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Connect => f.write_str("connect failed"),
            TransportError::Timeout => f.write_str("timed out"),
            TransportError::Io => f.write_str("i/o error"),
            TransportError::MalformedResponse => f.write_str("malformed response"),
            TransportError::RequestTooLarge => f.write_str("request too large"),
        }
    }
}

/// Performs one request/response exchange with the collector.
///
/// Timeouts are the implementation's concern.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn request(&mut self, request: &Request<'_>) -> Result<Response, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    async fn request(&mut self, request: &Request<'_>) -> Result<Response, TransportError> {
        (**self).request(request).await
    }
}

/// Result of one upload attempt.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UploadOutcome {
    Delivered(StatusCode),
    Rejected(StatusCode),
    TransportFailed(TransportError),
    LinkUnavailable,
}

impl UploadOutcome {
    #[must_use]
    pub const fn is_delivered(self) -> bool {
        matches!(self, UploadOutcome::Delivered(_))
    }
}

impl fmt::Display for UploadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadOutcome::Delivered(status) => write!(f, "delivered ({status})"),
            UploadOutcome::Rejected(status) => write!(f, "rejected ({status})"),
            UploadOutcome::TransportFailed(err) => write!(f, "transport failed: {err}"),
            UploadOutcome::LinkUnavailable => f.write_str("link unavailable"),
        }
    }
}

/// Which report an outcome belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReportKind {
    Data,
    Error,
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportKind::Data => f.write_str("data"),
            ReportKind::Error => f.write_str("error"),
        }
    }
}

/// Sends data and error reports and keeps the network/upload counters.
pub struct ReportUploader<'a, L, T> {
    link: L,
    transport: T,
    data_path: &'a str,
    error_path: &'a str,
}

impl<'a, L, T> ReportUploader<'a, L, T>
where
    L: NetworkLink,
    T: Transport,
{
    #[must_use]
    pub const fn new(link: L, transport: T, data_path: &'a str, error_path: &'a str) -> Self {
        Self {
            link,
            transport,
            data_path,
            error_path,
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_parts(self) -> (L, T) {
        (self.link, self.transport)
    }

    /// Uploads a valid reading tagged with the cycle counter.
    pub async fn upload_reading(
        &mut self,
        reading: &MeterReading,
        cycle: u32,
        state: &mut FailureState,
    ) -> UploadOutcome {
        state.attempt_started();
        if !self.link.is_connected() {
            return UploadOutcome::LinkUnavailable;
        }

        let report = DataReport {
            device_id: self.link.device_id(),
            reading,
            cycle,
            rssi: self.link.rssi(),
        };
        let mut target: String<TARGET_CAPACITY> = String::new();
        if payload::write_data_target(&mut target, self.data_path, &report).is_err() {
            return UploadOutcome::TransportFailed(TransportError::RequestTooLarge);
        }

        self.send(&target, state).await
    }

    /// Sends the one-shot error report built on escalation.
    ///
    /// Bumps the upload counter before anything else, so an unreachable
    /// collector still counts against the upload domain. The report carries
    /// the bumped upload count alongside the event's other counters.
    pub async fn report_error(
        &mut self,
        event: &ErrorEvent,
        state: &mut FailureState,
    ) -> UploadOutcome {
        state.error_report_invoked();
        state.attempt_started();
        if !self.link.is_connected() {
            return UploadOutcome::LinkUnavailable;
        }

        let sent = ErrorEvent {
            counters: FailureState::from_counts(
                event.counters.bus_errors(),
                event.counters.network_errors(),
                state.upload_errors(),
            ),
            ..event.clone()
        };
        let report = ErrorReport {
            device_id: self.link.device_id(),
            event: &sent,
        };
        let mut target: String<TARGET_CAPACITY> = String::new();
        if payload::write_error_target(&mut target, self.error_path, &report).is_err() {
            return UploadOutcome::TransportFailed(TransportError::RequestTooLarge);
        }

        self.send(&target, state).await
    }

    async fn send(&mut self, target: &str, state: &mut FailureState) -> UploadOutcome {
        match self.transport.request(&Request::get(target)).await {
            Ok(response) => {
                state.attempt_completed();
                if response.status.is_accepted() {
                    state.delivered();
                    UploadOutcome::Delivered(response.status)
                } else {
                    UploadOutcome::Rejected(response.status)
                }
            }
            Err(err) => {
                if err.completes_attempt() {
                    state.attempt_completed();
                }
                UploadOutcome::TransportFailed(err)
            }
        }
    }
}
