use crate::io::IoError;
use crate::spark;

use std::error::Error;
use std::fmt;
use url;


#[derive(Debug)]
#[non_exhaustive]
pub(crate) struct ClientError {
    pub(crate) kind: ClientErrorKind
}

impl ClientError {
    pub(crate) fn new(kind: ClientErrorKind) -> Self {
        ClientError { kind }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientError: {}", self.kind)
    }
}

impl Error for ClientError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		Some(&self.kind)
	}
}

#[derive(Debug)]
pub(crate) enum ClientErrorKind {
    ConfigRequest { status: tonic::Status, request: spark::ConfigRequest },
    ExecutePlanRequest { status: tonic::Status, request: spark::ExecutePlanRequest },
    InvalidHeader { key: String, msg: String },
    InvalidSessionID { source: uuid::Error, session_id: String },
    InvalidConnectionString { source: Option<url::ParseError>, conn_string: String,  msg: String },
    Io(IoError),
    ReleaseSessionRequest { status: tonic::Status, request: spark::ReleaseSessionRequest },
    SessionIDMismatch { client_session_id: String, request_session_id: String },
    ShowString(String),
    Stream(tonic::Status),
    TlsUnavailable
}

impl fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigRequest { status, request } => write!(
                f, "ConfigRequest failed with status '{status}': {request:?}"
            ),
            Self::ExecutePlanRequest { status, request } => write!(
                f, "ExecutePlanRequest failed with status '{status}': {request:?}"
            ),
            Self::InvalidHeader { key, msg } => write!(f, "Connection header '{key}' cannot be sent: {msg}"),
            Self::InvalidSessionID { session_id, .. } => write!(f, "Failed to parse session ID: '{session_id}'"),
            Self::InvalidConnectionString { conn_string, msg, .. } => write!(
                f, "Failed to parse the connection URL '{conn_string}': {msg}. Please update the URL to follow the correct format, e.g., 'sc://hostname:port'."
            ),
            Self::Io(_) => write!(f, "Failed to deserialize Arrow RecordBatch."),
            Self::ReleaseSessionRequest { status, request } => write!(
                f, "ReleaseSessionRequest failed with status '{status}': {request:?}"
            ),
            Self::SessionIDMismatch { client_session_id, request_session_id } => write!(
                f, "Request session ID does not match the client: {client_session_id} != {request_session_id}"
            ),
            Self::ShowString(msg) => write!(f, "Unexpected show_string response: {msg}."),
            Self::Stream(status) => write!(f, "Failed to process stream: status {status}"),
            Self::TlsUnavailable => write!(f, "The 'use_ssl' option requires the 'tls' feature, but it's not enabled!"),
        }
    }
}

impl Error for ClientErrorKind {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			Self::InvalidSessionID { source, .. } => Some(source),
			Self::InvalidConnectionString { source, .. } => match source {
                Some(src) => Some(src),
                None => None
            },
			Self::Io(source) => Some(source),
			_ => None,
		}
	}
}

impl From<IoError> for ClientError {
    fn from(error: IoError) -> Self {
        ClientError::new(ClientErrorKind::Io(error))
    }
}
