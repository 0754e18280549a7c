use crate::client::ClientError;

use core::fmt;
use std::error::Error;

/// Wraps application errors into a common SparkError enum.
#[derive(Debug)]
pub struct SparkError {
    pub(crate) kind: SparkErrorKind,
}

impl SparkError {
    pub(crate) fn new(kind: SparkErrorKind) -> Self {
        SparkError { kind }
    }
}

impl fmt::Display for SparkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SparkError: {}", self.kind)
    }
}

impl Error for SparkError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		Some(&self.kind)
	}
}

impl From<ClientError> for SparkError {
    fn from(error: ClientError) -> Self {
        SparkError::new(SparkErrorKind::Client(error))
    }
}

impl From<std::io::Error> for SparkError {
    fn from(error: std::io::Error) -> Self {
        SparkError::new(SparkErrorKind::Output(error))
    }
}

#[derive(Debug)]
pub(crate) enum SparkErrorKind {
    Client(ClientError),
    InvalidConnectionUri { source: tonic::transport::Error, uri: String },
    Output(std::io::Error),
    RaggedRow { row: usize, cells: usize, columns: usize },
    Transport(tonic::transport::Error)
}

impl fmt::Display for SparkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client(_) => write!(f, "Client error"),
            Self::InvalidConnectionUri { uri, .. } => write!(f, "Connection URI is invalid: '{uri}'"),
            Self::Output(_) => write!(f, "Failed to write results"),
            Self::RaggedRow { row, cells, columns } => write!(
                f, "Row {row} has {cells} cells but the table has {columns} columns"
            ),
            Self::Transport(_) => write!(f, "Tonic transport error")
        }
    }
}

impl Error for SparkErrorKind {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			Self::Client(source) => Some(source),
			Self::InvalidConnectionUri { source, .. } => Some(source),
			Self::Output(source) => Some(source),
			Self::RaggedRow { .. } => None,
			Self::Transport(source) => Some(source),
		}
	}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientError, ClientErrorKind};

    #[test]
    fn test_source_chain_reaches_client_kind() {
        let err: SparkError = ClientError::new(ClientErrorKind::Stream(
            tonic::Status::unavailable("bridge is down")
        )).into();

        assert_eq!(err.to_string(), "SparkError: Client error");

        let client = err.source().unwrap().source().unwrap();
        assert!(client.to_string().starts_with("ClientError: Failed to process stream"));
    }

    #[test]
    fn test_output_error_conversion() {
        let err: SparkError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed").into();

        assert!(matches!(err.kind, SparkErrorKind::Output(_)));
        assert_eq!(err.to_string(), "SparkError: Failed to write results");
    }

    #[test]
    fn test_invalid_uri_keeps_transport_source() {
        let uri = "http://bad host:15002".to_string();
        let source = tonic::transport::Endpoint::from_shared(uri.clone()).err().unwrap();
        let err = SparkError::new(SparkErrorKind::InvalidConnectionUri { source, uri });

        assert_eq!(err.to_string(), "SparkError: Connection URI is invalid: 'http://bad host:15002'");
        assert!(err.source().unwrap().source().is_some());
    }
}
