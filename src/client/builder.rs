#![allow(rustdoc::invalid_html_tags)]

use crate::client::error::{ClientError, ClientErrorKind};

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use url::Url;
use uuid::Uuid;

pub(crate) type Host = String;
pub(crate) type Port = u16;
pub(crate) type UrlParse = (Host, Port, Option<HashMap<String, String>>);

/// Parses and validates Spark Connect connection strings.
///
/// ChannelBuilder is used internally by SparkSessionBuilder
/// to configure connections according to the
/// [Spark Connect client connection specification](https://github.com/apache/spark/blob/master/connector/connect/docs/client-connection-string.md).
///
/// It extracts host, port, and optional parameters from URLs of the form:
///
/// `sc://<host>:<port>/;key1=value1;key2=value2;...`
///
/// Supported keys include:
/// - token — authentication token (converted to Bearer header);
/// - user_id — custom user identifier (defaults to $USER);
/// - user_agent — overrides the default Rust client identifier;
/// - session_id — UUID for reusing a session;
/// - use_ssl — enables TLS (requires `tls` feature).
///
/// End users should prefer [`SparkSessionBuilder`](crate::SparkSessionBuilder) instead.
#[derive(Clone, Debug)]
pub struct ChannelBuilder {
    pub(crate) host: Host,
    pub(crate) port: Port,
    pub(crate) session_id: Uuid,
    pub(crate) user_id: Option<String>,
    pub(crate) user_agent: Option<String>,
    pub(crate) use_ssl: bool,
    pub(crate) headers: Option<HashMap<String, String>>,
}

/// Connection string used when neither the caller nor `SPARK_REMOTE` provides one.
pub(crate) const DEFAULT_CONNECTION: &str = "sc://localhost:15002";

impl ChannelBuilder {
    /// Reads the connection string from `SPARK_REMOTE`, defaulting to port 15002 on localhost.
    pub(crate) fn from_env() -> Result<ChannelBuilder, ClientError> {
        let connection = env::var("SPARK_REMOTE")
            .unwrap_or_else(|_| DEFAULT_CONNECTION.to_string());

        ChannelBuilder::new(&connection)
    }

    /// Create builder and validate a connection string.
    pub(crate) fn new(connection: &str) -> Result<ChannelBuilder, ClientError> {
        let (host, port, headers) = ChannelBuilder::parse_connection_string(connection)?;

        let mut channel_builder = ChannelBuilder {
            host,
            port,
            session_id: Uuid::new_v4(),
            user_id: ChannelBuilder::create_user_id(None),
            user_agent: ChannelBuilder::create_user_agent(None),
            use_ssl: false,
            headers: None,
        };

        if let Some(mut headers) = headers {
            channel_builder.user_id = headers
                .remove("user_id")
                .map(|user_id| ChannelBuilder::create_user_id(Some(&user_id)))
                .unwrap_or_else(|| ChannelBuilder::create_user_id(None));

            channel_builder.user_agent = headers
                .remove("user_agent")
                .map(|user_agent| ChannelBuilder::create_user_agent(Some(&user_agent)))
                .unwrap_or_else(|| ChannelBuilder::create_user_agent(None));

            if let Some(token) = headers.remove("token") {
                headers.insert("authorization".to_string(), format!("Bearer {token}"));
            }

            if let Some(session_id) = headers.remove("session_id") {
                channel_builder.session_id = Uuid::from_str(&session_id)
                    .map_err(|source|
                        ClientError::new(ClientErrorKind::InvalidSessionID {
                            source, session_id
                        })
                    )?
            }

            if let Some(use_ssl) = headers.remove("use_ssl") {
                if use_ssl.eq_ignore_ascii_case("true") {
                    if cfg!(not(feature = "tls")) {
                        return Err(ClientError::new(ClientErrorKind::TlsUnavailable));
                    }
                    channel_builder.use_ssl = true
                }
            };

            if !headers.is_empty() {
                channel_builder.headers = Some(headers);
            }
        }

        Ok(channel_builder)
    }

    pub(crate) fn endpoint(&self) -> String {
        let scheme = if self.use_ssl {
            "https"
        } else {
            "http"
        };

        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub(crate) fn headers(&self) -> Option<HashMap<String, String>> {
        self.headers.to_owned()
    }

    /// Replaces the user agent prefix while keeping the OS and version suffix.
    pub(crate) fn set_app_name(&mut self, app_name: &str) {
        self.user_agent = ChannelBuilder::create_user_agent(Some(app_name));
    }

    pub(crate) fn create_user_agent(user_agent: Option<&str>) -> Option<String> {
        let user_agent = user_agent.unwrap_or("_SPARK_CONNECT_RUST");
        let pkg_version = env!("CARGO_PKG_VERSION");
        let os = env::consts::OS.to_lowercase();

        Some(format!(
            "{} os/{} spark_ivp/{}",
            user_agent, os, pkg_version
        ))
    }

    pub(crate) fn create_user_id(user_id: Option<&str>) -> Option<String> {
        match user_id {
            Some(user_id) => Some(user_id.to_string()),
            None => env::var("USER").ok(),
        }
    }

    pub(crate) fn parse_connection_string(connection: &str) -> Result<UrlParse, ClientError> {
        let url = Url::parse(connection)
            .map_err(|source| {
                ClientError::new(ClientErrorKind::InvalidConnectionString {
                    source: Some(source), conn_string: connection.to_string(), msg: "failed to parse connection string".to_string()
                })
            }
        )?;

        if url.scheme() != "sc" {
            return Err(ClientError::new(ClientErrorKind::InvalidConnectionString {
                source: None, conn_string: connection.to_string(), msg: "the connection string must start with 'sc://'".to_string()
            }))
        };

        let host = url
            .host_str()
            .ok_or_else(|| {
                ClientError::new(ClientErrorKind::InvalidConnectionString  {
                    source: None,
                    conn_string: connection.to_string(),
                    msg: "the hostname must not be empty"
                        .to_string(),
                })
            })?
            .to_string();

        let port = url
            .port()
            .ok_or_else(|| {
                ClientError::new(ClientErrorKind::InvalidConnectionString  {
                    source: None,
                    conn_string: connection.to_string(),
                    msg: "the port must not be empty."
                        .to_string(),
                })
        })?;

        let headers = ChannelBuilder::parse_headers(url);

        Ok((host, port, headers))
    }

    pub(crate) fn parse_headers(url: Url) -> Option<HashMap<String, String>> {
        let path: Vec<&str> = url
            .path()
            .split(';')
            .filter(|&pair| (pair != "/") & (!pair.is_empty()))
            .collect();

        if path.is_empty() || (path.len() == 1 && (path[0].is_empty() || path[0] == "/")) {
            return None;
        }

        let headers: HashMap<String, String> = path
            .iter()
            .copied()
            .map(|pair| {
                let mut parts = pair.splitn(2, '=');
                (
                    parts.next().unwrap_or("").to_string(),
                    parts.next().unwrap_or("").to_string(),
                )
            })
            .collect();

        if headers.is_empty() {
            return None;
        }

        Some(headers)
    }
}
