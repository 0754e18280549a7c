//! gRPC plumbing between a session and the Spark Connect server.

mod builder;
mod error;

pub use builder::ChannelBuilder;
pub(crate) use error::{ClientError, ClientErrorKind};

use crate::error::{SparkError, SparkErrorKind};
use crate::io;
use crate::spark;
use crate::spark::spark_connect_service_client::SparkConnectServiceClient;

use arrow::array::RecordBatch;
use futures_util::StreamExt;
use log::{debug, trace};
use tonic::metadata::{Ascii, MetadataKey, MetadataValue};
use tonic::service::Interceptor;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::{Channel, Endpoint};
use uuid::Uuid;

/// Arrow batches returned by a single `ExecutePlan` can be large.
const MAX_MESSAGE_SIZE: usize = 128 * 1024 * 1024;

/// Attaches the connection string headers to every outgoing request.
#[derive(Clone, Debug, Default)]
pub(crate) struct HeadersInterceptor {
    headers: Vec<(MetadataKey<Ascii>, MetadataValue<Ascii>)>,
}

impl HeadersInterceptor {
    pub(crate) fn new(channel_builder: &ChannelBuilder) -> Result<Self, ClientError> {
        let mut headers = vec![];

        for (key, value) in channel_builder.headers().unwrap_or_default() {
            let invalid = |msg: &str| ClientError::new(ClientErrorKind::InvalidHeader {
                key: key.clone(), msg: msg.to_string()
            });

            let metadata_key: MetadataKey<Ascii> = MetadataKey::from_bytes(key.as_bytes())
                .map_err(|_| invalid("not a valid gRPC metadata key"))?;
            let metadata_value: MetadataValue<Ascii> = value
                .parse()
                .map_err(|_| invalid("value must be printable ASCII"))?;

            headers.push((metadata_key, metadata_value));
        }

        Ok(HeadersInterceptor { headers })
    }
}

impl Interceptor for HeadersInterceptor {
    fn call(&mut self, mut request: tonic::Request<()>) -> Result<tonic::Request<()>, tonic::Status> {
        let metadata = request.metadata_mut();
        for (key, value) in &self.headers {
            metadata.insert(key.clone(), value.clone());
        }
        Ok(request)
    }
}

fn endpoint(uri: String) -> Result<Endpoint, SparkError> {
    Endpoint::from_shared(uri.clone())
        .map_err(|source| SparkError::new(SparkErrorKind::InvalidConnectionUri { source, uri }))
}

type Stub = SparkConnectServiceClient<InterceptedService<Channel, HeadersInterceptor>>;

/// Session-scoped client for the three RPCs the IVP needs.
#[derive(Clone, Debug)]
pub(crate) struct SparkClient {
    stub: Stub,
    session_id: String,
    user_context: spark::UserContext,
    client_type: Option<String>,
}

impl SparkClient {
    /// Opens the gRPC channel described by `channel_builder`.
    pub(crate) async fn connect(channel_builder: &ChannelBuilder) -> Result<SparkClient, SparkError> {
        let interceptor = HeadersInterceptor::new(channel_builder)?;
        let endpoint = endpoint(channel_builder.endpoint())?;

        #[cfg(feature = "tls")]
        let endpoint = if channel_builder.use_ssl {
            endpoint
                .tls_config(tonic::transport::ClientTlsConfig::new().with_native_roots())
                .map_err(|source| SparkError::new(SparkErrorKind::Transport(source)))?
        } else {
            endpoint
        };

        let channel = endpoint
            .connect()
            .await
            .map_err(|source| SparkError::new(SparkErrorKind::Transport(source)))?;

        debug!("Connected to Spark Connect at {}", channel_builder.endpoint());

        Ok(SparkClient::from_channel(channel, interceptor, channel_builder))
    }

    pub(crate) fn from_channel(
        channel: Channel,
        interceptor: HeadersInterceptor,
        channel_builder: &ChannelBuilder,
    ) -> SparkClient {
        let stub = SparkConnectServiceClient::with_interceptor(channel, interceptor)
            .max_decoding_message_size(MAX_MESSAGE_SIZE);

        SparkClient {
            stub,
            session_id: channel_builder.session_id.to_string(),
            user_context: spark::UserContext {
                user_id: channel_builder.user_id.clone().unwrap_or_default(),
                user_name: channel_builder.user_id.clone().unwrap_or_default(),
            },
            client_type: channel_builder.user_agent.clone(),
        }
    }

    /// Client over a channel that connects on first use.
    #[cfg(test)]
    pub(crate) fn lazy(connection: &str) -> SparkClient {
        let channel_builder = ChannelBuilder::new(connection).unwrap();
        let channel = Endpoint::from_shared(channel_builder.endpoint()).unwrap().connect_lazy();
        let interceptor = HeadersInterceptor::new(&channel_builder).unwrap();

        SparkClient::from_channel(channel, interceptor, &channel_builder)
    }

    pub(crate) fn session_id(&self) -> &str {
        &self.session_id
    }

    pub(crate) fn execute_plan_request(&self, plan: spark::Plan) -> spark::ExecutePlanRequest {
        spark::ExecutePlanRequest {
            session_id: self.session_id.clone(),
            user_context: Some(self.user_context.clone()),
            plan: Some(plan),
            client_type: self.client_type.clone(),
            operation_id: Some(Uuid::new_v4().to_string()),
            tags: vec![],
        }
    }

    /// Runs a plan and drains the response stream into Arrow batches.
    pub(crate) async fn execute(&self, plan: spark::Plan) -> Result<Vec<RecordBatch>, ClientError> {
        let request = self.execute_plan_request(plan);
        debug!("ExecutePlan operation_id={:?}", request.operation_id);

        let mut stub = self.stub.clone();
        let mut stream = stub
            .execute_plan(request.clone())
            .await
            .map_err(|status| ClientError::new(ClientErrorKind::ExecutePlanRequest { status, request }))?
            .into_inner();

        let mut batches = vec![];

        while let Some(response) = stream.next().await {
            let response = response
                .map_err(|status| ClientError::new(ClientErrorKind::Stream(status)))?;

            if self.handle_response(response, &mut batches)? {
                break;
            }
        }

        debug!("ExecutePlan returned {} batches", batches.len());
        Ok(batches)
    }

    /// Returns `true` once the server reports the result as complete.
    pub(crate) fn handle_response(
        &self,
        response: spark::ExecutePlanResponse,
        batches: &mut Vec<RecordBatch>,
    ) -> Result<bool, ClientError> {
        use spark::execute_plan_response::ResponseType;

        if response.session_id != self.session_id {
            return Err(ClientError::new(ClientErrorKind::SessionIDMismatch {
                client_session_id: self.session_id.clone(),
                request_session_id: response.session_id,
            }));
        }

        match response.response_type {
            Some(ResponseType::ArrowBatch(batch)) => {
                trace!("response {} carries {} rows", response.response_id, batch.row_count);
                batches.extend(io::deserialize(&batch.data, batch.row_count)?);
                Ok(false)
            }
            Some(ResponseType::ResultComplete(_)) => Ok(true),
            None => Ok(false),
        }
    }

    pub(crate) fn config_request(&self, pairs: &[(String, String)]) -> spark::ConfigRequest {
        use spark::config_request::{operation::OpType, Operation, Set};

        let pairs = pairs
            .iter()
            .map(|(key, value)| spark::KeyValue { key: key.clone(), value: Some(value.clone()) })
            .collect();

        spark::ConfigRequest {
            session_id: self.session_id.clone(),
            user_context: Some(self.user_context.clone()),
            operation: Some(Operation { op_type: Some(OpType::Set(Set { pairs })) }),
            client_type: self.client_type.clone(),
        }
    }

    /// Sets runtime configuration values, returning any server warnings.
    pub(crate) async fn set_config(&self, pairs: &[(String, String)]) -> Result<Vec<String>, ClientError> {
        let request = self.config_request(pairs);

        let mut stub = self.stub.clone();
        let response = stub
            .config(request.clone())
            .await
            .map_err(|status| ClientError::new(ClientErrorKind::ConfigRequest { status, request }))?
            .into_inner();

        Ok(response.warnings)
    }

    pub(crate) fn release_session_request(&self) -> spark::ReleaseSessionRequest {
        spark::ReleaseSessionRequest {
            session_id: self.session_id.clone(),
            user_context: Some(self.user_context.clone()),
            client_type: self.client_type.clone(),
        }
    }

    pub(crate) async fn release_session(&self) -> Result<(), ClientError> {
        let request = self.release_session_request();

        let mut stub = self.stub.clone();
        stub.release_session(request.clone())
            .await
            .map_err(|status| ClientError::new(ClientErrorKind::ReleaseSessionRequest { status, request }))?;

        debug!("Released session {}", self.session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark::execute_plan_response::{ArrowBatch, ResponseType, ResultComplete};

    #[test]
    fn test_interceptor_attaches_headers() {
        let channel_builder = ChannelBuilder::new("sc://localhost:15002/;token=secret;x-cluster-id=abc").unwrap();
        let mut interceptor = HeadersInterceptor::new(&channel_builder).unwrap();

        let request = interceptor.call(tonic::Request::new(())).unwrap();

        assert_eq!(request.metadata().get("authorization").unwrap(), "Bearer secret");
        assert_eq!(request.metadata().get("x-cluster-id").unwrap(), "abc");
    }

    #[test]
    fn test_interceptor_rejects_bad_header_key() {
        let channel_builder = ChannelBuilder::new("sc://localhost:15002/;bad:key=1").unwrap();

        let err = HeadersInterceptor::new(&channel_builder).unwrap_err();
        match err.kind {
            ClientErrorKind::InvalidHeader { key, .. } => assert_eq!(key, "bad:key"),
            other => panic!("unexpected error kind: {other:?}"),
        }
    }

    #[test]
    fn test_endpoint_rejects_unparsable_uri() {
        assert!(endpoint("http://localhost:15002".to_string()).is_ok());

        let err = endpoint("http://bad host:15002".to_string()).err().unwrap();
        match err.kind {
            SparkErrorKind::InvalidConnectionUri { uri, .. } => assert_eq!(uri, "http://bad host:15002"),
            other => panic!("unexpected error kind: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_reports_unreachable_server() {
        let channel_builder = ChannelBuilder::new("sc://127.0.0.1:1").unwrap();

        let err = SparkClient::connect(&channel_builder).await.unwrap_err();
        assert!(matches!(err.kind, SparkErrorKind::Transport(_)));
        assert_eq!(err.to_string(), "SparkError: Tonic transport error");
    }

    #[tokio::test]
    async fn test_requests_carry_session() {
        let client = SparkClient::lazy("sc://localhost:15002/;user_id=ivp;user_agent=izodaIVP");

        let request = client.execute_plan_request(spark::Plan::default());
        assert_eq!(request.session_id, client.session_id());
        assert_eq!(request.user_context.unwrap().user_id, "ivp");
        assert!(request.client_type.unwrap().starts_with("izodaIVP"));
        assert!(request.operation_id.is_some());

        let release = client.release_session_request();
        assert_eq!(release.session_id, client.session_id());
    }

    #[tokio::test]
    async fn test_config_request_sets_pairs() {
        use spark::config_request::operation::OpType;

        let client = SparkClient::lazy("sc://localhost:15002");

        let request = client.config_request(&[("spark.files.overwrite".to_string(), "true".to_string())]);

        match request.operation.unwrap().op_type.unwrap() {
            OpType::Set(set) => {
                assert_eq!(set.pairs.len(), 1);
                assert_eq!(set.pairs[0].key, "spark.files.overwrite");
                assert_eq!(set.pairs[0].value.as_deref(), Some("true"));
            }
        }
    }

    #[tokio::test]
    async fn test_handle_response_rejects_foreign_session() {
        let client = SparkClient::lazy("sc://localhost:15002");
        let response = spark::ExecutePlanResponse {
            session_id: "someone-else".to_string(),
            ..Default::default()
        };

        let err = client.handle_response(response, &mut vec![]).unwrap_err();
        assert!(matches!(err.kind, ClientErrorKind::SessionIDMismatch { .. }));
    }

    #[tokio::test]
    async fn test_handle_response_completion_and_errors() {
        let client = SparkClient::lazy("sc://localhost:15002");
        let mut batches = vec![];

        let complete = spark::ExecutePlanResponse {
            session_id: client.session_id().to_string(),
            response_type: Some(ResponseType::ResultComplete(ResultComplete {})),
            ..Default::default()
        };
        assert!(client.handle_response(complete, &mut batches).unwrap());

        let broken = spark::ExecutePlanResponse {
            session_id: client.session_id().to_string(),
            response_type: Some(ResponseType::ArrowBatch(ArrowBatch {
                row_count: 1,
                data: vec![0x01],
                start_offset: None,
            })),
            ..Default::default()
        };
        let err = client.handle_response(broken, &mut batches).unwrap_err();
        assert!(matches!(err.kind, ClientErrorKind::Io(_)));
        assert!(batches.is_empty());
    }
}
