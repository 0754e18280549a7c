use crate::client::{ChannelBuilder, SparkClient};
use crate::dataframe::DataFrameReader;
use crate::error::SparkError;
use crate::spark;

use log::{info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Configures and creates a [`SparkSession`].
///
/// Connection strings follow the Spark Connect format, e.g.
/// `sc://localhost:15002/;user_id=ivp`. `SparkSessionBuilder::default()`
/// reads `SPARK_REMOTE` and falls back to `sc://localhost:15002`.
#[derive(Clone, Debug, Default)]
pub struct SparkSessionBuilder {
    connection: Option<String>,
    app_name: Option<String>,
    configs: Vec<(String, String)>,
}

impl SparkSessionBuilder {
    pub fn new(connection: &str) -> SparkSessionBuilder {
        SparkSessionBuilder {
            connection: Some(connection.to_string()),
            ..Default::default()
        }
    }

    /// Sent to the server as the client type, in place of the default user agent.
    pub fn app_name(mut self, app_name: &str) -> Self {
        self.app_name = Some(app_name.to_string());
        self
    }

    /// Runtime configuration applied once the session is connected.
    pub fn config(mut self, key: &str, value: &str) -> Self {
        self.configs.push((key.to_string(), value.to_string()));
        self
    }

    pub(crate) fn channel_builder(&self) -> Result<ChannelBuilder, SparkError> {
        let mut channel_builder = match &self.connection {
            Some(connection) => ChannelBuilder::new(connection)?,
            None => ChannelBuilder::from_env()?,
        };

        if let Some(app_name) = &self.app_name {
            channel_builder.set_app_name(app_name);
        }

        Ok(channel_builder)
    }

    /// Connects to the server. The server creates the session on its first request.
    ///
    /// Configuration values are applied one by one; a value the server
    /// refuses is logged as a warning and does not fail the session.
    pub async fn build(self) -> Result<SparkSession, SparkError> {
        let channel_builder = self.channel_builder()?;
        let client = SparkClient::connect(&channel_builder).await?;

        info!("Spark session {} connected to {}", client.session_id(), channel_builder.endpoint());

        let session = SparkSession::new(client);
        session.apply_configs(&self.configs).await;

        Ok(session)
    }

    /// Same as [`build`](SparkSessionBuilder::build), under the PySpark name.
    pub async fn get_or_create(self) -> Result<SparkSession, SparkError> {
        self.build().await
    }
}

/// Entry point to a Spark Connect session.
#[derive(Clone, Debug)]
pub struct SparkSession {
    client: SparkClient,
    plan_ids: Arc<AtomicI64>,
}

impl SparkSession {
    pub(crate) fn new(client: SparkClient) -> SparkSession {
        SparkSession { client, plan_ids: Arc::new(AtomicI64::new(0)) }
    }

    #[cfg(test)]
    pub(crate) fn lazy(connection: &str) -> SparkSession {
        SparkSession::new(SparkClient::lazy(connection))
    }

    pub(crate) fn client(&self) -> &SparkClient {
        &self.client
    }

    pub fn session_id(&self) -> &str {
        self.client.session_id()
    }

    /// Wraps `rel_type` in a relation with a fresh plan id.
    pub(crate) fn relation(&self, rel_type: spark::relation::RelType) -> spark::Relation {
        let plan_id = self.plan_ids.fetch_add(1, Ordering::Relaxed);

        spark::Relation {
            common: Some(spark::RelationCommon { plan_id: Some(plan_id) }),
            rel_type: Some(rel_type),
        }
    }

    async fn apply_configs(&self, configs: &[(String, String)]) {
        for (key, value) in configs {
            match self.client.set_config(&[(key.clone(), value.clone())]).await {
                Ok(warnings) => {
                    for warning in warnings {
                        warn!("{key}: {warning}");
                    }
                }
                Err(error) => warn!("Could not set '{key}' to '{value}': {error}"),
            }
        }
    }

    pub fn read(&self) -> DataFrameReader {
        DataFrameReader::new(self.clone())
    }

    /// Releases the server-side session.
    pub async fn stop(self) -> Result<(), SparkError> {
        self.client.release_session().await?;
        info!("Spark session {} stopped", self.session_id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientErrorKind;
    use crate::error::SparkErrorKind;

    #[test]
    fn test_builder_collects_settings() {
        let builder = SparkSessionBuilder::new("sc://localhost:15002")
            .app_name("izodaIVP")
            .config("spark.files.overwrite", "true");

        assert_eq!(builder.configs, vec![("spark.files.overwrite".to_string(), "true".to_string())]);

        let channel_builder = builder.channel_builder().unwrap();
        assert!(channel_builder.user_agent.unwrap().starts_with("izodaIVP os/"));
    }

    #[test]
    fn test_builder_rejects_bad_connection() {
        let err = SparkSessionBuilder::new("localhost:15002").channel_builder().unwrap_err();

        match err.kind {
            SparkErrorKind::Client(client) => {
                assert!(matches!(client.kind, ClientErrorKind::InvalidConnectionString { .. }))
            }
            other => panic!("unexpected error kind: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_build_and_get_or_create_report_unreachable_server() {
        let err = SparkSessionBuilder::new("sc://127.0.0.1:1").build().await.unwrap_err();
        assert!(matches!(err.kind, SparkErrorKind::Transport(_)));

        let err = SparkSessionBuilder::new("sc://127.0.0.1:1").get_or_create().await.unwrap_err();
        assert!(matches!(err.kind, SparkErrorKind::Transport(_)));
    }

    #[tokio::test]
    async fn test_relations_get_increasing_plan_ids() {
        use spark::relation::RelType;

        let session = SparkSession::lazy("sc://localhost:15002");
        let shared = session.clone();

        let first = session.relation(RelType::Read(spark::Read::default().into()));
        let second = shared.relation(RelType::Read(spark::Read::default().into()));

        assert_eq!(first.common.unwrap().plan_id, Some(0));
        assert_eq!(second.common.unwrap().plan_id, Some(1));
    }
}
