//! Example connector implementation
//!
//! A no-op connector that demonstrates the Connector trait interface. It
//! needs no credentials, touches no records and echoes its optional
//! `greeting` setting back in the outcome data.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::connectors::trait_::{
    Connector, ConnectorError, FieldSpec, FieldType, SyncContext, SyncOutcome,
};

/// Example stub connector
pub struct ExampleConnector;

impl ExampleConnector {
    pub const NAME: &'static str = "example";
}

#[async_trait]
impl Connector for ExampleConnector {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "Reference connector that performs no external calls"
    }

    fn credential_fields(&self) -> Vec<FieldSpec> {
        Vec::new()
    }

    fn setting_fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::new("greeting", "Greeting", FieldType::Text)
                .placeholder("Hello")
                .description("Echoed back in the sync result"),
        ]
    }

    async fn sync(&self, ctx: SyncContext) -> Result<SyncOutcome, ConnectorError> {
        let greeting = ctx.setting("greeting").unwrap_or("Hello");
        info!(sync_run_id = %ctx.sync_run_id, "Example connector sync");

        Ok(SyncOutcome::succeeded().with_data(json!({
            "greeting": greeting,
            "sync_run_id": ctx.sync_run_id,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::trait_::{Settings, requires_credentials};
    use sea_orm::DatabaseConnection;
    use uuid::Uuid;

    fn context(settings: Settings) -> SyncContext {
        SyncContext {
            connector_name: ExampleConnector::NAME.to_string(),
            sync_run_id: Uuid::new_v4(),
            credentials: Default::default(),
            settings,
            db: DatabaseConnection::Disconnected,
        }
    }

    #[test]
    fn needs_no_credentials() {
        assert!(!requires_credentials(&ExampleConnector));
    }

    #[tokio::test]
    async fn echoes_greeting_with_zero_counts() {
        let settings = Settings::from([("greeting".to_string(), "Ahoj".to_string())]);
        let outcome = ExampleConnector
            .sync(context(settings))
            .await
            .expect("example sync never fails");

        assert!(outcome.success);
        assert_eq!(outcome.records_processed, 0);
        assert_eq!(outcome.records_created, 0);
        assert_eq!(
            outcome.data.as_ref().and_then(|d| d.get("greeting")),
            Some(&json!("Ahoj"))
        );
    }

    #[tokio::test]
    async fn greeting_defaults_when_unset() {
        let outcome = ExampleConnector
            .sync(context(Settings::new()))
            .await
            .expect("example sync never fails");
        assert_eq!(
            outcome.data.as_ref().and_then(|d| d.get("greeting")),
            Some(&json!("Hello"))
        );
    }
}
