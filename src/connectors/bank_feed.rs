//! Bank feed connector
//!
//! Downloads the account statement for the fetch window from a token
//! authenticated bank API and upserts every movement keyed by the bank's
//! transaction id. Statement columns follow the bank's numbered layout:
//!
//! | column   | meaning         |
//! |----------|-----------------|
//! | column22 | transaction id  |
//! | column0  | booking date    |
//! | column1  | amount          |
//! | column14 | currency        |
//! | column10 | counterparty    |
//! | column16 | message         |

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use tracing::info;
use url::Url;

use crate::config::AppConfig;
use crate::connectors::fetch::{FetchError, HttpFetcher};
use crate::connectors::reconcile::{SINCE_DATE_SETTING, SyncTally, fetch_window_start};
use crate::connectors::trait_::{
    Connector, ConnectorError, FieldSpec, FieldType, SyncContext, SyncOutcome,
};
use crate::repositories::{BankTransactionRepository, NewBankTransaction};

pub const API_TOKEN_CREDENTIAL: &str = "api_token";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementEnvelope {
    pub account_statement: AccountStatement,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatement {
    pub info: StatementInfo,
    #[serde(default)]
    pub transaction_list: TransactionList,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementInfo {
    #[serde(deserialize_with = "string_or_number")]
    pub account_id: String,
    #[serde(default)]
    pub bank_id: Option<String>,
    pub currency: String,
    #[serde(default)]
    pub iban: Option<String>,
    #[serde(default)]
    pub closing_balance: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionList {
    #[serde(default)]
    pub transaction: Vec<RawTransaction>,
}

#[derive(Debug, Deserialize)]
pub struct Column<T> {
    pub value: T,
}

#[derive(Debug, Deserialize)]
pub struct RawTransaction {
    pub column22: Option<Column<JsonValue>>,
    pub column0: Option<Column<String>>,
    pub column1: Option<Column<f64>>,
    pub column14: Option<Column<String>>,
    pub column10: Option<Column<String>>,
    pub column16: Option<Column<String>>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    json_to_id(&value).ok_or_else(|| serde::de::Error::custom("expected a string or number"))
}

fn json_to_id(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_blank(column: Option<Column<String>>) -> Option<String> {
    column
        .map(|c| c.value.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl RawTransaction {
    /// Convert to a storable movement. Amounts are kept in minor units.
    pub fn into_movement(
        self,
        account_id: &str,
        statement_currency: &str,
    ) -> Result<NewBankTransaction, ConnectorError> {
        let external_id = self
            .column22
            .as_ref()
            .and_then(|c| json_to_id(&c.value))
            .ok_or_else(|| ConnectorError::InvalidData("transaction without id".to_string()))?;

        // "2026-10-05+0200"
        let raw_date = self.column0.map(|c| c.value).unwrap_or_default();
        let booked_on = raw_date
            .get(..10)
            .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
            .ok_or_else(|| {
                ConnectorError::InvalidData(format!(
                    "transaction {external_id} has bad date '{raw_date}'"
                ))
            })?;

        let amount = self.column1.map(|c| c.value).ok_or_else(|| {
            ConnectorError::InvalidData(format!("transaction {external_id} has no amount"))
        })?;

        Ok(NewBankTransaction {
            external_id,
            account_id: account_id.to_string(),
            booked_on,
            amount_minor: (amount * 100.0).round() as i64,
            currency: non_blank(self.column14).unwrap_or_else(|| statement_currency.to_string()),
            counterparty: non_blank(self.column10),
            message: non_blank(self.column16),
        })
    }
}

/// Bank account statement connector
pub struct BankFeedConnector {
    base_url: String,
    fetcher: HttpFetcher,
    lookback_days: u32,
}

impl BankFeedConnector {
    pub const NAME: &'static str = "bank_feed";

    pub fn new(base_url: String, fetcher: HttpFetcher, lookback_days: u32) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            fetcher,
            lookback_days,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, FetchError> {
        Url::parse(&config.bank_feed_api_base).map_err(|err| {
            FetchError::InvalidRequest(format!("invalid bank feed base URL: {err}"))
        })?;
        let fetcher = HttpFetcher::new(
            Self::NAME,
            config.fetch.timeout(),
            config.fetch.retry_policy(),
        )?;
        Ok(Self::new(
            config.bank_feed_api_base.clone(),
            fetcher,
            config.fetch.default_lookback_days,
        ))
    }

    fn statement_url(&self, token: &str, from: NaiveDate, to: NaiveDate) -> Result<Url, FetchError> {
        let raw = format!(
            "{}/periods/{}/{}/{}/transactions.json",
            self.base_url,
            token,
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        );
        Url::parse(&raw).map_err(|err| FetchError::InvalidRequest(err.to_string()))
    }
}

#[async_trait]
impl Connector for BankFeedConnector {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "Booked bank account movements"
    }

    fn credential_fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::new(API_TOKEN_CREDENTIAL, "API token", FieldType::Password)
                .required()
                .description("Read-only token issued in internet banking"),
        ]
    }

    fn setting_fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::new(SINCE_DATE_SETTING, "Fetch since", FieldType::Date)
                .placeholder("YYYY-MM-DD"),
        ]
    }

    async fn sync(&self, ctx: SyncContext) -> Result<SyncOutcome, ConnectorError> {
        let token = ctx.require_credential(API_TOKEN_CREDENTIAL)?;
        let today = Utc::now().date_naive();
        let from = fetch_window_start(&ctx.settings, today, self.lookback_days);

        info!(sync_run_id = %ctx.sync_run_id, %from, to = %today, "Fetching bank statement");

        let url = self.statement_url(token, from, today)?;
        let envelope: StatementEnvelope = self.fetcher.get_json(&url).await?;
        let statement = envelope.account_statement;

        let repository = BankTransactionRepository::new(ctx.db.clone());
        let mut tally = SyncTally::default();
        for raw in statement.transaction_list.transaction {
            let movement = raw.into_movement(&statement.info.account_id, &statement.info.currency)?;
            let outcome = repository.upsert(&ctx.connector_name, &movement).await?;
            tally.record(&outcome);
        }

        let info = &statement.info;
        Ok(tally.into_outcome(Some(json!({
            "account": {
                "account_id": info.account_id,
                "bank_id": info.bank_id,
                "iban": info.iban,
                "currency": info.currency,
                "closing_balance": info.closing_balance,
            },
            "from": from.to_string(),
            "to": today.to_string(),
        }))))
    }
}
