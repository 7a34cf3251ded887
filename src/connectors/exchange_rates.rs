//! Exchange rates connector
//!
//! Pulls the central bank's daily fixing text feed for every day of the fetch
//! window and upserts one [`NewExchangeRate`] per (currency, fixing date).
//!
//! Feed layout:
//!
//! ```text
//! 17.10.2026 #201
//! Country|Currency|Amount|Code|Rate
//! Australia|dollar|1|AUD|15,012
//! Japan|yen|100|JPY|15,618
//! ```
//!
//! The first line carries the fixing date. Weekend and holiday requests return
//! the previous business day's fixing, so each fixing date is stored once per
//! run.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::AppConfig;
use crate::connectors::fetch::{FetchError, HttpFetcher};
use crate::connectors::reconcile::{SINCE_DATE_SETTING, SyncTally, fetch_window_start};
use crate::connectors::trait_::{
    Connector, ConnectorError, FieldSpec, FieldType, SyncContext, SyncOutcome,
};
use crate::repositories::{ExchangeRateRepository, NewExchangeRate};

/// Comma separated ISO codes to keep; empty keeps every currency.
pub const CURRENCIES_SETTING: &str = "currencies";

const FEED_DATE_FORMAT: &str = "%d.%m.%Y";
const MAX_WINDOW_DAYS: u64 = 366;

/// One day's fixing as published.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyFixing {
    pub date: NaiveDate,
    pub rates: Vec<NewExchangeRate>,
}

/// Parse the daily fixing text feed.
pub fn parse_daily_fixing(body: &str) -> Result<DailyFixing, ConnectorError> {
    let mut lines = body.lines().map(str::trim).filter(|line| !line.is_empty());

    let header = lines
        .next()
        .ok_or_else(|| ConnectorError::InvalidData("empty fixing feed".to_string()))?;
    let raw_date = header.split_whitespace().next().unwrap_or_default();
    let date = NaiveDate::parse_from_str(raw_date, FEED_DATE_FORMAT).map_err(|err| {
        ConnectorError::InvalidData(format!("bad fixing date '{raw_date}': {err}"))
    })?;

    // column names
    lines.next();

    let rates = lines
        .map(|line| parse_rate_line(line, date))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DailyFixing { date, rates })
}

fn parse_rate_line(line: &str, date: NaiveDate) -> Result<NewExchangeRate, ConnectorError> {
    let columns: Vec<&str> = line.split('|').map(str::trim).collect();
    let [_, _, amount, code, rate] = columns.as_slice() else {
        return Err(ConnectorError::InvalidData(format!(
            "expected 5 columns in '{line}'"
        )));
    };

    let amount = amount
        .parse::<i32>()
        .map_err(|_| ConnectorError::InvalidData(format!("bad amount in '{line}'")))?;
    let rate = rate
        .replace(',', ".")
        .parse::<f64>()
        .map_err(|_| ConnectorError::InvalidData(format!("bad rate in '{line}'")))?;
    if code.is_empty() {
        return Err(ConnectorError::InvalidData(format!(
            "missing currency code in '{line}'"
        )));
    }

    Ok(NewExchangeRate {
        currency: code.to_uppercase(),
        rate_date: date,
        amount,
        rate,
    })
}

fn currency_filter(raw: Option<&str>) -> BTreeSet<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(|code| code.trim().to_uppercase())
        .filter(|code| !code.is_empty())
        .collect()
}

/// Daily exchange rate fixings connector
pub struct ExchangeRatesConnector {
    base_url: Url,
    fetcher: HttpFetcher,
    lookback_days: u32,
}

impl ExchangeRatesConnector {
    pub const NAME: &'static str = "exchange_rates";

    pub fn new(base_url: Url, fetcher: HttpFetcher, lookback_days: u32) -> Self {
        Self {
            base_url,
            fetcher,
            lookback_days,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, FetchError> {
        let base_url = Url::parse(&config.exchange_rates_api_base).map_err(|err| {
            FetchError::InvalidRequest(format!("invalid exchange rates base URL: {err}"))
        })?;
        let fetcher = HttpFetcher::new(
            Self::NAME,
            config.fetch.timeout(),
            config.fetch.retry_policy(),
        )?;
        Ok(Self::new(base_url, fetcher, config.fetch.default_lookback_days))
    }

    fn url_for(&self, day: NaiveDate) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("date", &day.format(FEED_DATE_FORMAT).to_string());
        url
    }

    fn window(&self, ctx: &SyncContext, today: NaiveDate) -> NaiveDate {
        let start = fetch_window_start(&ctx.settings, today, self.lookback_days);
        let earliest = today
            .checked_sub_days(Days::new(MAX_WINDOW_DAYS))
            .unwrap_or(today);
        if start < earliest {
            warn!(%start, %earliest, "Fetch window too long, truncating");
            earliest
        } else {
            start
        }
    }
}

#[async_trait]
impl Connector for ExchangeRatesConnector {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "Daily central bank exchange rate fixings"
    }

    fn credential_fields(&self) -> Vec<FieldSpec> {
        Vec::new()
    }

    fn setting_fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::new(SINCE_DATE_SETTING, "Fetch since", FieldType::Date)
                .placeholder("YYYY-MM-DD")
                .description("First day to fetch; defaults to a short lookback"),
            FieldSpec::new(CURRENCIES_SETTING, "Currencies", FieldType::Text)
                .placeholder("EUR,USD")
                .description("Comma separated currency codes; empty stores all"),
        ]
    }

    async fn sync(&self, ctx: SyncContext) -> Result<SyncOutcome, ConnectorError> {
        let today = Utc::now().date_naive();
        let start = self.window(&ctx, today);
        let wanted = currency_filter(ctx.setting(CURRENCIES_SETTING));
        let repository = ExchangeRateRepository::new(ctx.db.clone());

        info!(
            sync_run_id = %ctx.sync_run_id,
            %start,
            %today,
            "Fetching exchange rate fixings"
        );

        let mut tally = SyncTally::default();
        let mut fixing_dates = BTreeSet::new();
        let mut day = start;

        while day <= today {
            let body = self.fetcher.get_text(&self.url_for(day)).await?;
            let fixing = parse_daily_fixing(&body)?;

            if fixing_dates.insert(fixing.date) {
                for rate in fixing
                    .rates
                    .iter()
                    .filter(|rate| wanted.is_empty() || wanted.contains(&rate.currency))
                {
                    let outcome = repository.upsert(&ctx.connector_name, rate).await?;
                    tally.record(&outcome);
                }
            } else {
                debug!(requested = %day, fixing = %fixing.date, "Fixing already processed");
            }

            let Some(next) = day.succ_opt() else { break };
            day = next;
        }

        let fetched_dates: Vec<String> = fixing_dates.iter().map(NaiveDate::to_string).collect();
        Ok(tally.into_outcome(Some(json!({ "fetched_dates": fetched_dates }))))
    }
}
