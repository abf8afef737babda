//! Earnings update against a mocked Alpha Vantage EARNINGS endpoint

use pretty_assertions::assert_eq;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use equity_loader::api::AlphaVantageClient;
use equity_loader::models::EarningsRow;
use equity_loader::reconcile::UpdateStatus;
use equity_loader::updater::EarningsUpdater;

use crate::common::test_data::date;
use crate::common::{logging, TestDatabase};

const IBM_EARNINGS: &str = r#"{
    "symbol": "IBM",
    "annualEarnings": [{"fiscalDateEnding": "2020-12-31", "reportedEPS": "8.67"}],
    "quarterlyEarnings": [
        {"fiscalDateEnding": "2021-06-30", "reportedDate": "2021-07-19", "reportedEPS": "2.33",
         "estimatedEPS": "2.29", "surprise": "0.04", "surprisePercentage": "1.7467"},
        {"fiscalDateEnding": "2021-03-31", "reportedDate": "2021-04-19", "reportedEPS": "1.77",
         "estimatedEPS": "1.63", "surprise": "0.14", "surprisePercentage": "8.589"},
        {"fiscalDateEnding": "2020-12-31", "reportedDate": "2021-01-21", "reportedEPS": "2.07",
         "estimatedEPS": "1.79", "surprise": "0.28", "surprisePercentage": "15.6425"}
    ]
}"#;

fn stored_earnings(symbol: &str, reported: &str) -> EarningsRow {
    EarningsRow {
        symbol: symbol.to_string(),
        date_stamp: date(reported),
        report_date: date("2021-03-31"),
        reported_eps: Some(1.0),
        estimated_eps: Some(1.0),
        eps_surprise: Some(0.0),
        eps_surprise_perc: Some(0.0),
        capture_date: date("2021-05-01"),
    }
}

async fn mock_earnings(server: &MockServer, symbol: &str, body: &str, calls: u64) {
    Mock::given(method("GET"))
        .and(path("/query"))
        .and(query_param("function", "EARNINGS"))
        .and(query_param("symbol", symbol))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(calls)
        .mount(server)
        .await;
}

#[test_log::test(tokio::test)]
async fn test_earnings_run_appends_only_newer_quarters() {
    logging::log_test_step("Earnings run over due, current and failing tickers");
    let server = MockServer::start().await;
    let db = TestDatabase::with_tickers(&["IBM", "NVDA", "ZZZZ"]).await.unwrap();
    db.manager
        .insert_earnings_rows(&[
            stored_earnings("IBM", "2021-04-19"),
            stored_earnings("NVDA", "2021-07-01"),
        ])
        .await
        .unwrap();

    mock_earnings(&server, "IBM", IBM_EARNINGS, 1).await;
    // NVDA reported recently enough that it is not due
    mock_earnings(&server, "NVDA", "{}", 0).await;
    mock_earnings(&server, "ZZZZ", r#"{"Information": "The **demo** API key is for demo purposes only."}"#, 1).await;

    let client = AlphaVantageClient::with_base_url("demo", &format!("{}/query", server.uri()), Duration::ZERO).unwrap();
    let updater = EarningsUpdater::new(client, db.manager.clone());
    let report = updater.run(date("2021-08-01"), 350).await.unwrap();
    logging::log_test_data("report", &report.entries);

    let outcomes: Vec<_> = report.entries.iter().map(|e| (e.ticker.as_str(), e.status)).collect();
    assert_eq!(
        outcomes,
        vec![("IBM", UpdateStatus::SuccessfulUpdate), ("ZZZZ", UpdateStatus::FailedNoData)]
    );
    assert_eq!(report.entries[0].records_retrieved, 3);
    assert_eq!(report.entries[0].records_updated, 1);
    assert_eq!(report.entries[0].last_date_retrieved, Some(date("2021-07-19")));

    assert_eq!(db.manager.earnings_count("IBM").await.unwrap(), 2);
    assert_eq!(db.manager.earnings_count("ZZZZ").await.unwrap(), 0);
}

#[test_log::test(tokio::test)]
async fn test_earnings_reported_after_update_date_are_held_back() {
    let server = MockServer::start().await;
    let db = TestDatabase::with_tickers(&["IBM"]).await.unwrap();
    db.manager
        .insert_earnings_rows(&[stored_earnings("IBM", "2021-04-19")])
        .await
        .unwrap();

    mock_earnings(&server, "IBM", IBM_EARNINGS, 1).await;

    let client = AlphaVantageClient::with_base_url("demo", &format!("{}/query", server.uri()), Duration::ZERO).unwrap();
    let updater = EarningsUpdater::new(client, db.manager.clone());
    let report = updater.run(date("2021-07-10"), 350).await.unwrap();

    assert_eq!(report.entries[0].status, UpdateStatus::NilRecordsNoUpdate);
    assert_eq!(db.manager.earnings_count("IBM").await.unwrap(), 1);
}
