//! IEX price update: corporate actions inside the compact window force a full refresh

use pretty_assertions::assert_eq;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use equity_loader::api::IexClient;
use equity_loader::database::PriceTable;
use equity_loader::models::DataSource;
use equity_loader::reconcile::{ReconcilePolicy, UpdateStatus};
use equity_loader::updater::PriceUpdater;

use crate::common::test_data::{date, iex_chart_json, stored_bar};
use crate::common::{logging, TestDatabase};

async fn mock_chart(server: &MockServer, symbol: &str, range: &str, body: String, calls: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/stable/stock/{}/chart/{}", symbol, range)))
        .and(query_param("token", "Tsk_test"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(calls)
        .mount(server)
        .await;
}

#[test_log::test(tokio::test)]
async fn test_iex_dividend_in_window_triggers_full_refresh() {
    logging::log_test_step("IEX run with one dividend payer and one quiet ticker");
    let server = MockServer::start().await;
    let db = TestDatabase::with_tickers(&["KO", "PEP"]).await.unwrap();
    db.seed_prices(
        PriceTable::Iex,
        &[
            stored_bar("KO", "2021-06-07", 49.5, DataSource::Iex),
            stored_bar("PEP", "2021-06-07", 145.0, DataSource::Iex),
        ],
    )
    .await
    .unwrap();

    // KO goes ex-dividend on 2021-06-08: the day before, adjusted and unadjusted closes differ
    mock_chart(
        &server,
        "KO",
        "3m",
        iex_chart_json(&[
            ("2021-06-07", 49.5, 49.5, 49.0),
            ("2021-06-08", 50.0, 50.0, 50.0),
            ("2021-06-09", 50.2, 50.2, 50.2),
        ]),
        1,
    )
    .await;
    mock_chart(
        &server,
        "KO",
        "max",
        iex_chart_json(&[
            ("2021-06-04", 49.3, 49.3, 48.8),
            ("2021-06-07", 49.5, 49.5, 49.0),
            ("2021-06-08", 50.0, 50.0, 50.0),
            ("2021-06-09", 50.2, 50.2, 50.2),
        ]),
        1,
    )
    .await;

    mock_chart(
        &server,
        "PEP",
        "3m",
        iex_chart_json(&[
            ("2021-06-07", 145.01, 145.01, 145.01),
            ("2021-06-08", 145.5, 145.5, 145.5),
            ("2021-06-09", 145.8, 145.8, 145.8),
        ]),
        1,
    )
    .await;
    mock_chart(&server, "PEP", "max", "[]".to_string(), 0).await;

    let client = IexClient::with_base_url("Tsk_test", &format!("{}/stable", server.uri()), Duration::ZERO).unwrap();
    let updater = PriceUpdater::new(client, db.manager.clone(), ReconcilePolicy::iex(0.02));
    let report = updater.run(date("2021-06-09"), 350).await.unwrap();
    logging::log_test_data("report", &report.entries);

    assert_eq!(report.count(UpdateStatus::SuccessfulUpdate), 2);
    assert_eq!(report.entries[0].ticker, "KO");
    assert_eq!(report.entries[0].records_retrieved, 4);
    assert_eq!(report.entries[0].records_updated, 4);
    assert_eq!(report.entries[1].ticker, "PEP");
    assert_eq!(report.entries[1].records_updated, 2);

    let ko = db.manager.get_price_rows(PriceTable::Iex, "KO").await.unwrap();
    let dividend_day = ko.iter().find(|r| r.date_stamp == date("2021-06-08")).unwrap();
    assert_eq!(dividend_day.dividend_amount, 0.5);
    assert_eq!(dividend_day.split_coefficient, 1.0);
    assert_eq!(dividend_day.adjusted_close, 50.0);

    let oldest = ko.iter().find(|r| r.date_stamp == date("2021-06-04")).unwrap();
    assert_eq!((oldest.split_coefficient, oldest.dividend_amount), (1.0, 0.0));
}

#[test_log::test(tokio::test)]
async fn test_iex_up_to_date_tickers_are_not_requested() {
    let server = MockServer::start().await;
    let db = TestDatabase::with_tickers(&["KO"]).await.unwrap();
    db.seed_prices(PriceTable::Iex, &[stored_bar("KO", "2021-06-09", 50.2, DataSource::Iex)])
        .await
        .unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = IexClient::with_base_url("Tsk_test", &server.uri(), Duration::ZERO).unwrap();
    let updater = PriceUpdater::new(client, db.manager.clone(), ReconcilePolicy::iex(0.02));
    let report = updater.run(date("2021-06-09"), 350).await.unwrap();

    assert_eq!(report.iterations, 0);
    assert!(report.entries.is_empty());
}
