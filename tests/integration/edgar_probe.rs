//! Quarterly statement archive availability checks

use pretty_assertions::assert_eq;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use equity_loader::api::SecClient;
use equity_loader::edgar::{probe_quarters, quarters_due, EdgarQuarter};

use crate::common::test_data::date;

#[test_log::test(tokio::test)]
async fn test_probe_heads_every_due_quarter() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/dera/2021q1.zip"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/dera/2021q2.zip"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let sec = SecClient::with_urls(
        "equity-loader tests admin@example.com",
        &format!("{}/company_tickers.json", server.uri()),
        &format!("{}/dera", server.uri()),
        Duration::ZERO,
    )
    .unwrap();

    let last_loaded: EdgarQuarter = "2020q4".parse().unwrap();
    let due = quarters_due(last_loaded, date("2021-08-15"));
    assert_eq!(due, vec![EdgarQuarter::new(2021, 1).unwrap(), EdgarQuarter::new(2021, 2).unwrap()]);

    let results = probe_quarters(&sec, &due).await;
    let availability: Vec<(String, bool)> = results.iter().map(|r| (r.quarter.to_string(), r.available)).collect();
    assert_eq!(
        availability,
        vec![("2021q1".to_string(), true), ("2021q2".to_string(), false)]
    );
    assert_eq!(results[0].url, format!("{}/dera/2021q1.zip", server.uri()));
}
