//! Reference data jobs: index history, S&P 500 membership, listings and SEC tickers

use pretty_assertions::assert_eq;
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use equity_loader::api::{AlphaVantageClient, SecClient, WikipediaClient, YahooClient};
use equity_loader::database::{ConstituentMerge, PriceTable};
use equity_loader::models::DataSource;
use equity_loader::reference;

use crate::common::test_data::{date, stored_bar};
use crate::common::{logging, TestDatabase};

const SP500_ARTICLE: &str = r#"
<html><body>
<table class="wikitable sortable" id="constituents">
  <tr><th>Symbol</th><th>Security</th><th>GICS Sector</th></tr>
  <tr><td><a>CZR</a></td><td><a>Caesars Entertainment</a></td><td>Consumer Discretionary</td></tr>
  <tr><td><a>GNRC</a></td><td><a>Generac</a></td><td>Industrials</td></tr>
</table>
<table class="wikitable sortable" id="changes">
  <tr><th rowspan="2">Date</th><th colspan="2">Added</th><th colspan="2">Removed</th><th rowspan="2">Reason</th></tr>
  <tr><th>Ticker</th><th>Security</th><th>Ticker</th><th>Security</th></tr>
  <tr><td rowspan="2">June 4, 2021</td><td>GNRC</td><td>Generac</td><td>FLIR</td><td>FLIR Systems</td><td>Acquired</td></tr>
  <tr><td>CZR</td><td>Caesars Entertainment</td><td></td><td></td><td>Market cap change</td></tr>
  <tr><td>April 20, 2021</td><td></td><td></td><td>FLS</td><td>Flowserve</td><td>Market cap change</td></tr>
  <tr><td>January 21, 2020</td><td>FLS</td><td>Flowserve</td><td></td><td></td><td>Index rebalance</td></tr>
</table>
</body></html>"#;

#[test_log::test(tokio::test)]
async fn test_constituents_merge_is_incremental() {
    logging::log_test_step("Two constituent refreshes over the same change history");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wiki/List_of_S%26P_500_companies"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SP500_ARTICLE))
        .mount(&server)
        .await;

    let db = TestDatabase::new().await.unwrap();
    let wiki = WikipediaClient::with_url(
        &format!("{}/wiki/List_of_S%26P_500_companies", server.uri()),
        Duration::ZERO,
    )
    .unwrap();

    let first = reference::update_sp500_constituents(&db.manager, &wiki, date("2021-06-10"))
        .await
        .unwrap();
    assert_eq!(first.staged, 4);
    assert_eq!(first.cutoff, date("1980-12-31"));
    // FLIR was never recorded as a member, so only the FLS removal closes a membership
    assert_eq!(first.merge, ConstituentMerge { added: 3, removed: 1 });

    let open = db.manager.open_constituents().await.unwrap();
    let open_tickers: Vec<&str> = open.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(open_tickers, vec!["CZR", "GNRC"]);

    let second = reference::update_sp500_constituents(&db.manager, &wiki, date("2021-06-11"))
        .await
        .unwrap();
    assert_eq!(second.cutoff, date("2021-06-04"));
    assert_eq!(second.merge, ConstituentMerge::default());

    let added = reference::sync_universe_from_sp500(&db.manager, &wiki).await.unwrap();
    assert_eq!(added, 2);
    assert_eq!(reference::sync_universe_from_sp500(&db.manager, &wiki).await.unwrap(), 0);
}

#[test_log::test(tokio::test)]
async fn test_index_prices_append_after_last_stored_bar() {
    let server = MockServer::start().await;
    let body = serde_json::json!({
        "chart": {
            "result": [{
                "timestamp": [1623072600i64, 1623159000i64, 1623245400i64],
                "indicators": {
                    "quote": [{
                        "open": [4229.34, 4229.81, 4232.99],
                        "high": [4232.34, 4236.74, 4237.09],
                        "low": [4215.66, 4208.41, 4218.74],
                        "close": [4226.52, 4227.26, 4219.55],
                        "volume": [3835570000u64, 3943870000u64, 3902870000u64]
                    }],
                    "adjclose": [{"adjclose": [4226.52, 4227.26, 4219.55]}]
                }
            }],
            "error": null
        }
    });
    Mock::given(method("GET"))
        .and(path_regex(r"^/v8/finance/chart/(\^|%5E)GSPC$"))
        .and(query_param("interval", "1d"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;

    let db = TestDatabase::new().await.unwrap();
    db.seed_prices(
        PriceTable::Index,
        &[stored_bar("GSPC", "2021-06-07", 4226.52, DataSource::Yahoo)],
    )
    .await
    .unwrap();

    let yahoo = YahooClient::with_base_url(&server.uri(), Duration::ZERO).unwrap();
    let inserted = reference::update_index_prices(&db.manager, &yahoo, date("2021-06-09"))
        .await
        .unwrap();
    assert_eq!(inserted, 2);

    let rows = db.manager.get_price_rows(PriceTable::Index, "GSPC").await.unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].date_stamp, date("2021-06-09"));
    assert_eq!(rows[0].split_coefficient, 1.0);

    // Already loaded through the update date: no request is made
    let again = reference::update_index_prices(&db.manager, &yahoo, date("2021-06-09"))
        .await
        .unwrap();
    assert_eq!(again, 0);
}

#[test_log::test(tokio::test)]
async fn test_listings_insert_only_new_combinations() {
    let server = MockServer::start().await;
    let active = "symbol,name,exchange,assetType,ipoDate,delistingDate,status\r\n\
                  A,Agilent Technologies Inc,NYSE,Stock,1999-11-18,null,Active\r\n\
                  AAA,Listed Funds Trust,NYSE ARCA,ETF,2020-09-09,null,Active\r\n";
    let delisted = "symbol,name,exchange,assetType,ipoDate,delistingDate,status\r\n\
                    AABA,Altaba Inc,NASDAQ,Stock,1996-04-12,2019-10-07,Delisted\r\n";

    for (state, body) in [("active", active), ("delisted", delisted)] {
        Mock::given(method("GET"))
            .and(path("/query"))
            .and(query_param("function", "LISTING_STATUS"))
            .and(query_param("state", state))
            .and(query_param("date", "2021-06-10"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(2)
            .mount(&server)
            .await;
    }

    let db = TestDatabase::new().await.unwrap();
    let av = AlphaVantageClient::with_base_url("demo", &format!("{}/query", server.uri()), Duration::ZERO).unwrap();

    let first = reference::update_active_delisted(&db.manager, &av, date("2021-06-10")).await.unwrap();
    assert_eq!(first, 2);
    let second = reference::update_active_delisted(&db.manager, &av, date("2021-06-10")).await.unwrap();
    assert_eq!(second, 0);

    let keys = db.manager.listing_keys().await.unwrap();
    assert!(keys.contains(&("AABA".to_string(), "NASDAQ".to_string(), "Delisted".to_string())));
    assert!(!keys.iter().any(|(symbol, _, _)| symbol == "AAA"));
}

#[test_log::test(tokio::test)]
async fn test_sec_company_tickers_insert_only_new_pairs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/company_tickers.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"0":{"cik_str":320193,"ticker":"AAPL","title":"Apple Inc."},
                "1":{"cik_str":789019,"ticker":"MSFT","title":"MICROSOFT CORP"}}"#,
        ))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/company_tickers.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"0":{"cik_str":320193,"ticker":"AAPL","title":"Apple Inc."},
                "1":{"cik_str":789019,"ticker":"MSFT","title":"MICROSOFT CORP"},
                "2":{"cik_str":1045810,"ticker":"NVDA","title":"NVIDIA CORP"}}"#,
        ))
        .mount(&server)
        .await;

    let db = TestDatabase::new().await.unwrap();
    let sec = SecClient::with_urls(
        "equity-loader tests admin@example.com",
        &format!("{}/files/company_tickers.json", server.uri()),
        &format!("{}/files/dera/data/financial-statement-data-sets", server.uri()),
        Duration::ZERO,
    )
    .unwrap();

    assert_eq!(reference::update_sec_company_tickers(&db.manager, &sec).await.unwrap(), 2);
    assert_eq!(reference::update_sec_company_tickers(&db.manager, &sec).await.unwrap(), 1);

    let keys = db.manager.company_ticker_keys().await.unwrap();
    assert!(keys.contains(&(1045810, "NVDA".to_string())));
}
