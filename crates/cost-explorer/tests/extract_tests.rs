#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_lines)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use cost_explorer::singer::{self, MessageWriter};
use cost_explorer::{
    flatten_page, CostAndUsagePage, CostAndUsageRequest, CostExplorerClient, CostRecord,
    Extractor, Granularity, HttpCostExplorer, ProviderError, RetryPolicy, TapConfig, TapError,
    TapState,
};

/// Serves canned pages in order and records every request it receives.
struct ScriptedClient {
    pages: Mutex<VecDeque<Result<CostAndUsagePage, ProviderError>>>,
    requests: Mutex<Vec<CostAndUsageRequest>>,
    cancel_on: Option<(usize, CancellationToken)>,
}

impl ScriptedClient {
    fn new(pages: Vec<Result<CostAndUsagePage, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(pages.into()),
            requests: Mutex::new(Vec::new()),
            cancel_on: None,
        })
    }

    /// Like `new`, but fires `cancel` while serving request number `request`.
    fn cancelling(
        pages: Vec<Result<CostAndUsagePage, ProviderError>>,
        request: usize,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(pages.into()),
            requests: Mutex::new(Vec::new()),
            cancel_on: Some((request, cancel)),
        })
    }

    fn requests(&self) -> Vec<CostAndUsageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CostExplorerClient for ScriptedClient {
    async fn get_cost_and_usage(
        &self,
        request: &CostAndUsageRequest,
    ) -> Result<CostAndUsagePage, ProviderError> {
        let count = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        if let Some((at, cancel)) = &self.cancel_on {
            if *at == count {
                cancel.cancel();
            }
        }
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Config("no more scripted pages".into())))
    }
}

fn config() -> TapConfig {
    let mut config = TapConfig::new(
        Granularity::Daily,
        vec!["UnblendedCost".to_string(), "UsageQuantity".to_string()],
    );
    config.start_date = Some("2024-01-01".to_string());
    config.end_date = Some("2024-01-03".to_string());
    config
}

fn page_json(day: u32, token: Option<&str>) -> Value {
    let mut page = json!({
        "GroupDefinitions": [
            {"Type": "DIMENSION", "Key": "LINKED_ACCOUNT"},
            {"Type": "DIMENSION", "Key": "SERVICE"},
            {"Type": "DIMENSION", "Key": "AZ"}
        ],
        "ResultsByTime": [{
            "TimePeriod": {"Start": format!("2024-01-{day:02}"), "End": format!("2024-01-{:02}", day + 1)},
            "Total": {},
            "Groups": [{
                "Keys": ["111111111111", "AmazonEC2", "us-east-1a"],
                "Metrics": {
                    "UnblendedCost": {"Amount": "2.0", "Unit": "USD"},
                    "UsageQuantity": {"Amount": "5", "Unit": "Hours"}
                }
            }],
            "Estimated": false
        }],
        "DimensionValueAttributes": []
    });
    if let Some(token) = token {
        page["NextPageToken"] = json!(token);
    }
    page
}

/// One bucket per day in `days`, each holding a single group for `account`.
fn account_page(
    account: &str,
    days: std::ops::RangeInclusive<u32>,
    token: Option<&str>,
) -> CostAndUsagePage {
    let buckets: Vec<Value> = days
        .map(|day| {
            json!({
                "TimePeriod": {"Start": format!("2024-01-{day:02}"), "End": format!("2024-01-{:02}", day + 1)},
                "Groups": [{
                    "Keys": [account, "AmazonEC2", "us-east-1a"],
                    "Metrics": {"UnblendedCost": {"Amount": "1.0", "Unit": "USD"}}
                }]
            })
        })
        .collect();
    let mut page = json!({"ResultsByTime": buckets});
    if let Some(token) = token {
        page["NextPageToken"] = json!(token);
    }
    serde_json::from_value(page).unwrap()
}

fn state_lines(output: &[u8]) -> Vec<Value> {
    std::str::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str::<Value>(line).unwrap())
        .filter(|message| message["type"] == "STATE")
        .map(|message| message["value"]["bookmarks"]["cost_and_usage"].clone())
        .collect()
}

fn page(day: u32, token: Option<&str>) -> CostAndUsagePage {
    serde_json::from_value(page_json(day, token)).unwrap()
}

fn start() -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc)
}

#[tokio::test]
async fn extract_concatenates_pages_in_order() {
    let p1 = page(1, Some("abc"));
    let p2 = page(2, None);
    let mut expected = flatten_page(&p1, true);
    expected.extend(flatten_page(&p2, true));

    let client = ScriptedClient::new(vec![Ok(p1), Ok(p2)]);
    let extractor = Extractor::new(client.clone(), config());

    let records: Vec<CostRecord> = extractor
        .extract(start(), CancellationToken::new())
        .map(Result::unwrap)
        .collect()
        .await;

    assert_eq!(records, expected);
    assert_eq!(records.len(), 4);

    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].next_page_token, None);
    assert_eq!(requests[1].next_page_token.as_deref(), Some("abc"));
    assert_eq!(requests[0].time_period, requests[1].time_period);
}

#[tokio::test]
async fn extract_is_deterministic_across_runs() {
    let run = || async {
        let client = ScriptedClient::new(vec![Ok(page(1, Some("abc"))), Ok(page(2, None))]);
        Extractor::new(client, config())
            .extract(start(), CancellationToken::new())
            .map(Result::unwrap)
            .collect::<Vec<_>>()
            .await
    };

    assert_eq!(run().await, run().await);
}

#[tokio::test]
async fn next_page_is_not_requested_until_current_page_is_drained() {
    let client = ScriptedClient::new(vec![Ok(page(1, Some("abc"))), Ok(page(2, None))]);
    let extractor = Extractor::new(client.clone(), config());
    let mut records = extractor.extract(start(), CancellationToken::new());

    records.next().await.unwrap().unwrap();
    records.next().await.unwrap().unwrap();
    assert_eq!(client.requests().len(), 1);

    records.next().await.unwrap().unwrap();
    assert_eq!(client.requests().len(), 2);
}

#[tokio::test]
async fn dropping_the_stream_abandons_the_run() {
    let client = ScriptedClient::new(vec![Ok(page(1, Some("abc"))), Ok(page(2, None))]);
    let extractor = Extractor::new(client.clone(), config());

    {
        let mut records = extractor.extract(start(), CancellationToken::new());
        records.next().await.unwrap().unwrap();
    }

    assert_eq!(client.requests().len(), 1);
}

#[tokio::test]
async fn sync_writes_schema_records_and_state() {
    let client = ScriptedClient::new(vec![Ok(page(1, Some("abc"))), Ok(page(2, None))]);
    let mut config = config();
    config.state_interval = 2;
    let extractor = Extractor::new(client, config);

    let mut state = TapState::default();
    let mut writer = MessageWriter::new(Vec::new());
    let written = singer::sync(&extractor, &mut state, &mut writer, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(written, 4);

    let output = writer.into_inner().unwrap();
    let kinds: Vec<String> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str::<Value>(line).unwrap()["type"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        kinds,
        vec!["SCHEMA", "RECORD", "RECORD", "STATE", "RECORD", "RECORD", "STATE", "STATE"]
    );
    assert_eq!(state.bookmark(), Some("2024-01-02"));
    assert_eq!(state.progress(), None);
}

#[tokio::test]
async fn sync_commits_bookmark_only_at_the_end() {
    let client = ScriptedClient::new(vec![Ok(page(1, Some("abc"))), Ok(page(2, None))]);
    let mut config = config();
    config.state_interval = 2;
    let extractor = Extractor::new(client, config);

    let mut state = TapState::default();
    let mut writer = MessageWriter::new(Vec::new());
    singer::sync(&extractor, &mut state, &mut writer, CancellationToken::new())
        .await
        .unwrap();

    let states = state_lines(&writer.into_inner().unwrap());
    assert_eq!(states.len(), 3);
    assert_eq!(states[0]["replication_key_value"], Value::Null);
    assert_eq!(states[0]["progress_markers"]["replication_key_value"], "2024-01-01");
    assert_eq!(states[1]["replication_key_value"], Value::Null);
    assert_eq!(states[1]["progress_markers"]["replication_key_value"], "2024-01-02");
    assert_eq!(states[2]["replication_key_value"], "2024-01-02");
    assert_eq!(states[2]["progress_markers"], Value::Null);
}

#[tokio::test]
async fn sync_resumes_from_bookmark() {
    let client = ScriptedClient::new(vec![Ok(page(2, None))]);
    let extractor = Extractor::new(client.clone(), config());

    let mut state: TapState = serde_json::from_value(json!({
        "bookmarks": {"cost_and_usage": {"replication_key_value": "2024-01-02"}}
    }))
    .unwrap();
    let mut writer = MessageWriter::new(Vec::new());
    singer::sync(&extractor, &mut state, &mut writer, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(client.requests()[0].time_period.start, "2024-01-02");
}

#[tokio::test]
async fn sync_failure_keeps_previous_bookmark() {
    let client = ScriptedClient::new(vec![
        Ok(page(1, Some("abc"))),
        Err(ProviderError::Api {
            status: 403,
            code: "AccessDeniedException".to_string(),
            message: "not authorized".to_string(),
        }),
    ]);
    let extractor = Extractor::new(client, config());

    let mut state = TapState::default();
    let mut writer = MessageWriter::new(Vec::new());
    let err = singer::sync(&extractor, &mut state, &mut writer, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TapError::Provider(_)));
    assert_eq!(state.bookmark(), None);

    let output = String::from_utf8(writer.into_inner().unwrap()).unwrap();
    let last: Value = serde_json::from_str(output.lines().last().unwrap()).unwrap();
    assert_eq!(last["type"], "STATE");
    let bookmark = &last["value"]["bookmarks"]["cost_and_usage"];
    assert_eq!(bookmark["replication_key_value"], Value::Null);
    assert_eq!(bookmark["progress_markers"]["replication_key_value"], "2024-01-01");
}

#[tokio::test]
async fn rerun_after_failure_reextracts_unsorted_pages() {
    // Account A's later days arrive on page one, account B's earlier days on page two.
    let failing = ScriptedClient::new(vec![
        Ok(account_page("a", 1..=3, Some("p2"))),
        Err(ProviderError::Api {
            status: 500,
            code: "InternalServerError".to_string(),
            message: "boom".to_string(),
        }),
    ]);
    let mut config = config();
    config.end_date = Some("2024-01-04".to_string());

    let mut state: TapState = serde_json::from_value(json!({
        "bookmarks": {"cost_and_usage": {"replication_key_value": "2024-01-01"}}
    }))
    .unwrap();

    let mut writer = MessageWriter::new(Vec::new());
    singer::sync(
        &Extractor::new(failing, config.clone()),
        &mut state,
        &mut writer,
        CancellationToken::new(),
    )
    .await
    .unwrap_err();

    let states = state_lines(&writer.into_inner().unwrap());
    assert_eq!(states.last().unwrap()["replication_key_value"], "2024-01-01");
    assert_eq!(state.bookmark(), Some("2024-01-01"));

    let retry = ScriptedClient::new(vec![
        Ok(account_page("a", 1..=3, Some("p2"))),
        Ok(account_page("b", 1..=2, None)),
    ]);
    let mut writer = MessageWriter::new(Vec::new());
    singer::sync(
        &Extractor::new(retry.clone(), config),
        &mut state,
        &mut writer,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(retry.requests()[0].time_period.start, "2024-01-01");
    let output = String::from_utf8(writer.into_inner().unwrap()).unwrap();
    let b_days: Vec<String> = output
        .lines()
        .map(|line| serde_json::from_str::<Value>(line).unwrap())
        .filter(|message| message["type"] == "RECORD" && message["record"]["group_keys"][0] == "b")
        .map(|message| message["record"]["time_period_start"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(b_days, vec!["2024-01-01", "2024-01-02"]);
    assert_eq!(state.bookmark(), Some("2024-01-03"));
}

#[tokio::test]
async fn cancelled_sync_keeps_previous_bookmark() {
    let cancel = CancellationToken::new();
    let client = ScriptedClient::cancelling(
        vec![Ok(page(1, Some("abc"))), Ok(page(2, None))],
        2,
        cancel.clone(),
    );
    let extractor = Extractor::new(client.clone(), config());

    let mut state = TapState::default();
    let mut writer = MessageWriter::new(Vec::new());
    let written = singer::sync(&extractor, &mut state, &mut writer, cancel)
        .await
        .unwrap();

    assert_eq!(written, 2);
    assert_eq!(client.requests().len(), 2);
    assert_eq!(state.bookmark(), None);
    assert_eq!(state.progress(), Some("2024-01-01"));

    let states = state_lines(&writer.into_inner().unwrap());
    assert_eq!(states.last().unwrap()["replication_key_value"], Value::Null);
}

#[tokio::test]
async fn sync_rejects_unvalidated_config_without_output() {
    let client = ScriptedClient::new(vec![]);
    let mut config = config();
    config.state_interval = 0;
    let extractor = Extractor::new(client.clone(), config);

    let mut state = TapState::default();
    let mut writer = MessageWriter::new(Vec::new());
    let err = singer::sync(&extractor, &mut state, &mut writer, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, TapError::Configuration(_)));
    assert!(client.requests().is_empty());
    assert!(writer.into_inner().unwrap().is_empty());
}

#[tokio::test]
async fn http_client_paginates_against_mock_server() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({"NextPageToken": "page-2"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_json(2, None)))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(|request: &Request| {
            serde_json::from_slice::<Value>(&request.body)
                .map(|body| body.get("NextPageToken").is_none())
                .unwrap_or(false)
        })
        .respond_with(ResponseTemplate::new(200).set_body_json(page_json(1, Some("page-2"))))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpCostExplorer::new(server.uri())
        .unwrap()
        .with_retry_policy(RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        });
    let mut config = config();
    config.filter_credits = true;
    let extractor = Extractor::new(Arc::new(client), config);

    let records: Vec<CostRecord> = extractor
        .extract(start(), CancellationToken::new())
        .map(Result::unwrap)
        .collect()
        .await;

    assert_eq!(records.len(), 4);
    assert_eq!(
        records[0].group_keys.as_deref(),
        Some(
            &[
                "111111111111".to_string(),
                "AmazonEC2".to_string(),
                "us-east-1a".to_string()
            ][..]
        )
    );
    assert_eq!(records[3].time_period_start, "2024-01-02");

    let received = server.received_requests().await.unwrap();
    let first: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(
        first["Filter"],
        json!({"Not": {"Dimensions": {"Key": "RECORD_TYPE", "Values": ["Credit"]}}})
    );
    assert_eq!(first["TimePeriod"], json!({"Start": "2024-01-01", "End": "2024-01-03"}));
}
