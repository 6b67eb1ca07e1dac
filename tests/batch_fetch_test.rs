use flow_metrics::batch_fetch::BatchFetcher;
use flow_metrics::cancellation::CancellationToken;
use flow_metrics::http_client::HttpClient;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn detail_response(ids: &[i64]) -> serde_json::Value {
    serde_json::json!({
        "value": ids.iter().map(|id| serde_json::json!({
            "id": id,
            "fields": {
                "System.Title": format!("Item {id}"),
                "System.WorkItemType": "Task",
                "System.State": "Active",
                "System.CreatedDate": "2026-01-01T00:00:00Z",
            }
        })).collect::<Vec<_>>()
    })
}

#[tokio::test]
async fn fetches_details_for_all_ids_in_one_batch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Widgets/_apis/wit/workitems"))
        .respond_with(ResponseTemplate::new(200).set_body_json(detail_response(&[1, 2, 3])))
        .mount(&server)
        .await;

    let client = HttpClient::new(server.uri(), "pat").unwrap();
    let fetcher = BatchFetcher::new(&client, "Widgets", 5);
    let token = CancellationToken::new();

    let result = fetcher.fetch_all(&[1, 2, 3], &token, None).await;
    assert_eq!(result.details.len(), 3);
    assert!(result.failed_batches.is_empty());
    assert!(!result.cancelled);
}

#[tokio::test]
async fn detail_request_is_pinned_to_api_version_7_1() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Widgets/_apis/wit/workitems"))
        .and(query_param("api-version", "7.1"))
        .and(query_param("$expand", "relations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(detail_response(&[1])))
        .mount(&server)
        .await;

    let client = HttpClient::new(server.uri(), "pat").unwrap();
    let fetcher = BatchFetcher::new(&client, "Widgets", 5);
    let token = CancellationToken::new();

    let result = fetcher.fetch_all(&[1], &token, None).await;
    assert_eq!(result.details.len(), 1);
}

#[tokio::test]
async fn retries_on_server_error_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Widgets/_apis/wit/workitems"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/Widgets/_apis/wit/workitems"))
        .respond_with(ResponseTemplate::new(200).set_body_json(detail_response(&[1])))
        .mount(&server)
        .await;

    let client = HttpClient::new(server.uri(), "pat").unwrap();
    let fetcher = BatchFetcher::new(&client, "Widgets", 1);
    let token = CancellationToken::new();

    let result = fetcher.fetch_all(&[1], &token, None).await;
    assert_eq!(result.details.len(), 1);
    assert!(result.failed_batches.is_empty());
}

#[tokio::test]
async fn terminal_client_error_marks_batch_failed_without_cancelling_others() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Widgets/_apis/wit/workitems"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = HttpClient::new(server.uri(), "pat").unwrap();
    let fetcher = BatchFetcher::new(&client, "Widgets", 5);
    let token = CancellationToken::new();

    let ids: Vec<i64> = (1..=250).collect();
    let result = fetcher.fetch_all(&ids, &token, None).await;
    assert_eq!(result.failed_batches.len(), 2);
    assert!(result.details.is_empty());
}

#[tokio::test]
async fn pre_cancelled_token_yields_cancelled_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Widgets/_apis/wit/workitems"))
        .respond_with(ResponseTemplate::new(200).set_body_json(detail_response(&[1])))
        .mount(&server)
        .await;

    let client = HttpClient::new(server.uri(), "pat").unwrap();
    let fetcher = BatchFetcher::new(&client, "Widgets", 5);
    let token = CancellationToken::new();
    token.cancel();

    let result = fetcher.fetch_all(&[1], &token, None).await;
    assert!(result.cancelled);
    assert!(result.details.is_empty());
}
