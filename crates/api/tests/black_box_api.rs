use std::sync::Arc;
use std::time::Duration;

use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use datafusion::prelude::SessionContext;
use reqwest::StatusCode;
use serde_json::json;

use vantage_api::{app::build_app, context::AppContext};
use vantage_dispatch::{PoolConfig, WorkerPool};
use vantage_engine::{
    EngineConfig, MemoryCatalog, QueryExecutor, SessionScope, SourceCatalog, SourceError,
};
use vantage_store::{InMemoryStatusStore, StatusStore};

struct TestServer {
    base_url: String,
    store: Arc<InMemoryStatusStore>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Build the same router as prod, but over an in-memory store and
    /// catalog, bound to an ephemeral port.
    async fn spawn(catalog: Arc<dyn SourceCatalog>, workers: usize) -> Self {
        let store = Arc::new(InMemoryStatusStore::new());
        let executor = Arc::new(QueryExecutor::new(
            store.clone(),
            catalog,
            tokio::runtime::Handle::current(),
            EngineConfig::default(),
        ));
        let pool = WorkerPool::new(PoolConfig::default().with_workers(workers));
        let ctx = Arc::new(AppContext::new(
            store.clone() as Arc<dyn StatusStore>,
            executor,
            pool,
        ));

        let app = build_app(ctx);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            store,
            handle,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn shared_view_catalog() -> Arc<dyn SourceCatalog> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, true),
    ]));
    let w1_rows = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(vec![1, 2])),
            Arc::new(StringArray::from(vec!["a", "b"])),
        ],
    )
    .unwrap();
    let w2_rows = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(vec![3, 4, 5])),
            Arc::new(StringArray::from(vec!["c", "d", "e"])),
        ],
    )
    .unwrap();

    let mut catalog = MemoryCatalog::new();
    catalog.add_batch("shared_view", &"w1".parse().unwrap(), w1_rows);
    catalog.add_batch("shared_view", &"w2".parse().unwrap(), w2_rows);
    Arc::new(catalog)
}

/// Catalog that stalls long enough to keep the single worker busy.
struct SlowCatalog;

#[async_trait]
impl SourceCatalog for SlowCatalog {
    async fn register(
        &self,
        _ctx: &SessionContext,
        _scope: &SessionScope,
    ) -> Result<(), SourceError> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(())
    }
}

async fn get_status_eventually(
    client: &reqwest::Client,
    base_url: &str,
    query_id: &str,
    terminal: &str,
) -> serde_json::Value {
    // Submission is async by design; poll until the job reaches the
    // expected terminal status.
    for _ in 0..100 {
        let res = client
            .get(format!("{base_url}/query/{query_id}"))
            .send()
            .await
            .unwrap();
        if res.status() == StatusCode::OK {
            let body: serde_json::Value = res.json().await.unwrap();
            if body["status"] == terminal {
                return body;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("query {query_id} did not reach status {terminal} within timeout");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn submitted_query_completes_and_is_pollable() {
    let server = TestServer::spawn(shared_view_catalog(), 2).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/query/new", server.base_url))
        .json(&json!({
            "allowed_workspace_ids": ["w1"],
            "query_content": "SELECT * FROM shared_view",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let body: serde_json::Value = res.json().await.unwrap();
    let query_id = body["query_id"].as_str().unwrap().to_string();

    get_status_eventually(&client, &server.base_url, &query_id, "completed").await;

    // Tenant isolation: only w1's two rows are visible, although the query
    // text carried no workspace predicate.
    let metadata = server
        .store
        .read_metadata(&query_id.parse().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(metadata.total_rows, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn comma_delimited_workspace_form_is_accepted() {
    let server = TestServer::spawn(shared_view_catalog(), 2).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/query/new", server.base_url))
        .json(&json!({
            "allowed_workspace_ids": "w1,w2",
            "query_content": "SELECT * FROM shared_view",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let body: serde_json::Value = res.json().await.unwrap();
    let query_id = body["query_id"].as_str().unwrap().to_string();

    get_status_eventually(&client, &server.base_url, &query_id, "completed").await;
    let metadata = server
        .store
        .read_metadata(&query_id.parse().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(metadata.total_rows, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_submissions_are_rejected() {
    let server = TestServer::spawn(shared_view_catalog(), 2).await;
    let client = reqwest::Client::new();

    // Empty workspace set.
    let res = client
        .post(format!("{}/query/new", server.base_url))
        .json(&json!({
            "allowed_workspace_ids": [],
            "query_content": "SELECT 1",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Empty query text.
    let res = client
        .post(format!("{}/query/new", server.base_url))
        .json(&json!({
            "allowed_workspace_ids": ["w1"],
            "query_content": "   ",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_query_reports_failed_status() {
    let server = TestServer::spawn(shared_view_catalog(), 2).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/query/new", server.base_url))
        .json(&json!({
            "allowed_workspace_ids": ["w1"],
            "query_content": "select * froma asdf",
        }))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    let query_id = body["query_id"].as_str().unwrap().to_string();

    get_status_eventually(&client, &server.base_url, &query_id, "failed").await;

    let error = server
        .store
        .get_error(&query_id.parse().unwrap())
        .unwrap()
        .unwrap();
    assert!(!error.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_query_id_is_not_found() {
    let server = TestServer::spawn(shared_view_catalog(), 2).await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/query/nope", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .delete(format!("{}/query/nope", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queued_job_can_be_cancelled_before_it_starts() {
    // One worker: the first job occupies it, the second queues.
    let server = TestServer::spawn(Arc::new(SlowCatalog), 1).await;
    let client = reqwest::Client::new();

    let submit = |query: &'static str| {
        let client = client.clone();
        let url = format!("{}/query/new", server.base_url);
        async move {
            let res = client
                .post(url)
                .json(&json!({
                    "allowed_workspace_ids": ["w1"],
                    "query_content": query,
                }))
                .send()
                .await
                .unwrap();
            let body: serde_json::Value = res.json().await.unwrap();
            body["query_id"].as_str().unwrap().to_string()
        }
    };

    let blocker = submit("SELECT 1").await;
    let victim = submit("SELECT 2").await;

    let res = client
        .delete(format!("{}/query/{victim}", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["cancelled"], true);

    get_status_eventually(&client, &server.base_url, &victim, "cancelled").await;
    get_status_eventually(&client, &server.base_url, &blocker, "completed").await;

    // No result record was ever created for the cancelled job.
    assert_eq!(server.store.batch_count(&victim.parse().unwrap()), 0);
    assert!(server
        .store
        .read_metadata(&victim.parse().unwrap())
        .unwrap()
        .is_none());
}
