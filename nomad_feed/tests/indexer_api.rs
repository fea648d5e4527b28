use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use nomad_feed::backfill::BackfillAggregator;
use nomad_feed::feed::{ApplyOutcome, FeedSource, FeedView};
use nomad_feed::{
    ConnectionFetcher, ConnectionKind, Cursor, FeedError, Filter, IndexerClient, PageFetcher, PageQuery,
    PostStore, ViewerSession,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Recorded {
    queries: Arc<Mutex<Vec<String>>>,
    bodies: Arc<Mutex<Vec<Value>>>,
}

impl Recorded {
    fn queries(&self) -> Vec<String> {
        self.queries.lock().expect("queries lock").clone()
    }

    fn bodies(&self) -> Vec<Value> {
        self.bodies.lock().expect("bodies lock").clone()
    }
}

fn envelope(hash: &str, reference: &str) -> Value {
    json!({
        "refhash": hash,
        "createdAt": 1_700_000_000,
        "subdomain": "alice",
        "tld": "nomad",
        "message": {
            "title": "",
            "body": format!("post {hash}"),
            "reference": reference,
            "topic": "",
            "tags": ["rust"],
            "type": "POST",
            "replyCount": 2,
            "likeCount": 1,
            "pinCount": 0,
        }
    })
}

fn ok(payload: Value) -> Json<Value> {
    Json(json!({ "id": 0, "payload": payload }))
}

async fn list_posts(State(recorded): State<Recorded>, RawQuery(query): RawQuery) -> Json<Value> {
    let query = query.unwrap_or_default();
    recorded.queries.lock().expect("queries lock").push(query.clone());
    if query.contains("offset=2") {
        ok(json!({ "items": [envelope("p2", "")], "next": null }))
    } else {
        ok(json!({ "items": [envelope("p0", ""), envelope("r0", "p0")], "next": 2 }))
    }
}

async fn filter_posts(
    State(recorded): State<Recorded>,
    RawQuery(query): RawQuery,
    Json(body): Json<Value>,
) -> Json<Value> {
    recorded
        .queries
        .lock()
        .expect("queries lock")
        .push(query.unwrap_or_default());
    recorded.bodies.lock().expect("bodies lock").push(body);
    ok(json!({ "items": [envelope("t0", ""), envelope("t1", "")], "next": -1 }))
}

async fn single_post(Path(hash): Path<String>) -> Response {
    match hash.as_str() {
        "missing" => ok(Value::Null).into_response(),
        "refused" => Json(json!({ "id": 0, "payload": null, "error": "post is private" })).into_response(),
        "broken" => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        other => ok(envelope(other, "root")).into_response(),
    }
}

async fn connections(
    State(recorded): State<Recorded>,
    Path((name, kind)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Json<Value> {
    recorded
        .queries
        .lock()
        .expect("queries lock")
        .push(format!("{name}/{kind}?{}", query.unwrap_or_default()));
    ok(json!({
        "items": [{ "subdomain": "bob", "tld": "nomad" }, { "tld": "carol" }],
        "next": null,
    }))
}

async fn spawn_indexer() -> (String, Recorded) {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/posts", get(list_posts))
        .route("/posts/:hash", get(single_post))
        .route("/filter", post(filter_posts))
        .route("/users/:name/:kind", get(connections))
        .with_state(recorded.clone());
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), recorded)
}

fn client(base_url: &str) -> IndexerClient {
    IndexerClient::new(base_url, 20, Duration::from_secs(5)).expect("client")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn posts_listing_sends_order_limit_offset_and_extensions() {
    let (base_url, recorded) = spawn_indexer().await;
    let client = client(&base_url);
    let query = PageQuery::posts()
        .with_follow_src(["me"])
        .with_block_src(["spam", "noisy"]);

    let first = client.fetch_page(&query, Cursor::Start).await.expect("first page");
    let second = client
        .fetch_page(&query, first.next)
        .await
        .expect("second page");

    assert_eq!(first.items.len(), 2);
    assert_eq!(first.next, Cursor::Offset(2));
    assert_eq!(first.items[1].parent.as_deref(), Some("p0"));
    assert_eq!(first.items[0].creator, "alice@nomad");
    assert_eq!(first.items[0].meta.reply_count, 2);
    assert_eq!(second.next, Cursor::Exhausted);

    let queries = recorded.queries();
    assert_eq!(
        queries[0],
        "order=DESC&limit=20&extendFollowSrc=me&extendBlockSrc=spam&extendBlockSrc=noisy"
    );
    assert!(queries[1].contains("offset=2"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn filter_query_posts_the_filter_body() {
    let (base_url, recorded) = spawn_indexer().await;
    let client = client(&base_url);

    let page = client
        .fetch_page(&PageQuery::filter(Filter::tagged("rust")), Cursor::Offset(40))
        .await
        .expect("filter page");

    assert_eq!(page.items.len(), 2);
    assert_eq!(page.next, Cursor::Exhausted);
    assert_eq!(recorded.queries(), vec!["order=DESC&offset=40".to_string()]);
    assert_eq!(
        recorded.bodies(),
        vec![json!({
            "filter": {
                "postedBy": ["*"],
                "repliedBy": ["*"],
                "likedBy": ["*"],
                "postHashes": [],
                "parentHashes": [],
                "allowedTags": ["rust"],
            }
        })]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_post_lookup_handles_missing_and_errors() {
    let (base_url, _recorded) = spawn_indexer().await;
    let client = client(&base_url);

    let found = client.fetch_post("abc").await.expect("lookup").expect("post");
    assert_eq!(found.hash, "abc");
    assert_eq!(found.parent.as_deref(), Some("root"));

    assert!(client.fetch_post("missing").await.expect("lookup").is_none());

    let refused = client.fetch_post("refused").await.expect_err("error payload");
    assert!(matches!(refused, FeedError::Indexer(message) if message == "post is private"));

    let broken = client.fetch_post("broken").await.expect_err("server error");
    assert!(matches!(broken, FeedError::Status { status: 500, .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reserved_characters_stay_inside_their_path_segment() {
    let (base_url, recorded) = spawn_indexer().await;
    let client = client(&base_url);

    let found = client
        .fetch_post("odd/hash?x#y")
        .await
        .expect("lookup")
        .expect("post");
    assert_eq!(found.hash, "odd/hash?x#y");

    client
        .fetch_connections("bob/../alice", ConnectionKind::Followers, Cursor::Start)
        .await
        .expect("connections");
    assert_eq!(
        recorded.queries(),
        vec!["bob/../alice/followers?order=ASC&limit=20".to_string()]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connections_are_listed_ascending_as_usernames() {
    let (base_url, recorded) = spawn_indexer().await;
    let client = client(&base_url);

    let page = client
        .fetch_connections("alice", ConnectionKind::Followees, Cursor::Start)
        .await
        .expect("connections");

    assert_eq!(page.items, vec!["bob@nomad".to_string(), "carol".to_string()]);
    assert_eq!(page.next, Cursor::Exhausted);
    assert_eq!(
        recorded.queries(),
        vec!["alice/followees?order=ASC&limit=20".to_string()]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn discover_feed_backfills_over_http() {
    let (base_url, recorded) = spawn_indexer().await;
    let client = Arc::new(IndexerClient::new(&base_url, 2, Duration::from_secs(5)).expect("client"));
    let store = PostStore::new();
    let view = FeedView::new(
        FeedSource::Discover,
        BackfillAggregator::new(client, 2),
        store.clone(),
    );

    let outcome = view.sync(&ViewerSession::default()).await;

    assert_eq!(outcome, Some(ApplyOutcome::Merged { added: 2 }));
    let snapshot = view.snapshot();
    assert_eq!(snapshot.list, vec!["p0".to_string(), "p2".to_string()]);
    assert_eq!(snapshot.cursor, Cursor::Exhausted);
    assert_eq!(recorded.queries().len(), 2);
    assert!(store.contains("p2"));
    assert!(!store.contains("r0"));
}
