// HTTP-level tests for the request executor and endpoint facade, driven
// against a mock server. Backoff and cooldown bases are shrunk to keep the
// suite fast; the escalation math itself is unit-tested in `throttle`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use moltbook_client::{ClientError, MoltbookClient};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn client(server: &MockServer) -> MoltbookClient {
    MoltbookClient::builder("test-key")
        .base_url(server.uri())
        .max_retries(5)
        .base_delay(Duration::from_millis(10))
        .cooldown_base(Duration::from_millis(5))
        .build()
}

#[tokio::test]
async fn three_429s_then_success_takes_four_attempts() {
    let server = MockServer::start().await;
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    Mock::given(method("GET"))
        .and(path("/submolts"))
        .respond_with(move |_req: &Request| {
            if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                ResponseTemplate::new(429)
            } else {
                ResponseTemplate::new(200).set_body_json(json!({ "submolts": [] }))
            }
        })
        .expect(5)
        .mount(&server)
        .await;

    let client = client(&server);
    let submolts = client.submolts_page(0).await.expect("fourth attempt succeeds");
    assert!(submolts.is_empty());
    assert_eq!(client.request_count().await, 4);

    // The success reset the 429 streak: the next 429 run starts from one
    // and is survivable again.
    let follow_up = client.submolts_page(0).await;
    assert!(follow_up.is_ok());
}

#[tokio::test]
async fn ten_consecutive_429s_abort_the_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/submolts"))
        .respond_with(ResponseTemplate::new(429))
        .expect(10)
        .mount(&server)
        .await;

    let client = MoltbookClient::builder("test-key")
        .base_url(server.uri())
        .max_retries(15)
        .base_delay(Duration::from_millis(1))
        .cooldown_base(Duration::from_millis(1))
        .build();

    let err = client.submolts_page(0).await.expect_err("session must abort");
    match err {
        ClientError::RateLimitExceeded {
            consecutive,
            request_count,
        } => {
            assert_eq!(consecutive, 10);
            assert_eq!(request_count, 10);
        }
        other => panic!("expected RateLimitExceeded, got {other:?}"),
    }
    // No request was issued after the fatal tenth 429.
    assert_eq!(server.received_requests().await.unwrap().len(), 10);
}

#[tokio::test]
async fn exhausted_429_retries_fail_with_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/submolts"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let client = MoltbookClient::builder("test-key")
        .base_url(server.uri())
        .max_retries(2)
        .base_delay(Duration::from_millis(1))
        .cooldown_base(Duration::from_millis(1))
        .build();

    let err = client.submolts_page(0).await.expect_err("retries exhausted");
    assert!(matches!(err, ClientError::RateLimited { retries: 2 }));
}

#[tokio::test]
async fn exhausted_5xx_surfaces_the_status_to_the_caller() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/submolts"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let client = MoltbookClient::builder("test-key")
        .base_url(server.uri())
        .max_retries(1)
        .base_delay(Duration::from_millis(1))
        .build();

    // The executor hands the final 5xx response back; the facade turns the
    // status into an API error instead of a transport error.
    let err = client.submolts_page(0).await.expect_err("server kept failing");
    match err {
        ClientError::Api { status, .. } => assert_eq!(status, 503),
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn timeouts_are_retried_then_propagated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stats"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "agents": 1, "submolts": 1, "posts": 1, "comments": 1 }))
                .set_delay(Duration::from_millis(400)),
        )
        .mount(&server)
        .await;

    let client = MoltbookClient::builder("test-key")
        .base_url(server.uri())
        .max_retries(1)
        .base_delay(Duration::from_millis(1))
        .timeout(Duration::from_millis(50))
        .build();

    let err = client.fetch_platform_stats().await.expect_err("every attempt times out");
    assert!(matches!(err, ClientError::Network(_)));
    assert_eq!(client.request_count().await, 2);
}

#[tokio::test]
async fn moderators_404_is_an_empty_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/submolts/ghosttown/moderators"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let moderators = client
        .fetch_submolt_moderators("ghosttown")
        .await
        .expect("404 is not an error here");
    assert!(moderators.is_empty());
}

#[tokio::test]
async fn moderators_are_parsed_when_present() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/submolts/general/moderators"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "moderators": [
                { "name": "alice", "role": "owner" },
                { "name": "bob" }
            ]
        })))
        .mount(&server)
        .await;

    let client = client(&server);
    let moderators = client.fetch_submolt_moderators("general").await.unwrap();
    assert_eq!(moderators.len(), 2);
    assert_eq!(moderators[0].name, "alice");
    assert_eq!(moderators[0].role.as_deref(), Some("owner"));
    assert_eq!(moderators[1].role, None);
}

#[tokio::test]
async fn stats_retry_until_every_field_is_non_zero() {
    let server = MockServer::start().await;
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    Mock::given(method("GET"))
        .and(path("/stats"))
        .respond_with(move |_req: &Request| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "agents": 0, "submolts": 5, "posts": 9, "comments": 3 }))
            } else {
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "agents": 2, "submolts": 5, "posts": 9, "comments": 3 }))
            }
        })
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    let stats = client.fetch_platform_stats().await.unwrap();
    assert_eq!(stats.agents, 2);
    assert_eq!(stats.submolts, 5);
    assert_eq!(stats.posts, 9);
    assert_eq!(stats.comments, 3);
}

#[tokio::test]
async fn agent_profile_absence_is_signaled_by_the_success_flag() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/agents/profile"))
        .and(query_param("name", "ghost"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": false })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/agents/profile"))
        .and(query_param("name", "alice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "agent": { "name": "alice", "karma": 7, "follower_count": 12 }
        })))
        .mount(&server)
        .await;

    let client = client(&server);
    assert!(client.fetch_agent_profile("ghost").await.unwrap().is_none());

    let agent = client.fetch_agent_profile("alice").await.unwrap().expect("profile exists");
    assert_eq!(agent.name, "alice");
    assert_eq!(agent.karma, Some(7));
}

#[tokio::test]
async fn missing_post_is_absent_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/posts/p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "post": { "id": "p1", "title": "hello", "author": "alice" },
            "comments": [
                { "id": "c1", "author": "bob", "content": "hi" }
            ]
        })))
        .mount(&server)
        .await;

    let client = client(&server);
    assert!(client.fetch_post_with_comments("gone").await.unwrap().is_none());

    let detail = client
        .fetch_post_with_comments("p1")
        .await
        .unwrap()
        .expect("post exists");
    assert_eq!(detail.post.id, "p1");
    assert_eq!(detail.comments.len(), 1);
    assert_eq!(detail.comments[0].id, "c1");
}

#[tokio::test]
async fn requests_carry_the_bearer_token_and_notify_the_observer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stats"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200)
            .set_body_json(json!({ "agents": 1, "submolts": 1, "posts": 1, "comments": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let client = MoltbookClient::builder("test-key")
        .base_url(server.uri())
        .on_request(move |url| sink.lock().unwrap().push(url.to_string()))
        .build();

    client.fetch_platform_stats().await.unwrap();

    let urls = seen.lock().unwrap();
    assert_eq!(urls.len(), 1);
    assert!(urls[0].ends_with("/stats"));
}

#[tokio::test]
async fn full_page_walk_stops_on_a_short_page() {
    let server = MockServer::start().await;
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    Mock::given(method("GET"))
        .and(path("/submolts"))
        .respond_with(move |_req: &Request| {
            let page: Vec<_> = if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                (0..100).map(|i| json!({ "name": format!("sub-{i}") })).collect()
            } else {
                vec![json!({ "name": "last" })]
            };
            ResponseTemplate::new(200).set_body_json(json!({ "submolts": page }))
        })
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    let mut pages = Vec::new();
    let mut progress = |page: u32, so_far: usize| pages.push((page, so_far));
    let submolts = client.fetch_submolts(Some(&mut progress)).await.unwrap();

    assert_eq!(submolts.len(), 101);
    assert_eq!(pages, vec![(1, 100), (2, 101)]);
}

#[tokio::test]
async fn full_post_walk_respects_the_requested_limit() {
    let server = MockServer::start().await;
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    Mock::given(method("GET"))
        .and(path("/posts"))
        .and(query_param("limit", "25"))
        .respond_with(move |_req: &Request| {
            let start = counter.fetch_add(1, Ordering::SeqCst) * 25;
            let count = if start == 0 { 25 } else { 10 };
            let page: Vec<_> = (start..start + count)
                .map(|i| json!({ "id": format!("post-{i}") }))
                .collect();
            ResponseTemplate::new(200).set_body_json(json!({ "posts": page }))
        })
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    let posts = client.fetch_all_posts(None, 25).await.unwrap();
    assert_eq!(posts.len(), 35);
    assert_eq!(posts[0].id, "post-0");
    assert_eq!(posts[34].id, "post-34");
}
