use setu_test_harness::mocks::*;

#[tokio::test]
async fn test_mock_get_json() {
    let server = TestHttpServer::start().await;

    server
        .get_json("/api/users/1", &serde_json::json!({ "id": 1, "name": "Test User" }))
        .await;

    let response = reqwest::get(server.url_for("/api/users/1")).await.unwrap();

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["name"], "Test User");
    server.verify_received("/api/users/1", 1).await;
}

#[tokio::test]
async fn test_echo_reflects_body_and_content_type() {
    let server = TestHttpServer::start().await;
    server.echo("/echo").await;

    let response = reqwest::Client::new()
        .put(server.url_for("/echo"))
        .header("content-type", "text/plain")
        .body("hello")
        .send()
        .await
        .unwrap();

    assert_eq!(response.headers()["x-echo-method"], "PUT");
    assert_eq!(response.headers()["x-echo-content-type"], "text/plain");
    assert_eq!(response.text().await.unwrap(), "hello");
}

#[tokio::test]
async fn test_sequence_serves_in_order() {
    let server = TestHttpServer::start().await;
    server
        .sequence("/data", vec![responses::server_error(), responses::ok()])
        .await;

    let client = reqwest::Client::new();
    let first = client.get(server.url_for("/data")).send().await.unwrap();
    let second = client.get(server.url_for("/data")).send().await.unwrap();

    assert_eq!(first.status(), 500);
    assert_eq!(second.status(), 200);
}

#[tokio::test]
async fn test_flaky_server_resets_then_answers() {
    let server = FaultyServer::flaky(1, r#"{"ok":true}"#).await;

    let first = reqwest::get(server.url_for("/x")).await;
    assert!(first.is_err());

    let second = reqwest::get(server.url_for("/x")).await.unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(second.text().await.unwrap(), r#"{"ok":true}"#);
    assert_eq!(server.connections(), 2);
}
