//! Tests for the mock web server over real sockets.

use hoodies_network_mockserver::{MockResponse, MockWebServer, WebServerHandler};

fn server() -> MockWebServer {
    MockWebServer::builder()
        .use_port(0)
        .with_httpbin_routes()
        .add_route(
            "/cookie_factory",
            WebServerHandler::new().get(|_| {
                MockResponse::ok("baked").header("Set-Cookie", "flavor=chocolate; Path=/")
            }),
        )
        .start()
        .expect("server starts")
}

#[tokio::test(flavor = "multi_thread")]
async fn echo_returns_raw_body_as_data() {
    let server = server();
    let response = reqwest::Client::new()
        .patch(format!("{}patch", server.base_url()))
        .header("Content-Type", "application/json")
        .body("\"abc\"")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let value: serde_json::Value = response.json().await.unwrap();
    assert_eq!(value["data"], "\"abc\"");
    assert_eq!(value["headers"]["content-type"], "application/json");
    server.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn patch_route_also_echoes_post() {
    let server = server();
    let response = reqwest::Client::new()
        .post(format!("{}patch", server.base_url()))
        .body("\"abc\"")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let value: serde_json::Value = response.json().await.unwrap();
    assert_eq!(value["data"], "\"abc\"");
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_method_is_405() {
    let server = server();
    let response = reqwest::Client::new()
        .post(format!("{}get", server.base_url()))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 405);
    assert_eq!(response.text().await.unwrap(), "Method not allowed");
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_path_is_404() {
    let server = server();
    let response = reqwest::get(format!("{}nowhere", server.base_url()))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test(flavor = "multi_thread")]
async fn custom_headers_are_sent() {
    let server = server();
    let response = reqwest::get(format!("{}cookie_factory", server.base_url()))
        .await
        .unwrap();
    assert_eq!(
        response.headers()["set-cookie"].to_str().unwrap(),
        "flavor=chocolate; Path=/"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn delayed_echo_reports_delay() {
    let server = server();
    let response = reqwest::get(format!("{}echo/0", server.base_url()))
        .await
        .unwrap();
    let value: serde_json::Value = response.json().await.unwrap();
    assert_eq!(value["delay"], "0");
}

#[test]
fn stopped_server_releases_port() {
    let server = server();
    let port = server.port();
    server.stop();
    assert!(std::net::TcpListener::bind(("127.0.0.1", port)).is_ok());
}
