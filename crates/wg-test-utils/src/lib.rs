pub mod mock_http_server;

pub use mock_http_server::{MockHttpServer, MockResponse, RecordedRequest};

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_response_is_ok_true_json() {
        let server = MockHttpServer::start().await;
        let client = reqwest::Client::new();
        let resp = client.post(format!("{}/bot123/sendMessage", server.base_url())).body("{}").send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["ok"], true);

        let requests = server.received_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].path, "/bot123/sendMessage");
    }

    #[tokio::test]
    async fn queued_responses_are_served_in_order() {
        let server = MockHttpServer::start().await;
        server.push_response(MockResponse::json(429, serde_json::json!({"ok": false, "error_code": 429})));
        server.push_response(MockResponse::json(200, serde_json::json!({"ok": true})));

        let client = reqwest::Client::new();
        let first = client.post(format!("{}/x", server.base_url())).send().await.unwrap();
        assert_eq!(first.status(), 429);
        let second = client.post(format!("{}/x", server.base_url())).send().await.unwrap();
        assert_eq!(second.status(), 200);
    }
}
