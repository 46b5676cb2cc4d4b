//! Health endpoint integration tests.

#[cfg(test)]
mod tests {
    use crate::{endpoint_url, http_client};

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_report_running() {
        let client = http_client();
        let resp = client
            .get(format!("{}/_health", endpoint_url()))
            .send()
            .await
            .expect("send");

        assert_eq!(resp.status().as_u16(), 200);
        let json: serde_json::Value = resp.json().await.expect("json");
        assert_eq!(json["status"], "running");
        assert_eq!(json["service"], "bundle");
    }
}
