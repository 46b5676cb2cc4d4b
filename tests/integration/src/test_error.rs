//! Structural error integration tests.

#[cfg(test)]
mod tests {
    use crate::{bundle_body, bundle_url, file_part, http_client, post_bundle, test_file_path};

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_reject_wrong_content_type() {
        let client = http_client();
        let resp = client
            .post(bundle_url())
            .header("Content-Type", "multipart/form-data; boundary=x")
            .body("--x--\r\n")
            .send()
            .await
            .expect("send");

        assert_eq!(resp.status().as_u16(), 415);
        let text = resp.text().await.expect("body");
        assert!(text.contains("<s:exception>UnsupportedMediaType</s:exception>"));
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_reject_part_without_length() {
        let client = http_client();
        let path = test_file_path("nolen");
        let body = bundle_body(&[(
            vec![("x-file-path".to_owned(), path)],
            b"abc".to_vec(),
        )]);
        let resp = post_bundle(&client, body).await;

        assert_eq!(resp.status().as_u16(), 400);
        let text = resp.text().await.expect("body");
        assert!(text.contains("part cannot be of length 0"));
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_reject_truncated_bundle() {
        let client = http_client();
        let path = test_file_path("trunc");
        let mut body = bundle_body(&[file_part(&path, b"complete")]);
        // Drop the terminal boundary.
        body.truncate(body.len() - 10);

        let resp = post_bundle(&client, body).await;
        assert_eq!(resp.status().as_u16(), 400);
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_reject_get_on_bundle_endpoint() {
        let client = http_client();
        let resp = client.get(bundle_url()).send().await.expect("send");

        assert_eq!(resp.status().as_u16(), 405);
        assert_eq!(
            resp.headers().get("allow").and_then(|v| v.to_str().ok()),
            Some("POST")
        );
    }
}
