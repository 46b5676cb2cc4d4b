//! Bundle upload integration tests.

#[cfg(test)]
mod tests {
    use crate::{bundle_body, file_part, http_client, post_bundle, test_file_path};

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_commit_every_part_of_bundle() {
        let client = http_client();
        let first = test_file_path("first");
        let second = test_file_path("second");

        let body = bundle_body(&[
            file_part(&first, b"hello"),
            file_part(&second, b"bundled world"),
        ]);
        let resp = post_bundle(&client, body).await;

        assert_eq!(resp.status().as_u16(), 207);
        let text = resp.text().await.expect("body");
        assert!(text.contains(&format!("<d:href>{first}</d:href>")));
        assert!(text.contains(&format!("<d:href>{second}</d:href>")));
        assert!(text.contains("<oc:size>13</oc:size>"));
        assert!(text.contains("HTTP/1.1 200 OK"));
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_isolate_failed_part() {
        let client = http_client();
        let good = test_file_path("good");
        let orphan = format!("/no-such-dir-{}{}", uuid::Uuid::new_v4().simple(), "/a.txt");

        let body = bundle_body(&[file_part(&orphan, b"abc"), file_part(&good, b"xyz")]);
        let resp = post_bundle(&client, body).await;

        assert_eq!(resp.status().as_u16(), 207);
        let text = resp.text().await.expect("body");
        assert!(text.contains("<s:exception>Conflict</s:exception>"));
        assert!(text.contains(&format!("<d:href>{good}</d:href>")));
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_refuse_to_overwrite_existing_file() {
        let client = http_client();
        let path = test_file_path("exists");

        let resp = post_bundle(&client, bundle_body(&[file_part(&path, b"one")])).await;
        assert_eq!(resp.status().as_u16(), 207);

        let resp = post_bundle(&client, bundle_body(&[file_part(&path, b"two")])).await;
        assert_eq!(resp.status().as_u16(), 207);
        let text = resp.text().await.expect("body");
        assert!(text.contains("<s:exception>Forbidden</s:exception>"));
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_resolve_paths_from_metadata() {
        let client = http_client();
        let path = test_file_path("meta");

        let metadata = format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<d:multipart xmlns:d="DAV:">
  <d:part>
    <d:prop>
      <d:oc-path>{path}</d:oc-path>
      <d:oc-id>1</d:oc-id>
      <d:oc-mtime>1500000000</d:oc-mtime>
      <d:oc-total-length>4</d:oc-total-length>
    </d:prop>
  </d:part>
</d:multipart>"#
        );
        let body = bundle_body(&[
            (
                vec![
                    ("content-type".to_owned(), "text/xml; charset=utf-8".to_owned()),
                    ("content-length".to_owned(), metadata.len().to_string()),
                ],
                metadata.into_bytes(),
            ),
            (
                vec![
                    ("content-id".to_owned(), "1".to_owned()),
                    ("content-length".to_owned(), "4".to_owned()),
                ],
                b"data".to_vec(),
            ),
        ]);
        let resp = post_bundle(&client, body).await;

        assert_eq!(resp.status().as_u16(), 207);
        let text = resp.text().await.expect("body");
        assert!(text.contains(&format!("<d:href>{path}</d:href>")));
        assert!(text.contains("<oc:size>4</oc:size>"));
    }
}
