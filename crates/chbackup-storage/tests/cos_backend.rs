//! COS backend against a mock COS endpoint

use chbackup_core::CosConfig;
use chbackup_storage::{CosBackend, RemoteFile, RemoteReader, RemoteStorage, StorageError};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{
    body_bytes, header_exists, method, path, query_param, query_param_is_missing,
};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

/// Matches the query exactly as sent, before any decoding
struct RawQuery(&'static str);

impl Match for RawQuery {
    fn matches(&self, request: &Request) -> bool {
        request.url.query() == Some(self.0)
    }
}

async fn connected(server: &MockServer, part_size: u64) -> CosBackend {
    Mock::given(method("HEAD"))
        .and(path("/"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;

    let config = CosConfig {
        url: server.uri(),
        secret_id: "AKIDEXAMPLE".to_string(),
        secret_key: "secret".to_string(),
        path: "backups".to_string(),
        part_size,
        ..Default::default()
    };
    let mut backend = CosBackend::new(config, CancellationToken::new());
    backend.connect().await.unwrap();
    backend
}

async fn collect(backend: &CosBackend, prefix: &str, recursive: bool) -> Vec<RemoteFile> {
    let mut seen = Vec::new();
    backend
        .walk(prefix, recursive, &mut |file| {
            seen.push(file);
            Ok(())
        })
        .await
        .unwrap();
    seen
}

const NOT_FOUND_BODY: &str =
    "<Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message></Error>";

#[tokio::test]
async fn test_connect_fails_for_missing_bucket() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = CosConfig {
        url: server.uri(),
        ..Default::default()
    };
    let mut backend = CosBackend::new(config, CancellationToken::new());
    let err = backend.connect().await.unwrap_err();
    assert!(matches!(err, StorageError::Connection { kind: "COS", .. }));
}

#[tokio::test]
async fn test_stat_uses_head_and_last_modified() {
    let server = MockServer::start().await;
    let backend = connected(&server, 1024).await;

    Mock::given(method("HEAD"))
        .and(path("/backups/daily.tar"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Last-Modified", "Wed, 01 May 2024 10:00:00 GMT"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let file = backend.stat_file("daily.tar").await.unwrap();
    assert_eq!(file.name(), "daily.tar");
    assert_eq!(
        file.last_modified().map(|t| t.to_rfc3339()),
        Some("2024-05-01T10:00:00+00:00".to_string())
    );
}

#[tokio::test]
async fn test_stat_missing_is_not_found() {
    let server = MockServer::start().await;
    let backend = connected(&server, 1024).await;

    Mock::given(method("HEAD"))
        .and(path("/backups/missing.tar"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = backend.stat_file("missing.tar").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_get_missing_key_is_not_found() {
    let server = MockServer::start().await;
    let backend = connected(&server, 1024).await;

    Mock::given(method("GET"))
        .and(path("/backups/missing.tar"))
        .respond_with(ResponseTemplate::new(404).set_body_string(NOT_FOUND_BODY))
        .mount(&server)
        .await;

    match backend.get_file_reader("missing.tar").await {
        Err(err) => assert!(err.is_not_found()),
        Ok(_) => panic!("expected not-found"),
    }
}

#[tokio::test]
async fn test_other_errors_keep_provider_code() {
    let server = MockServer::start().await;
    let backend = connected(&server, 1024).await;

    Mock::given(method("DELETE"))
        .and(path("/backups/locked.tar"))
        .respond_with(ResponseTemplate::new(403).set_body_string(
            "<Error><Code>AccessDenied</Code><Message>Access Denied.</Message></Error>",
        ))
        .mount(&server)
        .await;

    let err = backend.delete_file("locked.tar").await.unwrap_err();
    assert!(!err.is_not_found());
    let source = std::error::Error::source(&err).unwrap().to_string();
    assert!(source.contains("AccessDenied"), "{}", source);
}

#[tokio::test]
async fn test_walk_follows_next_marker() {
    let server = MockServer::start().await;
    let backend = connected(&server, 1024).await;

    let first_page = r#"<ListBucketResult>
        <Prefix>backups/</Prefix>
        <IsTruncated>true</IsTruncated>
        <NextMarker>backups/a.tar</NextMarker>
        <CommonPrefixes><Prefix>backups/weekly/</Prefix></CommonPrefixes>
        <Contents><Key>backups/a.tar</Key><Size>10</Size><LastModified>2024-05-01T10:00:00.000Z</LastModified></Contents>
    </ListBucketResult>"#;
    let second_page = r#"<ListBucketResult>
        <Prefix>backups/</Prefix>
        <IsTruncated>false</IsTruncated>
        <Contents><Key>backups/b.tar</Key><Size>20</Size><LastModified>2024-05-02T10:00:00.000Z</LastModified></Contents>
    </ListBucketResult>"#;

    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("prefix", "backups/"))
        .and(query_param("delimiter", "/"))
        .and(query_param_is_missing("marker"))
        .respond_with(ResponseTemplate::new(200).set_body_string(first_page))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("marker", "backups/a.tar"))
        .respond_with(ResponseTemplate::new(200).set_body_string(second_page))
        .expect(1)
        .mount(&server)
        .await;

    let entries = collect(&backend, "", false).await;
    let names: Vec<&str> = entries.iter().map(|f| f.name()).collect();
    assert_eq!(names, vec!["weekly/", "a.tar", "b.tar"]);
    assert!(entries[0].is_dir());
    assert_eq!(entries[2].size(), 20);
}

#[tokio::test]
async fn test_walk_visitor_error_stops_listing() {
    let server = MockServer::start().await;
    let backend = connected(&server, 1024).await;

    let page = r#"<ListBucketResult>
        <IsTruncated>true</IsTruncated>
        <NextMarker>backups/a.tar</NextMarker>
        <Contents><Key>backups/a.tar</Key><Size>10</Size></Contents>
    </ListBucketResult>"#;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .expect(1)
        .mount(&server)
        .await;

    let err = backend
        .walk("", true, &mut |_| Err(StorageError::aborted("enough")))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Aborted(_)));
}

#[tokio::test]
async fn test_small_put_is_single_request() {
    let server = MockServer::start().await;
    let backend = connected(&server, 1024).await;

    Mock::given(method("PUT"))
        .and(path("/backups/meta.json"))
        .and(body_bytes(b"{}".to_vec()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let body: RemoteReader = Box::pin(std::io::Cursor::new(b"{}".to_vec()));
    backend.put_file("meta.json", body).await.unwrap();
}

#[tokio::test]
async fn test_large_put_uses_multipart() {
    let server = MockServer::start().await;
    let backend = connected(&server, 4).await;

    Mock::given(method("POST"))
        .and(path("/backups/daily.tar"))
        .and(query_param("uploads", ""))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<InitiateMultipartUploadResult><Bucket>b</Bucket><Key>backups/daily.tar</Key>\
             <UploadId>upload-42</UploadId></InitiateMultipartUploadResult>",
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/backups/daily.tar"))
        .and(query_param("uploadId", "upload-42"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"part\""))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/backups/daily.tar"))
        .and(query_param("uploadId", "upload-42"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let body: RemoteReader = Box::pin(std::io::Cursor::new(b"0123456789".to_vec()));
    backend.put_file("daily.tar", body).await.unwrap();
}

#[tokio::test]
async fn test_failed_part_aborts_multipart() {
    let server = MockServer::start().await;
    let backend = connected(&server, 4).await;

    Mock::given(method("POST"))
        .and(path("/backups/daily.tar"))
        .and(query_param("uploads", ""))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<InitiateMultipartUploadResult><UploadId>upload-7</UploadId></InitiateMultipartUploadResult>",
        ))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/backups/daily.tar"))
        .respond_with(ResponseTemplate::new(500).set_body_string(
            "<Error><Code>InternalError</Code><Message>boom</Message></Error>",
        ))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/backups/daily.tar"))
        .and(query_param("uploadId", "upload-7"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let body: RemoteReader = Box::pin(std::io::Cursor::new(b"0123456789".to_vec()));
    let err = backend.put_file("daily.tar", body).await.unwrap_err();
    assert!(!err.is_not_found());
}

#[tokio::test]
async fn test_get_streams_body() {
    let server = MockServer::start().await;
    let backend = connected(&server, 1024).await;

    Mock::given(method("GET"))
        .and(path("/backups/daily.tar"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8; 4096]))
        .mount(&server)
        .await;

    let mut reader = backend.get_file_reader("daily.tar").await.unwrap();
    let mut data = Vec::new();
    reader.read_to_end(&mut data).await.unwrap();
    assert_eq!(data, vec![9u8; 4096]);
}

#[tokio::test]
async fn test_listing_query_uses_signed_encoding() {
    let server = MockServer::start().await;
    let backend = connected(&server, 1024).await;

    Mock::given(method("GET"))
        .and(path("/"))
        .and(RawQuery("prefix=backups%2Fmy%20daily%2F&max-keys=1000&delimiter=%2F"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<ListBucketResult><IsTruncated>false</IsTruncated></ListBucketResult>"),
        )
        .expect(1)
        .mount(&server)
        .await;

    assert!(collect(&backend, "my daily", false).await.is_empty());
}
