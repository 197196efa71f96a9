//! Bucket provisioning and object operations against a mocked S3 endpoint.

use hexoteams::config::StorageConfig;
use hexoteams::storage::{ObjectStorage, StorageError};
use wiremock::matchers::{body_string_contains, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn storage(server: &MockServer, region: &str) -> ObjectStorage {
    let config = StorageConfig {
        endpoint_url: Some(server.uri()),
        use_ssl: false,
        access_key_id: "minioadmin".into(),
        secret_access_key: "minioadmin".into(),
        region: region.into(),
        init_max_retries: 2,
        init_retry_delay_seconds: 0,
        ..StorageConfig::default()
    };
    ObjectStorage::new(&config).unwrap()
}

#[tokio::test]
async fn missing_bucket_is_created_once() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/team-management"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/team-management"))
        .and(body_string_contains("<LocationConstraint>eu-west-1</LocationConstraint>"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/team-management/avatars/a.png"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let storage = storage(&server, "eu-west-1");
    let uploaded = storage
        .upload("avatars/a.png", b"png".to_vec(), None)
        .await
        .unwrap();
    assert_eq!(uploaded.content_type, "image/png");
    assert_eq!(
        uploaded.url,
        format!("{}/team-management/avatars/a.png", server.uri())
    );

    storage
        .upload("avatars/a.png", b"png".to_vec(), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn rejected_credentials_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let err = storage(&server, "us-east-1").ensure_bucket().await.unwrap_err();
    assert!(matches!(err, StorageError::AccessDenied { .. }));
}

#[tokio::test]
async fn unexpected_status_is_retried_then_reported() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let err = storage(&server, "us-east-1").ensure_bucket().await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::ProvisioningFailed { attempts: 2, .. }
    ));
}

#[tokio::test]
async fn delete_many_reports_failed_keys() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/team-management/keep.pdf"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/team-management/gone.pdf"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let outcome = storage(&server, "us-east-1")
        .delete_many(&["gone.pdf".to_string(), "keep.pdf".to_string()])
        .await
        .unwrap();
    assert_eq!(outcome.deleted, vec!["gone.pdf".to_string()]);
    assert_eq!(outcome.failed, vec!["keep.pdf".to_string()]);
}

#[tokio::test]
async fn downloading_a_missing_object_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/team-management/missing.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = storage(&server, "us-east-1")
        .download("missing.pdf")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));
}
