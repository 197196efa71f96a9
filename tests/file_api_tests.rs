//! File endpoints against a mocked S3 endpoint.

mod test_utils;

use axum::http::StatusCode;
use serde_json::json;
use test_utils::{empty_request, json_request, send, test_app, test_config, upload_request};
use uuid::Uuid;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn storage_app(server: &MockServer) -> axum::Router {
    let mut config = test_config();
    config.storage.endpoint_url = Some(server.uri());
    config.storage.use_ssl = false;
    config.storage.access_key_id = "minioadmin".into();
    config.storage.secret_access_key = "minioadmin".into();
    config.storage.init_max_retries = 1;
    config.storage.init_retry_delay_seconds = 0;
    test_app(config).await.unwrap()
}

async fn with_organization(app: &axum::Router, owner: Uuid) {
    let (status, _) = send(
        app,
        json_request(
            "POST",
            "/api/v1/organizations/create",
            owner,
            &json!({ "name": "Acme" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn upload_get_and_purge_a_file() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/team-management"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/team-management/[0-9a-f-]{36}\.PDF$"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path_regex(r"^/team-management/[0-9a-f-]{36}\.PDF$"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let app = storage_app(&server).await;
    let owner = Uuid::new_v4();
    with_organization(&app, owner).await;

    let (status, file) = send(
        &app,
        upload_request("/api/v1/files/upload", owner, "Report.PDF", b"%PDF-1"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(file["name"], "Report.PDF");
    assert_eq!(file["size"], "6 B");
    assert_eq!(file["is_deleted"], false);
    let file_id = file["id"].as_str().unwrap().to_string();

    let (status, detail) = send(
        &app,
        empty_request("GET", &format!("/api/v1/files/{file_id}"), owner),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let url = detail["url"].as_str().unwrap();
    assert!(url.starts_with(&server.uri()));
    assert!(url.contains("X-Amz-Signature="));

    let (status, _) = send(
        &app,
        empty_request("DELETE", &format!("/api/v1/files/{file_id}"), owner),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, deleted) = send(&app, empty_request("GET", "/api/v1/files?is_deleted=true", owner)).await;
    assert_eq!(deleted["total"], 1);

    let (status, _) = send(
        &app,
        empty_request("DELETE", &format!("/api/v1/files/{file_id}/permanently"), owner),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &app,
        empty_request("GET", &format!("/api/v1/files/{file_id}"), owner),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_storage_upload_removes_the_row() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/team-management"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let app = storage_app(&server).await;
    let owner = Uuid::new_v4();
    with_organization(&app, owner).await;

    let (status, body) = send(
        &app,
        upload_request("/api/v1/files/upload", owner, "notes.docx", b"hello"),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body["message"],
        "Failed to upload file to storage. Please try again later."
    );

    let (_, listing) = send(&app, empty_request("GET", "/api/v1/files", owner)).await;
    assert_eq!(listing["total"], 0);
}

#[tokio::test]
async fn disallowed_extensions_never_reach_storage() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let app = storage_app(&server).await;
    let owner = Uuid::new_v4();
    with_organization(&app, owner).await;

    let (status, _) = send(
        &app,
        upload_request("/api/v1/files/upload", owner, "payload.exe", b"MZ"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deleting_an_organization_purges_its_objects() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/team-management"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/team-management/[0-9a-f-]{36}\.pdf$"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path_regex(r"^/team-management/[0-9a-f-]{36}\.pdf$"))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&server)
        .await;

    let app = storage_app(&server).await;
    let owner = Uuid::new_v4();
    let (status, org) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/organizations/create",
            owner,
            &json!({ "name": "Acme" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let org_id = org["id"].as_str().unwrap().to_string();

    for name in ["a.pdf", "b.pdf"] {
        let (status, _) = send(
            &app,
            upload_request("/api/v1/files/upload", owner, name, b"%PDF-1"),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, _) = send(
        &app,
        empty_request("DELETE", &format!("/api/v1/organizations/{org_id}"), Uuid::new_v4()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        empty_request("DELETE", &format!("/api/v1/organizations/{org_id}"), owner),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &app,
        empty_request("GET", &format!("/api/v1/organizations/{org_id}"), owner),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
