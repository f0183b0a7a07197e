use base64::Engine;
use httpmock::prelude::*;
use repo_policy_engine::platform::{GithubAppClient, PlatformClient, WorkflowPermissions};

fn client_for(server: &MockServer) -> GithubAppClient {
    std::env::set_var("GITHUB_APP_ID", "12345");
    std::env::set_var(
        "GITHUB_APP_PRIVATE_KEY",
        include_str!("fixtures/test_app_key.pem"),
    );
    GithubAppClient::new("acme".to_string(), "99".to_string(), server.base_url())
}

fn mock_installation_token(server: &MockServer) {
    server.mock(|when, then| {
        when.method(POST)
            .path("/app/installations/99/access_tokens");
        then.status(201).json_body(serde_json::json!({
            "token": "ghs_test_token",
            "expires_at": (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
        }));
    });
}

#[tokio::test]
async fn file_exists_reflects_contents_endpoint_presence() {
    let server = MockServer::start_async().await;
    mock_installation_token(&server);
    let encoded = base64::engine::general_purpose::STANDARD.encode("hello");
    let present_mock = server.mock(|when, then| {
        when.method(GET).path("/repos/acme/widgets/contents/AGENTS.md");
        then.status(200)
            .json_body(serde_json::json!({ "content": encoded }));
    });

    let client = client_for(&server);
    let exists = client.file_exists("acme/widgets", "AGENTS.md").await.unwrap();
    assert!(exists);
    present_mock.assert();
}

#[tokio::test]
async fn file_exists_is_false_on_404() {
    let server = MockServer::start_async().await;
    mock_installation_token(&server);
    server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/contents/catalog-info.yaml");
        then.status(404).json_body(serde_json::json!({ "message": "Not Found" }));
    });

    let client = client_for(&server);
    let exists = client
        .file_exists("acme/widgets", "catalog-info.yaml")
        .await
        .unwrap();
    assert!(!exists);
}

#[tokio::test]
async fn workflow_permissions_write_is_returned_as_such() {
    let server = MockServer::start_async().await;
    mock_installation_token(&server);
    server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/actions/permissions/workflow");
        then.status(200)
            .json_body(serde_json::json!({ "default_workflow_permissions": "write" }));
    });

    let client = client_for(&server);
    let permissions = client
        .get_workflow_permissions("acme/widgets")
        .await
        .unwrap();
    assert_eq!(permissions, Some(WorkflowPermissions::Write));
}

#[tokio::test]
async fn workflow_permissions_read_is_compliant() {
    let server = MockServer::start_async().await;
    mock_installation_token(&server);
    server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/actions/permissions/workflow");
        then.status(200)
            .json_body(serde_json::json!({ "default_workflow_permissions": "read" }));
    });

    let client = client_for(&server);
    let permissions = client
        .get_workflow_permissions("acme/widgets")
        .await
        .unwrap();
    assert_eq!(permissions, Some(WorkflowPermissions::Read));
}
