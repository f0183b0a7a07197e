use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use repo_policy_engine::config_loader::ConfigLoader;
use repo_policy_engine::db::{policies, repositories, scans};
use repo_policy_engine::platform::{
    Comment, FileContent, Issue, PlatformClient, PlatformError, RepositorySummary, StatusState,
    WorkflowPermissions,
};
use repo_policy_engine::scan_orchestrator::ScanOrchestrator;
use sqlx::PgPool;

/// Drives C5 against a scripted platform: a fixed repository list and a
/// table of file contents keyed by `(repo, path)`. Everything else
/// (`PlatformClient`'s write-side methods) is unused by a scan and panics if
/// ever called.
struct FakePlatformClient {
    repos: Vec<RepositorySummary>,
    files: Mutex<HashMap<(String, String), String>>,
}

#[async_trait]
impl PlatformClient for FakePlatformClient {
    async fn list_organization_repositories(&self) -> Result<Vec<RepositorySummary>, PlatformError> {
        Ok(self.repos.clone())
    }

    async fn get_repository(&self, _platform_repository_id: i64) -> Result<RepositorySummary, PlatformError> {
        unimplemented!("not exercised by a scan")
    }

    async fn get_file_content(
        &self,
        repo_full_name: &str,
        path: &str,
    ) -> Result<Option<FileContent>, PlatformError> {
        let key = (repo_full_name.to_string(), path.to_string());
        Ok(self
            .files
            .lock()
            .unwrap()
            .get(&key)
            .map(|text| FileContent {
                bytes: text.as_bytes().to_vec(),
                text: Some(text.clone()),
            }))
    }

    async fn get_workflow_permissions(
        &self,
        _repo_full_name: &str,
    ) -> Result<Option<WorkflowPermissions>, PlatformError> {
        Ok(Some(WorkflowPermissions::Read))
    }

    async fn create_issue(
        &self,
        _repo_full_name: &str,
        _title: &str,
        _body: &str,
        _labels: &[String],
    ) -> Result<Issue, PlatformError> {
        unimplemented!("not exercised by a scan")
    }

    async fn list_open_issues_with_label(
        &self,
        _repo_full_name: &str,
        _label: &str,
    ) -> Result<Vec<Issue>, PlatformError> {
        unimplemented!("not exercised by a scan")
    }

    async fn archive_repository(&self, _repo_full_name: &str) -> Result<(), PlatformError> {
        unimplemented!("not exercised by a scan")
    }

    async fn comment_on_pull_request(
        &self,
        _repo_full_name: &str,
        _pr_number: i64,
        _body: &str,
    ) -> Result<Comment, PlatformError> {
        unimplemented!("not exercised by a scan")
    }

    async fn list_pull_request_comments(
        &self,
        _repo_full_name: &str,
        _pr_number: i64,
    ) -> Result<Vec<Comment>, PlatformError> {
        unimplemented!("not exercised by a scan")
    }

    async fn set_status_check(
        &self,
        _repo_full_name: &str,
        _head_sha: &str,
        _context: &str,
        _state: StatusState,
        _description: &str,
    ) -> Result<(), PlatformError> {
        unimplemented!("not exercised by a scan")
    }

    async fn check_team_membership(
        &self,
        _org: &str,
        _team_slug: &str,
        _username: &str,
        _user_access_token: &str,
    ) -> Result<bool, PlatformError> {
        unimplemented!("not exercised by a scan")
    }
}

fn config_yaml() -> String {
    r#"
access_control:
  authorized_team: "acme/platform"
policies:
  - name: "Require AGENTS.md"
    type: has_agents_md
    action: create-issue
"#
    .to_string()
}

async fn seed_config_fetch(client: &FakePlatformClient) {
    client.files.lock().unwrap().insert(
        ("acme/.github".to_string(), "config.yaml".to_string()),
        config_yaml(),
    );
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn perform_scan_records_a_violation_for_a_noncompliant_repository(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    std::env::set_var("GITHUB_ORG", "acme");

    let client = Arc::new(FakePlatformClient {
        repos: vec![
            RepositorySummary {
                platform_repository_id: 1,
                full_name: "acme/widgets".to_string(),
                default_branch: "main".to_string(),
                archived: false,
            },
            RepositorySummary {
                platform_repository_id: 2,
                full_name: "acme/gadgets".to_string(),
                default_branch: "main".to_string(),
                archived: false,
            },
        ],
        files: Mutex::new(HashMap::new()),
    });
    seed_config_fetch(&client).await;
    client.files.lock().unwrap().insert(
        ("acme/widgets".to_string(), "AGENTS.md".to_string()),
        "# Agents".to_string(),
    );

    let config_loader = Arc::new(ConfigLoader::new());
    let orchestrator = ScanOrchestrator::new(pool.clone(), client.clone(), config_loader);

    let scan_id = orchestrator.perform_scan().await.unwrap();

    let scan = scans::get(&pool, scan_id).await.unwrap().unwrap();
    assert_eq!(scan.status, repo_policy_engine::db::scans::ScanStatus::Completed);

    let stored = repositories::list_all(&pool).await.unwrap();
    assert_eq!(stored.len(), 2);

    let widgets = stored.iter().find(|r| r.name == "acme/widgets").unwrap();
    assert_eq!(widgets.compliance_status, "compliant");
    let gadgets = stored.iter().find(|r| r.name == "acme/gadgets").unwrap();
    assert_eq!(gadgets.compliance_status, "non_compliant");

    let policy = policies::get_by_key(&pool, "has_agents_md").await.unwrap().unwrap();
    assert_eq!(policy.action_spec, serde_json::json!(["create-issue"]));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn perform_scan_drops_repositories_no_longer_on_the_platform(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    std::env::set_var("GITHUB_ORG", "acme");

    let client = Arc::new(FakePlatformClient {
        repos: vec![RepositorySummary {
            platform_repository_id: 1,
            full_name: "acme/widgets".to_string(),
            default_branch: "main".to_string(),
            archived: false,
        }],
        files: Mutex::new(HashMap::new()),
    });
    seed_config_fetch(&client).await;
    client.files.lock().unwrap().insert(
        ("acme/widgets".to_string(), "AGENTS.md".to_string()),
        "# Agents".to_string(),
    );

    let config_loader = Arc::new(ConfigLoader::new());
    let orchestrator = ScanOrchestrator::new(pool.clone(), client.clone(), config_loader.clone());
    orchestrator.perform_scan().await.unwrap();
    assert_eq!(repositories::list_all(&pool).await.unwrap().len(), 1);

    // Second scan: the repository is gone from the platform.
    let empty_client = Arc::new(FakePlatformClient {
        repos: vec![],
        files: Mutex::new(HashMap::new()),
    });
    seed_config_fetch(&empty_client).await;
    config_loader.invalidate().await;
    let orchestrator = ScanOrchestrator::new(pool.clone(), empty_client, config_loader);
    orchestrator.perform_scan().await.unwrap();

    assert!(repositories::list_all(&pool).await.unwrap().is_empty());
}
