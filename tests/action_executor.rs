use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use repo_policy_engine::action_executor::ActionExecutor;
use repo_policy_engine::config_loader::ConfigLoader;
use repo_policy_engine::db::{action_logs, policies, repositories, scans, violations};
use repo_policy_engine::platform::{
    Comment, FileContent, Issue, PlatformClient, PlatformError, RepositorySummary, StatusState,
    WorkflowPermissions,
};
use sqlx::PgPool;

#[derive(Default)]
struct RecordedCalls {
    created_issues: Vec<(String, String)>,
    archived: Vec<String>,
}

/// Records every write-side call it receives; `existing_issue_titles` lets a
/// test simulate an issue that's already open so dedup can be exercised.
struct FakePlatformClient {
    existing_issue_titles: Vec<String>,
    calls: Mutex<RecordedCalls>,
}

impl FakePlatformClient {
    fn new(existing_issue_titles: Vec<String>) -> Self {
        Self {
            existing_issue_titles,
            calls: Mutex::new(RecordedCalls::default()),
        }
    }
}

#[async_trait]
impl PlatformClient for FakePlatformClient {
    async fn list_organization_repositories(&self) -> Result<Vec<RepositorySummary>, PlatformError> {
        unimplemented!("not exercised by action processing")
    }

    async fn get_repository(&self, _platform_repository_id: i64) -> Result<RepositorySummary, PlatformError> {
        unimplemented!("not exercised by action processing")
    }

    async fn get_file_content(
        &self,
        repo_full_name: &str,
        path: &str,
    ) -> Result<Option<FileContent>, PlatformError> {
        if repo_full_name == "acme/.github" && path == "config.yaml" {
            let text = config_yaml();
            return Ok(Some(FileContent {
                bytes: text.as_bytes().to_vec(),
                text: Some(text),
            }));
        }
        Ok(None)
    }

    async fn get_workflow_permissions(
        &self,
        _repo_full_name: &str,
    ) -> Result<Option<WorkflowPermissions>, PlatformError> {
        unimplemented!("not exercised by action processing")
    }

    async fn create_issue(
        &self,
        repo_full_name: &str,
        title: &str,
        _body: &str,
        _labels: &[String],
    ) -> Result<Issue, PlatformError> {
        self.calls
            .lock()
            .unwrap()
            .created_issues
            .push((repo_full_name.to_string(), title.to_string()));
        Ok(Issue {
            number: 1,
            title: title.to_string(),
            html_url: "https://example.invalid/issues/1".to_string(),
            state: "open".to_string(),
            labels: vec![],
        })
    }

    async fn list_open_issues_with_label(
        &self,
        _repo_full_name: &str,
        label: &str,
    ) -> Result<Vec<Issue>, PlatformError> {
        Ok(self
            .existing_issue_titles
            .iter()
            .map(|title| Issue {
                number: 1,
                title: title.clone(),
                html_url: "https://example.invalid/issues/1".to_string(),
                state: "open".to_string(),
                labels: vec![label.to_string()],
            })
            .collect())
    }

    async fn archive_repository(&self, repo_full_name: &str) -> Result<(), PlatformError> {
        self.calls.lock().unwrap().archived.push(repo_full_name.to_string());
        Ok(())
    }

    async fn comment_on_pull_request(
        &self,
        _repo_full_name: &str,
        _pr_number: i64,
        _body: &str,
    ) -> Result<Comment, PlatformError> {
        unimplemented!("not exercised by action processing")
    }

    async fn list_pull_request_comments(
        &self,
        _repo_full_name: &str,
        _pr_number: i64,
    ) -> Result<Vec<Comment>, PlatformError> {
        unimplemented!("not exercised by action processing")
    }

    async fn set_status_check(
        &self,
        _repo_full_name: &str,
        _head_sha: &str,
        _context: &str,
        _state: StatusState,
        _description: &str,
    ) -> Result<(), PlatformError> {
        unimplemented!("not exercised by action processing")
    }

    async fn check_team_membership(
        &self,
        _org: &str,
        _team_slug: &str,
        _username: &str,
        _user_access_token: &str,
    ) -> Result<bool, PlatformError> {
        unimplemented!("not exercised by action processing")
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

async fn seed_violation(pool: &PgPool, action: &[&str]) -> (i64, i64, i64) {
    let scan = scans::start(pool).await.unwrap();
    let repo = repositories::upsert(pool, 1, "acme/widgets").await.unwrap();
    let action: Vec<String> = action.iter().map(|s| s.to_string()).collect();
    let policy = policies::upsert(pool, "has_agents_md", "Require AGENTS.md", &action)
        .await
        .unwrap();
    violations::insert(pool, scan.id, repo.id, policy.id).await.unwrap();
    (scan.id, repo.id, policy.id)
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn creates_an_issue_for_a_create_issue_policy(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    std::env::set_var("GITHUB_ORG", "acme");
    let (scan_id, repo_id, _policy_id) = seed_violation(&pool, &["create-issue"]).await;

    let client = Arc::new(FakePlatformClient::new(vec![]));
    let config_loader = Arc::new(ConfigLoader::new());
    let executor = ActionExecutor::new(pool.clone(), client.clone(), config_loader);
    executor.process_actions_for_scan(scan_id).await.unwrap();

    assert_eq!(client.calls.lock().unwrap().created_issues.len(), 1);
    let logs = action_logs::list_for_repository(&pool, repo_id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, action_logs::ActionLogStatus::Success);
    assert_eq!(logs[0].action_type, "create-issue");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn skips_creating_a_duplicate_issue_when_one_is_already_open(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    std::env::set_var("GITHUB_ORG", "acme");
    let (scan_id, repo_id, _policy_id) = seed_violation(&pool, &["create-issue"]).await;

    let client = Arc::new(FakePlatformClient::new(vec![
        "Compliance Violation: has_agents_md".to_string(),
    ]));
    let config_loader = Arc::new(ConfigLoader::new());
    let executor = ActionExecutor::new(pool.clone(), client.clone(), config_loader);
    executor.process_actions_for_scan(scan_id).await.unwrap();

    assert!(client.calls.lock().unwrap().created_issues.is_empty());
    let logs = action_logs::list_for_repository(&pool, repo_id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, action_logs::ActionLogStatus::Skipped);
    assert_eq!(logs[0].details.as_deref(), Some("https://example.invalid/issues/1"));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn archives_the_repository_for_an_archive_repo_policy(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    std::env::set_var("GITHUB_ORG", "acme");
    let (scan_id, _repo_id, _policy_id) = seed_violation(&pool, &["archive-repo"]).await;

    let client = Arc::new(FakePlatformClient::new(vec![]));
    let config_loader = Arc::new(ConfigLoader::new());
    let executor = ActionExecutor::new(pool.clone(), client.clone(), config_loader);
    executor.process_actions_for_scan(scan_id).await.unwrap();

    assert_eq!(client.calls.lock().unwrap().archived, vec!["acme/widgets".to_string()]);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn unrecognized_action_tags_are_skipped_without_logging(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    std::env::set_var("GITHUB_ORG", "acme");
    let (scan_id, repo_id, _policy_id) = seed_violation(&pool, &["mystery-action"]).await;

    let client = Arc::new(FakePlatformClient::new(vec![]));
    let config_loader = Arc::new(ConfigLoader::new());
    let executor = ActionExecutor::new(pool.clone(), client.clone(), config_loader);
    executor.process_actions_for_scan(scan_id).await.unwrap();

    assert!(action_logs::list_for_repository(&pool, repo_id).await.unwrap().is_empty());
}
