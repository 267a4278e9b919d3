/// Shared helpers for integration tests: clients and configs pointed at a
/// local mock API server.
use std::time::Duration;

use repovault::api::BitbucketClient;
use repovault::config::AccountConfig;
use repovault::models::AccountKind;
use repovault::retry::RetryPolicy;
use repovault::Config;
use serde_json::{json, Value};

pub fn account() -> AccountConfig {
    AccountConfig {
        email: "backup-bot@example.com".to_string(),
        api_token: "test-token".to_string(),
        workspaces: vec![],
    }
}

/// Client with fast retries so transient-failure tests stay quick.
pub fn client(base_url: &str) -> BitbucketClient {
    client_for(base_url, AccountKind::Source)
}

pub fn client_for(base_url: &str, kind: AccountKind) -> BitbucketClient {
    BitbucketClient::new(
        &account(),
        base_url,
        Duration::from_secs(5),
        RetryPolicy::new(3, Duration::from_millis(1)),
        kind,
    )
    .expect("client construction")
}

/// A full config pointed at the mock server, with a temp backup dir.
pub fn config(base_url: &str, backup_dir: &str) -> Config {
    let yaml = format!(
        r#"
backup_dir: {}
api_base_url: {}
source:
  email: backup-bot@example.com
  api_token: test-token
  workspaces: [acme]
performance:
  retry_max_attempts: 2
  retry_base_delay_ms: 1
"#,
        backup_dir, base_url
    );
    serde_yaml::from_str(&yaml).expect("test config")
}

/// One page of a Bitbucket-style paginated listing.
pub fn page(values: Vec<Value>, next: Option<String>) -> Value {
    match next {
        Some(next) => json!({ "values": values, "next": next }),
        None => json!({ "values": values }),
    }
}

/// Minimal repository payload as the API would return it.
pub fn repo_json(workspace: &str, slug: &str) -> Value {
    json!({
        "full_name": format!("{}/{}", workspace, slug),
        "slug": slug,
        "name": slug,
        "is_private": true,
        "has_wiki": false,
        "has_issues": true,
        "links": {
            "clone": [
                { "name": "https", "href": format!("https://bitbucket.org/{}/{}.git", workspace, slug) }
            ]
        }
    })
}
