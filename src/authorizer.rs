//! Authorizes a platform user against the org team named in configuration (C9, spec §4.9).

use std::sync::Arc;

use crate::config;
use crate::config_loader::ConfigLoader;
use crate::platform::PlatformClient;

pub struct Authorizer {
    client: Arc<dyn PlatformClient>,
    config_loader: Arc<ConfigLoader>,
}

impl Authorizer {
    pub fn new(client: Arc<dyn PlatformClient>, config_loader: Arc<ConfigLoader>) -> Self {
        Self {
            client,
            config_loader,
        }
    }

    /// Returns true iff `username` belongs to the team named by the loaded
    /// configuration's `access_control.authorized_team`. In test mode every
    /// user is authorized, matching the teacher's `TEST_MODE_ENABLED` escape
    /// hatch for local iteration without a real platform account.
    pub async fn is_authorized(&self, username: &str, user_access_token: &str) -> bool {
        if *config::TEST_MODE_ENABLED {
            return true;
        }

        let app_config = match self.config_loader.load(self.client.as_ref()).await {
            Ok(c) => c,
            Err(err) => {
                tracing::warn!(username, error = ?err, "authorization check failed to load configuration");
                return false;
            }
        };

        let authorized_team = &app_config.access_control.authorized_team;
        let Some((org, slug)) = authorized_team.split_once('/') else {
            tracing::warn!(
                username,
                %authorized_team,
                "access_control.authorized_team is not in \"<org>/<slug>\" form"
            );
            return false;
        };

        self.client
            .check_team_membership(org, slug, username, user_access_token)
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(username, error = ?err, "authorization check failed against platform");
                false
            })
    }
}
