//! Self-hosted CI runner registry client.

use crate::config::RunnerPollPolicy;
use crate::error::{VmError, VmResult};
use reqwest::{header, Client};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";

/// Result of looking a runner up in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerCheck {
    Online,
    /// Registered with a status other than `online`
    Offline(String),
    NotRegistered,
    /// 401: the token was rejected
    Unauthorized,
    /// 404: the repository does not exist or is not visible to the token
    RepositoryNotFound,
    /// Network failure or unexpected status; the next poll may succeed
    Transient(String),
}

impl RunnerCheck {
    pub fn is_online(&self) -> bool {
        matches!(self, RunnerCheck::Online)
    }

    /// Retrying cannot change the answer
    pub fn is_hard_stop(&self) -> bool {
        matches!(
            self,
            RunnerCheck::Unauthorized | RunnerCheck::RepositoryNotFound
        )
    }
}

impl std::fmt::Display for RunnerCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerCheck::Online => f.write_str("online"),
            RunnerCheck::Offline(status) => write!(f, "registered, status {}", status),
            RunnerCheck::NotRegistered => f.write_str("not registered"),
            RunnerCheck::Unauthorized => f.write_str("authentication failed"),
            RunnerCheck::RepositoryNotFound => f.write_str("repository not found"),
            RunnerCheck::Transient(reason) => write!(f, "unavailable ({})", reason),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RunnerList {
    #[serde(default)]
    runners: Vec<Runner>,
}

#[derive(Debug, Deserialize)]
struct Runner {
    name: String,
    #[serde(default)]
    status: String,
}

/// Lists the self-hosted runners of a repository.
#[derive(Clone)]
pub struct RunnerRegistry {
    client: Client,
    api_base: Url,
}

impl std::fmt::Debug for RunnerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerRegistry")
            .field("api_base", &self.api_base.as_str())
            .field("token", &"<redacted>")
            .finish()
    }
}

impl RunnerRegistry {
    pub fn new(token: &str) -> VmResult<Self> {
        Self::with_api_base(DEFAULT_GITHUB_API, token)
    }

    pub fn with_api_base(api_base: &str, token: &str) -> VmResult<Self> {
        let mut headers = header::HeaderMap::new();

        let mut authorization = header::HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| VmError::Config("Invalid CI token format".to_string()))?;
        authorization.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, authorization);
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            header::HeaderName::from_static("x-github-api-version"),
            header::HeaderValue::from_static("2022-11-28"),
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("dagwatch/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;

        let api_base = if api_base.ends_with('/') {
            Url::parse(api_base)?
        } else {
            Url::parse(&format!("{}/", api_base))?
        };

        Ok(Self { client, api_base })
    }

    /// One lookup of `runner_name` in `owner/repo`
    pub async fn check_runner(&self, owner: &str, repo: &str, runner_name: &str) -> RunnerCheck {
        let url = match self
            .api_base
            .join(&format!("repos/{}/{}/actions/runners", owner, repo))
        {
            Ok(url) => url,
            Err(e) => return RunnerCheck::Transient(format!("invalid runner URL: {}", e)),
        };
        debug!(url = %url, "Listing runners");

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return RunnerCheck::Transient(e.to_string()),
        };

        match response.status().as_u16() {
            200 => {
                let list: RunnerList = match response.json().await {
                    Ok(list) => list,
                    Err(e) => return RunnerCheck::Transient(format!("invalid runner list: {}", e)),
                };
                match list.runners.into_iter().find(|r| r.name == runner_name) {
                    Some(runner) if runner.status == "online" => RunnerCheck::Online,
                    Some(runner) => RunnerCheck::Offline(runner.status),
                    None => RunnerCheck::NotRegistered,
                }
            }
            401 => RunnerCheck::Unauthorized,
            404 => RunnerCheck::RepositoryNotFound,
            status => RunnerCheck::Transient(format!("GitHub API returned status {}", status)),
        }
    }

    /// Poll until the runner is online, a hard stop is hit or the ceiling passes
    pub async fn wait_for_runner(
        &self,
        owner: &str,
        repo: &str,
        runner_name: &str,
        policy: &RunnerPollPolicy,
    ) -> RunnerCheck {
        info!("Polling runner registry for runner: {}", runner_name);
        let started = Instant::now();
        let mut last = RunnerCheck::Transient("no lookup completed".to_string());

        while started.elapsed() < policy.ceiling {
            last = self.check_runner(owner, repo, runner_name).await;
            match &last {
                RunnerCheck::Online => {
                    info!(
                        "Runner {} verified online after {} seconds",
                        runner_name,
                        started.elapsed().as_secs()
                    );
                    return last;
                }
                RunnerCheck::Unauthorized => {
                    warn!("Runner registry authentication failed, check the CI token");
                    return last;
                }
                RunnerCheck::RepositoryNotFound => {
                    warn!("Repository {}/{} not found", owner, repo);
                    return last;
                }
                RunnerCheck::Offline(status) => {
                    debug!("Runner {} status is '{}', waiting", runner_name, status)
                }
                RunnerCheck::NotRegistered => {
                    warn!("Runner {} not found in runners list", runner_name)
                }
                RunnerCheck::Transient(reason) => warn!("Runner lookup failed: {}", reason),
            }

            tokio::time::sleep(policy.interval).await;
        }

        warn!(
            "Runner verification timeout after {} seconds",
            started.elapsed().as_secs()
        );
        last
    }
}
