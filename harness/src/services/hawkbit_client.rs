//! hawkBit management API client
//!
//! Thin reqwest wrapper over the `/rest/v1` management endpoints the harness
//! needs. Non-success responses become `HarnessError::Backend`, except for
//! cancelling an action that already reached a terminal state, which becomes
//! `EntityConflict` so teardown can tell it apart from real failures.

use async_trait::async_trait;
use reqwest::{Response, StatusCode, multipart};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

use shared::{
    ActionHandle, ActionStatus, ArtifactHandle, BackendAddr, DistSetHandle, ModuleHandle,
    TargetHandle,
};

use crate::error::{HarnessError, HarnessResult};
use crate::traits::HawkbitBackend;

const DEFAULT_USER: &str = "admin";
const DEFAULT_PASSWORD: &str = "admin";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Error codes the backend uses for "this action can no longer be canceled"
const TERMINAL_ACTION_CODES: [&str; 2] = [
    "hawkbit.server.error.action.notcancelable",
    "hawkbit.server.error.repo.entitiyAlreadyClosed",
];

#[derive(Deserialize, Debug)]
struct CreatedEntity {
    id: u64,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct CreatedTarget {
    controller_id: String,
    security_token: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct AssignmentResult {
    assigned_actions: Vec<CreatedEntity>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ActionBody {
    status: String,
    detail_status: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error_code: Option<String>,
    message: Option<String>,
}

/// REST client for one hawkBit instance
#[derive(Clone)]
pub struct HawkbitMgmtClient {
    addr: BackendAddr,
    base_url: String,
    user: String,
    password: String,
    client: reqwest::Client,
}

impl HawkbitMgmtClient {
    /// Create a client using the default management credentials
    pub fn new(addr: BackendAddr) -> HarnessResult<Self> {
        Self::with_credentials(addr, DEFAULT_USER, DEFAULT_PASSWORD)
    }

    pub fn with_credentials(addr: BackendAddr, user: &str, password: &str) -> HarnessResult<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: format!("{}/rest/v1", addr.base_url()),
            addr,
            user: user.to_string(),
            password: password.to_string(),
            client,
        })
    }

    pub fn addr(&self) -> &BackendAddr {
        &self.addr
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .basic_auth(&self.user, Some(&self.password))
    }

    async fn delete(&self, operation: &str, path: &str) -> HarnessResult<()> {
        let response = self.request(reqwest::Method::DELETE, path).send().await?;
        check(operation, response).await?;
        Ok(())
    }

    async fn post_json(&self, operation: &str, path: &str, body: &Value) -> HarnessResult<Response> {
        let response = self
            .request(reqwest::Method::POST, path)
            .json(body)
            .send()
            .await?;
        check(operation, response).await
    }
}

/// Pass through successful responses, turn everything else into `Backend`
async fn check(operation: &str, response: Response) -> HarnessResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let (status, body) = error_details(response).await;
    Err(HarnessError::Backend {
        operation: operation.to_string(),
        status: status.as_u16(),
        message: body.message.or(body.error_code).unwrap_or_default(),
    })
}

async fn error_details(response: Response) -> (StatusCode, ErrorBody) {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<ErrorBody>(&text).unwrap_or_else(|_| ErrorBody {
        error_code: None,
        message: (!text.is_empty()).then_some(text),
    });
    (status, body)
}

/// The backend says the action is already closed. Judged by error code
/// only: a bare 409 can just as well be a concurrent modification.
fn is_terminal_action_conflict(body: &ErrorBody) -> bool {
    body.error_code
        .as_deref()
        .is_some_and(|code| TERMINAL_ACTION_CODES.contains(&code))
}

#[async_trait]
impl HawkbitBackend for HawkbitMgmtClient {
    async fn set_config(&self, key: &str, value: Value) -> HarnessResult<()> {
        debug!("⚙️ Setting backend config {} = {}", key, value);
        let response = self
            .request(reqwest::Method::PUT, &format!("system/configs/{key}"))
            .json(&json!({ "value": value }))
            .send()
            .await?;
        check("set_config", response).await?;
        Ok(())
    }

    async fn add_target(&self, name: &str) -> HarnessResult<TargetHandle> {
        let body = json!([{
            "controllerId": name,
            "name": name,
            "description": format!("created {}", chrono::Utc::now().to_rfc3339()),
        }]);
        let created: Vec<CreatedTarget> = self.post_json("add_target", "targets", &body).await?.json().await?;
        let target = created.into_iter().next().ok_or_else(|| HarnessError::Backend {
            operation: "add_target".to_string(),
            status: 200,
            message: "empty response".to_string(),
        })?;
        info!("🎯 Created target '{}'", target.controller_id);
        Ok(TargetHandle {
            name: target.controller_id,
            security_token: target.security_token,
        })
    }

    async fn delete_target(&self, name: &str) -> HarnessResult<()> {
        self.delete("delete_target", &format!("targets/{name}")).await
    }

    async fn add_software_module(&self, name: &str, version: &str) -> HarnessResult<ModuleHandle> {
        let body = json!([{ "name": name, "version": version, "type": "os" }]);
        let created: Vec<CreatedEntity> = self
            .post_json("add_software_module", "softwaremodules", &body)
            .await?
            .json()
            .await?;
        first_id("add_software_module", created).map(ModuleHandle)
    }

    async fn delete_software_module(&self, module: ModuleHandle) -> HarnessResult<()> {
        self.delete("delete_software_module", &format!("softwaremodules/{}", module.0))
            .await
    }

    async fn add_artifact(
        &self,
        module: ModuleHandle,
        file_name: &str,
        content: Vec<u8>,
    ) -> HarnessResult<ArtifactHandle> {
        let part = multipart::Part::bytes(content).file_name(file_name.to_string());
        let form = multipart::Form::new().part("file", part);
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("softwaremodules/{}/artifacts", module.0),
            )
            .multipart(form)
            .send()
            .await?;
        let created: CreatedEntity = check("add_artifact", response).await?.json().await?;
        Ok(ArtifactHandle { id: created.id, module })
    }

    async fn delete_artifact(&self, artifact: ArtifactHandle) -> HarnessResult<()> {
        self.delete(
            "delete_artifact",
            &format!("softwaremodules/{}/artifacts/{}", artifact.module.0, artifact.id),
        )
        .await
    }

    async fn add_distribution_set(
        &self,
        name: &str,
        version: &str,
        module: ModuleHandle,
    ) -> HarnessResult<DistSetHandle> {
        let body = json!([{
            "name": name,
            "version": version,
            "type": "os",
            "modules": [{ "id": module.0 }],
        }]);
        let created: Vec<CreatedEntity> = self
            .post_json("add_distribution_set", "distributionsets", &body)
            .await?
            .json()
            .await?;
        first_id("add_distribution_set", created).map(DistSetHandle)
    }

    async fn delete_distribution_set(&self, dist: DistSetHandle) -> HarnessResult<()> {
        self.delete("delete_distribution_set", &format!("distributionsets/{}", dist.0))
            .await
    }

    async fn assign_target(&self, dist: DistSetHandle, target: &str) -> HarnessResult<ActionHandle> {
        let body = json!([{ "id": target }]);
        let result: AssignmentResult = self
            .post_json(
                "assign_target",
                &format!("distributionsets/{}/assignedTargets", dist.0),
                &body,
            )
            .await?
            .json()
            .await?;
        let id = first_id("assign_target", result.assigned_actions)?;
        Ok(ActionHandle {
            id,
            target: target.to_string(),
            distribution_set: dist,
        })
    }

    async fn cancel_action(&self, action: &ActionHandle, force: bool) -> HarnessResult<()> {
        let path = format!("targets/{}/actions/{}", action.target, action.id);
        let mut attempts = vec![path.clone()];
        if force {
            attempts.push(format!("{path}?force=true"));
        }

        for attempt in attempts {
            let response = self.request(reqwest::Method::DELETE, &attempt).send().await?;
            if response.status().is_success() {
                continue;
            }
            let (status, body) = error_details(response).await;
            let message = body.message.clone().or(body.error_code.clone()).unwrap_or_default();
            if is_terminal_action_conflict(&body) {
                return Err(HarnessError::EntityConflict {
                    entity: action.to_string(),
                    message,
                });
            }
            return Err(HarnessError::Backend {
                operation: "cancel_action".to_string(),
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    async fn action_status(&self, action: &ActionHandle) -> HarnessResult<ActionStatus> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("targets/{}/actions/{}", action.target, action.id),
            )
            .send()
            .await?;
        let body: ActionBody = check("action_status", response).await?.json().await?;
        Ok(ActionStatus::from_backend(
            body.detail_status.as_deref().unwrap_or(&body.status),
        ))
    }
}

fn first_id(operation: &str, created: Vec<CreatedEntity>) -> HarnessResult<u64> {
    created
        .into_iter()
        .next()
        .map(|entity| entity.id)
        .ok_or_else(|| HarnessError::Backend {
            operation: operation.to_string(),
            status: 200,
            message: "empty response".to_string(),
        })
}
