//! Home Assistant REST client.
//!
//! Thin blocking wrapper over the Supervisor-proxied core API. Loose response
//! dictionaries are converted to typed records once, at this boundary; the
//! rest of the pipeline never sees raw JSON.
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Default core API base URL when running as a Supervisor add-on.
pub const DEFAULT_HA_URL: &str = "http://supervisor/core";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One entity state, converted on ingress.
#[derive(Debug, Clone, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Value,
}

impl Entity {
    pub fn friendly_name(&self) -> Option<&str> {
        self.attributes.get("friendly_name").and_then(Value::as_str)
    }

    pub fn domain(&self) -> &str {
        self.entity_id
            .split_once('.')
            .map(|(domain, _)| domain)
            .unwrap_or("")
    }
}

/// States returned by a service call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ServiceCallResult {
    pub changed: Vec<Entity>,
}

#[derive(Debug, Deserialize)]
struct CheckConfigResponse {
    #[serde(default)]
    result: String,
    #[serde(default)]
    errors: Option<String>,
}

/// Blocking client for the Home Assistant core API.
#[derive(Debug, Clone)]
pub struct HaClient {
    base_url: String,
    token: String,
    agent: ureq::Agent,
}

impl HaClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        HaClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            agent,
        }
    }

    fn get(&self, endpoint: &str) -> Result<ureq::Response> {
        let url = format!("{}{endpoint}", self.base_url);
        self.agent
            .get(&url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Content-Type", "application/json")
            .call()
            .with_context(|| format!("GET {url}"))
    }

    fn post(&self, endpoint: &str, body: Value) -> Result<ureq::Response> {
        let url = format!("{}{endpoint}", self.base_url);
        self.agent
            .post(&url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Content-Type", "application/json")
            .send_json(body)
            .with_context(|| format!("POST {url}"))
    }

    /// All entity states, used to build request context.
    pub fn get_entities(&self) -> Result<Vec<Entity>> {
        self.get("/api/states")?
            .into_json()
            .context("decode entity states")
    }

    /// Call a service in a domain, e.g. `homeassistant.reload_all`.
    pub fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: Value,
    ) -> Result<ServiceCallResult> {
        self.post(&format!("/api/services/{domain}/{service}"), data)?
            .into_json()
            .context("decode service call result")
    }

    /// Ask core to check the current configuration; the post-apply
    /// validation hook. Returns false on an explicit invalid verdict.
    pub fn check_config(&self) -> Result<bool> {
        let response: CheckConfigResponse = self
            .post("/api/config/core/check_config", serde_json::json!({}))?
            .into_json()
            .context("decode config check result")?;
        if let Some(errors) = response.errors.as_deref().filter(|e| !e.is_empty()) {
            tracing::warn!(errors, "configuration check reported errors");
        }
        Ok(response.result == "valid")
    }

    /// Reload core configuration after an applied change.
    pub fn reload_core(&self) -> Result<()> {
        let result = self.call_service("homeassistant", "reload_all", serde_json::json!({}))?;
        tracing::debug!(changed = result.changed.len(), "core reload complete");
        Ok(())
    }
}
