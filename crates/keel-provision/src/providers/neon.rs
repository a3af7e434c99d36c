//! Neon serverless Postgres adapter
//!
//! Talks to the Neon console API. Known quirks absorbed here:
//! - the role password appears in `roles[0].password` on some API versions
//!   and in `connection_uris[0].connection_parameters.password` on others;
//!   whichever is non-empty wins, both empty is an error
//! - the pooled host is the direct host with a `-pooler` suffix on the
//!   endpoint label; both forms are exposed since schema migrations need
//!   the direct host

use crate::adapter::{
    DatabaseProviderAdapter, ExistingResource, ProviderError, ProvisionRequest,
    ProvisionedResource, ReadinessBackoff, ResourceStatus,
};
use crate::providers::pluck;
use crate::registry::{require_config, RegistryError};
use crate::types::{DatabaseCredentials, ProviderKind};
use async_trait::async_trait;
use keel_core::ResourceId;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://console.neon.tech/api/v2";
const DEFAULT_REGION: &str = "aws-us-east-2";

/// Region preference order for failover
const REGION_CHAIN: &[&str] = &[
    "aws-us-east-2",
    "aws-us-east-1",
    "aws-us-west-2",
    "aws-eu-central-1",
];

/// Adapter for the Neon console API
#[derive(Debug)]
pub struct NeonAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl NeonAdapter {
    /// Build from credentials config; requires `NEON_API_KEY`
    ///
    /// # Errors
    /// [`RegistryError::MissingConfiguration`] naming the absent key.
    pub fn from_config(config: &HashMap<String, String>) -> Result<Self, RegistryError> {
        let api_key = require_config(config, "NEON_API_KEY")?.to_string();
        let base_url = config
            .get("NEON_BASE_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
        })
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        let mut req = self
            .client
            .request(method, &url)
            .bearer_auth(&self.api_key)
            .header("accept", "application/json");
        if let Some(body) = body {
            req = req.json(&body);
        }
        let response = req.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::Api(format!("{status}: {text}")));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| ProviderError::Api(format!("unparseable response: {e}")))
    }
}

#[async_trait]
impl DatabaseProviderAdapter for NeonAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Neon
    }

    fn default_region(&self) -> &str {
        DEFAULT_REGION
    }

    fn failover_regions(&self, primary: &str) -> Vec<String> {
        REGION_CHAIN
            .iter()
            .filter(|r| !r.eq_ignore_ascii_case(primary))
            .map(|r| (*r).to_string())
            .collect()
    }

    fn readiness_backoff(&self) -> ReadinessBackoff {
        // Neon usually finishes within seconds.
        ReadinessBackoff {
            initial: Duration::from_secs(2),
            multiplier: 1.5,
            cap: Duration::from_secs(10),
            timeout: Duration::from_secs(120),
        }
    }

    async fn list_resources(&self) -> Result<Vec<ExistingResource>, ProviderError> {
        let value = self
            .request(reqwest::Method::GET, "/projects", None)
            .await?;
        parse_project_list(&value)
    }

    async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ProvisionedResource, ProviderError> {
        debug!(name = %request.name, region = %request.region, "creating neon project");
        let body = json!({
            "project": {
                "name": request.name,
                "region_id": request.region,
                "pg_version": 16,
            }
        });
        let value = self
            .request(reqwest::Method::POST, "/projects", Some(body))
            .await?;
        let mut resource = parse_created_project(&value, &request.region)?;
        resource.estimated_monthly_cost = tier_cost(&request.tier);
        Ok(resource)
    }

    async fn delete(&self, id: &ResourceId) -> Result<(), ProviderError> {
        self.request(reqwest::Method::DELETE, &format!("/projects/{id}"), None)
            .await?;
        Ok(())
    }

    async fn get_status(&self, id: &ResourceId) -> Result<ResourceStatus, ProviderError> {
        let value = self
            .request(reqwest::Method::GET, &format!("/projects/{id}"), None)
            .await?;
        Ok(parse_status(&value))
    }
}

fn tier_cost(tier: &str) -> f64 {
    match tier.to_ascii_lowercase().as_str() {
        "launch" => 19.0,
        "scale" => 69.0,
        _ => 0.0,
    }
}

fn parse_project_list(value: &Value) -> Result<Vec<ExistingResource>, ProviderError> {
    let projects = value
        .pointer("/projects")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::MissingField("projects".into()))?;
    Ok(projects
        .iter()
        .filter_map(|p| {
            let id = p.get("id")?.as_str()?;
            let name = p.get("name")?.as_str()?;
            Some(ExistingResource {
                id: ResourceId(id.to_string()),
                name: name.to_string(),
            })
        })
        .collect())
}

/// Insert the `-pooler` suffix into the endpoint label of a direct host
fn pooler_host(direct: &str) -> String {
    match direct.split_once('.') {
        Some((label, rest)) => format!("{label}-pooler.{rest}"),
        None => direct.to_string(),
    }
}

fn parse_created_project(
    value: &Value,
    region: &str,
) -> Result<ProvisionedResource, ProviderError> {
    let id = pluck(value, &["/project/id", "/id"])
        .ok_or_else(|| ProviderError::MissingField("project.id".into()))?;

    let host = pluck(
        value,
        &[
            "/connection_uris/0/connection_parameters/host",
            "/connection_parameters/host",
        ],
    )
    .ok_or_else(|| ProviderError::MissingField("connection_parameters.host".into()))?;

    let username = pluck(
        value,
        &[
            "/roles/0/name",
            "/connection_uris/0/connection_parameters/role",
        ],
    )
    .ok_or_else(|| ProviderError::MissingField("roles[0].name".into()))?;

    // Password moved between envelope locations across API versions.
    let password = pluck(
        value,
        &[
            "/roles/0/password",
            "/connection_uris/0/connection_parameters/password",
        ],
    )
    .ok_or_else(|| ProviderError::MissingField("role password (checked both envelope locations)".into()))?;

    let database = pluck(
        value,
        &[
            "/databases/0/name",
            "/connection_uris/0/connection_parameters/database",
        ],
    )
    .unwrap_or("neondb");

    let pooled = pooler_host(host);
    let connection_string = format!(
        "postgresql://{username}:{password}@{pooled}:5432/{database}?sslmode=require"
    );
    let direct_url = format!(
        "postgresql://{username}:{password}@{host}:5432/{database}?sslmode=require"
    );

    let credentials = DatabaseCredentials {
        provider: ProviderKind::Neon,
        database_type: "postgresql".to_string(),
        host: pooled,
        port: 5432,
        username: username.to_string(),
        password: password.to_string(),
        database: database.to_string(),
        ssl_mode: "require".to_string(),
        connection_string,
        direct_url: Some(direct_url),
        additional_env_vars: HashMap::from([(
            "NEON_PROJECT_ID".to_string(),
            id.to_string(),
        )]),
    };

    Ok(ProvisionedResource {
        id: ResourceId(id.to_string()),
        url: Some(format!("https://console.neon.tech/app/projects/{id}")),
        region: region.to_string(),
        credentials,
        estimated_monthly_cost: 0.0,
    })
}

fn parse_status(value: &Value) -> ResourceStatus {
    let state = pluck(value, &["/project/state", "/project/status", "/state"]);
    match state.map(str::to_ascii_lowercase).as_deref() {
        Some("active" | "ready" | "idle") => ResourceStatus::Ready,
        Some("init" | "provisioning" | "creating") | None => ResourceStatus::Initializing,
        Some(other) => ResourceStatus::Failed {
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn created_envelope_v2() -> Value {
        json!({
            "project": { "id": "winter-sun-123456" },
            "roles": [{ "name": "app_owner", "password": "generated-pw" }],
            "databases": [{ "name": "neondb" }],
            "connection_uris": [{
                "connection_parameters": {
                    "host": "ep-calm-wind-a1b2c3.us-east-2.aws.neon.tech",
                    "role": "app_owner",
                    "password": "",
                    "database": "neondb"
                }
            }]
        })
    }

    #[test]
    fn picks_non_empty_password_field() {
        let resource = parse_created_project(&created_envelope_v2(), "aws-us-east-2").unwrap();
        assert_eq!(resource.credentials.password, "generated-pw");
    }

    #[test]
    fn falls_back_to_connection_parameters_password() {
        let mut envelope = created_envelope_v2();
        envelope["roles"][0]["password"] = json!("");
        envelope["connection_uris"][0]["connection_parameters"]["password"] = json!("nested-pw");
        let resource = parse_created_project(&envelope, "aws-us-east-2").unwrap();
        assert_eq!(resource.credentials.password, "nested-pw");
    }

    #[test]
    fn both_passwords_empty_is_an_error() {
        let mut envelope = created_envelope_v2();
        envelope["roles"][0]["password"] = json!("");
        let err = parse_created_project(&envelope, "aws-us-east-2").unwrap_err();
        assert!(err.to_string().contains("password"));
    }

    #[test]
    fn pooled_and_direct_hosts_both_exposed() {
        let resource = parse_created_project(&created_envelope_v2(), "aws-us-east-2").unwrap();
        assert_eq!(
            resource.credentials.host,
            "ep-calm-wind-a1b2c3-pooler.us-east-2.aws.neon.tech"
        );
        let direct = resource.credentials.direct_url.unwrap();
        assert!(direct.contains("ep-calm-wind-a1b2c3.us-east-2.aws.neon.tech"));
        assert!(!direct.contains("-pooler"));
    }

    #[test]
    fn project_list_parses_ids_and_names() {
        let value = json!({ "projects": [
            { "id": "p1", "name": "acme-app" },
            { "id": "p2", "name": "other" }
        ]});
        let list = parse_project_list(&value).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "acme-app");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            parse_status(&json!({ "project": { "state": "active" } })),
            ResourceStatus::Ready
        );
        assert_eq!(
            parse_status(&json!({ "project": { "state": "provisioning" } })),
            ResourceStatus::Initializing
        );
        assert!(matches!(
            parse_status(&json!({ "project": { "state": "errored" } })),
            ResourceStatus::Failed { .. }
        ));
    }

    #[test]
    fn failover_excludes_primary() {
        let adapter = NeonAdapter::from_config(&HashMap::from([(
            "NEON_API_KEY".to_string(),
            "k".to_string(),
        )]))
        .unwrap();
        let regions = adapter.failover_regions("aws-us-east-2");
        assert!(!regions.iter().any(|r| r == "aws-us-east-2"));
        assert_eq!(regions[0], "aws-us-east-1");
    }

    #[test]
    fn missing_api_key_is_reported() {
        let err = NeonAdapter::from_config(&HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("NEON_API_KEY"));
    }
}
