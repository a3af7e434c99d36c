//! Supabase managed Postgres adapter
//!
//! Talks to the Supabase management API. Known quirks absorbed here:
//! - connection details sit under `database.*` on current API versions and
//!   under flat `db_host`-style keys on older ones
//! - the pooled connection runs through a regional pooler host with a
//!   different port and a project-qualified username, while migrations
//!   need the direct `db.<ref>.supabase.co` host; both forms are exposed
//! - the create call may or may not echo the password back; the one from
//!   the request is authoritative when the echo is empty

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

const DEFAULT_BASE_URL: &str = "https://api.supabase.com";
const DEFAULT_REGION: &str = "us-east-1";

/// Region preference order for failover
const REGION_CHAIN: &[&str] = &["us-east-1", "us-east-2", "us-west-1", "eu-central-1"];

/// Adapter for the Supabase management API
#[derive(Debug)]
pub struct SupabaseAdapter {
    client: reqwest::Client,
    access_token: String,
    organization_id: String,
    base_url: String,
}

impl SupabaseAdapter {
    /// Build from credentials config; requires `SUPABASE_ACCESS_TOKEN` and
    /// `SUPABASE_ORG_ID`
    ///
    /// # Errors
    /// [`RegistryError::MissingConfiguration`] naming the absent key.
    pub fn from_config(config: &HashMap<String, String>) -> Result<Self, RegistryError> {
        let access_token = require_config(config, "SUPABASE_ACCESS_TOKEN")?.to_string();
        let organization_id = require_config(config, "SUPABASE_ORG_ID")?.to_string();
        let base_url = config
            .get("SUPABASE_BASE_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Self {
            client: reqwest::Client::new(),
            access_token,
            organization_id,
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
            .bearer_auth(&self.access_token)
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
impl DatabaseProviderAdapter for SupabaseAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Supabase
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
        // Supabase project bring-up takes minutes, not seconds.
        ReadinessBackoff {
            initial: Duration::from_secs(5),
            multiplier: 2.0,
            cap: Duration::from_secs(30),
            timeout: Duration::from_secs(300),
        }
    }

    async fn list_resources(&self) -> Result<Vec<ExistingResource>, ProviderError> {
        let value = self
            .request(reqwest::Method::GET, "/v1/projects", None)
            .await?;
        parse_project_list(&value)
    }

    async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ProvisionedResource, ProviderError> {
        debug!(name = %request.name, region = %request.region, "creating supabase project");
        let body = json!({
            "name": request.name,
            "organization_id": self.organization_id,
            "db_pass": request.password,
            "region": request.region,
            "plan": request.tier,
        });
        let value = self
            .request(reqwest::Method::POST, "/v1/projects", Some(body))
            .await?;
        let mut resource = parse_created_project(&value, request)?;
        resource.estimated_monthly_cost = tier_cost(&request.tier);
        Ok(resource)
    }

    async fn delete(&self, id: &ResourceId) -> Result<(), ProviderError> {
        self.request(reqwest::Method::DELETE, &format!("/v1/projects/{id}"), None)
            .await?;
        Ok(())
    }

    async fn get_status(&self, id: &ResourceId) -> Result<ResourceStatus, ProviderError> {
        let value = self
            .request(reqwest::Method::GET, &format!("/v1/projects/{id}"), None)
            .await?;
        Ok(parse_status(&value))
    }
}

fn tier_cost(tier: &str) -> f64 {
    match tier.to_ascii_lowercase().as_str() {
        "pro" => 25.0,
        "team" => 599.0,
        _ => 0.0,
    }
}

fn parse_project_list(value: &Value) -> Result<Vec<ExistingResource>, ProviderError> {
    let projects = value
        .as_array()
        .ok_or_else(|| ProviderError::MissingField("projects array".into()))?;
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

fn parse_created_project(
    value: &Value,
    request: &ProvisionRequest,
) -> Result<ProvisionedResource, ProviderError> {
    let project_ref = pluck(value, &["/id", "/ref", "/project/id"])
        .ok_or_else(|| ProviderError::MissingField("project ref".into()))?;

    // Direct host: from the envelope when present, derivable otherwise.
    let direct_host = pluck(value, &["/database/host", "/db_host"])
        .map(str::to_string)
        .unwrap_or_else(|| format!("db.{project_ref}.supabase.co"));

    // Echoed password wins only when non-empty; the request's generated
    // password is the source of truth.
    let password = pluck(value, &["/database/password", "/db_pass"])
        .map(str::to_string)
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| request.password.clone());
    if password.is_empty() {
        return Err(ProviderError::MissingField(
            "database password (neither echoed nor supplied)".into(),
        ));
    }

    let database = pluck(value, &["/database/name", "/db_name"]).unwrap_or("postgres");

    let pooled_host = format!("aws-0-{}.pooler.supabase.com", request.region);
    let pooled_user = format!("postgres.{project_ref}");
    let connection_string = format!(
        "postgresql://{pooled_user}:{password}@{pooled_host}:6543/{database}?sslmode=require&pgbouncer=true"
    );
    let direct_url = format!(
        "postgresql://postgres:{password}@{direct_host}:5432/{database}?sslmode=require"
    );

    let credentials = DatabaseCredentials {
        provider: ProviderKind::Supabase,
        database_type: "postgresql".to_string(),
        host: pooled_host,
        port: 6543,
        username: pooled_user,
        password,
        database: database.to_string(),
        ssl_mode: "require".to_string(),
        connection_string,
        direct_url: Some(direct_url),
        additional_env_vars: HashMap::from([(
            "SUPABASE_PROJECT_REF".to_string(),
            project_ref.to_string(),
        )]),
    };

    Ok(ProvisionedResource {
        id: ResourceId(project_ref.to_string()),
        url: Some(format!("https://supabase.com/dashboard/project/{project_ref}")),
        region: request.region.clone(),
        credentials,
        estimated_monthly_cost: 0.0,
    })
}

fn parse_status(value: &Value) -> ResourceStatus {
    let status = pluck(value, &["/status", "/project/status"]);
    match status.map(str::to_ascii_uppercase).as_deref() {
        Some("ACTIVE_HEALTHY") => ResourceStatus::Ready,
        Some("COMING_UP" | "RESTORING" | "UPGRADING" | "PAUSING") | None => {
            ResourceStatus::Initializing
        }
        Some(other) => ResourceStatus::Failed {
            reason: other.to_string(),
        },
    }
}
