//! EC2 Query API client implementing [`ComputeProvider`].

use crate::config::VmConfig;
use crate::error::{VmError, VmResult};
use crate::provider::{ComputeProvider, InstanceState, StatusChecks};
use crate::sigv4::{self, SignableRequest};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// EC2 API version the response shapes below correspond to
pub const EC2_API_VERSION: &str = "2016-11-15";

const SERVICE: &str = "ec2";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

/// SigV4-signed client for the EC2 instance calls the orchestrator needs.
#[derive(Debug, Clone)]
pub struct Ec2Provider {
    client: Client,
    endpoint: Option<Url>,
}

impl Ec2Provider {
    /// Client for the regional public endpoints
    pub fn new() -> VmResult<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            endpoint: None,
        })
    }

    /// Client sending every call to `endpoint` regardless of region
    pub fn with_endpoint(endpoint: &str) -> VmResult<Self> {
        let mut provider = Self::new()?;
        provider.endpoint = Some(Url::parse(endpoint)?);
        Ok(provider)
    }

    fn endpoint_for(&self, region: &str) -> VmResult<Url> {
        match &self.endpoint {
            Some(endpoint) => Ok(endpoint.clone()),
            None => Ok(Url::parse(&format!("https://ec2.{}.amazonaws.com/", region))?),
        }
    }

    /// POST one Query API action for the configured instance
    async fn call<T: DeserializeOwned>(&self, config: &VmConfig, action: &str) -> VmResult<T> {
        let credentials = config
            .credentials
            .as_ref()
            .ok_or_else(|| VmError::missing_field("AccessKey"))?;
        let url = self.endpoint_for(&config.region)?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(VmError::Config(format!("EC2 endpoint has no host: {}", url)))
            }
        };

        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("Action", action)
            .append_pair("InstanceId.1", &config.instance_id)
            .append_pair("Version", EC2_API_VERSION)
            .finish();

        let timestamp = chrono::Utc::now();
        let amz_date = sigv4::amz_date(&timestamp);
        let headers = [
            ("content-type", FORM_CONTENT_TYPE),
            ("host", host.as_str()),
            ("x-amz-date", amz_date.as_str()),
        ];
        let authorization = sigv4::authorization(
            credentials,
            &config.region,
            SERVICE,
            &timestamp,
            &SignableRequest {
                method: "POST",
                path: url.path(),
                query: url.query().unwrap_or(""),
                headers: &headers,
                payload: body.as_bytes(),
            },
        );

        debug!(action = action, instance = %config.instance_id, "EC2 request");

        let response = self
            .client
            .post(url.clone())
            .header(header::CONTENT_TYPE, FORM_CONTENT_TYPE)
            .header("x-amz-date", amz_date)
            .header(header::AUTHORIZATION, authorization)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(VmError::from_response(status.as_u16(), &text));
        }

        quick_xml::de::from_str(&text)
            .map_err(|e| VmError::Decode(format!("{} response: {}", action, e)))
    }

    fn first_change(
        response: InstanceChangeResponse,
        config: &VmConfig,
    ) -> VmResult<InstanceState> {
        response
            .instances_set
            .items
            .into_iter()
            .next()
            .map(|change| InstanceState::from_name(&change.current_state.name))
            .ok_or_else(|| VmError::InstanceNotFound(config.instance_id.clone()))
    }
}

fn not_found_as_missing(error: VmError, config: &VmConfig) -> VmError {
    match &error {
        VmError::Api { code, .. } if code.starts_with("InvalidInstanceID") => {
            VmError::InstanceNotFound(config.instance_id.clone())
        }
        _ => error,
    }
}

#[async_trait]
impl ComputeProvider for Ec2Provider {
    async fn start_instance(&self, config: &VmConfig) -> VmResult<InstanceState> {
        let response: InstanceChangeResponse = self
            .call(config, "StartInstances")
            .await
            .map_err(|e| not_found_as_missing(e, config))?;
        Self::first_change(response, config)
    }

    async fn stop_instance(&self, config: &VmConfig) -> VmResult<InstanceState> {
        let response: InstanceChangeResponse = self
            .call(config, "StopInstances")
            .await
            .map_err(|e| not_found_as_missing(e, config))?;
        Self::first_change(response, config)
    }

    async fn describe_state(&self, config: &VmConfig) -> VmResult<InstanceState> {
        let response: DescribeInstancesResponse = self
            .call(config, "DescribeInstances")
            .await
            .map_err(|e| not_found_as_missing(e, config))?;

        response
            .reservation_set
            .items
            .into_iter()
            .flat_map(|reservation| reservation.instances_set.items)
            .next()
            .map(|instance| InstanceState::from_name(&instance.instance_state.name))
            .ok_or_else(|| VmError::InstanceNotFound(config.instance_id.clone()))
    }

    async fn describe_checks(&self, config: &VmConfig) -> VmResult<StatusChecks> {
        let response: DescribeInstanceStatusResponse =
            self.call(config, "DescribeInstanceStatus").await?;

        Ok(response
            .instance_status_set
            .items
            .into_iter()
            .next()
            .map(|status| StatusChecks {
                instance_ok: status.instance_status.status == "ok",
                system_ok: status.system_status.status == "ok",
            })
            .unwrap_or_default())
    }
}

/// `<xxxSet><item/>...</xxxSet>`
#[derive(Debug, Deserialize)]
struct ItemSet<T> {
    #[serde(rename = "item", default = "Vec::new")]
    items: Vec<T>,
}

impl<T> Default for ItemSet<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

#[derive(Debug, Default, Deserialize)]
struct StateName {
    #[serde(default)]
    name: String,
}

/// StartInstances / StopInstances
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceChangeResponse {
    #[serde(default)]
    instances_set: ItemSet<InstanceChange>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceChange {
    #[serde(default)]
    current_state: StateName,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeInstancesResponse {
    #[serde(default)]
    reservation_set: ItemSet<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Reservation {
    #[serde(default)]
    instances_set: ItemSet<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instance {
    #[serde(default)]
    instance_state: StateName,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeInstanceStatusResponse {
    #[serde(default)]
    instance_status_set: ItemSet<InstanceStatusItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceStatusItem {
    #[serde(default)]
    instance_status: StatusSummary,
    #[serde(default)]
    system_status: StatusSummary,
}

#[derive(Debug, Default, Deserialize)]
struct StatusSummary {
    #[serde(default)]
    status: String,
}
