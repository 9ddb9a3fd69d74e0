//! Device API client.
//!
//! Async HTTP client using `reqwest` with Bearer token authentication.

use std::time::Duration;

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use pawlink_protocol::{Device, Hub};

use crate::error::ApiError;
use crate::types::{ApiResponse, CreateDevice, PetLink, RenameDevice};
use crate::{ApiFuture, DeviceApi};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// REST client for hubs and devices.
pub struct HttpDeviceApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpDeviceApi {
    /// Creates a client for `base_url` authenticating with `token`.
    pub fn new(base_url: &str, token: &str) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
            ApiError::Terminal {
                status: 401,
                message: "invalid access token".into(),
            }
        })?;
        headers.insert(AUTHORIZATION, bearer);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn device_url(&self, address: &str, suffix: &str) -> String {
        let encoded = utf8_percent_encode(address, NON_ALPHANUMERIC);
        format!("{}/device/{encoded}{suffix}", self.base_url)
    }

    /// Sends a request and unwraps the `{success, message, data}` envelope.
    async fn send<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<ApiResponse<T>, ApiError> {
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        trace!(status = status.as_u16(), len = body.len(), "api response");

        if !status.is_success() {
            debug!(status = status.as_u16(), "api request rejected");
            return Err(ApiError::from_status(
                status.as_u16(),
                error_message(&body, status),
            ));
        }

        if body.trim().is_empty() {
            return Ok(ApiResponse {
                success: true,
                message: None,
                data: None,
            });
        }

        let parsed: ApiResponse<T> = serde_json::from_str(&body)?;
        if !parsed.success {
            return Err(ApiError::Terminal {
                status: status.as_u16(),
                message: parsed
                    .message
                    .unwrap_or_else(|| "request was not accepted".into()),
            });
        }
        Ok(parsed)
    }
}

/// Picks the most useful human-readable message out of an error body.
fn error_message(body: &str, status: reqwest::StatusCode) -> String {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "error"] {
            if let Some(msg) = v.get(key).and_then(|m| m.as_str())
                && !msg.is_empty()
            {
                return msg.to_string();
            }
        }
    }
    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string()
}

impl DeviceApi for HttpDeviceApi {
    fn list_hubs(&self) -> ApiFuture<'_, Vec<Hub>> {
        Box::pin(async move {
            let url = format!("{}/hub", self.base_url);
            let resp = self.send::<Vec<Hub>>(self.http.get(&url)).await?;
            Ok(resp.data.unwrap_or_default())
        })
    }

    fn list_devices<'a>(&'a self, hub_address: &'a str) -> ApiFuture<'a, Vec<Device>> {
        Box::pin(async move {
            let url = format!("{}/device", self.base_url);
            let req = self.http.get(&url).query(&[("hubAddress", hub_address)]);
            let resp = self.send::<Vec<Device>>(req).await?;
            Ok(resp.data.unwrap_or_default())
        })
    }

    fn create_device<'a>(&'a self, body: &'a CreateDevice) -> ApiFuture<'a, Device> {
        Box::pin(async move {
            let url = format!("{}/device", self.base_url);
            let resp = self.send::<Device>(self.http.post(&url).json(body)).await?;
            Ok(resp.data.unwrap_or_else(|| {
                Device::new(&body.address, &body.name, &body.hub_address)
            }))
        })
    }

    fn rename_device<'a>(&'a self, address: &'a str, name: &'a str) -> ApiFuture<'a, Device> {
        Box::pin(async move {
            let url = self.device_url(address, "");
            let body = RenameDevice {
                name: name.to_string(),
            };
            let resp = self.send::<Device>(self.http.put(&url).json(&body)).await?;
            Ok(resp
                .data
                .unwrap_or_else(|| Device::new(address, name, String::new())))
        })
    }

    fn delete_device_data<'a>(&'a self, address: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let url = self.device_url(address, "/delete_data");
            self.send::<serde_json::Value>(self.http.post(&url)).await?;
            Ok(())
        })
    }

    fn link_pet<'a>(&'a self, address: &'a str, pet: &'a PetLink) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let url = self.device_url(address, "/pet");
            self.send::<serde_json::Value>(self.http.put(&url).json(pet))
                .await?;
            Ok(())
        })
    }
}
