// ============================================================================
// HTTP MODEL CLIENT — JSON + base64 PNG over reqwest
// ============================================================================
//
//   POST {endpoint}/describe  {image, history}  -> {selection_description, prompt?}
//   POST {endpoint}/enhance   {image, prompts}  -> {image, side_signal?}

use std::time::Duration;

use async_trait::async_trait;
use image::RgbaImage;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use crate::components::history::Description;
use crate::error::ServiceError;
use crate::io::{image_from_base64, png_base64};
use crate::ops::ai::{DescriptionService, Enhanced, EnhancementService};

#[derive(Serialize)]
struct DescribeRequest<'a> {
    image: String,
    history: &'a [Description],
}

#[derive(Serialize)]
struct EnhanceRequest<'a> {
    image: String,
    prompts: &'a [String],
}

#[derive(Deserialize)]
struct EnhanceResponse {
    image: String,
    #[serde(default)]
    side_signal: bool,
}

/// Talks to a remote model service implementing both endpoints.
#[derive(Clone, Debug)]
pub struct HttpModelClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpModelClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    /// Reads the bearer token from `key_env`; a missing variable means no auth.
    pub fn from_env(base_url: &str, key_env: &str, timeout: Duration) -> Result<Self, ServiceError> {
        Self::new(base_url, std::env::var(key_env).ok(), timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{}", self.base_url, route)
    }

    fn post(&self, route: &str) -> RequestBuilder {
        let request = self.http.post(self.url(route));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

fn check_status(response: Response) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ServiceError::Status(status.as_u16()))
    }
}

#[async_trait]
impl DescriptionService for HttpModelClient {
    async fn describe(
        &self,
        selection: &RgbaImage,
        prior: &[Description],
    ) -> Result<Description, ServiceError> {
        let body = DescribeRequest {
            image: png_base64(selection)?,
            history: prior,
        };
        let response = self.post("describe").json(&body).send().await?;
        let description: Description = check_status(response)?.json().await?;
        tracing::debug!(
            prior = prior.len(),
            has_prompt = description.prompt.is_some(),
            "describe: response received"
        );
        Ok(description)
    }
}

#[async_trait]
impl EnhancementService for HttpModelClient {
    async fn enhance(&self, crop: &RgbaImage, prompts: &[String]) -> Result<Enhanced, ServiceError> {
        let body = EnhanceRequest {
            image: png_base64(crop)?,
            prompts,
        };
        let response = self.post("enhance").json(&body).send().await?;
        let payload: EnhanceResponse = check_status(response)?.json().await?;
        let image = image_from_base64(&payload.image)?;
        if image.width() == 0 || image.height() == 0 {
            return Err(ServiceError::Malformed("enhanced image has zero size".to_string()));
        }
        tracing::debug!(
            width = image.width(),
            height = image.height(),
            side_signal = payload.side_signal,
            "enhance: response received"
        );
        Ok(Enhanced {
            image,
            side_signal: payload.side_signal,
        })
    }
}
