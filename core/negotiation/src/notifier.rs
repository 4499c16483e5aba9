use async_trait::async_trait;
use url::Url;

use crate::config::WebhookConfig;
use crate::negotiation::ExternalAction;

#[derive(thiserror::Error, Debug)]
pub enum NotifierError {
    #[error("Invalid webhook url: {0}")]
    Url(#[from] url::ParseError),
    #[error("Webhook [{endpoint}] failed: {error}")]
    Http {
        endpoint: String,
        error: reqwest::Error,
    },
    #[error("Webhook [{0}] unavailable.")]
    Unavailable(String),
}

/// Upstream collaborator told about negotiation outcomes it has to act on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, action: &ExternalAction) -> Result<(), NotifierError>;
}

pub struct WebhookNotifier {
    http: reqwest::Client,
    host: Url,
    key: Option<String>,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig) -> Result<WebhookNotifier, NotifierError> {
        let http = reqwest::Client::builder()
            .timeout(config.webhook_timeout)
            .build()
            .map_err(|error| NotifierError::Http {
                endpoint: "<client>".to_string(),
                error,
            })?;
        Ok(WebhookNotifier {
            http,
            host: config.webhook_host.clone(),
            key: config.webhook_key.clone(),
        })
    }

    pub fn endpoint(action: &ExternalAction) -> &'static str {
        match action {
            ExternalAction::CollectSubjectData(_) => "api/v1/webhooks/collect-subject-data",
            ExternalAction::PerformAttestation(_) => "api/v1/webhooks/perform-attestation",
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, action: &ExternalAction) -> Result<(), NotifierError> {
        let endpoint = Self::endpoint(action);
        let url = self.host.join(endpoint)?;
        let request = match action {
            ExternalAction::CollectSubjectData(body) => self.http.post(url).json(body),
            ExternalAction::PerformAttestation(body) => self.http.post(url).json(body),
        };
        let request = match &self.key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };
        let http_error = |error| NotifierError::Http {
            endpoint: endpoint.to_string(),
            error,
        };

        request
            .send()
            .await
            .map_err(http_error)?
            .error_for_status()
            .map_err(http_error)?;
        log::debug!("Webhook [{}] notified.", endpoint);
        Ok(())
    }
}
