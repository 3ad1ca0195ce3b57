//! VAPID-signed Web Push delivery.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use reqwest::Url;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::config::PushConfig;
use super::types::{PushNotification, PushSubscription};
use super::WakeChannel;

/// How long the push service may hold an undelivered notification.
const PUSH_TTL_SECS: u32 = 60;
/// VAPID token lifetime.
const TOKEN_LIFETIME_SECS: i64 = 12 * 60 * 60;

/// Push delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The private key file could not be read.
    #[error("failed to read VAPID key at {path}: {source}")]
    KeyRead {
        /// Configured key path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The private key was not a usable ES256 PEM.
    #[error("failed to parse VAPID key: {0}")]
    KeyParse(#[source] jsonwebtoken::errors::Error),
    /// The HTTP client could not be constructed.
    #[error("failed to build push HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// The subscription endpoint was not a valid URL.
    #[error("invalid subscription endpoint")]
    BadEndpoint,
    /// VAPID token signing failed.
    #[error("failed to sign VAPID token: {0}")]
    TokenSign(#[source] jsonwebtoken::errors::Error),
    /// The push service could not be reached.
    #[error("push request failed: {0}")]
    Request(#[source] reqwest::Error),
    /// The push service refused the delivery.
    #[error("push service returned {status}")]
    Rejected {
        /// HTTP status from the push service.
        status: reqwest::StatusCode,
    },
    /// No subscription is registered.
    #[error("no push subscription registered")]
    NoSubscription,
}

#[derive(Serialize)]
struct VapidClaims {
    aud: String,
    exp: i64,
    sub: String,
}

struct Inner {
    subject: String,
    public_key: String,
    encoding_key: EncodingKey,
    client: reqwest::Client,
    subscription: Mutex<Option<PushSubscription>>,
}

/// Sends payload-less, VAPID-authenticated pushes to the single registered
/// browser subscription.
///
/// Cheap to clone; all clones share the subscription slot.
#[derive(Clone)]
pub struct PushService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PushService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushService")
            .field("subject", &self.inner.subject)
            .finish_non_exhaustive()
    }
}

impl PushService {
    /// Build the service from its configuration, loading and validating the
    /// private key up front so a bad key fails at startup rather than on
    /// the first call.
    pub fn new(config: &PushConfig) -> Result<Self, PushError> {
        let pem = std::fs::read(&config.key_path).map_err(|source| PushError::KeyRead {
            path: config.key_path.display().to_string(),
            source,
        })?;
        let encoding_key = EncodingKey::from_ec_pem(&pem).map_err(PushError::KeyParse)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(PushError::ClientBuild)?;
        info!(subject = %config.subject, "push service configured");
        Ok(Self {
            inner: Arc::new(Inner {
                subject: config.subject.clone(),
                public_key: config.public_key.clone(),
                encoding_key,
                client,
                subscription: Mutex::new(None),
            }),
        })
    }

    /// The public key browsers pass as `applicationServerKey`.
    #[must_use]
    pub fn public_key(&self) -> &str {
        &self.inner.public_key
    }

    /// Store the browser's subscription. A re-subscribe replaces the old
    /// one; only the latest subscription receives deliveries.
    pub fn set_subscription(&self, subscription: PushSubscription) {
        info!(endpoint = %subscription.endpoint, "push subscription registered");
        *self.inner.subscription.lock() = Some(subscription);
    }

    /// Whether a subscription is registered.
    #[must_use]
    pub fn has_subscription(&self) -> bool {
        self.inner.subscription.lock().is_some()
    }

    /// Deliver one notification to the registered subscription.
    ///
    /// On any failure the subscription is dropped: a browser that rotated
    /// or revoked its subscription will re-subscribe on its next connect,
    /// and until then pushes would only fail again.
    pub async fn send(&self, notification: PushNotification) -> Result<(), PushError> {
        let result = self.inner.deliver(&notification).await;
        if let Err(ref error) = result {
            warn!(tag = %notification.tag, %error, "push delivery failed, dropping subscription");
            *self.inner.subscription.lock() = None;
        }
        result
    }
}

impl Inner {
    async fn deliver(&self, notification: &PushNotification) -> Result<(), PushError> {
        let endpoint = {
            let guard = self.subscription.lock();
            guard
                .as_ref()
                .map(|s| s.endpoint.clone())
                .ok_or(PushError::NoSubscription)?
        };

        let token = self.vapid_token(&endpoint)?;
        let response = self
            .client
            .post(&endpoint)
            .header(
                "Authorization",
                format!("vapid t={token}, k={}", self.public_key),
            )
            .header("TTL", PUSH_TTL_SECS)
            .header("Urgency", "high")
            .header("Topic", &notification.tag)
            .send()
            .await
            .map_err(PushError::Request)?;

        if !response.status().is_success() {
            return Err(PushError::Rejected {
                status: response.status(),
            });
        }
        debug!(tag = %notification.tag, "push delivered");
        Ok(())
    }

    /// Sign a short-lived ES256 token scoped to the endpoint's origin.
    fn vapid_token(&self, endpoint: &str) -> Result<String, PushError> {
        let url = Url::parse(endpoint).map_err(|_| PushError::BadEndpoint)?;
        let mut aud = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
        if let Some(port) = url.port() {
            aud.push_str(&format!(":{port}"));
        }
        let claims = VapidClaims {
            aud,
            exp: ringline_core::now_ms() / 1000 + TOKEN_LIFETIME_SECS,
            sub: self.subject.clone(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::ES256), &claims, &self.encoding_key)
            .map_err(PushError::TokenSign)
    }
}

impl WakeChannel for PushService {
    fn is_armed(&self) -> bool {
        self.has_subscription()
    }

    fn notify(&self, notification: PushNotification) {
        let service = self.clone();
        drop(tokio::spawn(async move {
            // Failures are already logged and clear the subscription.
            let _ = service.send(notification).await;
        }));
    }
}
