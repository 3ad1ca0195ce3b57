//! VAPID configuration from the environment.

use std::path::PathBuf;

use tracing::warn;

/// Environment variable naming the VAPID subject (`mailto:` or origin URL).
pub const ENV_VAPID_SUBJECT: &str = "RINGLINE_VAPID_SUBJECT";
/// Environment variable holding the base64url-encoded VAPID public key.
pub const ENV_VAPID_PUBLIC_KEY: &str = "RINGLINE_VAPID_PUBLIC_KEY";
/// Environment variable pointing at the PEM-encoded EC private key.
pub const ENV_VAPID_KEY_PATH: &str = "RINGLINE_VAPID_KEY_PATH";

/// VAPID identity used to sign push requests.
#[derive(Clone, Debug)]
pub struct PushConfig {
    /// Contact URI presented to the push service.
    pub subject: String,
    /// Public key, as handed to browsers in `applicationServerKey` form.
    pub public_key: String,
    /// Path to the PEM-encoded ES256 private key.
    pub key_path: PathBuf,
}

impl PushConfig {
    /// Read the configuration from the process environment.
    ///
    /// Returns `None` when push is unconfigured. A partial configuration is
    /// treated as unconfigured, with a warning naming the missing pieces.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        Self::resolve(
            std::env::var(ENV_VAPID_SUBJECT).ok(),
            std::env::var(ENV_VAPID_PUBLIC_KEY).ok(),
            std::env::var(ENV_VAPID_KEY_PATH).ok(),
        )
    }

    fn resolve(
        subject: Option<String>,
        public_key: Option<String>,
        key_path: Option<String>,
    ) -> Option<Self> {
        match (subject, public_key, key_path) {
            (Some(subject), Some(public_key), Some(key_path)) => Some(Self {
                subject,
                public_key,
                key_path: PathBuf::from(key_path),
            }),
            (None, None, None) => None,
            (subject, public_key, key_path) => {
                let mut missing = Vec::new();
                if subject.is_none() {
                    missing.push(ENV_VAPID_SUBJECT);
                }
                if public_key.is_none() {
                    missing.push(ENV_VAPID_PUBLIC_KEY);
                }
                if key_path.is_none() {
                    missing.push(ENV_VAPID_KEY_PATH);
                }
                warn!(?missing, "partial push configuration ignored");
                None
            }
        }
    }
}
