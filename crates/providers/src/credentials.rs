//! Provider credential resolution and the sealed-secret envelope.
//!
//! Credentials are resolved per call and dropped with it — plaintext is
//! never cached beyond the request and never logged. Secrets at rest may
//! be plaintext, an env-var reference, or a sealed `v1:` envelope blob
//! decrypted lazily with the per-deployment key.

use std::sync::Arc;

use cg_domain::config::{Config, ProviderEntry};
use cg_domain::error::{Error, Result};
use cg_domain::model::ProviderKind;

use crate::traits::ProviderAuth;
use crate::util::normalize_base_url;

/// Env var holding the per-deployment envelope key when it is not in
/// the config file.
pub const ENVELOPE_KEY_ENV: &str = "COURSEGATE_ENVELOPE_KEY";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Credential store contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Consumed contract of the credential store collaborator.
///
/// `Ok(None)` means the provider has no configuration for this course —
/// equivalent to "disabled, zero models".
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    async fn provider_auth(
        &self,
        course_name: &str,
        kind: ProviderKind,
    ) -> Result<Option<ProviderAuth>>;
}

/// Config-backed credential store.
///
/// Course-scoped provider entries shadow deployment-wide ones of the
/// same kind. Sealed keys are opened on demand with the deployment
/// envelope key.
pub struct ConfigCredentialStore {
    config: Arc<Config>,
    envelope_key: Option<EnvelopeKey>,
}

impl ConfigCredentialStore {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let raw_key = config
            .llm
            .envelope_key
            .clone()
            .or_else(|| std::env::var(ENVELOPE_KEY_ENV).ok());
        let envelope_key = raw_key.map(|k| EnvelopeKey::from_base64(&k)).transpose()?;
        Ok(Self {
            config,
            envelope_key,
        })
    }

    fn find_entry(&self, course_name: &str, kind: ProviderKind) -> Option<ProviderEntry> {
        if let Some(course) = self.config.llm.courses.get(course_name) {
            if let Some(entry) = course.providers.iter().find(|p| p.kind == kind) {
                return Some(entry.clone());
            }
        }
        self.config
            .llm
            .providers
            .iter()
            .find(|p| p.kind == kind)
            .cloned()
    }

    fn resolve_key(&self, entry: &ProviderEntry) -> Result<String> {
        if let Some(raw) = &entry.api_key {
            if EnvelopeKey::is_sealed(raw) {
                let key = self.envelope_key.as_ref().ok_or_else(|| {
                    Error::Config(
                        "provider has a sealed api_key but no envelope key is configured".into(),
                    )
                })?;
                return key.open(raw);
            }
            return Ok(raw.clone());
        }
        if let Some(var) = &entry.api_key_env {
            return std::env::var(var).map_err(|_| {
                Error::MissingCredentials(format!(
                    "{}: env var {var} not set",
                    entry.kind
                ))
            });
        }
        // The local adapter has no network boundary and needs no key.
        if entry.kind == ProviderKind::Local {
            return Ok(String::new());
        }
        Err(Error::MissingCredentials(entry.kind.to_string()))
    }
}

#[async_trait::async_trait]
impl CredentialStore for ConfigCredentialStore {
    async fn provider_auth(
        &self,
        course_name: &str,
        kind: ProviderKind,
    ) -> Result<Option<ProviderAuth>> {
        let Some(entry) = self.find_entry(course_name, kind) else {
            return Ok(None);
        };
        if !entry.enabled {
            return Ok(None);
        }
        let api_key = self.resolve_key(&entry)?;
        Ok(Some(ProviderAuth {
            api_key,
            base_url: normalize_base_url(&entry.base_url),
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sealed-secret envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use base64::engine::general_purpose::STANDARD_NO_PAD as B64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const ENVELOPE_VERSION: &str = "v1";
const ENC_CONTEXT: &[u8] = b"coursegate.envelope.enc";
const MAC_CONTEXT: &[u8] = b"coursegate.envelope.mac";

/// Per-deployment symmetric key for sealing provider secrets.
///
/// Blob format: `v1:<salt>:<ciphertext>:<tag>` (base64 fields).
/// Encrypt-then-MAC over an HMAC-SHA256 keystream; the version tag stays
/// explicit for forward migration. Verification is constant-time.
pub struct EnvelopeKey {
    enc_key: [u8; 32],
    mac_key: [u8; 32],
}

impl std::fmt::Debug for EnvelopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeKey")
            .field("enc_key", &"<redacted>")
            .field("mac_key", &"<redacted>")
            .finish()
    }
}

impl EnvelopeKey {
    pub fn from_base64(raw: &str) -> Result<Self> {
        let key = B64
            .decode(raw.trim())
            .map_err(|_| Error::Config("envelope key is not valid base64".into()))?;
        if key.len() < 16 {
            return Err(Error::Config("envelope key must be at least 16 bytes".into()));
        }
        Ok(Self {
            enc_key: derive_subkey(&key, ENC_CONTEXT),
            mac_key: derive_subkey(&key, MAC_CONTEXT),
        })
    }

    /// Whether a stored secret is an envelope blob (vs plaintext).
    pub fn is_sealed(raw: &str) -> bool {
        raw.starts_with("v1:")
    }

    /// Seal a plaintext secret into a versioned blob.
    pub fn seal(&self, plaintext: &str) -> String {
        let salt = *uuid::Uuid::new_v4().as_bytes();
        let ct = xor_keystream(&self.enc_key, &salt, plaintext.as_bytes());
        let tag = compute_tag(&self.mac_key, &salt, &ct);
        format!(
            "{ENVELOPE_VERSION}:{}:{}:{}",
            B64.encode(salt),
            B64.encode(&ct),
            B64.encode(tag)
        )
    }

    /// Open a sealed blob. Fails on unknown versions, malformed fields,
    /// or authentication mismatch — without revealing which bytes
    /// differed.
    pub fn open(&self, blob: &str) -> Result<String> {
        let parts: Vec<&str> = blob.split(':').collect();
        if parts.len() != 4 {
            return Err(Error::Config("malformed credential envelope".into()));
        }
        if parts[0] != ENVELOPE_VERSION {
            return Err(Error::Config(format!(
                "unsupported credential envelope version: {}",
                parts[0]
            )));
        }

        let decode = |s: &str| {
            B64.decode(s)
                .map_err(|_| Error::Config("malformed credential envelope".into()))
        };
        let salt_vec = decode(parts[1])?;
        let ct = decode(parts[2])?;
        let tag = decode(parts[3])?;

        let salt: [u8; 16] = salt_vec
            .try_into()
            .map_err(|_| Error::Config("malformed credential envelope".into()))?;

        let expected = compute_tag(&self.mac_key, &salt, &ct);
        if expected.as_slice().ct_eq(tag.as_slice()).unwrap_u8() != 1 {
            return Err(Error::Config(
                "credential envelope authentication failed".into(),
            ));
        }

        let plaintext = xor_keystream(&self.enc_key, &salt, &ct);
        String::from_utf8(plaintext)
            .map_err(|_| Error::Config("credential envelope payload is not UTF-8".into()))
    }
}

fn derive_subkey(key: &[u8], context: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(context);
    mac.finalize().into_bytes().into()
}

fn compute_tag(mac_key: &[u8; 32], salt: &[u8; 16], ct: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(mac_key).expect("hmac accepts any key length");
    mac.update(ENVELOPE_VERSION.as_bytes());
    mac.update(salt);
    mac.update(ct);
    mac.finalize().into_bytes().into()
}

/// XOR the input with an HMAC-SHA256 counter keystream.
fn xor_keystream(enc_key: &[u8; 32], salt: &[u8; 16], input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    for (block_idx, chunk) in input.chunks(32).enumerate() {
        let mut mac = HmacSha256::new_from_slice(enc_key).expect("hmac accepts any key length");
        mac.update(salt);
        mac.update(&(block_idx as u64).to_le_bytes());
        let block = mac.finalize().into_bytes();
        out.extend(chunk.iter().zip(block.iter()).map(|(b, k)| b ^ k));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_domain::config::LlmConfig;

    fn test_key() -> EnvelopeKey {
        EnvelopeKey::from_base64(&B64.encode(b"0123456789abcdef0123456789abcdef")).unwrap()
    }

    #[test]
    fn seal_open_roundtrip() {
        let key = test_key();
        let blob = key.seal("sk-secret-123");
        assert!(EnvelopeKey::is_sealed(&blob));
        assert_eq!(key.open(&blob).unwrap(), "sk-secret-123");
    }

    #[test]
    fn sealed_blobs_are_salted() {
        let key = test_key();
        assert_ne!(key.seal("same"), key.seal("same"));
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let key = test_key();
        let blob = key.seal("sk-secret");
        let mut parts: Vec<String> = blob.split(':').map(String::from).collect();
        let mut ct = B64.decode(&parts[2]).unwrap();
        ct[0] ^= 0x01;
        parts[2] = B64.encode(&ct);
        let err = key.open(&parts.join(":")).unwrap_err();
        assert!(err.to_string().contains("authentication failed"));
    }

    #[test]
    fn unknown_version_rejected() {
        let key = test_key();
        let blob = key.seal("sk-secret");
        let upgraded = blob.replacen("v1:", "v9:", 1);
        let err = key.open(&upgraded).unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn wrong_key_fails_auth() {
        let blob = test_key().seal("sk-secret");
        let other = EnvelopeKey::from_base64(&B64.encode(b"another-key-another-key-32bytes!")).unwrap();
        assert!(other.open(&blob).is_err());
    }

    #[test]
    fn short_key_rejected() {
        let err = EnvelopeKey::from_base64(&B64.encode(b"short")).unwrap_err();
        assert!(err.to_string().contains("16 bytes"));
    }

    fn store_with(entries: Vec<ProviderEntry>) -> ConfigCredentialStore {
        let config = Config {
            llm: LlmConfig {
                providers: entries,
                ..Default::default()
            },
            ..Default::default()
        };
        ConfigCredentialStore::new(Arc::new(config)).unwrap()
    }

    #[tokio::test]
    async fn absent_provider_is_none() {
        let store = store_with(vec![]);
        let auth = store
            .provider_auth("CS101", ProviderKind::OpenAi)
            .await
            .unwrap();
        assert!(auth.is_none());
    }

    #[tokio::test]
    async fn disabled_provider_is_none() {
        let store = store_with(vec![ProviderEntry {
            kind: ProviderKind::OpenAi,
            base_url: "https://api.openai.com/v1".into(),
            api_key: Some("sk-x".into()),
            api_key_env: None,
            enabled: false,
        }]);
        let auth = store
            .provider_auth("CS101", ProviderKind::OpenAi)
            .await
            .unwrap();
        assert!(auth.is_none());
    }

    #[tokio::test]
    async fn enabled_keyless_provider_is_missing_credentials() {
        let store = store_with(vec![ProviderEntry {
            kind: ProviderKind::Anthropic,
            base_url: "https://api.anthropic.com".into(),
            api_key: None,
            api_key_env: None,
            enabled: true,
        }]);
        let err = store
            .provider_auth("CS101", ProviderKind::Anthropic)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingCredentials(_)));
    }

    #[tokio::test]
    async fn plaintext_key_resolves_and_url_normalized() {
        let store = store_with(vec![ProviderEntry {
            kind: ProviderKind::OpenAi,
            base_url: "https://api.openai.com/v1/".into(),
            api_key: Some("sk-plain".into()),
            api_key_env: None,
            enabled: true,
        }]);
        let auth = store
            .provider_auth("CS101", ProviderKind::OpenAi)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(auth.api_key, "sk-plain");
        assert_eq!(auth.base_url, "https://api.openai.com/v1");
    }

    #[tokio::test]
    async fn course_entry_shadows_deployment_entry() {
        let mut config = Config::default();
        config.llm.providers.push(ProviderEntry {
            kind: ProviderKind::OpenAi,
            base_url: "https://api.openai.com/v1".into(),
            api_key: Some("deployment".into()),
            api_key_env: None,
            enabled: true,
        });
        config.llm.courses.insert(
            "ECE120".into(),
            cg_domain::config::CourseOverride {
                providers: vec![ProviderEntry {
                    kind: ProviderKind::OpenAi,
                    base_url: "https://proxy.example.edu/v1".into(),
                    api_key: Some("course".into()),
                    api_key_env: None,
                    enabled: true,
                }],
                models: vec![],
            },
        );
        let store = ConfigCredentialStore::new(Arc::new(config)).unwrap();

        let auth = store
            .provider_auth("ECE120", ProviderKind::OpenAi)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(auth.api_key, "course");

        let auth = store
            .provider_auth("CS225", ProviderKind::OpenAi)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(auth.api_key, "deployment");
    }

    #[tokio::test]
    async fn local_provider_needs_no_key() {
        let store = store_with(vec![ProviderEntry {
            kind: ProviderKind::Local,
            base_url: String::new(),
            api_key: None,
            api_key_env: None,
            enabled: true,
        }]);
        let auth = store
            .provider_auth("CS101", ProviderKind::Local)
            .await
            .unwrap()
            .unwrap();
        assert!(auth.api_key.is_empty());
    }

    #[tokio::test]
    async fn sealed_key_opens_lazily() {
        let envelope = test_key();
        let sealed = envelope.seal("sk-sealed-secret");

        let mut config = Config::default();
        config.llm.envelope_key =
            Some(B64.encode(b"0123456789abcdef0123456789abcdef"));
        config.llm.providers.push(ProviderEntry {
            kind: ProviderKind::Gemini,
            base_url: "https://generativelanguage.googleapis.com".into(),
            api_key: Some(sealed),
            api_key_env: None,
            enabled: true,
        });
        let store = ConfigCredentialStore::new(Arc::new(config)).unwrap();

        let auth = store
            .provider_auth("CS101", ProviderKind::Gemini)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(auth.api_key, "sk-sealed-secret");
    }
}
