use crate::manifest::{accept_header, Manifest};
use crate::{AuthSession, ImageReference, RegistryConfig, RegistryError};
use sha2::{Digest, Sha256};
use std::io::Read;
use tracing::{debug, info};

/// Registry v2 client for the official library namespace.
///
/// Routes used:
/// - `GET {registry}/v2/library/{name}/manifests/{reference}`
/// - `GET {registry}/v2/library/{name}/blobs/{digest}`
///
/// Both carry `Authorization: Bearer <token>` from the [`AuthSession`].
/// Nothing is cached between calls, and a 401 is reported as-is: the
/// session is never asked for a fresh token.
pub struct RegistryClient {
    registry_url: String,
    agent: ureq::Agent,
}

/// Why a GET failed, before it is mapped to a manifest or layer error.
enum GetFailure {
    Status(u16),
    Transport(String),
}

impl std::fmt::Display for GetFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GetFailure::Status(401) => f.write_str("HTTP 401 (token rejected)"),
            GetFailure::Status(404) => f.write_str("HTTP 404 (not found)"),
            GetFailure::Status(code) => write!(f, "HTTP {code}"),
            GetFailure::Transport(msg) => f.write_str(msg),
        }
    }
}

impl RegistryClient {
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            registry_url: config.registry_url.trim_end_matches('/').to_owned(),
            agent: config.agent(),
        }
    }

    pub fn manifest_url(&self, image: &ImageReference) -> String {
        format!(
            "{}/v2/library/{}/manifests/{}",
            self.registry_url, image.name, image.reference
        )
    }

    pub fn blob_url(&self, name: &str, digest: &str) -> String {
        format!("{}/v2/library/{name}/blobs/{digest}", self.registry_url)
    }

    pub fn fetch_manifest(
        &self,
        session: &mut AuthSession,
        image: &ImageReference,
    ) -> Result<Manifest, RegistryError> {
        let fail = |reason: String| RegistryError::ManifestFetch {
            reference: image.to_string(),
            reason,
        };

        let authorization = session.token()?.authorization();
        let url = self.manifest_url(image);
        debug!("GET {url}");
        let (content_type, body) = self
            .do_get(&url, &authorization, Some(&accept_header()))
            .map_err(|e| fail(e.to_string()))?;

        let manifest = Manifest::parse(&body, content_type.as_deref()).map_err(fail)?;
        info!(
            "manifest for {image}: schema {}, {} layers",
            manifest.schema_version,
            manifest.layers.len()
        );
        Ok(manifest)
    }

    pub fn fetch_layer(
        &self,
        session: &mut AuthSession,
        name: &str,
        digest: &str,
    ) -> Result<Vec<u8>, RegistryError> {
        let fail = |reason: String| RegistryError::LayerFetch {
            digest: digest.to_owned(),
            reason,
        };

        let authorization = session.token()?.authorization();
        let url = self.blob_url(name, digest);
        debug!("GET {url}");
        let (_, body) = self
            .do_get(&url, &authorization, None)
            .map_err(|e| fail(e.to_string()))?;

        verify_digest(digest, &body).map_err(fail)?;
        debug!("fetched {digest} ({} bytes)", body.len());
        Ok(body)
    }

    fn do_get(
        &self,
        url: &str,
        authorization: &str,
        accept: Option<&str>,
    ) -> Result<(Option<String>, Vec<u8>), GetFailure> {
        let mut req = self.agent.get(url).header("Authorization", authorization);
        if let Some(accept) = accept {
            req = req.header("Accept", accept);
        }
        let resp = match req.call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => return Err(GetFailure::Status(code)),
            Err(e) => return Err(GetFailure::Transport(format!("{url}: {e}"))),
        };

        let code = resp.status().as_u16();
        if !(200..300).contains(&code) {
            return Err(GetFailure::Status(code));
        }

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let mut reader = resp.into_body().into_reader();
        let mut body = Vec::new();
        reader
            .read_to_end(&mut body)
            .map_err(|e| GetFailure::Transport(format!("{url}: {e}")))?;
        Ok((content_type, body))
    }
}

/// Check a blob against a `sha256:` digest. Other algorithms are not verified.
pub fn verify_digest(digest: &str, data: &[u8]) -> Result<(), String> {
    let Some(expected) = digest.strip_prefix("sha256:") else {
        return Ok(());
    };
    let actual = hex::encode(Sha256::digest(data));
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(format!("digest mismatch: got sha256:{actual}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str =
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn client() -> RegistryClient {
        RegistryClient::new(&RegistryConfig::new(
            "https://registry.example.com/",
            "https://auth.example.com/token",
        ))
    }

    #[test]
    fn manifest_url_uses_library_namespace() {
        let image: ImageReference = "alpine:3.19".parse().unwrap();
        assert_eq!(
            client().manifest_url(&image),
            "https://registry.example.com/v2/library/alpine/manifests/3.19"
        );
    }

    #[test]
    fn blob_url_uses_digest() {
        assert_eq!(
            client().blob_url("alpine", "sha256:abc"),
            "https://registry.example.com/v2/library/alpine/blobs/sha256:abc"
        );
    }

    #[test]
    fn verify_digest_accepts_matching_content() {
        assert!(verify_digest(EMPTY_SHA256, b"").is_ok());
    }

    #[test]
    fn verify_digest_rejects_mismatch() {
        let err = verify_digest(EMPTY_SHA256, b"tampered").unwrap_err();
        assert!(err.contains("digest mismatch"));
    }

    #[test]
    fn verify_digest_skips_unknown_algorithms() {
        assert!(verify_digest("sha512:abcd", b"anything").is_ok());
    }

    #[test]
    fn get_failure_messages() {
        assert_eq!(GetFailure::Status(401).to_string(), "HTTP 401 (token rejected)");
        assert_eq!(GetFailure::Status(404).to_string(), "HTTP 404 (not found)");
        assert_eq!(GetFailure::Status(500).to_string(), "HTTP 500");
    }
}
