use serde::Deserialize;

pub const MEDIA_DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_DOCKER_MANIFEST_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";
pub const MEDIA_DOCKER_MANIFEST_V1_SIGNED: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws";
pub const MEDIA_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Value of the `Accept` header sent with manifest requests.
pub fn accept_header() -> String {
    [
        MEDIA_DOCKER_MANIFEST_V2,
        MEDIA_OCI_MANIFEST,
        MEDIA_DOCKER_MANIFEST_V1_SIGNED,
        MEDIA_DOCKER_MANIFEST_V1,
    ]
    .join(", ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDescriptor {
    pub digest: String,
    pub media_type: Option<String>,
    pub size: Option<u64>,
}

/// Layer list of an image in registry order.
///
/// Schema 1 manifests list the top layer first; schema 2 and OCI manifests
/// list the base layer first. The order is kept exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub schema_version: u32,
    pub layers: Vec<LayerDescriptor>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    schema_version: Option<u32>,
    media_type: Option<String>,
    fs_layers: Option<Vec<RawFsLayer>>,
    layers: Option<Vec<RawLayer>>,
    manifests: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFsLayer {
    blob_sum: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLayer {
    digest: String,
    media_type: Option<String>,
    size: Option<u64>,
}

impl Manifest {
    /// Parse a manifest body. `content_type` is the response's media type, if any.
    pub fn parse(body: &[u8], content_type: Option<&str>) -> Result<Self, String> {
        let raw: RawManifest =
            serde_json::from_slice(body).map_err(|e| format!("malformed manifest: {e}"))?;

        let media_type = raw
            .media_type
            .as_deref()
            .or(content_type)
            .unwrap_or_default();
        if raw.manifests.is_some()
            || media_type.starts_with(MEDIA_DOCKER_MANIFEST_LIST)
            || media_type.starts_with(MEDIA_OCI_INDEX)
        {
            return Err(
                "manifest is a multi-architecture index; platform resolution is not supported"
                    .to_owned(),
            );
        }

        let schema_version = raw.schema_version.unwrap_or(2);
        let layers: Vec<LayerDescriptor> = match (raw.fs_layers, raw.layers) {
            (Some(fs_layers), _) if schema_version == 1 => fs_layers
                .into_iter()
                .map(|l| LayerDescriptor {
                    digest: l.blob_sum,
                    media_type: None,
                    size: None,
                })
                .collect(),
            (_, Some(layers)) => layers
                .into_iter()
                .map(|l| LayerDescriptor {
                    digest: l.digest,
                    media_type: l.media_type,
                    size: l.size,
                })
                .collect(),
            (Some(fs_layers), None) => fs_layers
                .into_iter()
                .map(|l| LayerDescriptor {
                    digest: l.blob_sum,
                    media_type: None,
                    size: None,
                })
                .collect(),
            (None, None) => return Err("manifest has no layer list".to_owned()),
        };

        if layers.is_empty() {
            return Err("manifest lists no layers".to_owned());
        }
        if let Some(bad) = layers.iter().find(|l| l.digest.trim().is_empty()) {
            return Err(format!("layer with empty digest: {bad:?}"));
        }

        Ok(Self {
            schema_version,
            layers,
        })
    }

    pub fn digests(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.digest.as_str()).collect()
    }
}
