//! Fixture image registry for exercising Skiff without a live registry.
//!
//! Implements the subset of the registry v2 protocol the runtime consumes:
//! - `GET /token?service=..&scope=..` — anonymous bearer token issuance
//! - `GET /v2/library/{name}/manifests/{reference}` — image manifest
//! - `GET /v2/library/{name}/blobs/{digest}` — layer blob
//!
//! Registry routes require `Authorization: Bearer <token>` and answer 401
//! otherwise. Content lives in an in-memory [`FixtureStore`]; the
//! [`TestRegistry`] helper serves one on a random port for integration tests.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, info, warn};

pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";
pub const DOCKER_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
pub const OCI_LAYER_TAR: &str = "application/vnd.oci.image.layer.v1.tar";

/// Compute the `sha256:<hex>` content digest of a blob.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// One request as the fixture server saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub accept: Option<String>,
    pub authorization: Option<String>,
}

/// In-memory image content plus request accounting.
pub struct FixtureStore {
    token: String,
    /// (name, reference) -> (media type, manifest body)
    manifests: RwLock<HashMap<(String, String), (String, Vec<u8>)>>,
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    token_requests: AtomicUsize,
    fail_token: AtomicBool,
    log: Mutex<Vec<RecordedRequest>>,
}

impl Default for FixtureStore {
    fn default() -> Self {
        Self::new("fixture-token")
    }
}

impl FixtureStore {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_owned(),
            manifests: RwLock::new(HashMap::new()),
            blobs: RwLock::new(HashMap::new()),
            token_requests: AtomicUsize::new(0),
            fail_token: AtomicBool::new(false),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Store a blob under its sha256 digest and return the digest.
    pub fn put_blob(&self, data: &[u8]) -> String {
        let digest = sha256_digest(data);
        self.put_blob_as(&digest, data);
        digest
    }

    /// Store a blob under an arbitrary digest (used to serve corrupt content).
    pub fn put_blob_as(&self, digest: &str, data: &[u8]) {
        let mut blobs = self.blobs.write().expect("blob lock poisoned");
        blobs.insert(digest.to_owned(), data.to_vec());
    }

    pub fn remove_blob(&self, digest: &str) {
        let mut blobs = self.blobs.write().expect("blob lock poisoned");
        blobs.remove(digest);
    }

    pub fn put_manifest(&self, name: &str, reference: &str, media_type: &str, body: &[u8]) {
        let mut manifests = self.manifests.write().expect("manifest lock poisoned");
        manifests.insert(
            (name.to_owned(), reference.to_owned()),
            (media_type.to_owned(), body.to_vec()),
        );
    }

    /// Publish a schema 2 image whose layers are listed base first.
    /// Returns the layer digests in manifest order.
    pub fn add_image(&self, name: &str, tag: &str, layers: &[Vec<u8>]) -> Vec<String> {
        let digests: Vec<String> = layers.iter().map(|l| self.put_blob(l)).collect();
        let layer_entries: Vec<serde_json::Value> = digests
            .iter()
            .zip(layers)
            .map(|(digest, data)| {
                let media_type = if data.starts_with(&[0x1f, 0x8b]) {
                    DOCKER_LAYER_GZIP
                } else {
                    OCI_LAYER_TAR
                };
                serde_json::json!({
                    "mediaType": media_type,
                    "size": data.len(),
                    "digest": digest,
                })
            })
            .collect();
        let config = self.put_blob(b"{}");
        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": DOCKER_MANIFEST_V2,
            "config": {
                "mediaType": "application/vnd.docker.container.image.v1+json",
                "size": 2,
                "digest": config,
            },
            "layers": layer_entries,
        });
        let body = serde_json::to_vec_pretty(&manifest).unwrap_or_default();
        self.put_manifest(name, tag, DOCKER_MANIFEST_V2, &body);
        digests
    }

    /// Publish a schema 1 image. `layers` are given in `fsLayers` order,
    /// which registries emit top layer first.
    pub fn add_schema1_image(&self, name: &str, tag: &str, layers: &[Vec<u8>]) -> Vec<String> {
        let digests: Vec<String> = layers.iter().map(|l| self.put_blob(l)).collect();
        let fs_layers: Vec<serde_json::Value> = digests
            .iter()
            .map(|d| serde_json::json!({ "blobSum": d }))
            .collect();
        let manifest = serde_json::json!({
            "schemaVersion": 1,
            "name": format!("library/{name}"),
            "tag": tag,
            "architecture": "amd64",
            "fsLayers": fs_layers,
            "history": [],
        });
        let body = serde_json::to_vec_pretty(&manifest).unwrap_or_default();
        self.put_manifest(name, tag, DOCKER_MANIFEST_V1, &body);
        digests
    }

    /// Make the token route answer 503 until reset.
    pub fn set_token_failure(&self, fail: bool) {
        self.fail_token.store(fail, Ordering::SeqCst);
    }

    pub fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }

    /// Every request seen so far, with the headers the client negotiated.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().expect("log lock poisoned").clone()
    }

    fn manifest(&self, name: &str, reference: &str) -> Option<(String, Vec<u8>)> {
        let manifests = self.manifests.read().expect("manifest lock poisoned");
        manifests
            .get(&(name.to_owned(), reference.to_owned()))
            .cloned()
    }

    fn blob(&self, digest: &str) -> Option<Vec<u8>> {
        let blobs = self.blobs.read().expect("blob lock poisoned");
        blobs.get(digest).cloned()
    }

    fn record(&self, req: &tiny_http::Request) {
        let header = |name: &'static str| {
            req.headers()
                .iter()
                .find(|h| h.field.equiv(name))
                .map(|h| h.value.as_str().to_owned())
        };
        let entry = RecordedRequest {
            method: req.method().to_string(),
            url: req.url().to_owned(),
            accept: header("Accept"),
            authorization: header("Authorization"),
        };
        self.log.lock().expect("log lock poisoned").push(entry);
    }
}

/// Load a fixture directory laid out as `<dir>/<name>/<tag>/<layer files>`.
///
/// Layer files are published base first in lexicographic filename order.
pub fn load_fixture_dir(dir: &Path, token: &str) -> io::Result<FixtureStore> {
    let store = FixtureStore::new(token);
    for image in sorted_dirs(dir)? {
        let Some(name) = image.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
            continue;
        };
        for tag_dir in sorted_dirs(&image)? {
            let Some(tag) = tag_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let mut files: Vec<_> = fs::read_dir(&tag_dir)?
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect();
            files.sort();
            let layers = files
                .iter()
                .map(fs::read)
                .collect::<io::Result<Vec<_>>>()?;
            info!("fixture image {name}:{tag} ({} layers)", layers.len());
            store.add_image(&name, tag, &layers);
        }
    }
    Ok(store)
}

fn sorted_dirs(dir: &Path) -> io::Result<Vec<std::path::PathBuf>> {
    let mut dirs: Vec<_> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

/// Registry routes recognised by the fixture server.
#[derive(Debug, PartialEq, Eq)]
pub enum Route<'a> {
    Token,
    Base,
    Manifest { name: &'a str, reference: &'a str },
    Blob { name: &'a str, digest: &'a str },
}

/// Parse a request URL (path plus optional query) into a [`Route`].
pub fn parse_route(url: &str) -> Option<Route<'_>> {
    let path = url.split_once('?').map_or(url, |(p, _)| p);
    if path == "/token" {
        return Some(Route::Token);
    }
    if path == "/v2/" || path == "/v2" {
        return Some(Route::Base);
    }
    let rest = path.strip_prefix("/v2/library/")?;
    if let Some((name, reference)) = rest.split_once("/manifests/") {
        if !name.is_empty() && !reference.is_empty() {
            return Some(Route::Manifest { name, reference });
        }
    }
    if let Some((name, digest)) = rest.split_once("/blobs/") {
        if !name.is_empty() && !digest.is_empty() {
            return Some(Route::Blob { name, digest });
        }
    }
    None
}

fn respond_err(req: tiny_http::Request, code: u16, msg: &str) {
    let _ = req.respond(Response::from_string(msg).with_status_code(StatusCode(code)));
}

fn respond_typed(req: tiny_http::Request, content_type: &str, data: Vec<u8>) {
    match Header::from_bytes("Content-Type", content_type) {
        Ok(header) => {
            let _ = req.respond(Response::from_data(data).with_header(header));
        }
        Err(()) => {
            let _ = req.respond(Response::from_data(data));
        }
    }
}

fn authorized(store: &FixtureStore, req: &tiny_http::Request) -> bool {
    let expected = format!("Bearer {}", store.token);
    req.headers()
        .iter()
        .any(|h| h.field.equiv("Authorization") && h.value.as_str() == expected)
}

fn handle_token(store: &FixtureStore, req: tiny_http::Request) {
    store.token_requests.fetch_add(1, Ordering::SeqCst);
    if store.fail_token.load(Ordering::SeqCst) {
        respond_err(req, 503, "token service unavailable");
        return;
    }
    let body = serde_json::json!({
        "token": store.token,
        "access_token": store.token,
        "expires_in": 300,
    });
    respond_typed(req, "application/json", body.to_string().into_bytes());
}

/// Handle a single HTTP request, dispatching to the appropriate route handler.
pub fn handle_request(store: &FixtureStore, req: tiny_http::Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    debug!("{method} {url}");
    store.record(&req);

    if method != Method::Get && method != Method::Head {
        respond_err(req, 405, "method not allowed");
        return;
    }

    match parse_route(&url) {
        Some(Route::Token) => handle_token(store, req),
        Some(_) if !authorized(store, &req) => {
            warn!("{method} {url}: missing or invalid bearer token");
            respond_err(req, 401, "unauthorized");
        }
        Some(Route::Base) => respond_typed(req, "application/json", b"{}".to_vec()),
        Some(Route::Manifest { name, reference }) => match store.manifest(name, reference) {
            Some((media_type, body)) => respond_typed(req, &media_type, body),
            None => respond_err(req, 404, "manifest unknown"),
        },
        Some(Route::Blob { digest, .. }) => match store.blob(digest) {
            Some(data) => respond_typed(req, "application/octet-stream", data),
            None => respond_err(req, 404, "blob unknown"),
        },
        None => respond_err(req, 404, "not found"),
    }
}

/// Start the server loop, blocking the current thread.
pub fn run_server(store: &Arc<FixtureStore>, addr: &str) -> io::Result<()> {
    let server = Server::http(addr).map_err(|e| io::Error::other(e.to_string()))?;
    for request in server.incoming_requests() {
        handle_request(store, request);
    }
    Ok(())
}

/// A fixture registry on a random port, served from a background thread.
///
/// Dropping the `TestRegistry` unblocks and stops the server.
pub struct TestRegistry {
    pub url: String,
    pub port: u16,
    pub store: Arc<FixtureStore>,
    server: Arc<Server>,
    _handle: std::thread::JoinHandle<()>,
}

impl TestRegistry {
    pub fn start(store: FixtureStore) -> Self {
        let server =
            Arc::new(Server::http("127.0.0.1:0").expect("failed to bind test HTTP server"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");

        let store = Arc::new(store);
        let srv = Arc::clone(&server);
        let st = Arc::clone(&store);
        let handle = std::thread::spawn(move || {
            for request in srv.incoming_requests() {
                handle_request(&st, request);
            }
        });

        Self {
            url,
            port,
            store,
            server,
            _handle: handle,
        }
    }

    pub fn auth_url(&self) -> String {
        format!("{}/token", self.url)
    }
}

impl Drop for TestRegistry {
    fn drop(&mut self) {
        self.server.unblock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_route_manifest() {
        assert_eq!(
            parse_route("/v2/library/alpine/manifests/latest"),
            Some(Route::Manifest {
                name: "alpine",
                reference: "latest"
            })
        );
    }

    #[test]
    fn parse_route_blob_with_digest() {
        assert_eq!(
            parse_route("/v2/library/alpine/blobs/sha256:abc"),
            Some(Route::Blob {
                name: "alpine",
                digest: "sha256:abc"
            })
        );
    }

    #[test]
    fn parse_route_token_ignores_query() {
        assert_eq!(
            parse_route("/token?service=registry.docker.io&scope=repository%3Alibrary%2Falpine%3Apull"),
            Some(Route::Token)
        );
    }

    #[test]
    fn parse_route_rejects_unknown_paths() {
        assert_eq!(parse_route("/v2/library/alpine"), None);
        assert_eq!(parse_route("/v2/library//manifests/latest"), None);
        assert_eq!(parse_route("/health"), None);
    }

    #[test]
    fn sha256_digest_of_empty_input() {
        assert_eq!(
            sha256_digest(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn add_image_lists_layers_in_given_order() {
        let store = FixtureStore::default();
        let digests = store.add_image("busybox", "1.36", &[b"base".to_vec(), b"top".to_vec()]);
        let (media_type, body) = store.manifest("busybox", "1.36").unwrap();
        assert_eq!(media_type, DOCKER_MANIFEST_V2);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let listed: Vec<&str> = json["layers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|l| l["digest"].as_str().unwrap())
            .collect();
        assert_eq!(listed, digests);
        assert_eq!(store.blob(&digests[1]).unwrap(), b"top");
    }

    #[test]
    fn load_fixture_dir_orders_layers_by_filename() {
        let dir = tempfile::tempdir().unwrap();
        let tag_dir = dir.path().join("hello").join("latest");
        fs::create_dir_all(&tag_dir).unwrap();
        fs::write(tag_dir.join("layer-1.tar"), b"second").unwrap();
        fs::write(tag_dir.join("layer-0.tar"), b"first").unwrap();

        let store = load_fixture_dir(dir.path(), "t").unwrap();
        let (_, body) = store.manifest("hello", "latest").unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let first = json["layers"][0]["digest"].as_str().unwrap();
        assert_eq!(first, sha256_digest(b"first"));
    }

    #[test]
    fn test_registry_requires_bearer_token() {
        let registry = TestRegistry::start(FixtureStore::default());
        registry
            .store
            .add_image("alpine", "latest", &[b"layer".to_vec()]);
        let url = format!("{}/v2/library/alpine/manifests/latest", registry.url);

        let unauthenticated = ureq::get(&url).call();
        assert!(matches!(
            unauthenticated,
            Err(ureq::Error::StatusCode(401))
        ));

        let ok = ureq::get(&url)
            .header("Authorization", "Bearer fixture-token")
            .call()
            .unwrap();
        assert_eq!(ok.status().as_u16(), 200);
    }

    #[test]
    fn test_registry_counts_token_requests() {
        let registry = TestRegistry::start(FixtureStore::default());
        let _ = ureq::get(&registry.auth_url()).call().unwrap();
        let _ = ureq::get(&registry.auth_url()).call().unwrap();
        assert_eq!(registry.store.token_requests(), 2);
    }
}
