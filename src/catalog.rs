//! Stub model catalog: a single sample model served from fixed data.

use serde::Serialize;
use std::collections::HashMap;

const SAMPLE_MODEL_ID: &str = "runwayml/stable-diffusion-v1-5";
const SAMPLE_REV: &str = "abc123";
/// Size listed for `config.json`, independent of the stub body served for it.
const CONFIG_JSON_SIZE: u64 = 64;
const TORRENT_BYTES: &[u8] = b"d8:announce13:stub-tracker12:created by12:StubCataloge";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_rev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub torrent_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magnet_uri: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogResponse {
    pub items: Vec<CatalogItem>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub path: String,
    pub size_bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRevision {
    pub id: String,
    pub rev: String,
    pub files: Vec<FileEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub torrent_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magnet_uri: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerEndpoint {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayInfo {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapParameters {
    pub peer_degree_k: u32,
    pub redundant_providers_n: u32,
    pub bootstrap_refresh_seconds: u32,
}

impl Default for BootstrapParameters {
    fn default() -> Self {
        Self {
            peer_degree_k: 48,
            redundant_providers_n: 2,
            bootstrap_refresh_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapResponse {
    pub model_id: String,
    pub rev: String,
    pub peers: Vec<PeerEndpoint>,
    pub trackers: Vec<String>,
    pub relays: Vec<RelayInfo>,
    pub parameters: BootstrapParameters,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmHealth {
    pub model_id: String,
    pub rev: String,
    pub active_peers: u32,
    pub seeders: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_rtt_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability: Option<f64>,
}

/// Catalog backed by fixed sample data.
#[derive(Debug, Clone)]
pub struct StubCatalog {
    revision: ModelRevision,
    contents: HashMap<String, Vec<u8>>,
}

impl Default for StubCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl StubCatalog {
    pub fn new() -> Self {
        let config_json = br#"{"_":"stub-config"}"#.to_vec();
        let files = vec![
            FileEntry {
                path: "model.safetensors".to_string(),
                size_bytes: 1024,
                sha256: "deadbeef".to_string(),
            },
            FileEntry {
                path: "config.json".to_string(),
                size_bytes: CONFIG_JSON_SIZE,
                sha256: "beadfeed".to_string(),
            },
        ];

        let mut contents = HashMap::new();
        contents.insert("model.safetensors".to_string(), vec![0x42; 1024]);
        contents.insert("config.json".to_string(), config_json);

        let revision = ModelRevision {
            id: SAMPLE_MODEL_ID.to_string(),
            rev: SAMPLE_REV.to_string(),
            files,
            manifest_signature: None,
            torrent_url: Some(format!("/torrents/{SAMPLE_MODEL_ID}/{SAMPLE_REV}.torrent")),
            magnet_uri: Some("magnet:?xt=urn:btih:example".to_string()),
        };

        Self { revision, contents }
    }

    /// List models, optionally filtered by a case-insensitive id substring.
    pub fn catalog(&self, query: Option<&str>) -> CatalogResponse {
        let item = CatalogItem {
            id: self.revision.id.clone(),
            latest_rev: Some(self.revision.rev.clone()),
            size_bytes: Some(self.revision.files.iter().map(|f| f.size_bytes).sum()),
            torrent_url: self.revision.torrent_url.clone(),
            magnet_uri: self.revision.magnet_uri.clone(),
        };

        let items = match query.map(str::trim).filter(|q| !q.is_empty()) {
            None => vec![item],
            Some(q) => {
                let needle = q.to_lowercase();
                if item.id.to_lowercase().contains(&needle) {
                    vec![item]
                } else {
                    Vec::new()
                }
            }
        };
        CatalogResponse { items }
    }

    pub fn revision(&self, id: &str, rev: &str) -> Option<&ModelRevision> {
        (id == self.revision.id && rev == self.revision.rev).then_some(&self.revision)
    }

    /// Peers to bootstrap from. `local_peer` is appended as `demo-local` when given.
    pub fn bootstrap(
        &self,
        id: &str,
        rev: &str,
        local_peer: Option<String>,
    ) -> Option<BootstrapResponse> {
        self.revision(id, rev)?;

        let mut peers = vec![
            PeerEndpoint {
                url: "https://peer1.hswarm.net:443/.well-known/webtransport".to_string(),
                peer_id: Some("peer-1".to_string()),
            },
            PeerEndpoint {
                url: "https://peer2.hswarm.net:443/.well-known/webtransport".to_string(),
                peer_id: Some("peer-2".to_string()),
            },
        ];
        if let Some(url) = local_peer.filter(|u| !u.trim().is_empty()) {
            peers.push(PeerEndpoint {
                url,
                peer_id: Some("demo-local".to_string()),
            });
        }

        Some(BootstrapResponse {
            model_id: id.to_string(),
            rev: rev.to_string(),
            peers,
            trackers: vec![
                "udp://tracker.opentrackr.org:1337/announce".to_string(),
                "udp://tracker.torrent.eu.org:451/announce".to_string(),
            ],
            relays: vec![
                RelayInfo {
                    url: "https://relay-us.hswarm.net".to_string(),
                    region: Some("us".to_string()),
                },
                RelayInfo {
                    url: "https://relay-eu.hswarm.net".to_string(),
                    region: Some("eu".to_string()),
                },
            ],
            parameters: BootstrapParameters::default(),
        })
    }

    pub fn health(&self, id: &str, rev: &str) -> Option<SwarmHealth> {
        self.revision(id, rev)?;
        Some(SwarmHealth {
            model_id: id.to_string(),
            rev: rev.to_string(),
            active_peers: 12,
            seeders: 5,
            avg_rtt_ms: Some(120.5),
            availability: Some(0.99),
        })
    }

    pub fn torrent(&self, id: &str, rev: &str) -> Option<&'static [u8]> {
        self.revision(id, rev).map(|_| TORRENT_BYTES)
    }

    pub fn file(&self, id: &str, rev: &str, path: &str) -> Option<&[u8]> {
        self.revision(id, rev)?;
        self.contents.get(path).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_lists_sample_model() {
        let catalog = StubCatalog::new();
        let response = catalog.catalog(None);
        assert_eq!(response.items.len(), 1);
        let item = &response.items[0];
        assert_eq!(item.id, SAMPLE_MODEL_ID);
        assert_eq!(item.latest_rev.as_deref(), Some(SAMPLE_REV));
        assert_eq!(item.size_bytes, Some(1088));
        assert!(item.torrent_url.is_some());
    }

    #[test]
    fn test_catalog_query_is_case_insensitive() {
        let catalog = StubCatalog::new();
        assert_eq!(catalog.catalog(Some("Stable-Diffusion")).items.len(), 1);
        assert!(catalog.catalog(Some("llama")).items.is_empty());
        assert_eq!(catalog.catalog(Some("  ")).items.len(), 1);
    }

    #[test]
    fn test_revision_lookup() {
        let catalog = StubCatalog::new();
        let revision = catalog.revision(SAMPLE_MODEL_ID, SAMPLE_REV).unwrap();
        assert_eq!(revision.files.len(), 2);
        let config = revision
            .files
            .iter()
            .find(|f| f.path == "config.json")
            .unwrap();
        assert_eq!(config.size_bytes, 64);
        assert!(catalog.revision(SAMPLE_MODEL_ID, "other").is_none());
        assert!(catalog.revision("other/model", SAMPLE_REV).is_none());
    }

    #[test]
    fn test_bootstrap_without_local_peer() {
        let catalog = StubCatalog::new();
        let response = catalog.bootstrap(SAMPLE_MODEL_ID, SAMPLE_REV, None).unwrap();
        assert_eq!(response.peers.len(), 2);
        assert_eq!(response.trackers.len(), 2);
        assert_eq!(response.parameters.peer_degree_k, 48);
    }

    #[test]
    fn test_bootstrap_appends_local_peer() {
        let catalog = StubCatalog::new();
        let local = "https://127.0.0.1:4443/.well-known/webtransport".to_string();
        let response = catalog
            .bootstrap(SAMPLE_MODEL_ID, SAMPLE_REV, Some(local.clone()))
            .unwrap();
        let last = response.peers.last().unwrap();
        assert_eq!(last.url, local);
        assert_eq!(last.peer_id.as_deref(), Some("demo-local"));
    }

    #[test]
    fn test_bootstrap_ignores_blank_local_peer() {
        let catalog = StubCatalog::new();
        let response = catalog
            .bootstrap(SAMPLE_MODEL_ID, SAMPLE_REV, Some(String::new()))
            .unwrap();
        assert_eq!(response.peers.len(), 2);
    }

    #[test]
    fn test_unknown_revision_has_no_data() {
        let catalog = StubCatalog::new();
        assert!(catalog.bootstrap(SAMPLE_MODEL_ID, "nope", None).is_none());
        assert!(catalog.health(SAMPLE_MODEL_ID, "nope").is_none());
        assert!(catalog.torrent(SAMPLE_MODEL_ID, "nope").is_none());
        assert!(catalog.file(SAMPLE_MODEL_ID, "nope", "config.json").is_none());
    }

    #[test]
    fn test_file_contents() {
        let catalog = StubCatalog::new();
        let model = catalog
            .file(SAMPLE_MODEL_ID, SAMPLE_REV, "model.safetensors")
            .unwrap();
        assert_eq!(model.len(), 1024);
        assert!(model.iter().all(|b| *b == 0x42));
        assert!(catalog.file(SAMPLE_MODEL_ID, SAMPLE_REV, "missing.bin").is_none());
    }

    #[test]
    fn test_json_uses_camel_case_and_omits_none() {
        let catalog = StubCatalog::new();
        let revision = catalog.revision(SAMPLE_MODEL_ID, SAMPLE_REV).unwrap();
        let json = serde_json::to_value(revision).unwrap();
        assert!(json.get("torrentUrl").is_some());
        assert!(json.get("manifestSignature").is_none());
        assert_eq!(json["files"][0]["sizeBytes"], 1024);
    }
}
