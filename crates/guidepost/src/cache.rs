//! Multi-format compressed document cache.
//!
//! The full document set is persisted in four interchangeable encodings —
//! plain JSON, gzipped JSON, bincode, and gzipped bincode — indexed by a
//! `manifest.json` that records filenames, byte sizes, version, and build
//! time. Retrieval never fails hard: a missing manifest, a missing format
//! entry, a missing file, or an undecodable file are all soft misses
//! (`None`), and callers fall back to loading the raw document from disk.
//! No prebuilt cache is the normal first-run state.
//!
//! Directory layout:
//! ```text
//! cache/
//!   manifest.json
//!   docs_cache.json
//!   docs_cache.json.gz
//!   docs_cache.bin
//!   docs_cache.bin.gz
//! ```

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Local;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::docs::{DocName, DocSet};

// ── Formats ────────────────────────────────────────────────────────

/// One of the four cache encodings.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CacheFormat {
    /// Uncompressed JSON.
    Json,
    /// Gzipped JSON.
    JsonGz,
    /// Native binary serialization.
    Bincode,
    /// Gzipped native binary serialization.
    BincodeGz,
}

impl CacheFormat {
    /// All formats, in build order.
    pub const ALL: [CacheFormat; 4] = [
        CacheFormat::Json,
        CacheFormat::JsonGz,
        CacheFormat::Bincode,
        CacheFormat::BincodeGz,
    ];

    /// The identifier used in manifests and CLI arguments.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheFormat::Json => "json",
            CacheFormat::JsonGz => "json_gz",
            CacheFormat::Bincode => "bincode",
            CacheFormat::BincodeGz => "bincode_gz",
        }
    }

    /// Canonical on-disk filename for this encoding.
    pub fn filename(&self) -> &'static str {
        match self {
            CacheFormat::Json => "docs_cache.json",
            CacheFormat::JsonGz => "docs_cache.json.gz",
            CacheFormat::Bincode => "docs_cache.bin",
            CacheFormat::BincodeGz => "docs_cache.bin.gz",
        }
    }
}

impl std::fmt::Display for CacheFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(CacheFormat::Json),
            "json_gz" => Ok(CacheFormat::JsonGz),
            "bincode" => Ok(CacheFormat::Bincode),
            "bincode_gz" => Ok(CacheFormat::BincodeGz),
            other => Err(format!(
                "unknown cache format '{other}' (expected json, json_gz, bincode, or bincode_gz)"
            )),
        }
    }
}

// ── Persisted types ────────────────────────────────────────────────

/// Index of available cache encodings, stored as `manifest.json`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CacheManifest {
    /// Format → filename within the cache directory.
    pub files: HashMap<CacheFormat, String>,
    /// Format → byte size on disk at build time.
    pub sizes: HashMap<CacheFormat, u64>,
    /// ISO-8601 build timestamp.
    pub build_time: String,
    /// Server version the bundle was built from.
    pub version: String,
}

/// The decoded payload of one cache encoding.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CacheBundle {
    pub version: String,
    pub build_time: String,
    /// Document name → content.
    pub documents: HashMap<String, String>,
    pub metadata: BundleMetadata,
}

/// Per-document size bookkeeping inside a bundle.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BundleMetadata {
    pub rules_size: usize,
    pub skills_size: usize,
    pub steering_size: usize,
    pub total_size: usize,
}

/// Availability summary returned by [`CacheStore::cache_info`].
#[derive(Serialize, Debug, Clone)]
pub struct CacheInfo {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_time: Option<String>,
    pub formats: Vec<CacheFormat>,
    pub sizes: HashMap<CacheFormat, u64>,
    /// Stable default recommendation. Always `json_gz` when a cache exists,
    /// even when [`CacheStore::optimal_format`] would pick the binary
    /// encoding; kept as observed in the original behavior.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_format: Option<CacheFormat>,
}

// ── Store ──────────────────────────────────────────────────────────

/// Builds and serves the compressed document cache.
///
/// The manifest and decoded bundles are memoized for the life of the value.
/// Owned by the server instance; requests are not interleaved, so `&mut
/// self` memoization needs no further synchronization.
#[derive(Debug)]
pub struct CacheStore {
    cache_dir: PathBuf,
    manifest: Option<CacheManifest>,
    bundles: HashMap<CacheFormat, CacheBundle>,
}

impl CacheStore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            manifest: None,
            bundles: HashMap::new(),
        }
    }

    /// The cache directory this store reads and writes.
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Load and memoize the manifest. `None` when it is missing or
    /// malformed — both are soft misses.
    pub fn load_manifest(&mut self) -> Option<&CacheManifest> {
        if self.manifest.is_none() {
            let path = self.cache_dir.join("manifest.json");
            let json = std::fs::read_to_string(&path).ok()?;
            match serde_json::from_str::<CacheManifest>(&json) {
                Ok(m) => self.manifest = Some(m),
                Err(e) => {
                    warn!("malformed cache manifest at {}: {e}", path.display());
                    return None;
                }
            }
        }
        self.manifest.as_ref()
    }

    /// Load the bundle for one format. `None` when the manifest, the format
    /// entry, or the file is missing, or the file fails to decode.
    pub fn get_cache(&mut self, format: CacheFormat) -> Option<&CacheBundle> {
        if !self.bundles.contains_key(&format) {
            let bundle = self.read_bundle(format)?;
            self.bundles.insert(format, bundle);
        }
        self.bundles.get(&format)
    }

    /// Fetch one document from the cache in the given format.
    pub fn get_document(&mut self, name: DocName, format: CacheFormat) -> Option<String> {
        self.get_cache(format)?.documents.get(name.as_str()).cloned()
    }

    /// Describe what the cache currently offers.
    pub fn cache_info(&mut self) -> CacheInfo {
        match self.load_manifest() {
            None => CacheInfo {
                available: false,
                message: Some("No cache available".to_string()),
                version: None,
                build_time: None,
                formats: Vec::new(),
                sizes: HashMap::new(),
                recommended_format: None,
            },
            Some(manifest) => {
                let mut formats: Vec<CacheFormat> = manifest.files.keys().copied().collect();
                formats.sort_by_key(|f| CacheFormat::ALL.iter().position(|c| c == f));
                CacheInfo {
                    available: true,
                    message: None,
                    version: Some(manifest.version.clone()),
                    build_time: Some(manifest.build_time.clone()),
                    formats,
                    sizes: manifest.sizes.clone(),
                    recommended_format: Some(CacheFormat::JsonGz),
                }
            }
        }
    }

    /// The most space-efficient format available.
    ///
    /// When both compressed encodings have recorded sizes, returns the
    /// smaller (ties go to `json_gz`). Otherwise falls back through
    /// `json_gz`, `bincode`, `json` as availability decreases.
    pub fn optimal_format(&mut self) -> CacheFormat {
        let Some(manifest) = self.load_manifest() else {
            return CacheFormat::Json;
        };
        let sizes = &manifest.sizes;

        match (
            sizes.get(&CacheFormat::BincodeGz),
            sizes.get(&CacheFormat::JsonGz),
        ) {
            (Some(bin_gz), Some(json_gz)) if bin_gz < json_gz => CacheFormat::BincodeGz,
            (Some(_), Some(_)) => CacheFormat::JsonGz,
            _ if sizes.contains_key(&CacheFormat::JsonGz) => CacheFormat::JsonGz,
            _ if sizes.contains_key(&CacheFormat::Bincode) => CacheFormat::Bincode,
            _ => CacheFormat::Json,
        }
    }

    // ── Build ──────────────────────────────────────────────────────

    /// Build all four encodings and the manifest from a document set.
    ///
    /// Rewrites the cache directory contents and refreshes the in-memory
    /// memos so subsequent reads see the new bundle.
    pub fn build(&mut self, docs: &DocSet, version: &str) -> Result<CacheManifest, String> {
        std::fs::create_dir_all(&self.cache_dir)
            .map_err(|e| format!("failed to create cache dir: {e}"))?;

        let bundle = CacheBundle {
            version: version.to_string(),
            build_time: Local::now().to_rfc3339(),
            documents: DocName::ALL
                .iter()
                .map(|n| (n.as_str().to_string(), docs.get(*n).to_string()))
                .collect(),
            metadata: BundleMetadata {
                rules_size: docs.rules.len(),
                skills_size: docs.skills.len(),
                steering_size: docs.steering.len(),
                total_size: docs.total_size(),
            },
        };

        let mut files = HashMap::new();
        let mut sizes = HashMap::new();
        for format in CacheFormat::ALL {
            let path = self.cache_dir.join(format.filename());
            let bytes = Self::encode(&bundle, format)?;
            std::fs::write(&path, &bytes)
                .map_err(|e| format!("failed to write {}: {e}", path.display()))?;
            debug!("wrote {} cache: {} bytes", format, bytes.len());
            files.insert(format, format.filename().to_string());
            sizes.insert(format, bytes.len() as u64);
        }

        let manifest = CacheManifest {
            files,
            sizes,
            build_time: bundle.build_time.clone(),
            version: bundle.version.clone(),
        };

        let manifest_json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| format!("failed to serialize manifest: {e}"))?;
        std::fs::write(self.cache_dir.join("manifest.json"), manifest_json)
            .map_err(|e| format!("failed to write manifest: {e}"))?;

        self.manifest = Some(manifest.clone());
        self.bundles.clear();
        Ok(manifest)
    }

    // ── Codec helpers ──────────────────────────────────────────────

    fn encode(bundle: &CacheBundle, format: CacheFormat) -> Result<Vec<u8>, String> {
        match format {
            CacheFormat::Json => serde_json::to_vec_pretty(bundle)
                .map_err(|e| format!("failed to serialize JSON cache: {e}")),
            CacheFormat::JsonGz => {
                let json = serde_json::to_vec(bundle)
                    .map_err(|e| format!("failed to serialize JSON cache: {e}"))?;
                gzip(&json)
            }
            CacheFormat::Bincode => bincode::serialize(bundle)
                .map_err(|e| format!("failed to serialize bincode cache: {e}")),
            CacheFormat::BincodeGz => {
                let bin = bincode::serialize(bundle)
                    .map_err(|e| format!("failed to serialize bincode cache: {e}"))?;
                gzip(&bin)
            }
        }
    }

    fn read_bundle(&mut self, format: CacheFormat) -> Option<CacheBundle> {
        let filename = self.load_manifest()?.files.get(&format)?.clone();
        let path = self.cache_dir.join(filename);
        // A listed file that is gone means the format is unavailable.
        if !path.exists() {
            return None;
        }
        match Self::decode(&path, format) {
            Ok(bundle) => Some(bundle),
            Err(e) => {
                warn!("unreadable {format} cache at {}: {e}", path.display());
                None
            }
        }
    }

    fn decode(path: &Path, format: CacheFormat) -> Result<CacheBundle, String> {
        let raw = std::fs::read(path).map_err(|e| format!("read failed: {e}"))?;
        let bytes = match format {
            CacheFormat::Json | CacheFormat::Bincode => raw,
            CacheFormat::JsonGz | CacheFormat::BincodeGz => gunzip(&raw)?,
        };
        match format {
            CacheFormat::Json | CacheFormat::JsonGz => {
                serde_json::from_slice(&bytes).map_err(|e| format!("JSON decode failed: {e}"))
            }
            CacheFormat::Bincode | CacheFormat::BincodeGz => {
                bincode::deserialize(&bytes).map_err(|e| format!("bincode decode failed: {e}"))
            }
        }
    }
}

fn gzip(bytes: &[u8]) -> Result<Vec<u8>, String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| format!("gzip write failed: {e}"))?;
    encoder.finish().map_err(|e| format!("gzip failed: {e}"))
}

fn gunzip(bytes: &[u8]) -> Result<Vec<u8>, String> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| format!("gunzip failed: {e}"))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_docs() -> DocSet {
        DocSet {
            rules: "# Rules\n\n- be careful\n".repeat(20),
            skills: "# Skills\n\nDebug methodically.\n".repeat(20),
            steering: "# Steering\n\nThink first.\n".repeat(20),
        }
    }

    fn write_manifest(dir: &Path, sizes: &[(CacheFormat, u64)]) {
        let manifest = CacheManifest {
            files: sizes
                .iter()
                .map(|(f, _)| (*f, f.filename().to_string()))
                .collect(),
            sizes: sizes.iter().copied().collect(),
            build_time: "2025-01-01T00:00:00+00:00".into(),
            version: "1.0.0".into(),
        };
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(
            dir.join("manifest.json"),
            serde_json::to_string(&manifest).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn absence_is_non_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::new(dir.path());

        let info = store.cache_info();
        assert!(!info.available);
        assert_eq!(info.message.as_deref(), Some("No cache available"));
        assert!(info.recommended_format.is_none());

        for format in CacheFormat::ALL {
            assert!(store.get_cache(format).is_none());
        }
        assert!(store.get_document(DocName::Rules, CacheFormat::JsonGz).is_none());
    }

    #[test]
    fn build_then_retrieve_every_format() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::new(dir.path());
        let docs = sample_docs();
        store.build(&docs, "1.2.3").unwrap();

        for format in CacheFormat::ALL {
            let content = store
                .get_document(DocName::Skills, format)
                .unwrap_or_else(|| panic!("missing skills via {format}"));
            assert_eq!(content, docs.skills);
        }

        let bundle = store.get_cache(CacheFormat::Json).unwrap();
        assert_eq!(bundle.version, "1.2.3");
        assert_eq!(bundle.metadata.total_size, docs.total_size());
    }

    #[test]
    fn build_records_real_file_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::new(dir.path());
        let manifest = store.build(&sample_docs(), "1.0.0").unwrap();

        for format in CacheFormat::ALL {
            let path = dir.path().join(&manifest.files[&format]);
            let on_disk = std::fs::metadata(&path).unwrap().len();
            assert_eq!(manifest.sizes[&format], on_disk, "size mismatch for {format}");
        }
        // Repetitive sample text compresses well.
        assert!(manifest.sizes[&CacheFormat::JsonGz] < manifest.sizes[&CacheFormat::Json]);
    }

    #[test]
    fn cache_info_reports_formats_and_recommendation() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::new(dir.path());
        store.build(&sample_docs(), "2.0.0").unwrap();

        let info = store.cache_info();
        assert!(info.available);
        assert_eq!(info.version.as_deref(), Some("2.0.0"));
        assert_eq!(info.formats.len(), 4);
        // The recommendation is a stable default, not the measured optimum.
        assert_eq!(info.recommended_format, Some(CacheFormat::JsonGz));
    }

    #[test]
    fn listed_but_missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::new(dir.path());
        store.build(&sample_docs(), "1.0.0").unwrap();

        std::fs::remove_file(dir.path().join(CacheFormat::Bincode.filename())).unwrap();
        let mut fresh = CacheStore::new(dir.path());
        assert!(fresh.get_cache(CacheFormat::Bincode).is_none());
        // Other formats still work.
        assert!(fresh.get_cache(CacheFormat::Json).is_some());
    }

    #[test]
    fn corrupt_file_is_a_soft_miss() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::new(dir.path());
        store.build(&sample_docs(), "1.0.0").unwrap();

        std::fs::write(dir.path().join(CacheFormat::JsonGz.filename()), b"not gzip").unwrap();
        let mut fresh = CacheStore::new(dir.path());
        assert!(fresh.get_cache(CacheFormat::JsonGz).is_none());
    }

    #[test]
    fn optimal_format_picks_smaller_compressed_encoding() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            &[(CacheFormat::BincodeGz, 100), (CacheFormat::JsonGz, 200)],
        );
        let mut store = CacheStore::new(dir.path());
        assert_eq!(store.optimal_format(), CacheFormat::BincodeGz);

        let dir2 = tempfile::tempdir().unwrap();
        write_manifest(
            dir2.path(),
            &[(CacheFormat::BincodeGz, 300), (CacheFormat::JsonGz, 200)],
        );
        let mut store2 = CacheStore::new(dir2.path());
        assert_eq!(store2.optimal_format(), CacheFormat::JsonGz);
    }

    #[test]
    fn optimal_format_fallback_chain() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), &[(CacheFormat::JsonGz, 50), (CacheFormat::Json, 90)]);
        assert_eq!(CacheStore::new(dir.path()).optimal_format(), CacheFormat::JsonGz);

        let dir2 = tempfile::tempdir().unwrap();
        write_manifest(dir2.path(), &[(CacheFormat::Bincode, 80), (CacheFormat::Json, 90)]);
        assert_eq!(CacheStore::new(dir2.path()).optimal_format(), CacheFormat::Bincode);

        let dir3 = tempfile::tempdir().unwrap();
        write_manifest(dir3.path(), &[(CacheFormat::Json, 90)]);
        assert_eq!(CacheStore::new(dir3.path()).optimal_format(), CacheFormat::Json);

        // No manifest at all.
        let dir4 = tempfile::tempdir().unwrap();
        assert_eq!(CacheStore::new(dir4.path()).optimal_format(), CacheFormat::Json);
    }

    #[test]
    fn malformed_manifest_is_a_soft_miss() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("manifest.json"), "{ not json").unwrap();
        let mut store = CacheStore::new(dir.path());
        assert!(store.load_manifest().is_none());
        assert!(store.get_cache(CacheFormat::JsonGz).is_none());
        assert!(!store.cache_info().available);
    }

    #[test]
    fn rebuild_refreshes_memoized_bundles() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::new(dir.path());
        let mut docs = sample_docs();
        store.build(&docs, "1.0.0").unwrap();
        assert_eq!(
            store.get_document(DocName::Rules, CacheFormat::Json).unwrap(),
            docs.rules
        );

        docs.rules = "# New rules\n".to_string();
        store.build(&docs, "1.0.1").unwrap();
        assert_eq!(
            store.get_document(DocName::Rules, CacheFormat::Json).unwrap(),
            "# New rules\n"
        );
    }
}
