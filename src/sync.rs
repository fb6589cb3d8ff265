//! Sync coordination: reconcile a collection with its external source.
//!
//! A source locator is parsed once into a [`SourceSpec`], the manifest is
//! acquired (reading a local file, fetching a URL, checking out a
//! repository, or extracting a bundle), and the resolved entry list is
//! diffed against the collection's stored membership. Unchanged manifests
//! short-circuit the whole run; unchanged documents are never re-fetched
//! when the manifest declares their hash, and never re-embedded regardless.
//!
//! Per-entry fetch failures are logged and skipped; repository and bundle
//! acquisition failures abort the sync, because the whole source is
//! unreadable.

use anyhow::{bail, Context, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::bundle;
use crate::fetch;
use crate::git;
use crate::manifest::{self, ManifestBase, MANIFEST_FILE};
use crate::models::SyncResult;
use crate::store::{sha256_hex, DocStore};

/// A source locator, resolved once at the start of sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// Local manifest file, or a directory containing `docdex.json`.
    Local(PathBuf),
    /// Remote manifest URL.
    Remote(String),
    /// Repository clone URL with optional ref and in-repo manifest path.
    Git {
        url: String,
        reference: Option<String>,
        manifest_path: Option<String>,
    },
    /// Local zip archive containing a manifest plus files.
    Bundle(PathBuf),
}

impl SourceSpec {
    /// Parse a locator string, resolving relative paths against `base_dir`.
    ///
    /// Recognized forms: `git+<url>[#ref[:manifest-path]]`, `git@...`,
    /// `*.git`, `http(s)://...`, `file://...`, `*.zip`, plain paths.
    pub fn parse(locator: &str, base_dir: &Path) -> Result<SourceSpec> {
        let trimmed = locator.trim();
        if trimmed.is_empty() {
            bail!("Empty source locator");
        }

        if let Some(rest) = trimmed.strip_prefix("git+") {
            return Ok(parse_git(rest));
        }
        if trimmed.starts_with("git@") || trimmed.ends_with(".git") {
            return Ok(parse_git(trimmed));
        }
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return Ok(SourceSpec::Remote(trimmed.to_string()));
        }

        let path = match trimmed.strip_prefix("file://") {
            Some(p) => PathBuf::from(p),
            None => {
                let p = PathBuf::from(trimmed);
                if p.is_absolute() {
                    p
                } else {
                    base_dir.join(p)
                }
            }
        };

        if path.extension().is_some_and(|ext| ext == "zip") {
            Ok(SourceSpec::Bundle(path))
        } else {
            Ok(SourceSpec::Local(path))
        }
    }

    /// Canonical locator string; identical sources always normalize
    /// identically, which keeps collection IDs stable across re-registration.
    pub fn normalized(&self) -> String {
        match self {
            SourceSpec::Local(path) => {
                format!("file://{}", path.display()).trim_end_matches('/').to_string()
            }
            SourceSpec::Remote(url) => url.trim_end_matches('/').to_string(),
            SourceSpec::Git {
                url,
                reference,
                manifest_path,
            } => {
                let mut out = format!("git+{}", url.trim_end_matches('/'));
                if let Some(r) = reference {
                    out.push('#');
                    out.push_str(r);
                    if let Some(m) = manifest_path {
                        out.push(':');
                        out.push_str(m);
                    }
                }
                out
            }
            SourceSpec::Bundle(path) => format!("bundle://{}", path.display()),
        }
    }
}

fn parse_git(s: &str) -> SourceSpec {
    let (url, fragment) = match s.split_once('#') {
        Some((u, f)) => (u, Some(f)),
        None => (s, None),
    };

    let (reference, manifest_path) = match fragment {
        Some(f) => match f.split_once(':') {
            Some((r, m)) => (non_empty(r), non_empty(m)),
            None => (non_empty(f), None),
        },
        None => (None, None),
    };

    SourceSpec::Git {
        url: url.to_string(),
        reference,
        manifest_path,
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Deterministic collection ID for a normalized locator.
pub fn collection_id(normalized_locator: &str) -> String {
    sha256_hex(normalized_locator.as_bytes())[..12].to_string()
}

/// Sync a collection from a locator string.
pub async fn sync(
    store: &DocStore,
    collection_name: &str,
    locator: &str,
    base_dir: &Path,
    force: bool,
) -> Result<SyncResult> {
    let spec = SourceSpec::parse(locator, base_dir)?;
    sync_spec(store, collection_name, &spec, force).await
}

/// Sync a collection from a parsed [`SourceSpec`].
pub async fn sync_spec(
    store: &DocStore,
    collection_name: &str,
    spec: &SourceSpec,
    force: bool,
) -> Result<SyncResult> {
    let locator = spec.normalized();
    let col_id = collection_id(&locator);

    // Ephemeral working copies must outlive the entry fetch loop.
    let mut _checkout: Option<git::GitCheckout> = None;
    let mut _bundle: Option<bundle::ExtractedBundle> = None;

    let (manifest_bytes, base) = match spec {
        SourceSpec::Local(path) => {
            let manifest_path = if path.is_dir() {
                path.join(MANIFEST_FILE)
            } else {
                path.clone()
            };
            let bytes = std::fs::read(&manifest_path)
                .with_context(|| format!("Failed to read manifest: {}", manifest_path.display()))?;
            let dir = manifest_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .to_path_buf();
            (bytes, ManifestBase::Dir(dir))
        }
        SourceSpec::Remote(url) => {
            let text = fetch::fetch_url(url)
                .await
                .with_context(|| format!("Failed to fetch manifest: {}", url))?;
            (text.into_bytes(), ManifestBase::Url(manifest::url_base(url)))
        }
        SourceSpec::Git {
            url,
            reference,
            manifest_path,
        } => {
            let checkout = git::checkout(url, reference.as_deref())?;
            let tree = git::worktree(&checkout);
            let rel = manifest_path.as_deref().unwrap_or(MANIFEST_FILE);
            let mpath = tree.join(rel);
            let bytes = std::fs::read(&mpath)
                .with_context(|| format!("Manifest {} not found in repository {}", rel, url))?;
            let dir = mpath
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .to_path_buf();
            _checkout = Some(checkout);
            (bytes, ManifestBase::Dir(dir))
        }
        SourceSpec::Bundle(path) => {
            let extracted = bundle::extract(path)?;
            let bytes = std::fs::read(extracted.manifest_path()).with_context(|| {
                format!("Failed to read bundle manifest: {}", extracted.manifest_path().display())
            })?;
            let dir = extracted.manifest_dir().to_path_buf();
            _bundle = Some(extracted);
            (bytes, ManifestBase::Dir(dir))
        }
    };

    let manifest_hash = sha256_hex(&manifest_bytes);

    if !force {
        if let Some(existing) = store.get_collection(&col_id).await? {
            if existing.manifest_hash.as_deref() == Some(manifest_hash.as_str()) {
                debug!(collection = collection_name, "manifest unchanged, sync is a no-op");
                return Ok(SyncResult::default());
            }
        }
    }

    let parsed = manifest::parse_manifest(&manifest_bytes)?;
    let entries = manifest::resolve_entries(&parsed, &base)?;

    let stored: HashMap<String, String> =
        store.list_document_ids(&col_id).await?.into_iter().collect();
    let resolved_ids: HashSet<&str> = entries.iter().map(|e| e.doc_id.as_str()).collect();

    let mut result = SyncResult {
        total: entries.len() as u64,
        ..Default::default()
    };

    for entry in &entries {
        let stored_hash = stored.get(&entry.doc_id);

        // A declared hash matching the stored one means no fetch at all.
        if let (Some(stored_hash), Some(declared)) = (stored_hash, &entry.declared_hash) {
            if stored_hash == declared {
                continue;
            }
        }

        let content = match fetch::fetch(&entry.location).await {
            Ok(content) => content,
            Err(e) => {
                warn!(doc = %entry.doc_id, error = %e, "fetch failed, skipping entry");
                continue;
            }
        };

        // The store re-hashes, so to-check entries with unchanged content
        // fall out here as no-ops.
        let changed = store.upsert(&col_id, &entry.doc_id, &content).await?;
        if changed {
            if stored_hash.is_some() {
                result.updated += 1;
            } else {
                result.added += 1;
            }
        }
    }

    let removals: Vec<String> = stored
        .keys()
        .filter(|id| !resolved_ids.contains(id.as_str()))
        .cloned()
        .collect();
    result.removed = store.delete_documents(&col_id, &removals).await?;

    let display_name = parsed
        .name
        .clone()
        .unwrap_or_else(|| collection_name.to_string());
    store
        .record_sync(
            &col_id,
            &display_name,
            &locator,
            &parsed.version,
            &parsed.description,
            &manifest_hash,
        )
        .await?;

    info!(
        collection = %display_name,
        added = result.added,
        updated = result.updated,
        removed = result.removed,
        total = result.total,
        "sync complete"
    );

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local_and_bundle() {
        let base = Path::new("/work");
        assert_eq!(
            SourceSpec::parse("docs/docdex.json", base).unwrap(),
            SourceSpec::Local(PathBuf::from("/work/docs/docdex.json"))
        );
        assert_eq!(
            SourceSpec::parse("/abs/docdex.json", base).unwrap(),
            SourceSpec::Local(PathBuf::from("/abs/docdex.json"))
        );
        assert_eq!(
            SourceSpec::parse("file:///abs/docdex.json", base).unwrap(),
            SourceSpec::Local(PathBuf::from("/abs/docdex.json"))
        );
        assert_eq!(
            SourceSpec::parse("archives/docs.zip", base).unwrap(),
            SourceSpec::Bundle(PathBuf::from("/work/archives/docs.zip"))
        );
    }

    #[test]
    fn test_parse_remote() {
        assert_eq!(
            SourceSpec::parse("https://example.com/docs/docdex.json", Path::new(".")).unwrap(),
            SourceSpec::Remote("https://example.com/docs/docdex.json".to_string())
        );
    }

    #[test]
    fn test_parse_git_forms() {
        let base = Path::new(".");
        assert_eq!(
            SourceSpec::parse("git+https://host/repo#main:docs/docdex.json", base).unwrap(),
            SourceSpec::Git {
                url: "https://host/repo".to_string(),
                reference: Some("main".to_string()),
                manifest_path: Some("docs/docdex.json".to_string()),
            }
        );
        assert_eq!(
            SourceSpec::parse("https://host/repo.git", base).unwrap(),
            SourceSpec::Git {
                url: "https://host/repo.git".to_string(),
                reference: None,
                manifest_path: None,
            }
        );
        assert_eq!(
            SourceSpec::parse("git@host:org/repo.git#v2", base).unwrap(),
            SourceSpec::Git {
                url: "git@host:org/repo.git".to_string(),
                reference: Some("v2".to_string()),
                manifest_path: None,
            }
        );
    }

    #[test]
    fn test_parse_empty_rejected() {
        assert!(SourceSpec::parse("   ", Path::new(".")).is_err());
    }

    #[test]
    fn test_collection_id_deterministic() {
        let spec_a = SourceSpec::parse("https://example.com/docs/", Path::new(".")).unwrap();
        let spec_b = SourceSpec::parse("https://example.com/docs", Path::new(".")).unwrap();
        // Trailing slash normalizes away, so both register the same collection.
        assert_eq!(
            collection_id(&spec_a.normalized()),
            collection_id(&spec_b.normalized())
        );
        assert_eq!(collection_id(&spec_a.normalized()).len(), 12);

        let other = SourceSpec::parse("https://example.org/docs", Path::new(".")).unwrap();
        assert_ne!(
            collection_id(&spec_a.normalized()),
            collection_id(&other.normalized())
        );
    }
}
