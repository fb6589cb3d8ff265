//! Manifest parsing and source-entry resolution.
//!
//! A manifest (`docdex.json`) declares what a collection contains: either a
//! glob pattern set expanded against a base directory, or an explicit list
//! of file entries. The two shapes are a tagged union so every consumer
//! matches exhaustively.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Default manifest file name looked up inside directories, checkouts, and
/// bundles.
pub const MANIFEST_FILE: &str = "docdex.json";

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub sources: ManifestSources,
}

/// What a manifest declares: globs or an explicit file list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestSources {
    Glob(GlobSource),
    Files(Vec<FileEntry>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlobSource {
    pub patterns: Vec<String>,
    #[serde(default = "default_base")]
    pub base: String,
}

fn default_base() -> String {
    ".".to_string()
}

/// One explicit manifest entry. Exactly one of `path`/`url` must be set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileEntry {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Pre-computed content hash enabling fetch-free skip decisions.
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Where a manifest's relative references resolve against.
#[derive(Debug, Clone)]
pub enum ManifestBase {
    /// Directory containing the manifest file.
    Dir(PathBuf),
    /// Base URL of a remotely-fetched manifest (ends with `/`).
    Url(String),
}

/// Where one resolved entry's content comes from.
#[derive(Debug, Clone)]
pub enum EntryLocation {
    File(PathBuf),
    Url(String),
}

/// Flat entry produced by resolving a manifest.
#[derive(Debug, Clone)]
pub struct ResolvedEntry {
    pub doc_id: String,
    pub location: EntryLocation,
    pub declared_hash: Option<String>,
}

pub fn parse_manifest(bytes: &[u8]) -> Result<Manifest> {
    let manifest: Manifest =
        serde_json::from_slice(bytes).with_context(|| "Failed to parse manifest")?;

    if let ManifestSources::Files(ref entries) = manifest.sources {
        for (i, entry) in entries.iter().enumerate() {
            match (&entry.path, &entry.url) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => bail!("Manifest entry {} must set exactly one of path/url", i),
            }
        }
    }

    Ok(manifest)
}

/// Expand a manifest into a flat, deterministically-ordered entry list.
pub fn resolve_entries(manifest: &Manifest, base: &ManifestBase) -> Result<Vec<ResolvedEntry>> {
    match &manifest.sources {
        ManifestSources::Glob(glob) => match base {
            ManifestBase::Dir(dir) => expand_globs(glob, dir),
            ManifestBase::Url(_) => {
                bail!("Glob sources require a local manifest; remote manifests must list files")
            }
        },
        ManifestSources::Files(entries) => entries
            .iter()
            .map(|entry| resolve_file_entry(entry, base))
            .collect(),
    }
}

fn resolve_file_entry(entry: &FileEntry, base: &ManifestBase) -> Result<ResolvedEntry> {
    if let Some(ref url) = entry.url {
        return Ok(ResolvedEntry {
            doc_id: url.clone(),
            location: EntryLocation::Url(url.clone()),
            declared_hash: entry.sha256.clone(),
        });
    }

    let path = entry
        .path
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Manifest entry has neither path nor url"))?;

    let location = match base {
        ManifestBase::Dir(dir) => EntryLocation::File(dir.join(path)),
        ManifestBase::Url(base_url) => EntryLocation::Url(join_url(base_url, path)),
    };

    Ok(ResolvedEntry {
        doc_id: path.clone(),
        location,
        declared_hash: entry.sha256.clone(),
    })
}

fn expand_globs(glob: &GlobSource, manifest_dir: &Path) -> Result<Vec<ResolvedEntry>> {
    let root = manifest_dir.join(&glob.base);
    if !root.exists() {
        bail!("Glob base does not exist: {}", root.display());
    }

    let include_set = build_globset(&glob.patterns)?;
    let exclude_set = build_globset(&[
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ])?;

    let mut entries = Vec::new();

    for entry in WalkDir::new(&root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(&root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        entries.push(ResolvedEntry {
            doc_id: rel_str,
            location: EntryLocation::File(path.to_path_buf()),
            declared_hash: None,
        });
    }

    // Sort for deterministic ordering
    entries.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));

    Ok(entries)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Join a relative path onto a base URL (base is expected to end with `/`).
fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base, path.trim_start_matches('/'))
}

/// Base URL of a manifest URL: everything up to and including the last `/`.
pub fn url_base(manifest_url: &str) -> String {
    match manifest_url.rfind('/') {
        Some(pos) => manifest_url[..=pos].to_string(),
        None => format!("{}/", manifest_url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_glob_manifest() {
        let json = r#"{
            "name": "Docs",
            "version": "1.0.0",
            "sources": { "glob": { "patterns": ["**/*.md"], "base": "docs" } }
        }"#;
        let manifest = parse_manifest(json.as_bytes()).unwrap();
        assert_eq!(manifest.name.as_deref(), Some("Docs"));
        match manifest.sources {
            ManifestSources::Glob(ref glob) => {
                assert_eq!(glob.patterns, vec!["**/*.md"]);
                assert_eq!(glob.base, "docs");
            }
            ManifestSources::Files(_) => panic!("expected glob sources"),
        }
    }

    #[test]
    fn test_parse_file_list_manifest() {
        let json = r#"{
            "sources": { "files": [
                { "path": "guide.md", "sha256": "abc123" },
                { "url": "https://example.com/api.md" }
            ] }
        }"#;
        let manifest = parse_manifest(json.as_bytes()).unwrap();
        match manifest.sources {
            ManifestSources::Files(ref entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].sha256.as_deref(), Some("abc123"));
            }
            ManifestSources::Glob(_) => panic!("expected file sources"),
        }
    }

    #[test]
    fn test_entry_must_have_exactly_one_location() {
        let both = r#"{"sources": {"files": [{"path": "a.md", "url": "https://x/a.md"}]}}"#;
        assert!(parse_manifest(both.as_bytes()).is_err());
        let neither = r#"{"sources": {"files": [{"sha256": "abc"}]}}"#;
        assert!(parse_manifest(neither.as_bytes()).is_err());
    }

    #[test]
    fn test_glob_expansion() {
        let tmp = tempfile::tempdir().unwrap();
        let docs = tmp.path().join("docs");
        std::fs::create_dir_all(docs.join("nested")).unwrap();
        std::fs::write(docs.join("b.md"), "b").unwrap();
        std::fs::write(docs.join("a.md"), "a").unwrap();
        std::fs::write(docs.join("nested/c.md"), "c").unwrap();
        std::fs::write(docs.join("skip.txt"), "skip").unwrap();

        let manifest = parse_manifest(
            br#"{"sources": {"glob": {"patterns": ["**/*.md"], "base": "docs"}}}"#,
        )
        .unwrap();
        let entries =
            resolve_entries(&manifest, &ManifestBase::Dir(tmp.path().to_path_buf())).unwrap();

        let ids: Vec<&str> = entries.iter().map(|e| e.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["a.md", "b.md", "nested/c.md"]);
        for entry in &entries {
            assert!(matches!(entry.location, EntryLocation::File(_)));
            assert!(entry.declared_hash.is_none());
        }
    }

    #[test]
    fn test_glob_against_remote_base_rejected() {
        let manifest =
            parse_manifest(br#"{"sources": {"glob": {"patterns": ["**/*.md"]}}}"#).unwrap();
        let result = resolve_entries(
            &manifest,
            &ManifestBase::Url("https://example.com/docs/".to_string()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_file_entries_resolve_against_url_base() {
        let manifest = parse_manifest(
            br#"{"sources": {"files": [
                {"path": "guide/intro.md"},
                {"url": "https://elsewhere.com/x.md"}
            ]}}"#,
        )
        .unwrap();
        let entries = resolve_entries(
            &manifest,
            &ManifestBase::Url("https://example.com/docs/".to_string()),
        )
        .unwrap();

        assert_eq!(entries[0].doc_id, "guide/intro.md");
        match &entries[0].location {
            EntryLocation::Url(url) => {
                assert_eq!(url, "https://example.com/docs/guide/intro.md")
            }
            EntryLocation::File(_) => panic!("expected url location"),
        }
        assert_eq!(entries[1].doc_id, "https://elsewhere.com/x.md");
    }

    #[test]
    fn test_url_base() {
        assert_eq!(
            url_base("https://example.com/docs/docdex.json"),
            "https://example.com/docs/"
        );
    }
}
