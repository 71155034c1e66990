//! Locating the UI bundle.
//!
//! Resolution happens once, before the first navigation, and the result is
//! never recomputed during the session. Search order, first match wins:
//!
//! 1. Bundle under the working directory (`<base>/wwwroot/index.html`).
//!    Served through the local API server when one is running, with a
//!    cache-busting `?v=` parameter; otherwise opened as a `file://` URL.
//! 2. Build output in an ancestor directory (`<ancestor>/frontend/dist`),
//!    copied into the bundle location, then step 1 is retried once.
//! 3. The API server's root.
//! 4. A diagnostic document telling the operator what to build and where.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};
use url::Url;

use crate::bridge;
use crate::config::ContentConfig;
use crate::error::HostError;

/// What the host should display, decided once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedContentSource {
    /// Bundle found in place. `served_at` is set when the API server hosts it.
    LocalBundle { path: PathBuf, served_at: Option<Url> },
    /// Bundle produced by copying a build output into place.
    CopiedFromBuildOutput {
        path: PathBuf,
        source: PathBuf,
        served_at: Option<Url>,
    },
    /// No bundle on disk, the API server's root is shown instead.
    HostedFallback { base_url: Url },
    /// Nothing to show. Carries remediation text for the operator.
    Diagnostic { message: String },
}

/// What the rendering surface is actually asked to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationTarget {
    Url(Url),
    Document(String),
}

impl ResolvedContentSource {
    pub fn navigation_target(&self) -> NavigationTarget {
        match self {
            Self::LocalBundle {
                served_at: Some(url),
                ..
            }
            | Self::CopiedFromBuildOutput {
                served_at: Some(url),
                ..
            } => NavigationTarget::Url(url.clone()),
            Self::LocalBundle { path, served_at: None }
            | Self::CopiedFromBuildOutput {
                path,
                served_at: None,
                ..
            } => match Url::from_file_path(path) {
                Ok(url) => NavigationTarget::Url(url),
                Err(()) => NavigationTarget::Document(diagnostic_html(&format!(
                    "The UI bundle path {} cannot be expressed as a file URL.",
                    path.display()
                ))),
            },
            Self::HostedFallback { base_url } => NavigationTarget::Url(base_url.clone()),
            Self::Diagnostic { message } => NavigationTarget::Document(diagnostic_html(message)),
        }
    }

    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Self::Diagnostic { .. })
    }

    /// The bundle's entry file and the URL it is loaded through. `None` when
    /// the host has no file on disk to answer that URL with.
    pub fn entry_document(&self) -> Option<EntryDocument> {
        let path = match self {
            Self::LocalBundle { path, .. } | Self::CopiedFromBuildOutput { path, .. } => path,
            Self::HostedFallback { .. } | Self::Diagnostic { .. } => return None,
        };
        match self.navigation_target() {
            NavigationTarget::Url(url) => Some(EntryDocument {
                url,
                path: path.clone(),
            }),
            NavigationTarget::Document(_) => None,
        }
    }
}

/// Entry document answered by the host itself, so that its init scripts are
/// part of the markup rather than evaluated after parsing has started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDocument {
    pub url: Url,
    pub path: PathBuf,
}

impl EntryDocument {
    /// Same document whatever the query string or fragment.
    pub fn matches(&self, url: &Url) -> bool {
        let bare = |url: &Url| {
            let mut url = url.clone();
            url.set_query(None);
            url.set_fragment(None);
            url
        };
        bare(&self.url) == bare(url)
    }

    /// Reads the entry file and inlines `scripts` at the top of its `<head>`.
    pub fn render(&self, scripts: &[String]) -> io::Result<String> {
        let html = fs::read_to_string(&self.path)?;
        Ok(bridge::inject_into_head(&html, scripts))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache busting
// ─────────────────────────────────────────────────────────────────────────────

/// Millisecond timestamps, strictly increasing even within one millisecond.
#[derive(Debug, Default)]
pub struct CacheBuster {
    last: AtomicU64,
}

impl CacheBuster {
    pub fn next(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolver
// ─────────────────────────────────────────────────────────────────────────────

pub struct ContentResolver {
    config: ContentConfig,
    buster: CacheBuster,
}

impl ContentResolver {
    pub fn new(config: ContentConfig) -> Self {
        Self {
            config,
            buster: CacheBuster::default(),
        }
    }

    /// Expected entry document under `base_dir`.
    pub fn bundle_entry(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(&self.config.bundle_dir).join(&self.config.entry)
    }

    /// Build-output candidates, nearest ancestor first.
    pub fn build_output_candidates(&self, base_dir: &Path) -> Vec<PathBuf> {
        base_dir
            .ancestors()
            .skip(1)
            .take(self.config.search_depth)
            .map(|ancestor| ancestor.join(&self.config.build_output))
            .collect()
    }

    pub fn resolve(&self, base_dir: &Path, api_base_url: Option<&Url>) -> ResolvedContentSource {
        let entry = self.bundle_entry(base_dir);

        // 1. Bundle already in place.
        if entry.is_file() {
            info!(path = %entry.display(), "UI bundle found");
            return ResolvedContentSource::LocalBundle {
                served_at: api_base_url.and_then(|base| self.served_url(base)),
                path: entry,
            };
        }

        // 2. Build output in an ancestor directory.
        let candidates = self.build_output_candidates(base_dir);
        if let Some(source) = candidates.iter().find(|dir| dir.is_dir()) {
            let target = base_dir.join(&self.config.bundle_dir);
            match copy_dir_recursive(source, &target) {
                Ok(files) => {
                    info!(from = %source.display(), to = %target.display(), files, "Build output copied into bundle location");
                    if entry.is_file() {
                        return ResolvedContentSource::CopiedFromBuildOutput {
                            served_at: api_base_url.and_then(|base| self.served_url(base)),
                            path: entry,
                            source: source.clone(),
                        };
                    }
                    warn!(path = %entry.display(), "Copied build output has no entry document");
                }
                Err(e) => {
                    error!(from = %source.display(), to = %target.display(), error = %e, "Copying build output failed");
                    return ResolvedContentSource::Diagnostic {
                        message: self.remediation(&entry, &candidates, Some(&e.to_string())),
                    };
                }
            }
        }

        // 3. Whatever the API server has at its root.
        if let Some(base) = api_base_url {
            warn!(url = %base, "No UI bundle on disk, falling back to API server");
            return ResolvedContentSource::HostedFallback {
                base_url: base.clone(),
            };
        }

        // 4. Nothing.
        error!(error = %self.not_found(base_dir), "No UI content available");
        ResolvedContentSource::Diagnostic {
            message: self.remediation(&entry, &candidates, None),
        }
    }

    /// Every location searched for `base_dir`, entry document first.
    pub fn not_found(&self, base_dir: &Path) -> HostError {
        let mut searched = vec![self.bundle_entry(base_dir)];
        searched.extend(self.build_output_candidates(base_dir));
        HostError::ContentNotFound { searched }
    }

    fn served_url(&self, base: &Url) -> Option<Url> {
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        match base.join(&self.config.entry) {
            Ok(mut url) => {
                url.set_query(Some(&format!("v={}", self.buster.next())));
                Some(url)
            }
            Err(e) => {
                warn!(url = %base, error = %e, "Cannot build bundle URL, opening file directly");
                None
            }
        }
    }

    fn remediation(&self, entry: &Path, candidates: &[PathBuf], copy_error: Option<&str>) -> String {
        let mut message = format!(
            "The kiosk UI could not be found.\n\n\
             Expected bundle entry:\n  {}\n\n\
             Build output searched:\n",
            entry.display()
        );
        for candidate in candidates {
            message.push_str(&format!("  {}\n", candidate.display()));
        }
        if let Some(err) = copy_error {
            message.push_str(&format!("\nCopying the build output failed: {err}\n"));
        }
        message.push_str(&format!(
            "\nRun `{}` in the frontend project, then restart the kiosk.",
            self.config.build_command
        ));
        message
    }
}

/// Copies `src` into `dst`, creating directories and overwriting files.
/// Returns the number of files copied.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<u64> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copied += copy_dir_recursive(&entry.path(), &to)?;
        } else {
            fs::copy(entry.path(), &to)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Standalone HTML page rendered in place of the UI.
pub fn diagnostic_html(message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Kiosk: content unavailable</title>
<style>
body {{
    font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
    background: #1a1a1a; color: #e0e0e0;
    max-width: 760px; margin: 0 auto; padding: 48px 24px;
}}
h1 {{ font-size: 24px; color: #ff8a6a; margin-bottom: 16px; }}
pre {{
    background: #2a2a2a; border: 1px solid #444; border-radius: 4px;
    padding: 16px; white-space: pre-wrap; font-size: 13px;
}}
</style>
</head>
<body>
<h1>Content unavailable</h1>
<pre>{}</pre>
</body>
</html>"#,
        html_escape(message)
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ContentResolver {
        ContentResolver::new(ContentConfig::default())
    }

    fn api() -> Url {
        Url::parse("http://127.0.0.1:5123").unwrap()
    }

    /// `<tmp>/repo/frontend/dist` + `<tmp>/repo/host` as working directory.
    fn monorepo() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let host = tmp.path().join("repo").join("host");
        let dist = tmp.path().join("repo").join("frontend").join("dist");
        fs::create_dir_all(&host).unwrap();
        fs::create_dir_all(dist.join("assets")).unwrap();
        fs::write(dist.join("index.html"), "<html>built</html>").unwrap();
        fs::write(dist.join("assets").join("app.js"), "console.log(1)").unwrap();
        (tmp, host, dist)
    }

    fn write_bundle(base: &Path) {
        let dir = base.join("wwwroot");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("index.html"), "<html>local</html>").unwrap();
    }

    #[test]
    fn test_local_bundle_without_api_opens_file() {
        let tmp = tempfile::tempdir().unwrap();
        write_bundle(tmp.path());
        let source = resolver().resolve(tmp.path(), None);
        match &source {
            ResolvedContentSource::LocalBundle { path, served_at } => {
                assert!(path.ends_with("wwwroot/index.html"));
                assert!(served_at.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        match source.navigation_target() {
            NavigationTarget::Url(url) => assert_eq!(url.scheme(), "file"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_local_bundle_with_api_is_served_with_increasing_cache_bust() {
        let tmp = tempfile::tempdir().unwrap();
        write_bundle(tmp.path());
        let resolver = resolver();

        let bust = |source: ResolvedContentSource| -> u64 {
            let ResolvedContentSource::LocalBundle {
                served_at: Some(url),
                ..
            } = source
            else {
                panic!("expected served bundle");
            };
            assert_eq!(url.path(), "/index.html");
            url.query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.parse().unwrap())
                .unwrap()
        };

        let mut previous = 0;
        for _ in 0..20 {
            let v = bust(resolver.resolve(tmp.path(), Some(&api())));
            assert!(v > previous);
            previous = v;
        }
    }

    #[test]
    fn test_build_output_is_copied_then_used() {
        let (_tmp, host, dist) = monorepo();
        let source = resolver().resolve(&host, None);
        match source {
            ResolvedContentSource::CopiedFromBuildOutput {
                path,
                source,
                served_at,
            } => {
                assert_eq!(source, dist);
                assert!(path.is_file());
                assert!(served_at.is_none());
                assert!(host.join("wwwroot").join("assets").join("app.js").is_file());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_copy_overwrites_existing_files() {
        let (_tmp, host, _dist) = monorepo();
        let stale = host.join("wwwroot").join("assets");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("app.js"), "stale").unwrap();

        resolver().resolve(&host, None);
        assert_eq!(fs::read_to_string(stale.join("app.js")).unwrap(), "console.log(1)");
    }

    #[test]
    fn test_build_output_without_entry_falls_back_to_api() {
        let tmp = tempfile::tempdir().unwrap();
        let host = tmp.path().join("repo").join("host");
        fs::create_dir_all(&host).unwrap();
        fs::create_dir_all(tmp.path().join("repo").join("frontend").join("dist")).unwrap();

        let source = resolver().resolve(&host, Some(&api()));
        assert_eq!(source, ResolvedContentSource::HostedFallback { base_url: api() });
    }

    #[test]
    fn test_api_fallback_when_nothing_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let source = resolver().resolve(tmp.path(), Some(&api()));
        assert_eq!(source, ResolvedContentSource::HostedFallback { base_url: api() });
    }

    #[test]
    fn test_diagnostic_lists_candidate_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let host = tmp.path().join("a").join("b");
        fs::create_dir_all(&host).unwrap();
        let resolver = resolver();

        let source = resolver.resolve(&host, None);
        let ResolvedContentSource::Diagnostic { message } = &source else {
            panic!("expected diagnostic, got {source:?}");
        };
        assert!(message.contains(&resolver.bundle_entry(&host).display().to_string()));
        for candidate in resolver.build_output_candidates(&host) {
            assert!(message.contains(&candidate.display().to_string()));
        }
        assert!(message.contains("npm run build"));
        assert!(matches!(source.navigation_target(), NavigationTarget::Document(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_entry_document_carries_init_script_first() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("wwwroot");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("index.html"),
            "<html><head><script src=\"app.js\"></script><script>boot()</script></head></html>",
        )
        .unwrap();

        let source = resolver().resolve(tmp.path(), Some(&api()));
        let entry = source.entry_document().unwrap();
        assert_eq!(entry.path, dir.join("index.html"));

        let served = Url::parse(&format!("{}&t=1#top", entry.url)).unwrap();
        assert!(entry.matches(&served));
        assert!(!entry.matches(&api().join("other.html").unwrap()));

        let html = entry.render(&["window.kioskBridge = {};".to_string()]).unwrap();
        let first_script = html.find("<script").unwrap();
        assert_eq!(
            &html[first_script..first_script + 40],
            "<script>window.kioskBridge = {};</script"
        );
        assert!(first_script < html.find("app.js").unwrap());
    }

    #[test]
    fn test_file_bundle_entry_and_no_entry_for_fallbacks() {
        let tmp = tempfile::tempdir().unwrap();
        write_bundle(tmp.path());
        let entry = resolver().resolve(tmp.path(), None).entry_document().unwrap();
        assert_eq!(entry.url.scheme(), "file");

        let hosted = ResolvedContentSource::HostedFallback { base_url: api() };
        assert!(hosted.entry_document().is_none());
        let diagnostic = ResolvedContentSource::Diagnostic { message: "x".into() };
        assert!(diagnostic.entry_document().is_none());
    }

    #[test]
    fn test_not_found_names_every_searched_path() {
        let tmp = tempfile::tempdir().unwrap();
        let host = tmp.path().join("a").join("b");
        let err = resolver().not_found(&host);
        let HostError::ContentNotFound { searched } = &err else {
            panic!("unexpected {err:?}");
        };
        assert_eq!(searched[0], host.join("wwwroot").join("index.html"));
        assert_eq!(searched[1], tmp.path().join("a").join("frontend").join("dist"));
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("wwwroot"));
    }

    #[test]
    fn test_copy_failure_short_circuits_to_diagnostic() {
        let (_tmp, host, _dist) = monorepo();
        // A file where the bundle directory should be makes the copy fail.
        fs::write(host.join("wwwroot"), "not a directory").unwrap();

        let source = resolver().resolve(&host, Some(&api()));
        let ResolvedContentSource::Diagnostic { message } = source else {
            panic!("copy failure must not fall back to the API");
        };
        assert!(message.contains("Copying the build output failed"));
    }

    #[test]
    fn test_candidates_respect_search_depth() {
        let resolver = ContentResolver::new(ContentConfig {
            search_depth: 2,
            ..ContentConfig::default()
        });
        let candidates = resolver.build_output_candidates(Path::new("/a/b/c/d"));
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/a/b/c/frontend/dist"),
                PathBuf::from("/a/b/frontend/dist"),
            ]
        );
    }

    #[test]
    fn test_diagnostic_html_escapes_message() {
        let html = diagnostic_html("<script>alert(1)</script>");
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>alert"));
    }

    #[test]
    fn test_cache_buster_strictly_increasing() {
        let buster = CacheBuster::default();
        let a = buster.next();
        let b = buster.next();
        let c = buster.next();
        assert!(a < b && b < c);
    }
}
