use regex::Regex;
use tracing::warn;
use url::Url;

use crate::ExplorerError;

/// File extensions that mark a URL as a downloadable resource rather than
/// a page worth rendering.
const RESOURCE_EXTENSIONS: [&str; 39] = [
    "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "bmp", "avif", "css", "js", "mjs", "map",
    "woff", "woff2", "ttf", "otf", "eot", "zip", "tar", "gz", "rar", "7z", "mp3", "mp4", "avi",
    "mov", "webm", "wav", "ogg", "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "csv", "xml",
];

/// Canonical form of a URL for dedup purposes: no fragment, optionally no
/// query, and at most one trailing slash stripped from a non-root path.
/// Unparseable input comes back unchanged.
pub fn normalize(url: &str, remove_query: bool) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    parsed.set_fragment(None);
    if remove_query {
        parsed.set_query(None);
    }
    let path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        parsed.set_path(&path[..path.len() - 1]);
    }
    parsed.to_string()
}

/// Whether a URL belongs to the same origin (scheme, host and port) as the
/// base. Unparseable URLs are external.
pub fn is_internal(url: &str, base: &Url) -> bool {
    Url::parse(url)
        .map(|parsed| parsed.origin() == base.origin())
        .unwrap_or(false)
}

/// Compile a shell-style glob (`*` and `?`) into a case-insensitive,
/// fully anchored regex.
pub fn glob_to_regex(glob: &str) -> Option<Regex> {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push_str("(?i)^");
    for ch in glob.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            _ => pattern.push_str(&regex::escape(&ch.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).ok()
}

fn compile_globs(globs: &[String]) -> Vec<Regex> {
    globs
        .iter()
        .filter_map(|glob| {
            let regex = glob_to_regex(glob);
            if regex.is_none() {
                warn!("Ignoring unusable pattern '{}'", glob);
            }
            regex
        })
        .collect()
}

/// Decides which URLs the explorer is allowed to visit: same origin as the
/// start URL, http(s) only, not a static resource, and inside the
/// include/exclude patterns. Patterns match against the URL path only.
pub struct UrlFilter {
    base: Url,
    remove_query: bool,
    exclude: Vec<Regex>,
    include: Vec<Regex>,
}

impl UrlFilter {
    pub fn new(
        base_url: &str,
        exclude: &[String],
        include: &[String],
        remove_query: bool,
    ) -> Result<Self, ExplorerError> {
        let base = Url::parse(base_url)
            .map_err(|e| ExplorerError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        Ok(Self {
            base,
            remove_query,
            exclude: compile_globs(exclude),
            include: compile_globs(include),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn normalize(&self, url: &str) -> String {
        normalize(url, self.remove_query)
    }

    pub fn should_crawl(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return false;
        }
        if parsed.origin() != self.base.origin() {
            return false;
        }
        if has_resource_extension(&parsed) {
            return false;
        }
        let path = parsed.path();
        if self.exclude.iter().any(|re| re.is_match(path)) {
            return false;
        }
        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(path)) {
            return false;
        }
        true
    }
}

fn has_resource_extension(url: &Url) -> bool {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("");
    let Some((_, extension)) = segment.rsplit_once('.') else {
        return false;
    };
    RESOURCE_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_fragment() {
        assert_eq!(
            normalize("https://site.test/docs#intro", false),
            "https://site.test/docs"
        );
    }

    #[test]
    fn test_normalize_query_handling() {
        assert_eq!(
            normalize("https://site.test/search?q=x", false),
            "https://site.test/search?q=x"
        );
        assert_eq!(
            normalize("https://site.test/search?q=x", true),
            "https://site.test/search"
        );
    }

    #[test]
    fn test_normalize_trailing_slash() {
        assert_eq!(
            normalize("https://site.test/docs/", false),
            "https://site.test/docs"
        );
        // root path keeps its slash
        assert_eq!(normalize("https://site.test/", false), "https://site.test/");
        assert_eq!(normalize("https://site.test", false), "https://site.test/");
    }

    #[test]
    fn test_normalize_leaves_malformed_input_alone() {
        assert_eq!(normalize("not a url", false), "not a url");
    }

    #[test]
    fn test_is_internal_compares_origins() {
        let base = Url::parse("https://site.test/start").unwrap();
        assert!(is_internal("https://site.test/other", &base));
        assert!(!is_internal("https://blog.site.test/", &base));
        assert!(!is_internal("http://site.test/", &base));
        assert!(!is_internal("https://site.test:8443/", &base));
        assert!(!is_internal("garbage", &base));
    }

    #[test]
    fn test_glob_is_case_insensitive_and_anchored() {
        let re = glob_to_regex("/admin/*").unwrap();
        assert!(re.is_match("/admin/users"));
        assert!(re.is_match("/Admin/Users"));
        assert!(!re.is_match("/site/admin/users"));

        let re = glob_to_regex("/page-?").unwrap();
        assert!(re.is_match("/page-1"));
        assert!(!re.is_match("/page-12"));
    }

    fn filter(exclude: &[&str], include: &[&str]) -> UrlFilter {
        let exclude: Vec<String> = exclude.iter().map(|s| s.to_string()).collect();
        let include: Vec<String> = include.iter().map(|s| s.to_string()).collect();
        UrlFilter::new("https://site.test/", &exclude, &include, false).unwrap()
    }

    #[test]
    fn test_should_crawl_rejects_external_and_non_http() {
        let f = filter(&[], &[]);
        assert!(f.should_crawl("https://site.test/page"));
        assert!(!f.should_crawl("https://elsewhere.test/page"));
        assert!(!f.should_crawl("ftp://site.test/page"));
        assert!(!f.should_crawl("not a url"));
    }

    #[test]
    fn test_should_crawl_rejects_resources() {
        let f = filter(&[], &[]);
        assert!(!f.should_crawl("https://site.test/logo.png"));
        assert!(!f.should_crawl("https://site.test/report.PDF"));
        assert!(!f.should_crawl("https://site.test/bundle.min.js"));
        assert!(f.should_crawl("https://site.test/v1.2-release-notes"));
    }

    #[test]
    fn test_should_crawl_applies_exclude_patterns() {
        let f = filter(&["/admin/*", "/logout"], &[]);
        assert!(!f.should_crawl("https://site.test/admin/users"));
        assert!(!f.should_crawl("https://site.test/logout"));
        assert!(f.should_crawl("https://site.test/about"));
    }

    #[test]
    fn test_should_crawl_include_list_gates_everything_else() {
        let f = filter(&[], &["/docs/*"]);
        assert!(f.should_crawl("https://site.test/docs/intro"));
        assert!(!f.should_crawl("https://site.test/pricing"));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let f = filter(&["/docs/internal/*"], &["/docs/*"]);
        assert!(f.should_crawl("https://site.test/docs/intro"));
        assert!(!f.should_crawl("https://site.test/docs/internal/secrets"));
    }
}
