use std::collections::HashSet;

use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::norm::UrlFilter;

/// A crawlable link found on a page, with the raw href and anchor text
/// kept for diagnostics.
#[derive(Debug, Clone)]
pub struct PageLink {
    pub url: String,
    pub original_href: String,
    pub text: String,
}

/// Pull crawlable same-site links out of rendered HTML.
///
/// Relative hrefs resolve against the document's `<base href>` when one is
/// present, otherwise against the page URL. Anchors, `javascript:`,
/// `mailto:`, `tel:` and `data:` hrefs are skipped, and each normalized
/// target appears at most once.
pub fn extract_links(html: &str, page_url: &str, filter: &UrlFilter) -> Vec<PageLink> {
    let Ok(page_base) = Url::parse(page_url) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let base = document_base(&document, &page_base);

    let Ok(anchor) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for element in document.select(&anchor) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
            || href.starts_with("data:")
        {
            continue;
        }
        let Ok(joined) = base.join(href) else {
            debug!("Skipping unresolvable href '{}'", href);
            continue;
        };
        let normalized = filter.normalize(joined.as_str());
        if !filter.should_crawl(&normalized) {
            continue;
        }
        if !seen.insert(normalized.clone()) {
            continue;
        }
        let text = element.text().collect::<String>().trim().to_string();
        links.push(PageLink {
            url: normalized,
            original_href: href.to_string(),
            text,
        });
    }
    links
}

fn document_base(document: &Html, page_url: &Url) -> Url {
    let Ok(selector) = Selector::parse("base[href]") else {
        return page_url.clone();
    };
    if let Some(element) = document.select(&selector).next() {
        if let Some(href) = element.value().attr("href") {
            if let Ok(joined) = page_url.join(href) {
                return joined;
            }
        }
    }
    page_url.clone()
}
