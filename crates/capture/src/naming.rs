use url::Url;

const MAX_SLUG_LEN: usize = 120;

/// Lowercase, ASCII-alphanumeric-and-dashes form of an arbitrary string.
/// Empty input collapses to "home" so the site root gets a usable name.
pub fn sanitize_slug(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut last_dash = true;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "home".to_string()
    } else {
        slug
    }
}

/// Stable file-name slug for a page URL, derived from its path and query.
pub fn page_slug(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return sanitize_slug(url);
    };
    let mut raw = parsed.path().to_string();
    if let Some(query) = parsed.query() {
        raw.push('-');
        raw.push_str(query);
    }
    let mut slug = sanitize_slug(&raw);
    if slug.len() > MAX_SLUG_LEN {
        // slugs are pure ASCII, so byte truncation is safe
        slug.truncate(MAX_SLUG_LEN);
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    slug
}

/// `<slug>_<viewport>.png`, with the timezone appended when one is set so
/// captures of the same page under different clocks do not collide.
pub fn screenshot_file_name(slug: &str, viewport: &str, timezone: Option<&str>) -> String {
    match timezone {
        Some(tz) => format!("{}_{}_{}.png", slug, sanitize_slug(viewport), sanitize_slug(tz)),
        None => format!("{}_{}.png", slug, sanitize_slug(viewport)),
    }
}
