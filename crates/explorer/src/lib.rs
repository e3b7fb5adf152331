//! Breadth-first site exploration over a single live page.
//!
//! The explorer starts from one URL, captures every page it visits and
//! feeds newly discovered same-site links back into a FIFO frontier until
//! the depth or page budget runs out. Login walls met along the way are
//! detected and, when credentials are available, crossed in place so the
//! rest of the crawl sees the authenticated site.

mod engine;
mod extract;
mod norm;

pub use engine::{
    Explorer, ExplorerConfig, ExplorerReport, PageResult, ProgressFn, RunOutcome,
};
pub use extract::{extract_links, PageLink};
pub use norm::{glob_to_regex, is_internal, normalize, UrlFilter};

use thiserror::Error;

use browser::BrowserError;

#[derive(Debug, Error)]
pub enum ExplorerError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),
}
