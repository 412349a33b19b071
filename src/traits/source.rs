//! Article source trait.
//!
//! A source knows how to search for candidate articles by keyword and
//! fetch their full text. Implementations wrap Wikipedia, news APIs,
//! local datasets, and so on; the acquisition stage treats them all the
//! same.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{SourceRef, SourceType};

/// A search hit from a source, before fetching.
#[derive(Debug, Clone)]
pub struct ArticleRef {
    pub source: SourceRef,
    /// Short search-result summary, if the source provides one.
    pub summary: Option<String>,
}

/// A fetched article with its full text.
#[derive(Debug, Clone)]
pub struct Document {
    pub source: SourceRef,
    pub text: String,
}

impl Document {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A provider of articles.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    /// The kind of articles this source yields, used to honor the task's
    /// data source preference.
    fn source_type(&self) -> SourceType;

    /// Search for articles matching a keyword. Returns at most `limit`
    /// hits, most relevant first.
    async fn search(&self, keyword: &str, limit: usize) -> Result<Vec<ArticleRef>>;

    /// Fetch the full text for a search hit.
    async fn fetch(&self, article: &ArticleRef) -> Result<Document>;
}
