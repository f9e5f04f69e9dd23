//! View binding: which feeds the active view needs.

use std::fmt;

use crate::types::feed::{AssetId, Feed, FeedSet};

/// The logical view the dashboard is showing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum View {
    /// The landing page with the top-N table.
    Landing,
    /// The detail page of one asset.
    AssetDetail(AssetId),
    /// Any view without feed requirements of its own.
    Other,
}

impl View {
    /// Resolve a router path.
    ///
    /// `/` is the landing view and a single segment `/:id` is that asset's
    /// detail view; query strings and fragments are ignored. Anything else is
    /// [`View::Other`].
    pub fn from_path(path: &str) -> Self {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let trimmed = path.trim().trim_matches('/');

        if trimmed.is_empty() {
            return Self::Landing;
        }
        if trimmed.contains('/') {
            return Self::Other;
        }
        AssetId::new(trimmed).map_or(Self::Other, Self::AssetDetail)
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Landing => f.write_str("/"),
            Self::AssetDetail(id) => write!(f, "/{id}"),
            Self::Other => f.write_str("<other>"),
        }
    }
}

/// The feed set `view` wants active.
///
/// `GlobalTop(5)` is part of every result, so it never leaves the desired set
/// across navigations.
pub fn desired_feeds(view: &View) -> FeedSet {
    let mut feeds = FeedSet::from([Feed::top()]);
    match view {
        View::Landing => {
            feeds.insert(Feed::GlobalTable);
        }
        View::AssetDetail(id) => {
            feeds.insert(Feed::AssetHistory(id.clone()));
        }
        View::Other => {}
    }
    feeds
}
