//! Category tree explorer.
//!
//! Each keyword is searched once, then subcategory pages are expanded
//! depth-first from an explicit stack. A visited set keyed by category name
//! makes the first visit win: later edges to a known name are kept in the
//! tree as [`NodeState::Revisited`] and never expanded again.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::Instrument;
use url::Url;

use crate::driver::SiteProfile;
use crate::error::AppError;
use crate::models::NewCategory;

/// Top-level departments explored by default.
pub const DEFAULT_KEYWORDS: [&str; 12] = [
    "Amazon Devices",
    "Appliances",
    "Automotive Parts & Accessories",
    "Beauty & Personal Care",
    "Cell Phones & Accessories",
    "Computers",
    "Electronics",
    "Grocery & Gourmet Food",
    "Health, Household & Baby Care",
    "Pet Supplies",
    "Premium Beauty",
    "Smart Home",
];

pub fn default_keywords() -> Vec<String> {
    DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect()
}

/// Slice `batch_index` of `keywords` in chunks of `batch_size`.
pub fn select_batch(
    keywords: &[String],
    batch_size: usize,
    batch_index: usize,
) -> Result<&[String], AppError> {
    if keywords.is_empty() {
        return Err(AppError::InvalidInput("Keyword list is empty".into()));
    }
    if batch_size == 0 || batch_size > keywords.len() {
        return Err(AppError::InvalidInput(format!(
            "Invalid batch size {batch_size} (must be between 1 and {})",
            keywords.len()
        )));
    }
    let max_index = keywords.len().div_ceil(batch_size) - 1;
    if batch_index > max_index {
        return Err(AppError::InvalidInput(format!(
            "Invalid batch index {batch_index} (must be between 0 and {max_index})"
        )));
    }
    let start = batch_index * batch_size;
    let end = (start + batch_size).min(keywords.len());
    Ok(&keywords[start..end])
}

/// Rewrite a subcategory href into a canonical listing URL under `root_url`:
/// the search term `k` is dropped, repeated keys keep their first value and
/// `fs=true` is forced.
pub fn normalize_category_url(root_url: &str, href: &str) -> Result<String, AppError> {
    let root = Url::parse(root_url)
        .map_err(|e| AppError::ConfigError(format!("Invalid root URL '{root_url}': {e}")))?;
    let parsed = root
        .join(href)
        .map_err(|e| AppError::InvalidInput(format!("Invalid category link '{href}': {e}")))?;

    let mut pairs: Vec<(String, String)> = Vec::new();
    for (key, value) in parsed.query_pairs() {
        if key == "k" || pairs.iter().any(|(k, _)| *k == key) {
            continue;
        }
        pairs.push((key.into_owned(), value.into_owned()));
    }
    match pairs.iter_mut().find(|(k, _)| k == "fs") {
        Some(pair) => pair.1 = "true".to_string(),
        None => pairs.push(("fs".to_string(), "true".to_string())),
    }

    let mut out = root;
    out.set_path(parsed.path());
    out.set_query(None);
    out.query_pairs_mut().extend_pairs(&pairs);
    Ok(out.into())
}

/// A named link found on a category page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubcategoryLink {
    pub name: String,
    pub url: String,
}

/// Result of searching a keyword: the landing URL and its subcategories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    pub url: String,
    pub links: Vec<SubcategoryLink>,
}

/// Reads category pages. One session serves one keyword's traversal.
pub trait CategorySource: Send + Sync + Clone + 'static {
    type Session: Send + Sync;

    fn open(&self) -> impl Future<Output = Result<Self::Session, AppError>> + Send;

    /// Select `keyword` as search scope, submit, and list subcategories.
    fn search(
        &self,
        session: &Self::Session,
        keyword: &str,
    ) -> impl Future<Output = Result<Expansion, AppError>> + Send;

    /// Load `url` and list its subcategories.
    fn expand(
        &self,
        session: &Self::Session,
        url: &str,
    ) -> impl Future<Output = Result<Vec<SubcategoryLink>, AppError>> + Send;

    fn close(&self, session: Self::Session) -> impl Future<Output = ()> + Send;
}

/// How a node ended up in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Page loaded; children (possibly none) recorded.
    Expanded,
    /// Name already expanded elsewhere in this run.
    Revisited,
    /// Not expanded: width or depth budget exhausted.
    Truncated,
    /// Page could not be loaded.
    Failed,
}

/// Nested category tree as produced by one keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryNode {
    pub name: String,
    pub url: String,
    pub state: NodeState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<CategoryNode>,
}

impl CategoryNode {
    fn pending(link: SubcategoryLink) -> Self {
        Self {
            name: link.name,
            url: link.url,
            state: NodeState::Truncated,
            children: Vec::new(),
        }
    }

    /// Total nodes in this subtree.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }
}

/// Exploration budgets.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplorerConfig {
    /// Subcategory pages expanded per keyword; `None` is unbounded.
    pub search_width: Option<u32>,
    /// Deepest level expanded (root is 0); `None` is unbounded.
    pub max_depth: Option<u32>,
}

/// Drives a [`CategorySource`] over a keyword list.
#[derive(Debug, Clone)]
pub struct CategoryExplorer<C> {
    source: C,
    config: ExplorerConfig,
}

impl<C: CategorySource> CategoryExplorer<C> {
    pub fn new(source: C, config: ExplorerConfig) -> Self {
        Self { source, config }
    }

    /// Explore every keyword concurrently. A failing keyword is logged and
    /// reported without affecting its siblings.
    pub async fn explore(&self, keywords: &[String]) -> Vec<(String, Result<CategoryNode, AppError>)> {
        let mut tasks = JoinSet::new();
        for (index, keyword) in keywords.iter().enumerate() {
            let explorer = self.clone();
            let keyword = keyword.clone();
            let span = tracing::info_span!("keyword", %keyword);
            tasks.spawn(
                async move {
                    let result = explorer.explore_keyword(&keyword).await;
                    (index, keyword, result)
                }
                .instrument(span),
            );
        }

        let mut results = Vec::with_capacity(keywords.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, keyword, result)) => {
                    match &result {
                        Ok(tree) => tracing::info!(%keyword, nodes = tree.node_count(), "Finished walking category tree"),
                        Err(e) => tracing::error!(%keyword, error = %e, "Error walking category tree"),
                    }
                    results.push((index, keyword, result));
                }
                Err(e) => tracing::error!(error = %e, "Keyword task aborted"),
            }
        }
        results.sort_by_key(|(index, _, _)| *index);
        results.into_iter().map(|(_, k, r)| (k, r)).collect()
    }

    /// Search `keyword`, then expand its subtree within the budgets.
    pub async fn explore_keyword(&self, keyword: &str) -> Result<CategoryNode, AppError> {
        let session = self.source.open().await?;
        let result = self.walk(&session, keyword).await;
        self.source.close(session).await;
        result
    }

    async fn walk(&self, session: &C::Session, keyword: &str) -> Result<CategoryNode, AppError> {
        let root = self.source.search(session, keyword).await?;
        tracing::info!(%keyword, subcategories = root.links.len(), "Searched keyword");

        let mut tree = CategoryNode {
            name: keyword.to_string(),
            url: root.url,
            state: NodeState::Expanded,
            children: root.links.into_iter().map(CategoryNode::pending).collect(),
        };

        let mut visited: HashSet<String> = HashSet::new();
        let mut width = self.config.search_width;

        // Paths are child-index routes from the root, pushed in reverse so
        // siblings pop in page order.
        let mut stack: Vec<Vec<usize>> = (0..tree.children.len()).rev().map(|i| vec![i]).collect();

        while let Some(route) = stack.pop() {
            let depth = route.len() as u32;
            let Some(node) = node_at(&mut tree, &route) else {
                continue;
            };

            if visited.contains(&node.name) {
                tracing::debug!(category = %node.name, "Already explored, skipping");
                node.state = NodeState::Revisited;
                continue;
            }
            visited.insert(node.name.clone());

            if width == Some(0) || self.config.max_depth.is_some_and(|max| depth > max) {
                node.state = NodeState::Truncated;
                continue;
            }

            match self.source.expand(session, &node.url).await {
                Ok(links) => {
                    tracing::debug!(category = %node.name, depth, subcategories = links.len(), "Expanded category");
                    node.state = NodeState::Expanded;
                    node.children = links.into_iter().map(CategoryNode::pending).collect();
                    for i in (0..node.children.len()).rev() {
                        let mut child = route.clone();
                        child.push(i);
                        stack.push(child);
                    }
                }
                Err(e) => {
                    tracing::warn!(category = %node.name, error = %e, "Failed to expand category");
                    node.state = NodeState::Failed;
                }
            }
            if let Some(w) = width.as_mut() {
                *w = w.saturating_sub(1);
            }
        }

        Ok(tree)
    }
}

fn node_at<'a>(root: &'a mut CategoryNode, route: &[usize]) -> Option<&'a mut CategoryNode> {
    let mut node = root;
    for &i in route {
        node = node.children.get_mut(i)?;
    }
    Some(node)
}

/// Flatten keyword trees into category rows.
///
/// Roots sit at depth 0 with no ancestor; descendants name the root as
/// ancestor. `(name, depth)` keys keep their first occurrence across all
/// trees. A revisited node still yields a row at its own depth, so every
/// `(name, depth)` edge is queryable, but contributes no children; it is a
/// leaf exactly when the occurrence that was expanded had no children.
pub fn flatten(trees: &[CategoryNode]) -> Vec<NewCategory> {
    let expanded_leaves = expanded_leafness(trees);
    let mut seen: HashSet<(i32, String)> = HashSet::new();
    let mut out = Vec::new();

    for tree in trees {
        let mut stack: Vec<(&CategoryNode, i32, Option<&str>, String)> =
            vec![(tree, 0, None, tree.name.clone())];

        while let Some((node, depth, parent, path)) = stack.pop() {
            if !seen.insert((depth, node.name.clone())) {
                continue;
            }
            let is_leaf = match node.state {
                NodeState::Expanded => node.children.is_empty(),
                NodeState::Revisited => expanded_leaves.get(node.name.as_str()).copied().unwrap_or(false),
                NodeState::Truncated | NodeState::Failed => false,
            };
            out.push(NewCategory {
                name: node.name.clone(),
                depth,
                ancestor: (depth > 0).then(|| tree.name.clone()),
                parent: parent.map(str::to_string),
                path: path.clone(),
                url: node.url.clone(),
                is_leaf,
            });
            if node.state == NodeState::Revisited {
                continue;
            }
            for child in node.children.iter().rev() {
                stack.push((child, depth + 1, Some(&node.name), format!("{path}/{}", child.name)));
            }
        }
    }
    out
}

/// Name of every expanded node mapped to whether it had no children.
fn expanded_leafness(trees: &[CategoryNode]) -> HashMap<&str, bool> {
    let mut leaves = HashMap::new();
    let mut stack: Vec<&CategoryNode> = trees.iter().collect();
    while let Some(node) = stack.pop() {
        if node.state == NodeState::Expanded {
            leaves.entry(node.name.as_str()).or_insert(node.children.is_empty());
        }
        stack.extend(node.children.iter());
    }
    leaves
}

/// Profile-aware convenience: normalize every link of an expansion.
pub fn normalize_links(profile: &SiteProfile, links: Vec<SubcategoryLink>) -> Vec<SubcategoryLink> {
    links
        .into_iter()
        .filter_map(|link| match normalize_category_url(&profile.root_url, &link.url) {
            Ok(url) => Some(SubcategoryLink { name: link.name, url }),
            Err(e) => {
                tracing::warn!(name = %link.name, error = %e, "Dropping subcategory link");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockCategorySource;

    fn keywords(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn sample_source() -> MockCategorySource {
        MockCategorySource::new()
            .with_keyword("Electronics", &["Audio", "Computers"])
            .with_page("Audio", &["Headphones", "Speakers"])
            .with_page("Headphones", &[])
            .with_page("Speakers", &[])
            .with_page("Computers", &["Laptops", "Headphones"])
            .with_page("Laptops", &[])
    }

    #[test]
    fn batches_are_validated() {
        let all = default_keywords();
        assert_eq!(select_batch(&all, 5, 0).unwrap().len(), 5);
        assert_eq!(select_batch(&all, 5, 2).unwrap(), &all[10..12]);
        assert!(select_batch(&all, 0, 0).is_err());
        assert!(select_batch(&all, 13, 0).is_err());
        assert!(select_batch(&all, 5, 3).is_err());
    }

    #[test]
    fn category_urls_are_normalized() {
        let url = normalize_category_url(
            "https://www.amazon.com",
            "/s?k=Electronics&rh=n%3A172282%2Cn%3A172541&dc&qid=1&rnid=172282&ref=sr_nr_n_1",
        )
        .unwrap();
        assert_eq!(
            url,
            "https://www.amazon.com/s?rh=n%3A172282%2Cn%3A172541&dc=&qid=1&rnid=172282&ref=sr_nr_n_1&fs=true"
        );

        let forced = normalize_category_url("https://www.amazon.com", "https://other.example/s?fs=false&i=b").unwrap();
        assert_eq!(forced, "https://www.amazon.com/s?fs=true&i=b");
    }

    #[tokio::test]
    async fn first_visit_wins_and_revisits_are_not_expanded() {
        let source = sample_source();
        let explorer = CategoryExplorer::new(source.clone(), ExplorerConfig::default());
        let tree = explorer.explore_keyword("Electronics").await.unwrap();

        let computers = &tree.children[1];
        assert_eq!(computers.name, "Computers");
        assert_eq!(computers.children[1].name, "Headphones");
        assert_eq!(computers.children[1].state, NodeState::Revisited);
        assert_eq!(source.expansions_of("Headphones"), 1);
        assert_eq!(source.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn width_budget_stops_expansion() {
        let explorer = CategoryExplorer::new(
            sample_source(),
            ExplorerConfig {
                search_width: Some(2),
                max_depth: None,
            },
        );
        let tree = explorer.explore_keyword("Electronics").await.unwrap();

        // Audio, then Headphones, then the budget is spent.
        assert_eq!(tree.children[0].state, NodeState::Expanded);
        assert_eq!(tree.children[0].children[0].state, NodeState::Expanded);
        assert_eq!(tree.children[0].children[1].state, NodeState::Truncated);
        assert_eq!(tree.children[1].state, NodeState::Truncated);
    }

    #[tokio::test]
    async fn failing_keyword_does_not_abort_siblings() {
        let source = sample_source().with_keyword("Pet Supplies", &["Dogs"]).with_page("Dogs", &[]);
        let explorer = CategoryExplorer::new(source, ExplorerConfig::default());

        let results = explorer
            .explore(&keywords(&["Electronics", "Missing", "Pet Supplies"]))
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, "Electronics");
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
        assert!(results[2].1.is_ok());
    }

    #[tokio::test]
    async fn flatten_builds_unique_rows() {
        let explorer = CategoryExplorer::new(sample_source(), ExplorerConfig::default());
        let tree = explorer.explore_keyword("Electronics").await.unwrap();
        let rows = flatten(&[tree]);

        let names: Vec<_> = rows.iter().map(|r| (r.name.as_str(), r.depth)).collect();
        assert_eq!(
            names,
            vec![
                ("Electronics", 0),
                ("Audio", 1),
                ("Headphones", 2),
                ("Speakers", 2),
                ("Computers", 1),
                ("Laptops", 2),
            ]
        );

        let root = &rows[0];
        assert!(root.ancestor.is_none() && root.parent.is_none());
        assert!(!root.is_leaf);

        let laptops = rows.iter().find(|r| r.name == "Laptops").unwrap();
        assert_eq!(laptops.path, "Electronics/Computers/Laptops");
        assert_eq!(laptops.parent.as_deref(), Some("Computers"));
        assert_eq!(laptops.ancestor.as_deref(), Some("Electronics"));
        assert!(laptops.is_leaf);
    }

    #[tokio::test]
    async fn revisit_at_a_new_depth_keeps_its_edge() {
        let source = MockCategorySource::new()
            .with_keyword("Electronics", &["Audio", "Headphones", "Computers"])
            .with_page("Audio", &["Headphones"])
            .with_page("Headphones", &[])
            .with_page("Computers", &["Laptops", "Audio"])
            .with_page("Laptops", &[]);
        let explorer = CategoryExplorer::new(source.clone(), ExplorerConfig::default());
        let tree = explorer.explore_keyword("Electronics").await.unwrap();
        assert_eq!(tree.children[1].state, NodeState::Revisited);
        assert_eq!(source.expansions_of("Headphones"), 1);

        let rows = flatten(&[tree]);
        let keys: Vec<_> = rows.iter().map(|r| (r.name.as_str(), r.depth)).collect();
        assert_eq!(
            keys,
            vec![
                ("Electronics", 0),
                ("Audio", 1),
                ("Headphones", 2),
                ("Headphones", 1),
                ("Computers", 1),
                ("Laptops", 2),
                ("Audio", 2),
            ]
        );

        let shallow = rows.iter().find(|r| r.name == "Headphones" && r.depth == 1).unwrap();
        assert_eq!(shallow.parent.as_deref(), Some("Electronics"));
        assert_eq!(shallow.path, "Electronics/Headphones");
        assert!(shallow.is_leaf);

        let audio_again = rows.iter().find(|r| r.name == "Audio" && r.depth == 2).unwrap();
        assert_eq!(audio_again.parent.as_deref(), Some("Computers"));
        assert!(!audio_again.is_leaf);
    }

    #[test]
    fn flatten_dedups_across_trees() {
        let leaf = |name: &str| CategoryNode {
            name: name.to_string(),
            url: format!("https://www.amazon.com/s?rh={name}"),
            state: NodeState::Expanded,
            children: vec![],
        };
        let mut a = leaf("Beauty");
        a.children = vec![leaf("Skin Care")];
        let mut b = leaf("Premium Beauty");
        b.children = vec![leaf("Skin Care")];

        let rows = flatten(&[a, b]);
        let skin: Vec<_> = rows.iter().filter(|r| r.name == "Skin Care").collect();
        assert_eq!(skin.len(), 1);
        assert_eq!(skin[0].ancestor.as_deref(), Some("Beauty"));
    }
}
