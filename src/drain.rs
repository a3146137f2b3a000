use std::collections::HashMap;
use std::io::{self, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::cluster::{ClusterStore, LogCluster};
use crate::error::TemplateMinerError;

/// Outcome of a single mining step.
#[derive(Clone, Copy, Debug, Display, EnumString, PartialEq, Eq, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    ClusterCreated,
    ClusterTemplateChanged,
    None,
}

/// How far the match-only path goes beyond a single tree descent.
#[derive(Clone, Copy, Debug, Display, EnumString, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum MatchStrategy {
    /// Tree descent only. Fastest, but a descent that chose the wildcard
    /// branch can miss clusters reachable only via literal branches.
    Never,
    /// Tree descent first, then a linear scan of every cluster under the
    /// same first-level key when the descent found nothing.
    Fallback,
    /// Always the linear scan; picks the match with the fewest wildcards.
    Always,
}

impl MatchStrategy {
    pub fn parse(s: &str) -> Result<Self, TemplateMinerError> {
        Self::from_str(s).map_err(|_| TemplateMinerError::UnknownMatchStrategy(s.to_string()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Node {
    pub key_to_child_node: HashMap<String, Node>,
    pub cluster_ids: Vec<u64>,
}

/// Tuning knobs shared by both engine variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainParams {
    /// Total tree depth including the root and leaf levels. Minimum 3: for
    /// depth 4, the root is level 1, the grouping key level 2, the first
    /// path token level 3, and clusters hang below that.
    pub depth: usize,
    /// Minimum similarity for a log line to join an existing cluster.
    pub sim_th: f64,
    /// Per-node branching cap; the last slot is reserved for the wildcard.
    pub max_children: usize,
    /// Cluster population bound; unbounded when `None`. Once reached, the
    /// least recently matched cluster is replaced.
    pub max_clusters: Option<usize>,
    /// Characters treated as whitespace when splitting a line into tokens.
    pub extra_delimiters: Vec<String>,
    /// The wildcard marker, normally `<*>`.
    pub param_str: String,
    /// Route tokens containing a digit into the wildcard branch.
    pub parametrize_numeric_tokens: bool,
}

impl Default for DrainParams {
    fn default() -> Self {
        Self {
            depth: 4,
            sim_th: 0.4,
            max_children: 100,
            max_clusters: None,
            extra_delimiters: Vec::new(),
            param_str: "<*>".to_string(),
            parametrize_numeric_tokens: true,
        }
    }
}

/// State and shared mechanics common to both engine variants: the prefix
/// tree, the cluster store, the id allocator, and the tokenizer.
#[derive(Debug)]
pub struct DrainCore {
    pub log_cluster_depth: usize,
    pub max_node_depth: usize,
    pub sim_th: f64,
    pub max_children: usize,
    pub max_clusters: Option<usize>,
    pub extra_delimiters: Vec<String>,
    pub param_str: String,
    pub parametrize_numeric_tokens: bool,

    pub root_node: Node,
    pub id_to_cluster: ClusterStore,
    pub clusters_counter: u64,
}

impl DrainCore {
    pub fn new(params: DrainParams) -> Result<Self, TemplateMinerError> {
        if params.depth < 3 {
            return Err(TemplateMinerError::ConfigInvalid(
                "depth must be at least 3".to_string(),
            ));
        }
        if params.max_clusters == Some(0) {
            return Err(TemplateMinerError::ConfigInvalid(
                "max_clusters must be non-zero when set".to_string(),
            ));
        }

        Ok(Self {
            log_cluster_depth: params.depth,
            max_node_depth: params.depth - 2,
            sim_th: params.sim_th,
            max_children: params.max_children,
            max_clusters: params.max_clusters,
            extra_delimiters: params.extra_delimiters,
            param_str: params.param_str,
            parametrize_numeric_tokens: params.parametrize_numeric_tokens,
            root_node: Node::default(),
            id_to_cluster: ClusterStore::new(params.max_clusters),
            clusters_counter: 0,
        })
    }

    fn has_numbers(s: &str) -> bool {
        s.chars().any(|c| c.is_ascii_digit())
    }

    pub fn get_content_as_tokens(&self, content: &str) -> Vec<String> {
        let mut content = content.trim().to_string();
        for delimiter in &self.extra_delimiters {
            content = content.replace(delimiter.as_str(), " ");
        }
        content.split_whitespace().map(str::to_string).collect()
    }

    pub fn clusters(&self) -> impl Iterator<Item = &LogCluster> {
        self.id_to_cluster.iter().map(|(_, cluster)| cluster)
    }

    pub fn cluster_count(&self) -> usize {
        self.id_to_cluster.len()
    }

    pub fn get_total_cluster_size(&self) -> u64 {
        self.clusters().map(|cluster| cluster.size).sum()
    }

    /// All cluster ids reachable below the given first-level key, in tree
    /// order. Dead ids are included; callers probe the store with peek.
    pub fn cluster_ids_under_root_key(&self, key: &str) -> Vec<u64> {
        fn append_recursive(node: &Node, ids: &mut Vec<u64>) {
            ids.extend_from_slice(&node.cluster_ids);
            for child in node.key_to_child_node.values() {
                append_recursive(child, ids);
            }
        }

        let mut ids = Vec::new();
        if let Some(node) = self.root_node.key_to_child_node.get(key) {
            append_recursive(node, &mut ids);
        }
        ids
    }

    /// Walks (and grows) the tree below `first_key` along `path`, then
    /// records the cluster id at the terminal node.
    ///
    /// The walk enforces the branching cap: numeric tokens go to the
    /// wildcard child when configured, a literal child is added while the
    /// node has room, the last slot is spent on a wildcard child, and a
    /// saturated node routes everything unseen into its wildcard.
    pub(crate) fn insert_template_path(
        &mut self,
        first_key: String,
        path: &[String],
        template_is_empty: bool,
        cluster_id: u64,
    ) {
        let DrainCore {
            ref mut root_node,
            ref id_to_cluster,
            max_node_depth,
            max_children,
            ref param_str,
            parametrize_numeric_tokens,
            ..
        } = *self;

        let mut cur_node = root_node.key_to_child_node.entry(first_key).or_default();

        if template_is_empty {
            // an empty-template group only ever holds one cluster
            cur_node.cluster_ids = vec![cluster_id];
            return;
        }

        if path.is_empty() {
            // sequence too short to descend below the first level
            Self::attach_cluster(cur_node, id_to_cluster, cluster_id);
            return;
        }

        let mut current_depth = 1;
        for token in path {
            if current_depth >= max_node_depth || current_depth >= path.len() {
                Self::attach_cluster(cur_node, id_to_cluster, cluster_id);
                return;
            }

            if cur_node.key_to_child_node.contains_key(token) {
                cur_node = cur_node.key_to_child_node.get_mut(token).expect("key checked");
            } else if parametrize_numeric_tokens && Self::has_numbers(token) {
                cur_node = cur_node
                    .key_to_child_node
                    .entry(param_str.clone())
                    .or_default();
            } else if cur_node.key_to_child_node.contains_key(param_str) {
                if cur_node.key_to_child_node.len() < max_children {
                    cur_node = cur_node
                        .key_to_child_node
                        .entry(token.clone())
                        .or_default();
                } else {
                    cur_node = cur_node
                        .key_to_child_node
                        .get_mut(param_str)
                        .expect("key checked");
                }
            } else if cur_node.key_to_child_node.len() + 1 < max_children {
                cur_node = cur_node
                    .key_to_child_node
                    .entry(token.clone())
                    .or_default();
            } else {
                // the final slot goes to the wildcard child, so a catch-all
                // exists once the node is saturated
                cur_node = cur_node
                    .key_to_child_node
                    .entry(param_str.clone())
                    .or_default();
            }

            current_depth += 1;
        }
    }

    fn attach_cluster(node: &mut Node, store: &ClusterStore, cluster_id: u64) {
        // sweep ids whose clusters were evicted before appending the new one
        node.cluster_ids.retain(|id| store.contains(*id));
        node.cluster_ids.push(cluster_id);
    }

    pub fn print_tree(&self, writer: &mut dyn Write, max_clusters: usize) -> io::Result<()> {
        self.print_node("root", &self.root_node, 0, writer, max_clusters)
    }

    fn print_node(
        &self,
        token: &str,
        node: &Node,
        depth: usize,
        writer: &mut dyn Write,
        max_clusters: usize,
    ) -> io::Result<()> {
        let mut out_str = "\t".repeat(depth);

        if depth == 0 {
            out_str += &format!("<{token}>");
        } else if depth == 1 {
            if !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()) {
                out_str += &format!("<L={token}>");
            } else {
                out_str += &format!("<{token}>");
            }
        } else {
            out_str += &format!("\"{token}\"");
        }

        if !node.cluster_ids.is_empty() {
            out_str += &format!(" (cluster_count={})", node.cluster_ids.len());
        }

        writeln!(writer, "{out_str}")?;

        for (child_token, child_node) in &node.key_to_child_node {
            self.print_node(child_token, child_node, depth + 1, writer, max_clusters)?;
        }

        for cluster_id in node.cluster_ids.iter().take(max_clusters) {
            if let Some(cluster) = self.id_to_cluster.peek(*cluster_id) {
                writeln!(writer, "{}{}", "\t".repeat(depth + 1), cluster)?;
            }
        }

        Ok(())
    }
}

/// The incremental template-mining engine.
///
/// The provided methods implement the full mine/match flow; a variant only
/// supplies its first-level grouping key, the slice of tokens that forms the
/// tree path, its similarity function, and its template-merge rule.
pub trait DrainEngine {
    fn core(&self) -> &DrainCore;
    fn core_mut(&mut self) -> &mut DrainCore;

    /// Key of the root child grouping this token sequence.
    fn root_key(&self, tokens: &[String]) -> String;

    /// The tokens walked below the first level.
    fn path_tokens<'a>(&self, tokens: &'a [String]) -> &'a [String];

    /// Similarity of a template against a token sequence, plus the
    /// template's wildcard count.
    fn seq_distance(
        &self,
        template: &[String],
        tokens: &[String],
        include_params: bool,
    ) -> (f64, usize);

    /// Combines a matched token sequence with the cluster's template,
    /// wildcarding the positions that disagree.
    fn merge_template(&self, tokens: &[String], template: &[String]) -> Vec<String>;

    /// Similarity required by the match-only path.
    fn match_sim_th(&self) -> f64;

    /// Mines one log line: finds or creates its cluster, generalizes the
    /// template on a hit, and reports what changed.
    fn add_log_message(&mut self, content: &str) -> (LogCluster, ChangeType) {
        let tokens = self.core().get_content_as_tokens(content);

        match self.tree_search(&tokens, self.core().sim_th, false) {
            Some(cluster_id) => {
                let new_template = {
                    let cluster = self
                        .core()
                        .id_to_cluster
                        .peek(cluster_id)
                        .expect("matched cluster vanished from the store");
                    self.merge_template(&tokens, &cluster.log_template_tokens)
                };

                // confirmed match: touch the cluster while updating it
                let cluster = self
                    .core_mut()
                    .id_to_cluster
                    .get_mut(cluster_id)
                    .expect("matched cluster vanished from the store");
                let change_type = if new_template != cluster.log_template_tokens {
                    cluster.log_template_tokens = new_template;
                    ChangeType::ClusterTemplateChanged
                } else {
                    ChangeType::None
                };
                cluster.size += 1;
                (cluster.clone(), change_type)
            }
            None => {
                let core = self.core_mut();
                core.clusters_counter += 1;
                let cluster = LogCluster::new(tokens, core.clusters_counter);
                core.id_to_cluster.insert(cluster.clone());
                self.add_seq_to_prefix_tree(&cluster);
                (cluster, ChangeType::ClusterCreated)
            }
        }
    }

    fn add_seq_to_prefix_tree(&mut self, cluster: &LogCluster) {
        let first_key = self.root_key(&cluster.log_template_tokens);
        let path = self.path_tokens(&cluster.log_template_tokens).to_vec();
        let template_is_empty = cluster.log_template_tokens.is_empty();
        self.core_mut()
            .insert_template_path(first_key, &path, template_is_empty, cluster.cluster_id);
    }

    /// Descends the tree for a token sequence and scores the candidates at
    /// the terminal node. Read-only: recency is not updated.
    fn tree_search(
        &self,
        tokens: &[String],
        sim_th: f64,
        include_params: bool,
    ) -> Option<u64> {
        let core = self.core();
        let mut cur_node = core.root_node.key_to_child_node.get(&self.root_key(tokens))?;

        // an empty log line maps to the single cluster of its group
        if tokens.is_empty() {
            return cur_node
                .cluster_ids
                .first()
                .copied()
                .filter(|id| core.id_to_cluster.peek(*id).is_some());
        }

        let path = self.path_tokens(tokens);
        let mut cur_node_depth = 1;
        for token in path {
            if cur_node_depth >= core.max_node_depth || cur_node_depth >= path.len() {
                break;
            }

            cur_node = match cur_node.key_to_child_node.get(token) {
                Some(node) => node,
                None => cur_node.key_to_child_node.get(&core.param_str)?,
            };
            cur_node_depth += 1;
        }

        self.fast_match(&cur_node.cluster_ids, tokens, sim_th, include_params)
    }

    /// Best-scoring candidate above the threshold. Ties go to the candidate
    /// with more wildcards, then to the earliest in the list.
    fn fast_match(
        &self,
        cluster_ids: &[u64],
        tokens: &[String],
        sim_th: f64,
        include_params: bool,
    ) -> Option<u64> {
        let core = self.core();

        let mut max_sim = -1.0_f64;
        let mut max_param_count = -1_i64;
        let mut max_cluster = None;

        for &cluster_id in cluster_ids {
            // candidates are only probed; recency waits for a confirmed match
            let Some(cluster) = core.id_to_cluster.peek(cluster_id) else {
                continue;
            };
            let (cur_sim, param_count) =
                self.seq_distance(&cluster.log_template_tokens, tokens, include_params);
            if cur_sim > max_sim || (cur_sim == max_sim && param_count as i64 > max_param_count) {
                max_sim = cur_sim;
                max_param_count = param_count as i64;
                max_cluster = Some(cluster_id);
            }
        }

        if max_sim >= sim_th { max_cluster } else { None }
    }

    /// Matches a line against the frozen model. Requires the variant's full
    /// match similarity, counts wildcard slots as agreements, and never
    /// creates or modifies a cluster.
    fn match_cluster(&self, content: &str, strategy: MatchStrategy) -> Option<LogCluster> {
        let core = self.core();
        let required_sim_th = self.match_sim_th();
        let tokens = core.get_content_as_tokens(content);

        let full_search = || {
            let all_ids = core.cluster_ids_under_root_key(&self.root_key(&tokens));
            self.fast_match(&all_ids, &tokens, required_sim_th, true)
        };

        let matched = match strategy {
            MatchStrategy::Always => full_search(),
            MatchStrategy::Never => self.tree_search(&tokens, required_sim_th, true),
            MatchStrategy::Fallback => self
                .tree_search(&tokens, required_sim_th, true)
                .or_else(full_search),
        };

        matched.and_then(|id| core.id_to_cluster.peek(id).cloned())
    }

    fn print_tree(&self, writer: &mut dyn Write, max_clusters: usize) -> io::Result<()> {
        self.core().print_tree(writer, max_clusters)
    }
}

/// The Drain variant: sequences group by token count at the first level and
/// similarity is the fraction of positions that agree.
#[derive(Debug)]
pub struct Drain {
    core: DrainCore,
}

impl Drain {
    pub fn new(params: DrainParams) -> Result<Self, TemplateMinerError> {
        Ok(Self {
            core: DrainCore::new(params)?,
        })
    }
}

impl DrainEngine for Drain {
    fn core(&self) -> &DrainCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DrainCore {
        &mut self.core
    }

    fn root_key(&self, tokens: &[String]) -> String {
        tokens.len().to_string()
    }

    fn path_tokens<'a>(&self, tokens: &'a [String]) -> &'a [String] {
        tokens
    }

    fn seq_distance(
        &self,
        template: &[String],
        tokens: &[String],
        include_params: bool,
    ) -> (f64, usize) {
        assert_eq!(
            template.len(),
            tokens.len(),
            "similarity is only defined for sequences of equal length"
        );

        if template.is_empty() {
            return (1.0, 0);
        }

        let mut sim_tokens = 0usize;
        let mut param_count = 0usize;

        for (token1, token2) in template.iter().zip(tokens) {
            if *token1 == self.core.param_str {
                param_count += 1;
                continue;
            }
            if token1 == token2 {
                sim_tokens += 1;
            }
        }

        if include_params {
            sim_tokens += param_count;
        }

        (sim_tokens as f64 / template.len() as f64, param_count)
    }

    fn merge_template(&self, tokens: &[String], template: &[String]) -> Vec<String> {
        assert_eq!(
            tokens.len(),
            template.len(),
            "templates only merge with sequences of equal length"
        );
        tokens
            .iter()
            .zip(template)
            .map(|(token1, token2)| {
                if token1 == token2 {
                    token2.clone()
                } else {
                    self.core.param_str.clone()
                }
            })
            .collect()
    }

    fn match_sim_th(&self) -> f64 {
        1.0
    }
}
