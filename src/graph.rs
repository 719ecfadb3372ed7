//! Co-authorship graph.
//!
//! Nodes are author names, an edge means the two authors share at least one
//! publication. The graph is simple (no multi-edges, no self-loops) and is
//! rebuilt from scratch for every analysis pass.
//!
//! Only a prefix of the publications feeds the graph (`sample_limit`, first N
//! rows in input order). That is a rendering bound, not a representative sample.

use crate::config::GraphConfig;
use petgraph::graph::{NodeIndex, UnGraph};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Split a raw author string on commas, trim, and drop noise tokens
/// shorter than `min_len` characters.
pub fn parse_authors(raw: &str, min_len: usize) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|a| a.chars().count() >= min_len)
        .map(str::to_string)
        .collect()
}

/// First `limit` items (all of them when `limit` is 0)
pub fn sample_prefix<T>(items: &[T], limit: usize) -> &[T] {
    if limit == 0 {
        items
    } else {
        &items[..items.len().min(limit)]
    }
}

/// A node for visualization handoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub author: String,
    pub degree: usize,
    /// Layout coordinates in [-1, 1]; presentation only, not stable across runs
    pub x: f64,
    pub y: f64,
}

/// An undirected co-authorship edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
}

/// Simple undirected co-authorship graph
#[derive(Debug, Clone, Default)]
pub struct CollaborationGraph {
    graph: UnGraph<String, ()>,
    node_index: HashMap<String, NodeIndex>,
}

impl CollaborationGraph {
    /// Build from per-publication author lists (already parsed)
    pub fn from_publications<I, A>(publications: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[String]>,
    {
        let mut graph = Self::default();
        for authors in publications {
            graph.connect_all(authors.as_ref());
        }
        graph
    }

    /// Full pairwise connection of one publication's authors
    fn connect_all(&mut self, authors: &[String]) {
        let mut seen = HashSet::new();
        let distinct: Vec<&String> = authors.iter().filter(|a| seen.insert(a.as_str())).collect();

        for (i, a) in distinct.iter().enumerate() {
            for b in &distinct[i + 1..] {
                let ia = self.node(a);
                let ib = self.node(b);
                self.graph.update_edge(ia, ib, ());
            }
        }
    }

    fn node(&mut self, name: &str) -> NodeIndex {
        if let Some(idx) = self.node_index.get(name) {
            return *idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.node_index.insert(name.to_string(), idx);
        idx
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains_author(&self, name: &str) -> bool {
        self.node_index.contains_key(name)
    }

    pub fn has_edge(&self, a: &str, b: &str) -> bool {
        match (self.node_index.get(a), self.node_index.get(b)) {
            (Some(ia), Some(ib)) => self.graph.find_edge(*ia, *ib).is_some(),
            _ => false,
        }
    }

    /// Number of distinct collaborators of `name`
    pub fn degree(&self, name: &str) -> Option<usize> {
        self.node_index
            .get(name)
            .map(|idx| self.graph.neighbors(*idx).count())
    }

    /// Author names in first-seen order
    pub fn authors(&self) -> impl Iterator<Item = &str> {
        self.graph.node_weights().map(String::as_str)
    }

    pub fn edges(&self) -> Vec<GraphEdge> {
        self.graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(a, b)| GraphEdge {
                source: self.graph[a].clone(),
                target: self.graph[b].clone(),
            })
            .collect()
    }

    /// Fruchterman-Reingold spring layout, rescaled into [-1, 1].
    ///
    /// `k` is the optimal distance between nodes; larger values spread the graph.
    pub fn spring_layout(&self, k: f64, iterations: usize, seed: u64) -> Vec<(f64, f64)> {
        let n = self.graph.node_count();
        if n == 0 {
            return Vec::new();
        }
        if n == 1 {
            return vec![(0.0, 0.0)];
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut pos: Vec<(f64, f64)> = (0..n).map(|_| (rng.gen::<f64>(), rng.gen::<f64>())).collect();
        let edges: Vec<(usize, usize)> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(a, b)| (a.index(), b.index()))
            .collect();

        let span = |p: &[(f64, f64)]| {
            let (mut min_x, mut max_x, mut min_y, mut max_y) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
            for (x, y) in p {
                min_x = min_x.min(*x);
                max_x = max_x.max(*x);
                min_y = min_y.min(*y);
                max_y = max_y.max(*y);
            }
            (max_x - min_x).max(max_y - min_y)
        };
        let mut temperature = span(&pos) * 0.1;
        let cooling = temperature / (iterations as f64 + 1.0);

        for _ in 0..iterations {
            let mut disp = vec![(0.0f64, 0.0f64); n];

            for i in 0..n {
                for j in (i + 1)..n {
                    let (dx, dy) = (pos[i].0 - pos[j].0, pos[i].1 - pos[j].1);
                    let dist = dx.hypot(dy).max(0.01);
                    let force = k * k / dist;
                    let (fx, fy) = (dx / dist * force, dy / dist * force);
                    disp[i].0 += fx;
                    disp[i].1 += fy;
                    disp[j].0 -= fx;
                    disp[j].1 -= fy;
                }
            }

            for (i, j) in &edges {
                let (dx, dy) = (pos[*i].0 - pos[*j].0, pos[*i].1 - pos[*j].1);
                let dist = dx.hypot(dy).max(0.01);
                let force = dist * dist / k;
                let (fx, fy) = (dx / dist * force, dy / dist * force);
                disp[*i].0 -= fx;
                disp[*i].1 -= fy;
                disp[*j].0 += fx;
                disp[*j].1 += fy;
            }

            for (p, (dx, dy)) in pos.iter_mut().zip(&disp) {
                let len = dx.hypot(*dy).max(0.01);
                let step = len.min(temperature);
                p.0 += dx / len * step;
                p.1 += dy / len * step;
            }
            temperature -= cooling;
        }

        rescale(pos)
    }

    /// Nodes with degree and layout position, in first-seen order
    pub fn layout_nodes(&self, k: f64, iterations: usize, seed: u64) -> Vec<GraphNode> {
        let positions = self.spring_layout(k, iterations, seed);
        self.graph
            .node_indices()
            .zip(positions)
            .map(|(idx, (x, y))| GraphNode {
                author: self.graph[idx].clone(),
                degree: self.graph.neighbors(idx).count(),
                x,
                y,
            })
            .collect()
    }
}

/// Center on the mean and scale so the largest coordinate magnitude is 1
fn rescale(mut pos: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    let n = pos.len() as f64;
    let (cx, cy) = pos
        .iter()
        .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x / n, sy + y / n));
    let mut lim: f64 = 0.0;
    for p in pos.iter_mut() {
        p.0 -= cx;
        p.1 -= cy;
        lim = lim.max(p.0.abs()).max(p.1.abs());
    }
    if lim > 0.0 {
        for p in pos.iter_mut() {
            p.0 /= lim;
            p.1 /= lim;
        }
    }
    pos
}

/// Graph plus everything the visualization needs
#[derive(Debug, Clone, Serialize)]
pub struct GraphView {
    /// Publications that fed the graph (after prefix sampling)
    pub sampled_publications: usize,
    pub sample_policy: &'static str,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Builds graph views from raw author strings
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    pub sample_limit: usize,
    pub min_author_len: usize,
    pub spring_k: f64,
    pub layout_iterations: usize,
}

impl GraphBuilder {
    pub fn from_config(config: &GraphConfig) -> Self {
        Self {
            sample_limit: config.sample_limit,
            min_author_len: config.min_author_len,
            spring_k: config.spring_k,
            layout_iterations: config.layout_iterations,
        }
    }

    /// Graph of the first `sample_limit` author strings
    pub fn build<S: AsRef<str>>(&self, author_lists: &[S]) -> CollaborationGraph {
        let sample = sample_prefix(author_lists, self.sample_limit);
        debug!(
            policy = "prefix",
            limit = self.sample_limit,
            sampled = sample.len(),
            total = author_lists.len(),
            "Sampling publications for the co-author graph"
        );

        let graph = CollaborationGraph::from_publications(
            sample
                .iter()
                .map(|raw| parse_authors(raw.as_ref(), self.min_author_len)),
        );
        info!(
            publications = sample.len(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Built co-author graph"
        );
        graph
    }

    /// Build the graph and lay it out
    pub fn view<S: AsRef<str>>(&self, author_lists: &[S], seed: u64) -> GraphView {
        let graph = self.build(author_lists);
        GraphView {
            sampled_publications: sample_prefix(author_lists, self.sample_limit).len(),
            sample_policy: "prefix",
            nodes: graph.layout_nodes(self.spring_k, self.layout_iterations, seed),
            edges: graph.edges(),
        }
    }
}
