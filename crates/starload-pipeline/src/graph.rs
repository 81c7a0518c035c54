//! Pipeline dependency graph
//!
//! Stages are registered in declaration order together with their upstream
//! ids. Unknown ids and duplicates are rejected as they are added; cycles and
//! disconnected stages are caught by [`Pipeline::validate`] before anything
//! runs.

use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use starload_engine::{SentinelStage, Stage, StageConfigError};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

/// Graph construction and validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("Duplicate task id '{0}'")]
    DuplicateId(String),

    #[error("Unknown task id '{0}'")]
    UnknownStage(String),

    /// Task ids along the cycle; the first id is repeated at the end
    #[error("Dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("Task '{task_id}' is not connected to sentinel '{sentinel}'")]
    Unreachable { task_id: String, sentinel: String },

    #[error("End sentinel was never declared")]
    MissingEndSentinel,

    #[error(transparent)]
    InvalidStage(#[from] StageConfigError),
}

struct Node {
    stage: Arc<dyn Stage>,
    upstream: Vec<String>,
    downstream: Vec<String>,
}

fn upstream_of(node: &Node) -> &[String] {
    &node.upstream
}

fn downstream_of(node: &Node) -> &[String] {
    &node.downstream
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    New,
    Active,
    Done,
}

/// Directed acyclic graph of stages between a start and an end sentinel
pub struct Pipeline {
    name: String,
    schedule: String,
    start_id: String,
    end_id: String,
    end_declared: bool,

    /// Nodes in declaration order
    nodes: IndexMap<String, Node>,
}

impl Pipeline {
    /// Create a pipeline holding only its start sentinel
    pub fn new(
        name: impl Into<String>,
        start_id: impl Into<String>,
        end_id: impl Into<String>,
    ) -> Result<Self, GraphError> {
        let start = SentinelStage::new(start_id)?;
        let end_id = end_id.into();
        if end_id.trim().is_empty() {
            return Err(GraphError::InvalidStage(StageConfigError::EmptyTaskId));
        }

        let mut pipeline = Self {
            name: name.into(),
            schedule: "@hourly".to_string(),
            start_id: start.task_id().to_string(),
            end_id,
            end_declared: false,
            nodes: IndexMap::new(),
        };
        pipeline.insert(Arc::new(start), &[])?;
        Ok(pipeline)
    }

    /// Set the cadence descriptor (opaque, e.g. `@hourly`)
    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = schedule.into();
        self
    }

    /// Register a stage downstream of already registered stages
    pub fn add_stage<S: Stage + 'static>(&mut self, stage: S, upstream: &[&str]) -> Result<(), GraphError> {
        self.insert(Arc::new(stage), upstream)
    }

    /// Register a shared stage
    pub fn add_shared_stage(&mut self, stage: Arc<dyn Stage>, upstream: &[&str]) -> Result<(), GraphError> {
        self.insert(stage, upstream)
    }

    /// Add an edge between two registered stages
    pub fn add_edge(&mut self, upstream: &str, downstream: &str) -> Result<(), GraphError> {
        for id in [upstream, downstream] {
            if !self.nodes.contains_key(id) {
                return Err(GraphError::UnknownStage(id.to_string()));
            }
        }
        self.link(upstream, downstream);
        Ok(())
    }

    /// Declare the end sentinel downstream of `upstream`
    pub fn finish(&mut self, upstream: &[&str]) -> Result<(), GraphError> {
        let end = SentinelStage::new(self.end_id.clone())?;
        self.insert(Arc::new(end), upstream)?;
        self.end_declared = true;
        Ok(())
    }

    fn insert(&mut self, stage: Arc<dyn Stage>, upstream: &[&str]) -> Result<(), GraphError> {
        let id = stage.task_id().to_string();
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateId(id));
        }
        if let Some(missing) = upstream.iter().find(|up| !self.nodes.contains_key(**up)) {
            return Err(GraphError::UnknownStage(missing.to_string()));
        }

        self.nodes.insert(
            id.clone(),
            Node {
                stage,
                upstream: Vec::new(),
                downstream: Vec::new(),
            },
        );
        for up in upstream {
            self.link(up, &id);
        }
        Ok(())
    }

    fn link(&mut self, upstream: &str, downstream: &str) {
        if let Some(node) = self.nodes.get_mut(downstream) {
            if node.upstream.iter().any(|u| u == upstream) {
                return;
            }
            node.upstream.push(upstream.to_string());
        }
        if let Some(node) = self.nodes.get_mut(upstream) {
            node.downstream.push(downstream.to_string());
        }
    }

    /// Check the whole graph
    ///
    /// The end sentinel must be declared, the graph must be acyclic, every
    /// stage must be reachable from the start sentinel and must reach the
    /// end sentinel.
    pub fn validate(&self) -> Result<(), GraphError> {
        if !self.end_declared {
            return Err(GraphError::MissingEndSentinel);
        }
        if let Some(cycle) = self.find_cycle() {
            return Err(GraphError::Cycle(cycle));
        }

        let directions: [(&String, fn(&Node) -> &[String]); 2] =
            [(&self.start_id, downstream_of), (&self.end_id, upstream_of)];
        for (sentinel, next) in directions {
            let connected = self.reachable(sentinel, next);
            if let Some(id) = self.nodes.keys().find(|id| !connected.contains(id.as_str())) {
                return Err(GraphError::Unreachable {
                    task_id: id.clone(),
                    sentinel: sentinel.clone(),
                });
            }
        }

        Ok(())
    }

    /// Stages ordered so each comes after all of its upstreams
    ///
    /// Among stages that are ready at the same time, the one declared first
    /// comes first, so the order is deterministic.
    pub fn topological_order(&self) -> Result<Vec<&str>, GraphError> {
        let mut in_degree: Vec<usize> = self.nodes.values().map(|n| n.upstream.len()).collect();
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(index, _)| index)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(index) = ready.pop_first() {
            let Some((id, node)) = self.nodes.get_index(index) else {
                continue;
            };
            order.push(id.as_str());

            for child in &node.downstream {
                if let Some(child_index) = self.nodes.get_index_of(child) {
                    in_degree[child_index] -= 1;
                    if in_degree[child_index] == 0 {
                        ready.insert(child_index);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(GraphError::Cycle(self.find_cycle().unwrap_or_default()));
        }
        Ok(order)
    }

    /// Direct upstreams of a stage (empty for unknown ids)
    pub fn upstream(&self, task_id: &str) -> &[String] {
        self.nodes.get(task_id).map(upstream_of).unwrap_or(&[])
    }

    /// Direct downstreams of a stage (empty for unknown ids)
    pub fn downstream(&self, task_id: &str) -> &[String] {
        self.nodes.get(task_id).map(downstream_of).unwrap_or(&[])
    }

    /// Every stage reachable downstream of `task_id`, in declaration order
    pub fn transitive_downstream(&self, task_id: &str) -> Vec<String> {
        let reachable = self.reachable(task_id, downstream_of);
        self.nodes
            .keys()
            .filter(|id| id.as_str() != task_id && reachable.contains(id.as_str()))
            .cloned()
            .collect()
    }

    /// Content hash of the topology: ids, kinds and edges
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();

        for (id, node) in &self.nodes {
            hasher.update(id.as_bytes());
            hasher.update([0u8]);
            hasher.update(node.stage.kind().as_str().as_bytes());
            hasher.update([b'\n']);
        }

        let mut edges: Vec<(&str, &str)> = self
            .nodes
            .iter()
            .flat_map(|(id, node)| node.downstream.iter().map(move |d| (id.as_str(), d.as_str())))
            .collect();
        edges.sort_unstable();
        for (up, down) in edges {
            hasher.update(up.as_bytes());
            hasher.update(b"->");
            hasher.update(down.as_bytes());
            hasher.update([b'\n']);
        }

        hex::encode(hasher.finalize())
    }

    pub fn stage(&self, task_id: &str) -> Option<&Arc<dyn Stage>> {
        self.nodes.get(task_id).map(|n| &n.stage)
    }

    /// Stages in declaration order
    pub fn stages(&self) -> impl Iterator<Item = &Arc<dyn Stage>> {
        self.nodes.values().map(|n| &n.stage)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.nodes.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedule(&self) -> &str {
        &self.schedule
    }

    pub fn start_id(&self) -> &str {
        &self.start_id
    }

    pub fn end_id(&self) -> &str {
        &self.end_id
    }

    fn reachable<'a>(&'a self, from: &'a str, next: fn(&Node) -> &[String]) -> HashSet<&'a str> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();

        if let Some((_, id, _)) = self.nodes.get_full(from) {
            seen.insert(id.as_str());
            queue.push_back(id.as_str());
        }

        while let Some(current) = queue.pop_front() {
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            for id in next(node) {
                if seen.insert(id.as_str()) {
                    queue.push_back(id.as_str());
                }
            }
        }

        seen
    }

    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut marks = vec![Mark::New; self.nodes.len()];
        let mut path = Vec::new();

        (0..self.nodes.len()).find_map(|index| {
            if marks[index] == Mark::New {
                self.visit(index, &mut marks, &mut path)
            } else {
                None
            }
        })
    }

    fn visit(&self, index: usize, marks: &mut [Mark], path: &mut Vec<usize>) -> Option<Vec<String>> {
        marks[index] = Mark::Active;
        path.push(index);

        let (_, node) = self.nodes.get_index(index)?;
        for child in &node.downstream {
            let Some(child_index) = self.nodes.get_index_of(child) else {
                continue;
            };
            match marks[child_index] {
                Mark::Active => {
                    let from = path.iter().position(|&i| i == child_index).unwrap_or(0);
                    let mut cycle: Vec<String> = path[from..].iter().map(|&i| self.id_at(i)).collect();
                    cycle.push(self.id_at(child_index));
                    return Some(cycle);
                }
                Mark::New => {
                    if let Some(cycle) = self.visit(child_index, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }

        path.pop();
        marks[index] = Mark::Done;
        None
    }

    fn id_at(&self, index: usize) -> String {
        self.nodes
            .get_index(index)
            .map(|(id, _)| id.clone())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("stages", &self.nodes.keys().collect::<Vec<_>>())
            .finish()
    }
}
