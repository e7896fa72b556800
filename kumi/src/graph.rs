//! Graph workflow engine: node functions over a JSON state.
//!
//! Build a [`StateGraph`] with `add_node` / `add_edge` (using [`START`]
//! and [`END`] for entry and exit) and optional `add_conditional_edges`
//! for state-based routing, then `compile()` into a [`CompiledGraph`].
//!
//! State is a `serde_json` map; nodes return partial updates. A field may
//! declare a reducer (e.g. [`reducers::append`]) so concurrent updates
//! combine instead of overwriting; undeclared fields are last-writer-wins.
//! When a frontier holds several ready nodes they execute concurrently
//! with a join barrier before the next frontier is computed.

mod node;

pub use node::{AgentNode, ToolNode};

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use futures::future::join_all;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{AgentError, Result};

/// Sentinel for graph entry; never a real node.
pub const START: &str = "__start__";

/// Sentinel for graph exit; never a real node.
pub const END: &str = "__end__";

/// The graph state: a JSON object threaded through the nodes.
pub type GraphState = serde_json::Map<String, Value>;

/// Boxed future returned by node functions.
pub type NodeFuture = Pin<Box<dyn Future<Output = Result<GraphState>> + Send>>;

/// A node function: state in, partial update out.
pub type NodeFunc = Arc<dyn Fn(GraphState) -> NodeFuture + Send + Sync>;

/// A conditional router: inspects the state and returns a routing key.
pub type ConditionFn = Arc<dyn Fn(&GraphState) -> String + Send + Sync>;

/// A per-field merge function for concurrent updates.
pub type Reducer = Arc<dyn Fn(&Value, Value) -> Value + Send + Sync>;

/// Built-in reducers.
pub mod reducers {
    use super::Reducer;
    use serde_json::Value;
    use std::sync::Arc;

    /// List-append: concatenates array values; non-arrays overwrite.
    #[must_use]
    pub fn append() -> Reducer {
        Arc::new(|current: &Value, update: Value| match (current, update) {
            (Value::Array(existing), Value::Array(new)) => {
                let mut merged = existing.clone();
                merged.extend(new);
                Value::Array(merged)
            }
            (_, update) => update,
        })
    }
}

/// Errors surfaced by [`StateGraph::compile`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CompilationError {
    /// No entry point was declared and no edge leaves `START`.
    #[error("no entry point defined; use add_edge(START, node) or set_entry_point")]
    MissingEntryPoint,

    /// The entry point does not name a defined node.
    #[error("entry point '{0}' is not a defined node")]
    InvalidEntryPoint(String),

    /// An edge references an undefined node.
    #[error("edge endpoint '{0}' is not a defined node")]
    UnknownNode(String),

    /// A conditional path map routes to an undefined node.
    #[error("conditional path map target '{0}' is not a defined node")]
    InvalidConditionalTarget(String),

    /// The same node id was added twice.
    #[error("node '{0}' already exists")]
    DuplicateNode(String),
}

#[derive(Clone)]
struct Edge {
    source: String,
    target: String,
    condition: Option<ConditionFn>,
    condition_map: Option<HashMap<String, String>>,
}

/// Execution options for a compiled graph.
#[derive(Debug, Clone, Copy)]
pub struct GraphConfig {
    /// Bound on frontier iterations.
    pub max_iterations: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self { max_iterations: 100 }
    }
}

/// Events yielded by [`CompiledGraph::stream`].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum GraphEvent {
    /// A node is about to run.
    NodeStart {
        /// Node id.
        node: String,
        /// State before the node.
        state: GraphState,
    },
    /// A node finished.
    NodeEnd {
        /// Node id.
        node: String,
        /// The node's partial update.
        update: GraphState,
        /// State after merging the update.
        state: GraphState,
    },
    /// The graph finished. Terminal.
    Done {
        /// Final state.
        state: GraphState,
    },
}

/// Structure summary for visualization.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GraphStructure {
    /// Node ids in insertion order.
    pub nodes: Vec<String>,
    /// Edges as `(source, target, conditional)`.
    pub edges: Vec<(String, String, bool)>,
    /// The resolved entry point.
    pub entry_point: String,
}

/// Graph builder.
#[derive(Default)]
pub struct StateGraph {
    nodes: HashMap<String, NodeFunc>,
    node_order: Vec<String>,
    edges: Vec<Edge>,
    reducers: HashMap<String, Reducer>,
    entry_point: Option<String>,
    duplicate: Option<String>,
}

impl StateGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node from an async closure.
    pub fn add_node<F, Fut>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        F: Fn(GraphState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<GraphState>> + Send + 'static,
    {
        self.add_node_fn(name, Arc::new(move |state| Box::pin(func(state))))
    }

    /// Add a node from a boxed node function (used by the adapters).
    pub fn add_node_fn(&mut self, name: impl Into<String>, func: NodeFunc) -> &mut Self {
        let name = name.into();
        if self.nodes.contains_key(&name) && self.duplicate.is_none() {
            self.duplicate = Some(name.clone());
        }
        if !self.nodes.contains_key(&name) {
            self.node_order.push(name.clone());
        }
        self.nodes.insert(name, func);
        self
    }

    /// Add an unconditional edge. `START` as source declares the entry
    /// point; `END` as target terminates that branch.
    pub fn add_edge(&mut self, source: impl Into<String>, target: impl Into<String>) -> &mut Self {
        let source = source.into();
        let target = target.into();
        if source == START {
            self.entry_point = Some(target.clone());
        }
        self.edges.push(Edge {
            source,
            target,
            condition: None,
            condition_map: None,
        });
        self
    }

    /// Add conditional edges from `source`.
    ///
    /// After the source node runs, `condition` is called with the merged
    /// state; its return value is looked up in `path_map` when provided
    /// (falling back to the key itself), and the result names the next
    /// node or `END`.
    pub fn add_conditional_edges(
        &mut self,
        source: impl Into<String>,
        condition: ConditionFn,
        path_map: Option<HashMap<String, String>>,
    ) -> &mut Self {
        self.edges.push(Edge {
            source: source.into(),
            target: String::new(),
            condition: Some(condition),
            condition_map: path_map,
        });
        self
    }

    /// Declare a reducer for a state field.
    pub fn add_reducer(&mut self, key: impl Into<String>, reducer: Reducer) -> &mut Self {
        self.reducers.insert(key.into(), reducer);
        self
    }

    /// Set the entry point explicitly.
    pub fn set_entry_point(&mut self, name: impl Into<String>) -> &mut Self {
        self.entry_point = Some(name.into());
        self
    }

    /// Validate and produce an executable graph.
    pub fn compile(self) -> std::result::Result<CompiledGraph, CompilationError> {
        if let Some(name) = self.duplicate {
            return Err(CompilationError::DuplicateNode(name));
        }

        let entry_point = self
            .entry_point
            .clone()
            .or_else(|| {
                self.edges
                    .iter()
                    .find(|e| e.source == START && e.condition.is_none())
                    .map(|e| e.target.clone())
            })
            .ok_or(CompilationError::MissingEntryPoint)?;

        if entry_point != END && !self.nodes.contains_key(&entry_point) {
            return Err(CompilationError::InvalidEntryPoint(entry_point));
        }

        for edge in &self.edges {
            if edge.condition.is_some() {
                if !self.nodes.contains_key(&edge.source) {
                    return Err(CompilationError::UnknownNode(edge.source.clone()));
                }
                if let Some(map) = &edge.condition_map {
                    for target in map.values() {
                        if target != END && !self.nodes.contains_key(target) {
                            return Err(CompilationError::InvalidConditionalTarget(target.clone()));
                        }
                    }
                }
                continue;
            }
            if edge.source != START && !self.nodes.contains_key(&edge.source) {
                return Err(CompilationError::UnknownNode(edge.source.clone()));
            }
            if edge.target != END && !self.nodes.contains_key(&edge.target) {
                return Err(CompilationError::UnknownNode(edge.target.clone()));
            }
        }

        let mut adjacency: HashMap<String, Vec<Edge>> = HashMap::new();
        for edge in self.edges {
            adjacency.entry(edge.source.clone()).or_default().push(edge);
        }

        Ok(CompiledGraph {
            nodes: self.nodes,
            node_order: self.node_order,
            adjacency,
            reducers: self.reducers,
            entry_point,
        })
    }
}

impl std::fmt::Debug for StateGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateGraph")
            .field("nodes", &self.node_order)
            .field("edges", &self.edges.len())
            .field("entry_point", &self.entry_point)
            .finish()
    }
}

/// An executable graph produced by [`StateGraph::compile`].
pub struct CompiledGraph {
    nodes: HashMap<String, NodeFunc>,
    node_order: Vec<String>,
    adjacency: HashMap<String, Vec<Edge>>,
    reducers: HashMap<String, Reducer>,
    entry_point: String,
}

impl CompiledGraph {
    /// The resolved entry point.
    #[must_use]
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Structure summary for visualization.
    #[must_use]
    pub fn structure(&self) -> GraphStructure {
        let mut edges = Vec::new();
        for list in self.adjacency.values() {
            for edge in list {
                edges.push((
                    edge.source.clone(),
                    edge.target.clone(),
                    edge.condition.is_some(),
                ));
            }
        }
        edges.sort();
        GraphStructure {
            nodes: self.node_order.clone(),
            edges,
            entry_point: self.entry_point.clone(),
        }
    }

    fn start_nodes(&self) -> Vec<String> {
        let from_start: Vec<String> = self
            .adjacency
            .get(START)
            .map(|edges| {
                edges
                    .iter()
                    .filter(|e| e.condition.is_none())
                    .map(|e| e.target.clone())
                    .collect()
            })
            .unwrap_or_default();
        if from_start.is_empty() {
            vec![self.entry_point.clone()]
        } else {
            from_start
        }
    }

    fn next_nodes(&self, current: &str, state: &GraphState) -> Vec<String> {
        let mut next = Vec::new();
        if let Some(edges) = self.adjacency.get(current) {
            for edge in edges {
                match &edge.condition {
                    None => next.push(edge.target.clone()),
                    Some(condition) => {
                        let key = condition(state);
                        let target = edge
                            .condition_map
                            .as_ref()
                            .and_then(|map| map.get(&key).cloned())
                            .unwrap_or(key);
                        next.push(target);
                    }
                }
            }
        }
        next
    }

    async fn execute_node(&self, name: &str, state: &GraphState) -> Result<GraphState> {
        let func = self
            .nodes
            .get(name)
            .ok_or_else(|| AgentError::graph(format!("Node '{name}' not found")))?;
        debug!(node = name, "Executing graph node");
        func(state.clone()).await
    }

    fn merge_state(&self, mut current: GraphState, update: GraphState) -> GraphState {
        for (key, value) in update {
            if let Some(reducer) = self.reducers.get(&key) {
                if let Some(existing) = current.get(&key) {
                    let merged = reducer(existing, value);
                    current.insert(key, merged);
                    continue;
                }
            }
            current.insert(key, value);
        }
        current
    }

    /// Execute the graph to completion and return the final state.
    ///
    /// Single-node frontiers run sequentially; multi-node frontiers run
    /// concurrently and merge updates left-to-right in frontier order.
    pub async fn invoke(
        &self,
        initial_state: GraphState,
        config: Option<GraphConfig>,
    ) -> Result<GraphState> {
        let config = config.unwrap_or_default();
        let mut state = initial_state;
        let mut current = self.start_nodes();
        let mut visited: HashSet<String> = HashSet::new();
        let mut iteration = 0usize;

        while !current.is_empty() && iteration < config.max_iterations {
            iteration += 1;

            let executable: Vec<String> = current
                .iter()
                .filter(|n| n.as_str() != END && !visited.contains(*n))
                .cloned()
                .collect();
            if executable.is_empty() {
                break;
            }

            if executable.len() == 1 {
                let name = &executable[0];
                let update = self.execute_node(name, &state).await?;
                state = self.merge_state(state, update);
                visited.insert(name.clone());
                current = self.next_nodes(name, &state);
            } else {
                let updates =
                    join_all(executable.iter().map(|n| self.execute_node(n, &state))).await;
                for update in updates {
                    state = self.merge_state(state, update?);
                }
                visited.extend(executable.iter().cloned());

                let mut next_set: HashSet<String> = HashSet::new();
                for name in &executable {
                    next_set.extend(self.next_nodes(name, &state));
                }
                let mut next: Vec<String> = next_set.into_iter().collect();
                next.sort();
                current = next;
            }
        }

        if iteration >= config.max_iterations {
            warn!(max_iterations = config.max_iterations, "Graph execution hit iteration bound");
        }

        Ok(state)
    }

    /// Execute the graph as an event stream.
    ///
    /// Yields `NodeStart`/`NodeEnd` per node and a terminal `Done`. Nodes
    /// of one frontier are streamed sequentially.
    pub fn stream(
        &self,
        initial_state: GraphState,
        config: Option<GraphConfig>,
    ) -> Pin<Box<dyn Stream<Item = Result<GraphEvent>> + Send + '_>> {
        Box::pin(async_stream::stream! {
            let config = config.unwrap_or_default();
            let mut state = initial_state;
            let mut current = self.start_nodes();
            let mut visited: HashSet<String> = HashSet::new();
            let mut iteration = 0usize;

            while !current.is_empty() && iteration < config.max_iterations {
                iteration += 1;

                let executable: Vec<String> = current
                    .iter()
                    .filter(|n| n.as_str() != END && !visited.contains(*n))
                    .cloned()
                    .collect();
                if executable.is_empty() {
                    break;
                }

                for name in &executable {
                    yield Ok(GraphEvent::NodeStart {
                        node: name.clone(),
                        state: state.clone(),
                    });

                    let update = match self.execute_node(name, &state).await {
                        Ok(update) => update,
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    };
                    state = self.merge_state(state, update.clone());
                    visited.insert(name.clone());

                    yield Ok(GraphEvent::NodeEnd {
                        node: name.clone(),
                        update,
                        state: state.clone(),
                    });
                }

                let mut next_set: HashSet<String> = HashSet::new();
                for name in &executable {
                    next_set.extend(self.next_nodes(name, &state));
                }
                let mut next: Vec<String> = next_set.into_iter().collect();
                next.sort();
                current = next;
            }

            yield Ok(GraphEvent::Done { state });
        })
    }
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("nodes", &self.node_order)
            .field("entry_point", &self.entry_point)
            .finish()
    }
}
