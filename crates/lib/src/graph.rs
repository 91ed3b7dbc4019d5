//! Dependency graphs for resources and builds.
//!
//! [`ReferenceGraph`] holds an edge `A -> B` whenever a property of resource
//! `A` references resource `B`, directly or through a composed output.
//! [`BuildGraph`] holds an edge `X -> Y` whenever build `X` needs an artifact
//! that build `Y` produces. Both reject cycles and compute parallel waves
//! (groups whose dependencies all sit in earlier waves).

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

use crate::operation::Operation;
use crate::resource::Resource;
use crate::variable::Variable;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
  #[error("resource '{resource}' property '{property}' references unknown resource '{target}'")]
  UnknownResource {
    resource: String,
    property: String,
    target: String,
  },

  #[error("variable '{variable}' references unknown resource '{target}'")]
  UnknownVariableReference { variable: String, target: String },

  #[error("dependency cycle: {}", .cycle.join(" -> "))]
  CyclicDependency { cycle: Vec<String> },

  #[error("'{resource}' needs artifact '{artifact}' but no build produces it")]
  UnknownArtifact { resource: String, artifact: String },

  #[error("artifact '{artifact}' is produced by both '{first}' and '{second}'")]
  DuplicateArtifact {
    artifact: String,
    first: String,
    second: String,
  },
}

/// Group nodes into waves. Edges point from a node to its dependencies, so a
/// node is ready once all its outgoing neighbors are in earlier waves.
fn waves(graph: &DiGraph<String, ()>) -> Vec<Vec<NodeIndex>> {
  let mut pending: HashMap<NodeIndex, usize> = graph
    .node_indices()
    .map(|idx| (idx, graph.neighbors_directed(idx, Direction::Outgoing).count()))
    .collect();
  let mut remaining: Vec<NodeIndex> = graph.node_indices().collect();
  let mut result = Vec::new();

  while !remaining.is_empty() {
    let ready: Vec<NodeIndex> = remaining.iter().filter(|idx| pending[idx] == 0).copied().collect();

    // Cycles are rejected when a graph is built, so this only guards the loop
    if ready.is_empty() {
      break;
    }

    remaining.retain(|idx| !ready.contains(idx));
    for &idx in &ready {
      for dependent in graph.neighbors_directed(idx, Direction::Incoming) {
        if let Some(count) = pending.get_mut(&dependent) {
          *count = count.saturating_sub(1);
        }
      }
    }
    result.push(ready);
  }

  result
}

/// Find one cycle, starting from its earliest-declared member.
///
/// Returns the node labels along the cycle with the first label repeated at
/// the end, e.g. `["a", "b", "a"]`.
fn find_cycle(graph: &DiGraph<String, ()>) -> Option<Vec<String>> {
  let scc = tarjan_scc(graph)
    .into_iter()
    .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
    .min_by_key(|scc| scc.iter().min().copied())?;

  let members: HashSet<NodeIndex> = scc.iter().copied().collect();
  let start = *scc.iter().min()?;

  let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
  let mut seen = HashSet::from([start]);
  let mut queue = VecDeque::from([start]);

  while let Some(node) = queue.pop_front() {
    let mut next: Vec<NodeIndex> = graph
      .neighbors_directed(node, Direction::Outgoing)
      .filter(|n| members.contains(n))
      .collect();
    next.sort();
    next.dedup();

    for succ in next {
      if succ == start {
        let mut path = vec![node];
        let mut current = node;
        while current != start {
          let Some(&prev) = parent.get(&current) else { break };
          path.push(prev);
          current = prev;
        }
        path.reverse();
        path.push(start);
        return Some(path.into_iter().map(|idx| graph[idx].clone()).collect());
      }
      if seen.insert(succ) {
        parent.insert(succ, node);
        queue.push_back(succ);
      }
    }
  }

  None
}

/// Resource dependency graph derived from output references.
#[derive(Debug)]
pub struct ReferenceGraph {
  graph: DiGraph<String, ()>,
  nodes: HashMap<String, NodeIndex>,
}

impl ReferenceGraph {
  /// Build the graph for `resources`; names are expected to be unique.
  ///
  /// # Errors
  ///
  /// - `UnknownResource` if a property references an undeclared resource
  /// - `CyclicDependency` if the references form a cycle
  pub fn from_resources(resources: &[Resource]) -> Result<Self, GraphError> {
    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();

    for resource in resources {
      nodes
        .entry(resource.name().to_string())
        .or_insert_with(|| graph.add_node(resource.name().to_string()));
    }

    for resource in resources {
      let from = nodes[resource.name()];
      for (property, reference) in resource.references() {
        let Some(&to) = nodes.get(&reference.resource) else {
          return Err(GraphError::UnknownResource {
            resource: resource.name().to_string(),
            property: property.to_string(),
            target: reference.resource,
          });
        };
        graph.update_edge(from, to, ());
      }
    }

    if let Some(cycle) = find_cycle(&graph) {
      return Err(GraphError::CyclicDependency { cycle });
    }

    Ok(Self { graph, nodes })
  }

  /// Check that every resource `variables` reference is part of the graph.
  pub fn check_variables(&self, variables: &[Variable]) -> Result<(), GraphError> {
    for variable in variables {
      if let Some(target) = variable
        .output()
        .resources()
        .into_iter()
        .find(|name| !self.nodes.contains_key(name))
      {
        return Err(GraphError::UnknownVariableReference {
          variable: variable.name().to_string(),
          target,
        });
      }
    }
    Ok(())
  }

  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.node_count() == 0
  }

  pub fn edge_count(&self) -> usize {
    self.graph.edge_count()
  }

  /// Whether `from` references `to`.
  pub fn contains_edge(&self, from: &str, to: &str) -> bool {
    match (self.nodes.get(from), self.nodes.get(to)) {
      (Some(&a), Some(&b)) => self.graph.contains_edge(a, b),
      _ => false,
    }
  }

  /// Every `(dependent, dependency)` pair, sorted.
  pub fn edges(&self) -> Vec<(String, String)> {
    let mut edges: Vec<(String, String)> = self
      .graph
      .edge_indices()
      .filter_map(|e| self.graph.edge_endpoints(e))
      .map(|(a, b)| (self.graph[a].clone(), self.graph[b].clone()))
      .collect();
    edges.sort();
    edges
  }

  /// Resources grouped so each wave only depends on earlier waves.
  pub fn waves(&self) -> Vec<Vec<String>> {
    waves(&self.graph)
      .into_iter()
      .map(|wave| wave.into_iter().map(|idx| self.graph[idx].clone()).collect())
      .collect()
  }
}

/// Partial order of build operations derived from needed/produced artifacts.
///
/// Node `i` is the `i`-th build in registration order.
#[derive(Debug)]
pub struct BuildGraph {
  graph: DiGraph<String, ()>,
  producers: BTreeMap<String, NodeIndex>,
}

impl BuildGraph {
  /// # Errors
  ///
  /// - `DuplicateArtifact` if two builds produce the same key
  /// - `UnknownArtifact` if a build needs a key nobody produces
  /// - `CyclicDependency` if builds need each other's artifacts
  pub fn from_operations(operations: &[Operation]) -> Result<Self, GraphError> {
    let mut graph = DiGraph::new();
    let mut producers: BTreeMap<String, NodeIndex> = BTreeMap::new();

    let indices: Vec<NodeIndex> = operations
      .iter()
      .map(|op| graph.add_node(op.resource().to_string()))
      .collect();

    for (op, &idx) in operations.iter().zip(&indices) {
      for artifact in op.produces() {
        if let Some(&first) = producers.get(artifact) {
          return Err(GraphError::DuplicateArtifact {
            artifact: artifact.clone(),
            first: graph[first].clone(),
            second: op.resource().to_string(),
          });
        }
        producers.insert(artifact.clone(), idx);
      }
    }

    for (op, &idx) in operations.iter().zip(&indices) {
      for artifact in op.needs() {
        let Some(&producer) = producers.get(artifact) else {
          return Err(GraphError::UnknownArtifact {
            resource: op.resource().to_string(),
            artifact: artifact.clone(),
          });
        };
        graph.update_edge(idx, producer, ());
      }
    }

    if let Some(cycle) = find_cycle(&graph) {
      return Err(GraphError::CyclicDependency { cycle });
    }

    Ok(Self { graph, producers })
  }

  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.node_count() == 0
  }

  /// Index of the build producing `artifact`.
  pub fn producer(&self, artifact: &str) -> Option<usize> {
    self.producers.get(artifact).map(|idx| idx.index())
  }

  /// Builds whose artifacts build `index` needs.
  pub fn dependencies(&self, index: usize) -> Vec<usize> {
    let mut deps: Vec<usize> = self
      .graph
      .neighbors_directed(NodeIndex::new(index), Direction::Outgoing)
      .map(|idx| idx.index())
      .collect();
    deps.sort_unstable();
    deps
  }

  /// Build indices grouped into waves that can run in parallel.
  pub fn waves(&self) -> Vec<Vec<usize>> {
    waves(&self.graph)
      .into_iter()
      .map(|wave| wave.into_iter().map(|idx| idx.index()).collect())
      .collect()
  }
}
