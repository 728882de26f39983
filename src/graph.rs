//! Cycle detection and topological layering over a pipeline's node/edge set.
//!
//! Both functions ignore edges whose endpoints are not in `nodes`; those are
//! reported by [`Pipeline::validate`](crate::types::Pipeline::validate).

use crate::types::{Edge, Node};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Forward adjacency (`source -> [targets]`) restricted to known nodes,
/// with duplicate edges collapsed.
fn adjacency<'a>(nodes: &'a [Node], edges: &'a [Edge]) -> HashMap<&'a str, Vec<&'a str>> {
    let known: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let mut adj: HashMap<&str, Vec<&str>> = nodes.iter().map(|n| (n.id.as_str(), Vec::new())).collect();
    let mut seen = HashSet::new();

    for edge in edges {
        let (s, t) = (edge.source.as_str(), edge.target.as_str());
        if known.contains(s) && known.contains(t) && seen.insert((s, t)) {
            if let Some(targets) = adj.get_mut(s) {
                targets.push(t);
            }
        }
    }
    adj
}

/// Find every node that sits on a dependency cycle.
///
/// Tarjan's strongly connected components: a depth-first search that keeps
/// in-progress nodes on a stack and tracks the lowest index each one can
/// reach. Every component with more than one node, and every node with a
/// self-loop, is reported whole, including members reached only through an
/// already finished branch. An empty set means the graph is safe to execute.
pub fn detect_cycles(nodes: &[Node], edges: &[Edge]) -> BTreeSet<String> {
    let adj = adjacency(nodes, edges);
    let mut tarjan = Tarjan {
        adj: &adj,
        next_index: 0,
        index: HashMap::new(),
        low: HashMap::new(),
        stack: Vec::new(),
        on_stack: HashSet::new(),
        found: BTreeSet::new(),
    };

    for node in nodes {
        let id = node.id.as_str();
        if !tarjan.index.contains_key(id) {
            tarjan.connect(id);
        }
    }
    tarjan.found
}

struct Tarjan<'g, 'a> {
    adj: &'g HashMap<&'a str, Vec<&'a str>>,
    next_index: usize,
    index: HashMap<&'a str, usize>,
    low: HashMap<&'a str, usize>,
    stack: Vec<&'a str>,
    on_stack: HashSet<&'a str>,
    found: BTreeSet<String>,
}

impl<'a> Tarjan<'_, 'a> {
    fn connect(&mut self, id: &'a str) {
        let own = self.next_index;
        self.next_index += 1;
        self.index.insert(id, own);
        self.low.insert(id, own);
        self.stack.push(id);
        self.on_stack.insert(id);

        let adj = self.adj;
        let targets = adj.get(id).map(Vec::as_slice).unwrap_or_default();
        for &next in targets {
            let reach = if !self.index.contains_key(next) {
                self.connect(next);
                self.low.get(next).copied()
            } else if self.on_stack.contains(next) {
                self.index.get(next).copied()
            } else {
                None
            };
            if let Some(reach) = reach {
                if let Some(low) = self.low.get_mut(id) {
                    *low = (*low).min(reach);
                }
            }
        }

        if self.low.get(id) != Some(&own) {
            return;
        }
        let mut component = Vec::new();
        while let Some(member) = self.stack.pop() {
            self.on_stack.remove(member);
            component.push(member);
            if member == id {
                break;
            }
        }
        if component.len() > 1 || targets.contains(&id) {
            self.found.extend(component.into_iter().map(str::to_string));
        }
    }
}

/// Partition an acyclic graph into layers of simultaneously runnable nodes.
///
/// Kahn's algorithm grouped by availability: layer 0 holds every node with no
/// incoming edge, and each following layer holds the nodes whose in-degree
/// drops to zero once the previous layer is removed. No two nodes in a layer
/// share an edge. Nodes keep their declaration order inside a layer.
///
/// Nodes on or downstream of a cycle never reach in-degree zero and are left
/// out; run [`detect_cycles`] first.
pub fn topological_layers(nodes: &[Node], edges: &[Edge]) -> Vec<Vec<String>> {
    let adj = adjacency(nodes, edges);
    let order: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut in_degree: HashMap<&str, usize> = nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    for targets in adj.values() {
        for t in targets {
            if let Some(d) = in_degree.get_mut(t) {
                *d += 1;
            }
        }
    }

    let mut current: Vec<&str> = nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();
    let mut layers = Vec::new();

    while !current.is_empty() {
        let mut next = Vec::new();
        for id in &current {
            for &dependent in adj.get(id).into_iter().flatten() {
                if let Some(d) = in_degree.get_mut(dependent) {
                    *d -= 1;
                    if *d == 0 {
                        next.push(dependent);
                    }
                }
            }
        }
        next.sort_by_key(|id| order.get(id).copied().unwrap_or(usize::MAX));
        layers.push(current.iter().map(|s| s.to_string()).collect());
        current = next;
    }

    layers
}
