//! Dependency resolution and load ordering
//!
//! Rejections happen in stages, each stage only seeing the survivors of the
//! previous one: invalid descriptors, duplicate ids, game-version mismatches
//! and conflicts first, then missing hard dependencies (cascading), then hard
//! cycles. Survivors are ordered with Kahn's algorithm over hard edges plus
//! whatever soft edges fit without closing a cycle, breaking ties by
//! `(priority, id)`.

use crate::error::{DescriptorError, PluginError};
use crate::plugin::PluginDescriptor;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

/// Outcome of resolving a set of candidate plugins
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Plugin ids in load order
    pub order: Vec<String>,
    /// Rejected candidates, in the order they were rejected
    pub rejected: Vec<PluginError>,
}

impl Resolution {
    /// Ids of rejected plugins; a cycle contributes all of its members
    pub fn rejected_ids(&self) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        for error in &self.rejected {
            match error {
                PluginError::Cycle { ids: members } => ids.extend(members.iter().cloned()),
                other => {
                    if let Some(id) = other.plugin() {
                        ids.insert(id.to_string());
                    }
                }
            }
        }
        ids
    }
}

/// Orders plugins so that dependencies load first
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver {
    game_version: Option<semver::Version>,
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject plugins whose game-version requirement does not match
    pub fn with_game_version(mut self, version: semver::Version) -> Self {
        self.game_version = Some(version);
        self
    }

    /// Resolve `candidates` (in discovery order) against already `active` plugins
    pub fn resolve(&self, candidates: &[PluginDescriptor], active: &[&PluginDescriptor]) -> Resolution {
        let mut rejected = Vec::new();

        let accepted = self.screen(candidates, active, &mut rejected);
        let accepted = drop_missing(accepted, active, &mut rejected);
        let (acyclic, graph) = drop_cycles(accepted, &mut rejected);
        let order = order(&acyclic, graph);

        tracing::debug!(
            "Resolved {} plugins ({} rejected): {}",
            order.len(),
            rejected.len(),
            order.join(" -> ")
        );

        Resolution { order, rejected }
    }

    /// Validation, duplicate ids, game version and conflicts
    fn screen<'a>(
        &self,
        candidates: &'a [PluginDescriptor],
        active: &[&PluginDescriptor],
        rejected: &mut Vec<PluginError>,
    ) -> Vec<&'a PluginDescriptor> {
        let mut accepted: Vec<&PluginDescriptor> = Vec::new();

        for candidate in candidates {
            if let Err(source) = candidate.validate() {
                rejected.push(PluginError::descriptor(candidate.id.clone(), source));
                continue;
            }

            let duplicate = active.iter().any(|other| other.id == candidate.id)
                || accepted.iter().any(|other| other.id == candidate.id);
            if duplicate {
                rejected.push(PluginError::descriptor(
                    candidate.id.clone(),
                    DescriptorError::DuplicateId(candidate.id.clone()),
                ));
                continue;
            }

            if let (Some(running), Some(required)) = (&self.game_version, &candidate.game_version) {
                if !required.matches(running) {
                    rejected.push(PluginError::IncompatibleGameVersion {
                        plugin: candidate.id.clone(),
                        required: required.clone(),
                        running: running.clone(),
                    });
                    continue;
                }
            }

            let conflict = active
                .iter()
                .copied()
                .chain(accepted.iter().copied())
                .find(|other| candidate.conflicts_with(other));
            if let Some(other) = conflict {
                tracing::warn!("Skipping plugin {}: conflicts with {}", candidate.id, other.id);
                rejected.push(PluginError::Conflict {
                    plugin: candidate.id.clone(),
                    other: other.id.clone(),
                });
                continue;
            }

            accepted.push(candidate);
        }

        accepted
    }
}

/// Reject plugins with unmet hard dependencies until nothing changes
fn drop_missing<'a>(
    mut accepted: Vec<&'a PluginDescriptor>,
    active: &[&PluginDescriptor],
    rejected: &mut Vec<PluginError>,
) -> Vec<&'a PluginDescriptor> {
    let active_ids: HashSet<&str> = active.iter().map(|d| d.id.as_str()).collect();

    loop {
        let present: HashSet<&str> = accepted.iter().map(|d| d.id.as_str()).collect();
        let missing = accepted.iter().enumerate().find_map(|(index, descriptor)| {
            descriptor
                .dependencies
                .iter()
                .find(|dep| !present.contains(dep.as_str()) && !active_ids.contains(dep.as_str()))
                .map(|dep| (index, dep.clone()))
        });

        let Some((index, dependency)) = missing else {
            return accepted;
        };

        let descriptor = accepted.remove(index);
        tracing::warn!("Skipping plugin {}: missing dependency {}", descriptor.id, dependency);
        rejected.push(PluginError::MissingDependency {
            plugin: descriptor.id.clone(),
            dependency,
        });
    }
}

/// Adjacency over accepted plugins by index: `before[i]` must load before `i`
struct Graph {
    before: Vec<BTreeSet<usize>>,
}

impl Graph {
    fn hard(accepted: &[&PluginDescriptor]) -> Self {
        let index: HashMap<&str, usize> = accepted
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.as_str(), i))
            .collect();

        let before = accepted
            .iter()
            .map(|d| {
                d.dependencies
                    .iter()
                    .filter_map(|dep| index.get(dep.as_str()).copied())
                    .collect()
            })
            .collect();

        Self { before }
    }

    /// Whether `from` must already load before `to`, directly or transitively
    fn precedes(&self, from: usize, to: usize) -> bool {
        let mut stack = vec![to];
        let mut seen = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == from {
                return true;
            }
            if seen.insert(node) {
                stack.extend(self.before[node].iter().copied());
            }
        }
        false
    }
}

/// Reject hard cycles and everything depending on them
fn drop_cycles<'a>(
    accepted: Vec<&'a PluginDescriptor>,
    rejected: &mut Vec<PluginError>,
) -> (Vec<&'a PluginDescriptor>, Graph) {
    let graph = Graph::hard(&accepted);
    let leftover = kahn_leftover(&graph);
    if leftover.is_empty() {
        return (accepted, graph);
    }

    let mut removed: HashSet<usize> = HashSet::new();
    for component in strongly_connected(&graph, &leftover) {
        let is_cycle = component.len() > 1 || graph.before[component[0]].contains(&component[0]);
        if !is_cycle {
            continue;
        }
        let mut ids: Vec<String> = component.iter().map(|&i| accepted[i].id.clone()).collect();
        ids.sort();
        tracing::error!("Dependency cycle between: {}", ids.join(", "));
        rejected.push(PluginError::Cycle { ids });
        removed.extend(component);
    }

    // What is left over only depends on cycles, directly or through other leftovers
    let mut pending: Vec<usize> = leftover.into_iter().filter(|i| !removed.contains(i)).collect();
    pending.sort_unstable();
    while !pending.is_empty() {
        let position = pending
            .iter()
            .position(|&i| graph.before[i].iter().any(|dep| removed.contains(dep)));
        let Some(position) = position else {
            break;
        };
        let node = pending.remove(position);
        let dependency = graph.before[node]
            .iter()
            .find(|dep| removed.contains(dep))
            .map(|&dep| accepted[dep].id.clone())
            .unwrap_or_default();
        tracing::warn!("Skipping plugin {}: depends on rejected plugin {}", accepted[node].id, dependency);
        rejected.push(PluginError::MissingDependency {
            plugin: accepted[node].id.clone(),
            dependency,
        });
        removed.insert(node);
    }

    let survivors: Vec<&PluginDescriptor> = accepted
        .iter()
        .enumerate()
        .filter(|(i, _)| !removed.contains(i))
        .map(|(_, d)| *d)
        .collect();
    let graph = Graph::hard(&survivors);
    (survivors, graph)
}

/// Nodes Kahn's algorithm cannot place
fn kahn_leftover(graph: &Graph) -> Vec<usize> {
    let count = graph.before.len();
    let mut indegree: Vec<usize> = graph.before.iter().map(BTreeSet::len).collect();
    let mut after: Vec<Vec<usize>> = vec![Vec::new(); count];
    for (node, deps) in graph.before.iter().enumerate() {
        for &dep in deps {
            after[dep].push(node);
        }
    }

    let mut ready: Vec<usize> = (0..count).filter(|&i| indegree[i] == 0).collect();
    let mut placed = vec![false; count];
    while let Some(node) = ready.pop() {
        placed[node] = true;
        for &next in &after[node] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push(next);
            }
        }
    }

    (0..count).filter(|&i| !placed[i]).collect()
}

/// Tarjan's algorithm restricted to `nodes`
fn strongly_connected(graph: &Graph, nodes: &[usize]) -> Vec<Vec<usize>> {
    struct Tarjan<'g> {
        graph: &'g Graph,
        allowed: HashSet<usize>,
        index: HashMap<usize, usize>,
        lowlink: HashMap<usize, usize>,
        stack: Vec<usize>,
        on_stack: HashSet<usize>,
        next: usize,
        components: Vec<Vec<usize>>,
    }

    impl Tarjan<'_> {
        fn visit(&mut self, node: usize) {
            self.index.insert(node, self.next);
            self.lowlink.insert(node, self.next);
            self.next += 1;
            self.stack.push(node);
            self.on_stack.insert(node);

            let edges: Vec<usize> = self.graph.before[node]
                .iter()
                .copied()
                .filter(|n| self.allowed.contains(n))
                .collect();
            for next in edges {
                if !self.index.contains_key(&next) {
                    self.visit(next);
                    let low = self.lowlink[&node].min(self.lowlink[&next]);
                    self.lowlink.insert(node, low);
                } else if self.on_stack.contains(&next) {
                    let low = self.lowlink[&node].min(self.index[&next]);
                    self.lowlink.insert(node, low);
                }
            }

            if self.lowlink[&node] == self.index[&node] {
                let mut component = Vec::new();
                while let Some(member) = self.stack.pop() {
                    self.on_stack.remove(&member);
                    component.push(member);
                    if member == node {
                        break;
                    }
                }
                component.sort_unstable();
                self.components.push(component);
            }
        }
    }

    let mut tarjan = Tarjan {
        graph,
        allowed: nodes.iter().copied().collect(),
        index: HashMap::new(),
        lowlink: HashMap::new(),
        stack: Vec::new(),
        on_stack: HashSet::new(),
        next: 0,
        components: Vec::new(),
    };
    for &node in nodes {
        if !tarjan.index.contains_key(&node) {
            tarjan.visit(node);
        }
    }
    tarjan.components
}

/// Add soft edges that keep the graph acyclic, then sort by `(priority, id)`
fn order(accepted: &[&PluginDescriptor], mut graph: Graph) -> Vec<String> {
    for (dependent, descriptor) in accepted.iter().enumerate() {
        for soft in &descriptor.soft_dependencies {
            for (provider, candidate) in accepted.iter().enumerate() {
                if provider == dependent {
                    continue;
                }
                if candidate.id != *soft && !candidate.provides.contains(soft) {
                    continue;
                }
                if graph.before[dependent].contains(&provider) {
                    continue;
                }
                if graph.precedes(dependent, provider) {
                    tracing::debug!(
                        "Dropping soft dependency {} -> {}: would form a cycle",
                        descriptor.id, candidate.id
                    );
                    continue;
                }
                graph.before[dependent].insert(provider);
            }
        }
    }

    let count = accepted.len();
    let mut indegree: Vec<usize> = graph.before.iter().map(BTreeSet::len).collect();
    let mut after: Vec<Vec<usize>> = vec![Vec::new(); count];
    for (node, deps) in graph.before.iter().enumerate() {
        for &dep in deps {
            after[dep].push(node);
        }
    }

    let key = |i: usize| Reverse((accepted[i].priority, accepted[i].id.clone(), i));
    let mut ready: BinaryHeap<Reverse<(i32, String, usize)>> =
        (0..count).filter(|&i| indegree[i] == 0).map(key).collect();

    let mut order = Vec::with_capacity(count);
    while let Some(Reverse((_, id, node))) = ready.pop() {
        order.push(id);
        for &next in &after[node] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push(key(next));
            }
        }
    }
    order
}
