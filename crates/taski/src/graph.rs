//! Static dependency graph construction (C1 / §4.1): walk `TaskDescriptor`s
//! reachable from a root, reject cycles via Tarjan's SCC algorithm before
//! any task runs, and hand back a topological order for pre-registration.

use std::collections::{HashMap, HashSet};

use crate::error::CycleError;
use crate::task::{descriptor_of, TaskTypeId};

pub struct DependencyGraph {
    /// Every node reachable from the root, in the order first discovered.
    nodes: Vec<TaskTypeId>,
    edges: HashMap<TaskTypeId, Vec<TaskTypeId>>,
}

impl DependencyGraph {
    /// Walks the statically registered dependency edges reachable from
    /// `root`, returning the completed graph or every cyclic strongly
    /// connected component found.
    pub fn build(root: TaskTypeId) -> Result<DependencyGraph, CycleError> {
        let mut edges: HashMap<TaskTypeId, Vec<TaskTypeId>> = HashMap::new();
        let mut nodes = Vec::new();
        let mut queue = vec![root];
        let mut seen = HashSet::new();
        seen.insert(root);

        while let Some(id) = queue.pop() {
            nodes.push(id);
            let deps = match descriptor_of(id) {
                Some(d) => (d.dependencies)().to_vec(),
                None => {
                    tracing::warn!(
                        task = id.name(),
                        "task type has no #[taski::task] registration; treating as dependency-free"
                    );
                    Vec::new()
                }
            };
            for dep in &deps {
                if seen.insert(*dep) {
                    queue.push(*dep);
                }
            }
            edges.insert(id, deps);
        }

        let graph = DependencyGraph { nodes, edges };

        if let Some(components) = graph.find_cycles() {
            return Err(CycleError { components });
        }

        Ok(graph)
    }

    pub fn nodes(&self) -> &[TaskTypeId] {
        &self.nodes
    }

    pub fn dependencies_of(&self, id: TaskTypeId) -> &[TaskTypeId] {
        self.edges.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tarjan's algorithm; any SCC of size > 1, or any node with a
    /// self-loop, is a cycle.
    fn find_cycles(&self) -> Option<Vec<Vec<TaskTypeId>>> {
        let mut state = Tarjan::new(self);
        for &node in &self.nodes {
            if !state.indices.contains_key(&node) {
                state.strong_connect(node);
            }
        }

        let cycles: Vec<Vec<TaskTypeId>> = state
            .components
            .into_iter()
            .filter(|c| c.len() > 1 || self.dependencies_of(c[0]).contains(&c[0]))
            .collect();

        if cycles.is_empty() {
            None
        } else {
            Some(cycles)
        }
    }

    /// A topological order (dependencies before dependents) of every node
    /// in the graph, used to pre-register wrappers and to drive the clean
    /// phase in reverse. Only valid to call once `build` has succeeded
    /// (i.e. the graph is acyclic).
    pub fn topological_order(&self) -> Vec<TaskTypeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited = HashSet::new();

        for &node in &self.nodes {
            self.visit_topo(node, &mut visited, &mut order);
        }

        order
    }

    fn visit_topo(&self, node: TaskTypeId, visited: &mut HashSet<TaskTypeId>, order: &mut Vec<TaskTypeId>) {
        if !visited.insert(node) {
            return;
        }
        for &dep in self.dependencies_of(node) {
            self.visit_topo(dep, visited, order);
        }
        order.push(node);
    }
}

/// Classic recursive Tarjan SCC state. Dependency graphs built from real
/// task trees are shallow enough in practice that recursion depth is not a
/// concern; should that change, this is the place to convert to an explicit
/// stack.
struct Tarjan<'g> {
    graph: &'g DependencyGraph,
    indices: HashMap<TaskTypeId, usize>,
    low_links: HashMap<TaskTypeId, usize>,
    on_stack: HashSet<TaskTypeId>,
    stack: Vec<TaskTypeId>,
    next_index: usize,
    components: Vec<Vec<TaskTypeId>>,
}

impl<'g> Tarjan<'g> {
    fn new(graph: &'g DependencyGraph) -> Self {
        Tarjan {
            graph,
            indices: HashMap::new(),
            low_links: HashMap::new(),
            on_stack: HashSet::new(),
            stack: Vec::new(),
            next_index: 0,
            components: Vec::new(),
        }
    }

    fn strong_connect(&mut self, node: TaskTypeId) {
        self.indices.insert(node, self.next_index);
        self.low_links.insert(node, self.next_index);
        self.next_index += 1;
        self.stack.push(node);
        self.on_stack.insert(node);

        for &dep in self.graph.dependencies_of(node) {
            if !self.indices.contains_key(&dep) {
                self.strong_connect(dep);
                let dep_low = self.low_links[&dep];
                let cur = self.low_links[&node];
                self.low_links.insert(node, cur.min(dep_low));
            } else if self.on_stack.contains(&dep) {
                let dep_index = self.indices[&dep];
                let cur = self.low_links[&node];
                self.low_links.insert(node, cur.min(dep_index));
            }
        }

        if self.low_links[&node] == self.indices[&node] {
            let mut component = Vec::new();
            loop {
                let w = self.stack.pop().expect("tarjan stack underflow");
                self.on_stack.remove(&w);
                component.push(w);
                if w == node {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use crate::context::TaskContext;
    use crate::error::TaskError;
    use taski_macros::task;

    #[derive(Debug, Default)]
    struct Leaf;

    #[task]
    impl Task for Leaf {
        type Output = ();
        async fn run(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct Branch;

    #[task]
    impl Task for Branch {
        type Output = ();
        async fn run(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
            ctx.value::<Leaf>().await.map_err(|e| TaskError::failed(e.to_string()))?;
            Ok(())
        }
    }

    #[test]
    fn acyclic_graph_builds_and_orders_dependencies_first() {
        let graph = DependencyGraph::build(TaskTypeId::of::<Branch>()).expect("no cycle");
        let order = graph.topological_order();
        let leaf_pos = order.iter().position(|n| *n == TaskTypeId::of::<Leaf>()).unwrap();
        let branch_pos = order.iter().position(|n| *n == TaskTypeId::of::<Branch>()).unwrap();
        assert!(leaf_pos < branch_pos);
    }
}
