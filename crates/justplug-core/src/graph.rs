//! Dependency ordering.

use std::collections::HashMap;

/// Directed graph of plugins and the plugins they depend on.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    edges: Vec<Vec<String>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node and the names it depends on. Edges to names that are never
    /// added as nodes are ignored when ordering.
    pub fn add_node<I, S>(&mut self, name: impl Into<String>, dependencies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let deps = dependencies.into_iter().map(Into::into).collect();
        match self.index.get(&name) {
            Some(&i) => self.edges[i] = deps,
            None => {
                self.index.insert(name.clone(), self.nodes.len());
                self.nodes.push(name);
                self.edges.push(deps);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Order the nodes so every node comes after its dependencies.
    ///
    /// Ties keep insertion order. On a cycle, returns the nodes on it with the
    /// first one repeated at the end (`a -> b -> a`).
    pub fn topological_order(&self) -> Result<Vec<String>, Vec<String>> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut path = Vec::new();

        for start in 0..self.nodes.len() {
            if marks[start] == Mark::Unvisited {
                self.visit(start, &mut marks, &mut path, &mut order)?;
            }
        }

        Ok(order.into_iter().map(|i| self.nodes[i].clone()).collect())
    }

    fn visit(
        &self,
        node: usize,
        marks: &mut [Mark],
        path: &mut Vec<usize>,
        order: &mut Vec<usize>,
    ) -> Result<(), Vec<String>> {
        marks[node] = Mark::InProgress;
        path.push(node);

        for dep in &self.edges[node] {
            let Some(&next) = self.index.get(dep) else {
                continue;
            };
            match marks[next] {
                Mark::Done => {}
                Mark::InProgress => {
                    let start = path.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|&n| self.nodes[n].clone()).collect();
                    cycle.push(self.nodes[next].clone());
                    return Err(cycle);
                }
                Mark::Unvisited => self.visit(next, marks, path, order)?,
            }
        }

        path.pop();
        marks[node] = Mark::Done;
        order.push(node);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a graph from lines of the form `"name: dep dep"`.
    fn graph(lines: &[&str]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for line in lines {
            let (name, deps) = line.split_once(':').unwrap_or((*line, ""));
            graph.add_node(name.trim(), deps.split_whitespace());
        }
        graph
    }

    #[test]
    fn test_dependencies_come_first() {
        let g = graph(&["app: ui net", "ui: core", "net: core", "core"]);
        let order = g.topological_order().unwrap();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();

        assert_eq!(order.len(), 4);
        assert!(pos("core") < pos("ui"));
        assert!(pos("core") < pos("net"));
        assert!(pos("ui") < pos("app"));
        assert!(pos("net") < pos("app"));
    }

    #[test]
    fn test_independent_nodes_keep_order() {
        let g = graph(&["b", "a", "c"]);
        assert_eq!(g.topological_order().unwrap(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_unknown_dependencies_ignored() {
        let g = graph(&["a: outside"]);
        assert_eq!(g.topological_order().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_three_cycle() {
        let g = graph(&["a: b", "b: c", "c: a", "d"]);
        let cycle = g.topological_order().unwrap_err();
        assert_eq!(cycle, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let g = graph(&["a: a"]);
        assert_eq!(g.topological_order().unwrap_err(), vec!["a", "a"]);
    }
}
