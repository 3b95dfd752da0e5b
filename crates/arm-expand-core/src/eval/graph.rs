use std::collections::HashSet;
use std::rc::Rc;

use crate::diag::Diagnostics;
use crate::eval::resource::ResourceValue;

/// Dependency graph over the resources of one deployment.
///
/// Edges come from `dependsOn`. An entry matches a resource by id, then by
/// name, then by symbolic name, then by copy loop name (matching every
/// member of the loop), and finally by an id ending in `/<entry>`.
#[derive(Debug)]
pub struct ResourceGraph {
    nodes: Vec<Rc<ResourceValue>>,
}

impl ResourceGraph {
    pub fn new(nodes: Vec<Rc<ResourceValue>>) -> Self {
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the indices of the resources that `dependency` refers to.
    pub fn lookup(&self, dependency: &str) -> Vec<usize> {
        let find = |pred: &dyn Fn(&ResourceValue) -> bool| -> Vec<usize> {
            self.nodes
                .iter()
                .enumerate()
                .filter(|(_, n)| pred(n))
                .map(|(i, _)| i)
                .collect()
        };
        let eq = |a: &str| a.eq_ignore_ascii_case(dependency);

        let by_id = find(&|n| eq(&n.id));
        if !by_id.is_empty() {
            return by_id;
        }
        let by_name = find(&|n| eq(&n.name));
        if !by_name.is_empty() {
            return by_name;
        }
        let by_symbol = find(&|n| n.symbolic_name.as_deref().is_some_and(eq));
        if !by_symbol.is_empty() {
            return by_symbol;
        }
        let by_loop = find(&|n| n.copy_name.as_deref().is_some_and(eq));
        if !by_loop.is_empty() {
            return by_loop;
        }
        let suffix = format!("/{}", dependency.to_ascii_lowercase());
        find(&|n| n.id.to_ascii_lowercase().ends_with(&suffix))
    }

    /// Returns the indices of the direct dependencies of node `index`,
    /// excluding the node itself.
    pub fn dependencies(&self, index: usize) -> Vec<usize> {
        let Some(node) = self.nodes.get(index) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for dependency in &node.depends_on {
            for i in self.lookup(dependency) {
                if i != index && !out.contains(&i) {
                    out.push(i);
                }
            }
        }
        out
    }

    /// Orders resources so that dependencies come first.
    ///
    /// Declaration order is kept wherever dependencies allow. Unknown
    /// dependencies and cycles are reported as warnings; a cycle is broken at
    /// the edge that closes it.
    pub fn sort(&self, diags: &mut Diagnostics) -> Vec<Rc<ResourceValue>> {
        for node in &self.nodes {
            for dependency in &node.depends_on {
                if self.lookup(dependency).is_empty() {
                    diags.warning(
                        Some(node.path.clone()),
                        format!("the dependency '{}' is not declared in the template", dependency),
                        "",
                    );
                }
            }
        }

        let mut visited = HashSet::new();
        let mut path = Vec::new();
        let mut order = Vec::with_capacity(self.nodes.len());
        for index in 0..self.nodes.len() {
            self.visit(index, &mut visited, &mut path, &mut order, diags);
        }
        order.into_iter().map(|i| Rc::clone(&self.nodes[i])).collect()
    }

    fn visit(
        &self,
        index: usize,
        visited: &mut HashSet<usize>,
        path: &mut Vec<usize>,
        order: &mut Vec<usize>,
        diags: &mut Diagnostics,
    ) {
        if visited.contains(&index) {
            return;
        }
        if let Some(start) = path.iter().position(|&n| n == index) {
            let mut names: Vec<&str> = path[start..]
                .iter()
                .map(|&n| self.nodes[n].name.as_str())
                .collect();
            names.push(self.nodes[index].name.as_str());
            diags.warning(
                Some(self.nodes[index].path.clone()),
                format!("circular dependency: {}", names.join(" -> ")),
                "",
            );
            return;
        }

        path.push(index);
        for dependency in self.dependencies(index) {
            self.visit(dependency, visited, path, order, diags);
        }
        path.pop();
        visited.insert(index);
        order.push(index);
    }
}
