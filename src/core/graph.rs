//! Job dependency graph

use crate::core::{
    error::{CycleError, LoadError, SpecError},
    job::JobTemplate,
};
use std::collections::{BTreeSet, HashMap, HashSet};

/// `needs` relation between job templates
///
/// Nodes keep declaration order; an edge runs from each needed job to its
/// dependent.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    needs: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl DependencyGraph {
    /// Build the graph, rejecting unknown needs and cycles
    pub fn build(templates: &[JobTemplate]) -> Result<Self, LoadError> {
        let ids: Vec<String> = templates.iter().map(|t| t.id.clone()).collect();
        let mut index = HashMap::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            if index.insert(id.clone(), i).is_some() {
                return Err(SpecError::DuplicateJob(id.clone()).into());
            }
        }

        let mut needs = vec![Vec::new(); ids.len()];
        let mut dependents = vec![Vec::new(); ids.len()];
        for (i, template) in templates.iter().enumerate() {
            for dep in &template.needs {
                let &d = index.get(dep).ok_or_else(|| SpecError::UnknownDependency {
                    job: template.id.clone(),
                    dependency: dep.clone(),
                })?;
                if !needs[i].contains(&d) {
                    needs[i].push(d);
                    dependents[d].push(i);
                }
            }
        }

        let mut graph = DependencyGraph {
            ids,
            index,
            needs,
            dependents,
            order: Vec::new(),
        };
        graph.check_cycles()?;
        graph.order = graph.topological_sort();
        Ok(graph)
    }

    /// Check for cycles with a depth-first traversal
    fn check_cycles(&self) -> Result<(), CycleError> {
        let mut visited = HashSet::new();
        let mut recursion_stack = Vec::new();

        for node in 0..self.ids.len() {
            if !visited.contains(&node) {
                self.dfs_check(node, &mut visited, &mut recursion_stack)?;
            }
        }

        Ok(())
    }

    fn dfs_check(
        &self,
        node: usize,
        visited: &mut HashSet<usize>,
        recursion_stack: &mut Vec<usize>,
    ) -> Result<(), CycleError> {
        visited.insert(node);
        recursion_stack.push(node);

        for &dep in &self.needs[node] {
            if let Some(pos) = recursion_stack.iter().position(|&n| n == dep) {
                let mut path: Vec<String> = recursion_stack[pos..]
                    .iter()
                    .map(|&n| self.ids[n].clone())
                    .collect();
                path.push(self.ids[dep].clone());
                return Err(CycleError { path });
            }
            if !visited.contains(&dep) {
                self.dfs_check(dep, visited, recursion_stack)?;
            }
        }

        recursion_stack.pop();
        Ok(())
    }

    /// Kahn's algorithm, always taking the earliest declared ready job
    fn topological_sort(&self) -> Vec<usize> {
        let mut remaining: Vec<usize> = self.needs.iter().map(|n| n.len()).collect();
        let mut ready: BTreeSet<usize> = (0..self.ids.len())
            .filter(|&i| remaining[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.ids.len());

        while let Some(node) = ready.pop_first() {
            order.push(node);
            for &dependent in &self.dependents[node] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        order
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Job ids in declaration order
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Execution order: dependencies first, declaration order otherwise
    pub fn topological_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.ids[i].as_str()).collect()
    }

    /// Jobs the given job needs
    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.lookup(id, &self.needs)
    }

    /// Jobs that need the given job
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.lookup(id, &self.dependents)
    }

    fn lookup<'a>(&'a self, id: &str, edges: &'a [Vec<usize>]) -> Vec<&'a str> {
        self.index
            .get(id)
            .map(|&i| edges[i].iter().map(|&n| self.ids[n].as_str()).collect())
            .unwrap_or_default()
    }

    /// Jobs without needs
    pub fn roots(&self) -> Vec<&str> {
        self.ids
            .iter()
            .enumerate()
            .filter(|(i, _)| self.needs[*i].is_empty())
            .map(|(_, id)| id.as_str())
            .collect()
    }

    /// Whether every need of `id` is in `terminal`
    pub fn is_ready(&self, id: &str, terminal: &HashSet<String>) -> bool {
        self.predecessors(id).iter().all(|dep| terminal.contains(*dep))
    }

    /// Jobs grouped by longest distance from a root
    pub fn waves(&self) -> Vec<Vec<&str>> {
        let mut level = vec![0usize; self.ids.len()];
        for &node in &self.order {
            level[node] = self.needs[node]
                .iter()
                .map(|&dep| level[dep] + 1)
                .max()
                .unwrap_or(0);
        }

        let depth = level.iter().max().map(|m| m + 1).unwrap_or(0);
        let mut waves = vec![Vec::new(); depth];
        for (node, id) in self.ids.iter().enumerate() {
            waves[level[node]].push(id.as_str());
        }
        waves
    }
}
