//! Phase registry: the dependency DAG the orchestrator schedules against.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use crate::error::CoreError;

/// Directed acyclic graph of pipeline phases.
///
/// Phases keep their registration order, which breaks ties in
/// [`topological_order`](Self::topological_order) so scheduling stays
/// deterministic. Pure data: no execution state lives here.
#[derive(Debug, Clone, Default)]
pub struct PhaseRegistry {
    names: Vec<String>,
    index: HashMap<String, usize>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
}

impl PhaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a phase and the phases that must complete before it.
    ///
    /// Dependencies must already be registered, so every edge points at an
    /// earlier phase and the graph stays acyclic by construction.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        dependencies: &[&str],
    ) -> Result<(), CoreError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(CoreError::DuplicatePhase(name));
        }

        let mut dep_ids = Vec::with_capacity(dependencies.len());
        for dep in dependencies {
            let Some(&dep_id) = self.index.get(*dep) else {
                return Err(CoreError::UnknownDependency {
                    phase: name,
                    dependency: (*dep).to_string(),
                });
            };
            dep_ids.push(dep_id);
        }

        let id = self.names.len();
        self.index.insert(name.clone(), id);
        self.names.push(name);
        for &dep_id in &dep_ids {
            self.dependents[dep_id].push(id);
        }
        self.dependencies.push(dep_ids);
        self.dependents.push(Vec::new());

        Ok(())
    }

    /// Build a registry from (phase, dependencies) pairs in one shot.
    ///
    /// Unlike [`register`](Self::register), edges may reference phases
    /// declared later in the list, so the combined graph is validated with
    /// Kahn's algorithm and cycles are reported as
    /// [`CoreError::DependencyCycle`].
    pub fn from_edges(phases: &[(&str, &[&str])]) -> Result<Self, CoreError> {
        let mut registry = Self::new();

        for (name, _) in phases {
            if registry.index.contains_key(*name) {
                return Err(CoreError::DuplicatePhase((*name).to_string()));
            }
            let id = registry.names.len();
            registry.index.insert((*name).to_string(), id);
            registry.names.push((*name).to_string());
            registry.dependencies.push(Vec::new());
            registry.dependents.push(Vec::new());
        }

        for (name, deps) in phases {
            let id = registry.index[*name];
            for dep in *deps {
                let Some(&dep_id) = registry.index.get(*dep) else {
                    return Err(CoreError::UnknownDependency {
                        phase: (*name).to_string(),
                        dependency: (*dep).to_string(),
                    });
                };
                registry.dependencies[id].push(dep_id);
                registry.dependents[dep_id].push(id);
            }
        }

        registry.validate_acyclic()?;
        Ok(registry)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Phase names in registration order.
    pub fn phase_names(&self) -> Vec<&str> {
        self.names.iter().map(String::as_str).collect()
    }

    /// Direct dependencies of a phase.
    pub fn dependencies_of(&self, name: &str) -> Result<Vec<&str>, CoreError> {
        let id = self.id_of(name)?;
        Ok(self.dependencies[id]
            .iter()
            .map(|&dep| self.names[dep].as_str())
            .collect())
    }

    /// Direct dependents of a phase.
    pub fn dependents_of(&self, name: &str) -> Result<Vec<&str>, CoreError> {
        let id = self.id_of(name)?;
        Ok(self.dependents[id]
            .iter()
            .map(|&dep| self.names[dep].as_str())
            .collect())
    }

    /// Every ancestor of a phase: the phases whose results feed into it.
    pub fn transitive_dependencies(&self, name: &str) -> Result<Vec<&str>, CoreError> {
        self.reachable(name, &self.dependencies)
    }

    /// Every descendant of a phase: the phases that can no longer run once
    /// it fails.
    pub fn transitive_dependents(&self, name: &str) -> Result<Vec<&str>, CoreError> {
        self.reachable(name, &self.dependents)
    }

    /// Deterministic total order consistent with the DAG, ties broken by
    /// registration order. Used as the scheduling priority when several
    /// phases are eligible at once.
    pub fn topological_order(&self) -> Vec<&str> {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = (0..self.names.len())
            .filter(|&id| in_degree[id] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(self.names.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(self.names[id].as_str());
            for &dependent in &self.dependents[id] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        order
    }

    fn id_of(&self, name: &str) -> Result<usize, CoreError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::UnknownPhase(name.to_string()))
    }

    fn reachable<'a>(
        &'a self,
        name: &str,
        edges: &'a [Vec<usize>],
    ) -> Result<Vec<&'a str>, CoreError> {
        let start = self.id_of(name)?;
        let mut seen = vec![false; self.names.len()];
        let mut stack = vec![start];
        let mut found = Vec::new();

        while let Some(id) = stack.pop() {
            for &next in &edges[id] {
                if !seen[next] {
                    seen[next] = true;
                    stack.push(next);
                    found.push(next);
                }
            }
        }

        found.sort_unstable();
        Ok(found.into_iter().map(|id| self.names[id].as_str()).collect())
    }

    /// Kahn's algorithm: every phase must be reachable from the zero
    /// in-degree frontier, otherwise the leftover phases form a cycle.
    fn validate_acyclic(&self) -> Result<(), CoreError> {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut queue: VecDeque<usize> = (0..self.names.len())
            .filter(|&id| in_degree[id] == 0)
            .collect();

        let mut visited = 0;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            for &dependent in &self.dependents[id] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if visited == self.names.len() {
            return Ok(());
        }

        let cycle = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &degree)| degree > 0)
            .map(|(id, _)| self.names[id].clone())
            .collect();
        Err(CoreError::DependencyCycle(cycle))
    }
}
