use std::collections::{HashMap, HashSet};
use weft_core::{Task, TaskDependency, TaskStatus};

/// In-memory dependency graph over a set of tasks.
///
/// Each task keeps a count of dependencies that have not completed yet.
/// Completing a task decrements the count of every dependent, so readiness
/// is maintained incrementally instead of rescanning every edge.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// task -> tasks it waits for
    depends_on: HashMap<String, Vec<String>>,
    /// task -> tasks waiting for it
    dependents: HashMap<String, Vec<String>>,
    /// task -> unfinished dependencies
    blocked_by: HashMap<String, usize>,
    completed: HashSet<String>,
    /// Tasks that left `pending` without completing; never ready.
    inactive: HashSet<String>,
    /// Insertion order, used to keep `ready()` deterministic.
    order: Vec<String>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from stored tasks and edges. Edges whose dependent is not in
    /// `tasks` are dropped; a dependency outside `tasks` keeps its dependent
    /// blocked until [`complete`](Self::complete) is called for it.
    ///
    /// Only `pending` tasks can become ready.
    pub fn from_tasks(tasks: &[Task], edges: &[TaskDependency]) -> Self {
        let mut graph = Self::new();
        for task in tasks {
            graph.add_task(&task.task_id);
        }
        for edge in edges {
            if graph.blocked_by.contains_key(&edge.task_id) {
                graph.add_edge(&edge.task_id, &edge.depends_on_task_id);
            }
        }
        for task in tasks {
            match task.status {
                TaskStatus::Pending => {}
                TaskStatus::Completed => {
                    graph.complete(&task.task_id);
                }
                _ => graph.deactivate(&task.task_id),
            }
        }
        graph
    }

    /// Keep `task_id` out of `ready()` without unblocking its dependents,
    /// e.g. once it is running or has failed.
    pub fn deactivate(&mut self, task_id: &str) {
        self.inactive.insert(task_id.to_string());
    }

    /// Register a task with no dependencies yet.
    pub fn add_task(&mut self, task_id: &str) {
        if !self.blocked_by.contains_key(task_id) {
            self.blocked_by.insert(task_id.to_string(), 0);
            self.order.push(task_id.to_string());
        }
    }

    /// `task_id` waits for `depends_on`.
    pub fn add_edge(&mut self, task_id: &str, depends_on: &str) {
        self.add_task(task_id);
        let waits = self.depends_on.entry(task_id.to_string()).or_default();
        if waits.iter().any(|d| d == depends_on) {
            return;
        }
        waits.push(depends_on.to_string());
        self.dependents
            .entry(depends_on.to_string())
            .or_default()
            .push(task_id.to_string());
        if !self.completed.contains(depends_on) {
            if let Some(count) = self.blocked_by.get_mut(task_id) {
                *count += 1;
            }
        }
    }

    /// Waiting tasks with no unfinished dependencies, in insertion order.
    pub fn ready(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|id| self.is_ready(id))
            .map(String::as_str)
            .collect()
    }

    /// Whether `task_id` is still waiting and has no unfinished dependencies.
    pub fn is_ready(&self, task_id: &str) -> bool {
        !self.completed.contains(task_id)
            && !self.inactive.contains(task_id)
            && self.blocked_by.get(task_id).copied() == Some(0)
    }

    /// Mark `task_id` completed and return the dependents that became ready
    /// because of it.
    pub fn complete(&mut self, task_id: &str) -> Vec<String> {
        if !self.completed.insert(task_id.to_string()) {
            return Vec::new();
        }
        let mut unblocked = Vec::new();
        if let Some(waiting) = self.dependents.get(task_id) {
            for dependent in waiting {
                if let Some(count) = self.blocked_by.get_mut(dependent) {
                    *count = count.saturating_sub(1);
                    if *count == 0
                        && !self.completed.contains(dependent)
                        && !self.inactive.contains(dependent)
                    {
                        unblocked.push(dependent.clone());
                    }
                }
            }
        }
        unblocked
    }

    /// Check for cycles in the graph.
    pub fn has_cycle(&self) -> bool {
        let mut visited = HashMap::new();
        self.order
            .iter()
            .any(|id| self.dfs_cycle(id, &mut visited))
    }

    /// Whether adding `task_id -> depends_on` would close a cycle, i.e.
    /// `task_id` is already reachable from `depends_on`.
    pub fn would_cycle(&self, task_id: &str, depends_on: &str) -> bool {
        if task_id == depends_on {
            return true;
        }
        let mut stack = vec![depends_on];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == task_id {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(next) = self.depends_on.get(current) {
                stack.extend(next.iter().map(String::as_str));
            }
        }
        false
    }

    fn dfs_cycle<'a>(&'a self, id: &'a str, visited: &mut HashMap<&'a str, u8>) -> bool {
        match visited.get(id) {
            Some(1) => return true,  // back edge
            Some(2) => return false, // already processed
            _ => {}
        }
        visited.insert(id, 1);
        if let Some(deps) = self.depends_on.get(id) {
            for dep in deps {
                if self.dfs_cycle(dep, visited) {
                    return true;
                }
            }
        }
        visited.insert(id, 2);
        false
    }

    /// Number of tasks in the graph.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the graph holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
