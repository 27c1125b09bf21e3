use std::collections::{HashMap, HashSet};

use crate::error::RouterError;
use crate::task::Task;

/// Anything with an id and a list of dependency ids.
pub trait GraphNode: Clone {
    fn id(&self) -> &str;
    fn dependencies(&self) -> &[String];
}

impl GraphNode for Task {
    fn id(&self) -> &str {
        &self.id
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

/// Dependency DAG over the sub-tasks of one decomposition.
#[derive(Debug, Clone)]
pub struct TaskGraph<T: GraphNode> {
    nodes: HashMap<String, T>,
    /// id -> ids it depends on
    edges: HashMap<String, Vec<String>>,
    /// id -> ids that depend on it
    dependents: HashMap<String, Vec<String>>,
    order: Vec<String>,
}

impl<T: GraphNode> TaskGraph<T> {
    pub fn from_tasks(tasks: &[T]) -> Result<Self, RouterError> {
        let mut nodes = HashMap::new();
        let mut edges = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        let mut order = Vec::with_capacity(tasks.len());

        for task in tasks {
            let id = task.id().to_string();
            if nodes.contains_key(&id) {
                return Err(RouterError::DuplicateTaskId(id));
            }
            for dep in task.dependencies() {
                dependents.entry(dep.clone()).or_default().push(id.clone());
            }
            edges.insert(id.clone(), task.dependencies().to_vec());
            nodes.insert(id.clone(), task.clone());
            order.push(id);
        }

        Ok(Self {
            nodes,
            edges,
            dependents,
            order,
        })
    }

    /// Rejects unknown dependencies and cycles.
    pub fn validate(&self) -> Result<(), RouterError> {
        for id in &self.order {
            for dep in self.edges.get(id).into_iter().flatten() {
                if !self.nodes.contains_key(dep) {
                    return Err(RouterError::DependencyNotFound {
                        task_id: id.clone(),
                        missing_dep: dep.clone(),
                    });
                }
            }
        }

        if let Some(cycle) = self.detect_cycle() {
            return Err(RouterError::CircularDependency(cycle));
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Kahn's algorithm. Each stage only depends on earlier stages; ids
    /// within a stage keep insertion order.
    pub fn stages(&self) -> Result<Vec<Vec<String>>, RouterError> {
        let position: HashMap<&str, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let by_position =
            |ids: &mut Vec<String>| ids.sort_by_key(|id| position.get(id.as_str()).copied());

        let mut in_degree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|id| (id.as_str(), self.edges.get(id).map_or(0, Vec::len)))
            .collect();

        let mut current: Vec<String> = self
            .order
            .iter()
            .filter(|id| in_degree.get(id.as_str()) == Some(&0))
            .cloned()
            .collect();

        let mut stages = Vec::new();
        let mut processed = 0;
        while !current.is_empty() {
            processed += current.len();
            let mut next = Vec::new();
            for id in &current {
                for dependent in self.dependents.get(id).into_iter().flatten() {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            next.push(dependent.clone());
                        }
                    }
                }
            }
            by_position(&mut next);
            stages.push(std::mem::replace(&mut current, next));
        }

        if processed != self.nodes.len() {
            return Err(RouterError::CircularDependency(
                "unable to order sub-tasks (cycle detected)".to_string(),
            ));
        }
        Ok(stages)
    }

    fn detect_cycle(&self) -> Option<String> {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        for id in &self.order {
            if !visited.contains(id) && self.visit(id, &mut visited, &mut path) {
                return Some(path.join(" -> "));
            }
        }
        None
    }

    fn visit(&self, node: &str, visited: &mut HashSet<String>, path: &mut Vec<String>) -> bool {
        visited.insert(node.to_string());
        path.push(node.to_string());

        for dep in self.edges.get(node).into_iter().flatten() {
            if let Some(pos) = path.iter().position(|p| p == dep) {
                path.push(dep.clone());
                path.drain(..pos);
                return true;
            }
            if !visited.contains(dep) && self.visit(dep, visited, path) {
                return true;
            }
        }

        path.pop();
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> Task {
        let mut t = Task::with_id(id, id);
        t.dependencies = deps.iter().map(|d| d.to_string()).collect();
        t
    }

    #[test]
    fn test_stages_respect_dependencies() {
        let graph = TaskGraph::from_tasks(&[
            task("p.1", &[]),
            task("p.2", &["p.1"]),
            task("p.3", &["p.1"]),
            task("p.4", &["p.2", "p.3"]),
        ])
        .unwrap();
        graph.validate().unwrap();
        assert_eq!(
            graph.stages().unwrap(),
            vec![
                vec!["p.1".to_string()],
                vec!["p.2".to_string(), "p.3".to_string()],
                vec!["p.4".to_string()],
            ]
        );
    }

    #[test]
    fn test_duplicate_and_missing() {
        assert!(matches!(
            TaskGraph::from_tasks(&[task("a", &[]), task("a", &[])]),
            Err(RouterError::DuplicateTaskId(_))
        ));
        let graph = TaskGraph::from_tasks(&[task("a", &["zzz"])]).unwrap();
        assert!(matches!(
            graph.validate(),
            Err(RouterError::DependencyNotFound { .. })
        ));
    }

    #[test]
    fn test_cycle_detected() {
        let graph = TaskGraph::from_tasks(&[
            task("a", &["c"]),
            task("b", &["a"]),
            task("c", &["b"]),
        ])
        .unwrap();
        match graph.validate() {
            Err(RouterError::CircularDependency(path)) => {
                assert!(path.starts_with('a') && path.ends_with('a'), "{path}");
            }
            other => panic!("expected cycle, got {other:?}"),
        }
        assert!(graph.stages().is_err());
    }
}
