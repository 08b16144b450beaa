use docket_core::{AgentId, ContextKey, GraphError, Task, TaskId};
use std::collections::{BTreeMap, BTreeSet};

/// Validated, acyclic set of tasks for one run.
///
/// Read-only once built. Iteration is always in task id order, and
/// [`TaskGraph::order`] is a deterministic topological order (Kahn's
/// algorithm, ties broken by id).
#[derive(Debug, Clone)]
pub struct TaskGraph {
    tasks: BTreeMap<TaskId, Task>,
    dependents: BTreeMap<TaskId, BTreeSet<TaskId>>,
    order: Vec<TaskId>,
    inputs: BTreeSet<ContextKey>,
}

impl TaskGraph {
    /// Build a graph whose tasks only read keys produced upstream.
    pub fn build(defs: Vec<Task>) -> Result<Self, GraphError> {
        Self::build_with_inputs(defs, BTreeSet::new())
    }

    /// Build a graph where `inputs` are supplied by the caller before the run
    /// starts and count as produced for every task.
    pub fn build_with_inputs<I>(defs: Vec<Task>, inputs: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = ContextKey>,
    {
        let inputs: BTreeSet<ContextKey> = inputs.into_iter().collect();

        let mut tasks = BTreeMap::new();
        for task in defs {
            if tasks.contains_key(&task.id) {
                return Err(GraphError::DuplicateTask(task.id));
            }
            tasks.insert(task.id.clone(), task);
        }

        let mut dependents: BTreeMap<TaskId, BTreeSet<TaskId>> =
            tasks.keys().map(|id| (id.clone(), BTreeSet::new())).collect();
        for task in tasks.values() {
            for dep in &task.depends_on {
                let Some(children) = dependents.get_mut(dep) else {
                    return Err(GraphError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                };
                children.insert(task.id.clone());
            }
        }

        check_unique_outputs(&tasks, &inputs)?;
        let order = topological_order(&tasks, &dependents)?;
        check_inputs_produced(&tasks, &order, &inputs)?;

        Ok(Self {
            tasks,
            dependents,
            order,
            inputs,
        })
    }

    /// Tasks not in `completed` whose dependencies are all in `completed`.
    pub fn ready_tasks(&self, completed: &BTreeSet<TaskId>) -> BTreeSet<TaskId> {
        self.tasks
            .values()
            .filter(|t| !completed.contains(&t.id))
            .filter(|t| t.depends_on.is_subset(completed))
            .map(|t| t.id.clone())
            .collect()
    }

    /// Task with the given id.
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Every task, in id order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Deterministic topological order.
    pub fn order(&self) -> &[TaskId] {
        &self.order
    }

    /// Keys supplied as run inputs.
    pub fn input_keys(&self) -> &BTreeSet<ContextKey> {
        &self.inputs
    }

    /// Direct dependents of `id`.
    pub fn dependents(&self, id: &TaskId) -> impl Iterator<Item = &TaskId> {
        self.dependents.get(id).into_iter().flatten()
    }

    /// Every task that depends on `id`, directly or transitively.
    pub fn dependents_transitive(&self, id: &TaskId) -> BTreeSet<TaskId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&TaskId> = self.dependents(id).collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next.clone()) {
                stack.extend(self.dependents(next));
            }
        }
        seen
    }

    /// Tasks nothing depends on, in id order.
    pub fn terminal_tasks(&self) -> Vec<&TaskId> {
        self.dependents
            .iter()
            .filter(|(_, children)| children.is_empty())
            .map(|(id, _)| id)
            .collect()
    }

    /// Fails on the first task (in id order) whose agent is not known.
    pub fn check_agents<F>(&self, is_known: F) -> Result<(), GraphError>
    where
        F: Fn(&AgentId) -> bool,
    {
        match self.tasks.values().find(|t| !is_known(&t.agent_id)) {
            Some(task) => Err(GraphError::UnknownAgent {
                task: task.id.clone(),
                agent: task.agent_id.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when the graph has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

fn check_unique_outputs(
    tasks: &BTreeMap<TaskId, Task>,
    inputs: &BTreeSet<ContextKey>,
) -> Result<(), GraphError> {
    let mut producers: BTreeMap<&ContextKey, String> =
        inputs.iter().map(|k| (k, "input".to_string())).collect();
    for task in tasks.values() {
        for key in &task.output_keys {
            if let Some(first) = producers.insert(key, task.id.to_string()) {
                return Err(GraphError::DuplicateOutput {
                    key: key.clone(),
                    first,
                    second: task.id.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn topological_order(
    tasks: &BTreeMap<TaskId, Task>,
    dependents: &BTreeMap<TaskId, BTreeSet<TaskId>>,
) -> Result<Vec<TaskId>, GraphError> {
    let mut indegree: BTreeMap<&TaskId, usize> = tasks
        .values()
        .map(|t| (&t.id, t.depends_on.len()))
        .collect();
    let mut ready: BTreeSet<&TaskId> = indegree
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(tasks.len());
    while let Some(id) = ready.pop_first() {
        order.push(id.clone());
        for child in dependents.get(id).into_iter().flatten() {
            if let Some(n) = indegree.get_mut(child) {
                *n -= 1;
                if *n == 0 {
                    ready.insert(child);
                }
            }
        }
    }

    if order.len() < tasks.len() {
        let placed: BTreeSet<&TaskId> = order.iter().collect();
        let tasks = tasks
            .keys()
            .filter(|id| !placed.contains(id))
            .cloned()
            .collect();
        return Err(GraphError::Cycle { tasks });
    }
    Ok(order)
}

/// Every input key must come from a run input or a transitive dependency.
fn check_inputs_produced(
    tasks: &BTreeMap<TaskId, Task>,
    order: &[TaskId],
    inputs: &BTreeSet<ContextKey>,
) -> Result<(), GraphError> {
    let mut ancestors: BTreeMap<&TaskId, BTreeSet<&TaskId>> = BTreeMap::new();
    for id in order {
        let Some(task) = tasks.get(id) else { continue };
        let mut upstream = BTreeSet::new();
        for dep in &task.depends_on {
            upstream.insert(dep);
            if let Some(inherited) = ancestors.get(dep) {
                upstream.extend(inherited.iter().copied());
            }
        }

        for key in &task.input_keys {
            let produced = inputs.contains(key)
                || upstream
                    .iter()
                    .filter_map(|a| tasks.get(*a))
                    .any(|a| a.output_keys.contains(key));
            if !produced {
                return Err(GraphError::UnproducedInput {
                    task: id.clone(),
                    key: key.clone(),
                });
            }
        }
        ancestors.insert(id, upstream);
    }
    Ok(())
}
