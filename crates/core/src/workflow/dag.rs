use crate::types::WorkflowDefinition;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Topo;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Adjacency keyed by action name
pub type Adjacency = BTreeMap<String, BTreeSet<String>>;

/// Largest number of parallel instances one action may declare
pub const MAX_RANK: u32 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum DagError {
    #[error("Action {0} is not defined in the action list")]
    UnknownAction(String),

    #[error("Action {action} invokes {successor}, which is not defined in the action list")]
    UnknownSuccessor { action: String, successor: String },

    #[error("Start action {0} is not defined in the action list")]
    UnknownStartAction(String),

    #[error("Workflow contains circular invocations")]
    Cycle,

    #[error("Action {action} invokes {successor} with rank {rank}, above the limit of {max}")]
    RankTooLarge {
        action: String,
        successor: String,
        rank: u32,
        max: u32,
    },
}

/// Structural position of an action in the whole graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub is_first: bool,
    pub is_last: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionKind {
    First,
    Last,
    Only,
    Middle,
}

impl Position {
    pub fn kind(&self) -> PositionKind {
        match (self.is_first, self.is_last) {
            (true, true) => PositionKind::Only,
            (true, false) => PositionKind::First,
            (false, true) => PositionKind::Last,
            (false, false) => PositionKind::Middle,
        }
    }
}

/// DAG representation of a workflow definition.
///
/// Conditional branches are flattened: an edge `a -> b` means `a` could
/// invoke `b`, not that it will. Built once and never mutated.
#[derive(Debug, Clone)]
pub struct WorkflowDag {
    graph: DiGraph<String, ()>,
    indices: HashMap<String, NodeIndex>,
    forward: Adjacency,
    reverse: Adjacency,
    ranks: BTreeMap<String, u32>,
    start: String,
}

impl WorkflowDag {
    /// Build the DAG from a workflow definition
    pub fn from_definition(definition: &WorkflowDefinition) -> Result<Self, DagError> {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        let mut forward: Adjacency = BTreeMap::new();
        let mut reverse: Adjacency = BTreeMap::new();
        let mut ranks: BTreeMap<String, u32> = BTreeMap::new();

        // Add all actions as nodes
        for name in definition.action_list.keys() {
            let node = graph.add_node(name.clone());
            indices.insert(name.clone(), node);
            forward.insert(name.clone(), BTreeSet::new());
            reverse.insert(name.clone(), BTreeSet::new());
            ranks.insert(name.clone(), 1);
        }

        if !indices.contains_key(&definition.function_invoke) {
            return Err(DagError::UnknownStartAction(
                definition.function_invoke.clone(),
            ));
        }

        // Add invocation edges (invoker -> invoked)
        for (name, action) in &definition.action_list {
            for target in action.invoke_next.targets() {
                let successor = indices.get(&target.action).ok_or_else(|| {
                    DagError::UnknownSuccessor {
                        action: name.clone(),
                        successor: target.action.clone(),
                    }
                })?;

                if target.rank > MAX_RANK {
                    return Err(DagError::RankTooLarge {
                        action: name.clone(),
                        successor: target.action.clone(),
                        rank: target.rank,
                        max: MAX_RANK,
                    });
                }

                if let Some(rank) = ranks.get_mut(&target.action) {
                    *rank = (*rank).max(target.rank);
                }

                let inserted = forward
                    .get_mut(name)
                    .map(|set| set.insert(target.action.clone()))
                    .unwrap_or(false);
                if inserted {
                    graph.add_edge(indices[name], *successor, ());
                    reverse
                        .entry(target.action.clone())
                        .or_default()
                        .insert(name.clone());
                }
            }
        }

        if petgraph::algo::is_cyclic_directed(&graph) {
            return Err(DagError::Cycle);
        }

        Ok(Self {
            graph,
            indices,
            forward,
            reverse,
            ranks,
            start: definition.function_invoke.clone(),
        })
    }

    /// Successor sets, keyed by every action
    pub fn forward(&self) -> &Adjacency {
        &self.forward
    }

    /// Predecessor sets, the exact transpose of `forward`
    pub fn reverse(&self) -> &Adjacency {
        &self.reverse
    }

    pub fn start_action(&self) -> &str {
        &self.start
    }

    pub fn contains(&self, action: &str) -> bool {
        self.indices.contains_key(action)
    }

    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.forward.keys().map(String::as_str)
    }

    pub fn successors(&self, action: &str) -> Result<&BTreeSet<String>, DagError> {
        self.forward
            .get(action)
            .ok_or_else(|| DagError::UnknownAction(action.to_string()))
    }

    pub fn predecessors(&self, action: &str) -> Result<&BTreeSet<String>, DagError> {
        self.reverse
            .get(action)
            .ok_or_else(|| DagError::UnknownAction(action.to_string()))
    }

    /// Number of parallel instances declared for an action (1 when unranked)
    pub fn rank(&self, action: &str) -> u32 {
        self.ranks.get(action).copied().unwrap_or(1)
    }

    /// Instance names of an action: `name`, or `name(1)`..`name(N)` when ranked
    pub fn instances(&self, action: &str) -> Vec<String> {
        match self.rank(action) {
            0 | 1 => vec![action.to_string()],
            n => (1..=n).map(|k| format!("{}({})", action, k)).collect(),
        }
    }

    pub fn position(&self, action: &str) -> Result<Position, DagError> {
        Ok(Position {
            is_first: self.predecessors(action)?.is_empty(),
            is_last: self.successors(action)?.is_empty(),
        })
    }

    /// Actions in topological order (invokers first)
    pub fn topological_order(&self) -> Vec<String> {
        let mut topo = Topo::new(&self.graph);
        let mut actions = Vec::new();

        while let Some(node) = topo.next(&self.graph) {
            actions.push(self.graph[node].clone());
        }

        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActionConfig, ConditionalInvoke, InvokeEntry, InvokeNext};

    fn action(next: &[&str]) -> ActionConfig {
        ActionConfig {
            invoke_next: InvokeNext::List(
                next.iter()
                    .map(|n| InvokeEntry::Name(n.to_string()))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn definition(start: &str, actions: Vec<(&str, ActionConfig)>) -> WorkflowDefinition {
        WorkflowDefinition {
            workflow_name: "test".to_string(),
            function_invoke: start.to_string(),
            action_list: actions
                .into_iter()
                .map(|(name, cfg)| (name.to_string(), cfg))
                .collect(),
            compute_servers: Default::default(),
            data_stores: Default::default(),
            default_data_store: None,
            vm_config: None,
            invocation_id: None,
            invocation_timestamp: None,
            log_folder: None,
        }
    }

    fn diamond() -> WorkflowDefinition {
        definition(
            "a",
            vec![
                ("a", action(&["b", "c"])),
                ("b", action(&["d"])),
                ("c", action(&["d"])),
                ("d", action(&[])),
            ],
        )
    }

    #[test]
    fn test_linear_dag() {
        let def = definition(
            "step1",
            vec![
                ("step1", action(&["step2"])),
                ("step2", action(&["step3"])),
                ("step3", action(&[])),
            ],
        );

        let dag = WorkflowDag::from_definition(&def).unwrap();
        let order = dag.topological_order();

        assert_eq!(order, vec!["step1", "step2", "step3"]);
    }

    #[test]
    fn test_reverse_is_transpose_of_forward() {
        let dag = WorkflowDag::from_definition(&diamond()).unwrap();

        for (from, successors) in dag.forward() {
            for to in successors {
                assert!(dag.reverse()[to].contains(from));
            }
        }
        for (to, predecessors) in dag.reverse() {
            for from in predecessors {
                assert!(dag.forward()[from].contains(to));
            }
        }

        let forward_edges: usize = dag.forward().values().map(BTreeSet::len).sum();
        let reverse_edges: usize = dag.reverse().values().map(BTreeSet::len).sum();
        assert_eq!(forward_edges, 4);
        assert_eq!(forward_edges, reverse_edges);
    }

    #[test]
    fn test_positions() {
        let dag = WorkflowDag::from_definition(&diamond()).unwrap();

        assert_eq!(dag.position("a").unwrap().kind(), PositionKind::First);
        assert_eq!(dag.position("b").unwrap().kind(), PositionKind::Middle);
        assert_eq!(dag.position("d").unwrap().kind(), PositionKind::Last);
        assert!(matches!(
            dag.position("zzz"),
            Err(DagError::UnknownAction(_))
        ));
    }

    #[test]
    fn test_single_action_is_only() {
        let def = definition("solo", vec![("solo", action(&[]))]);
        let dag = WorkflowDag::from_definition(&def).unwrap();

        assert_eq!(dag.position("solo").unwrap().kind(), PositionKind::Only);
    }

    #[test]
    fn test_conditional_branches_flattened() {
        let cond = ActionConfig {
            invoke_next: InvokeNext::Conditional(ConditionalInvoke {
                on_true: vec!["yes".to_string()],
                on_false: vec!["no".to_string()],
            }),
            ..Default::default()
        };
        let def = definition(
            "check",
            vec![("check", cond), ("yes", action(&[])), ("no", action(&[]))],
        );

        let dag = WorkflowDag::from_definition(&def).unwrap();
        let successors: Vec<&String> = dag.successors("check").unwrap().iter().collect();
        assert_eq!(successors, vec!["no", "yes"]);
        assert!(dag.predecessors("yes").unwrap().contains("check"));
    }

    #[test]
    fn test_ranked_successor() {
        let def = definition(
            "split",
            vec![("split", action(&["work(3)"])), ("work", action(&[]))],
        );

        let dag = WorkflowDag::from_definition(&def).unwrap();
        assert_eq!(dag.rank("work"), 3);
        assert_eq!(dag.instances("work"), vec!["work(1)", "work(2)", "work(3)"]);
        assert_eq!(dag.instances("split"), vec!["split"]);
        assert!(dag.successors("split").unwrap().contains("work"));
    }

    #[test]
    fn test_oversized_rank_rejected() {
        let def = definition(
            "split",
            vec![("split", action(&["work(4000000000)"])), ("work", action(&[]))],
        );

        let err = WorkflowDag::from_definition(&def).unwrap_err();
        assert!(matches!(err, DagError::RankTooLarge { rank: 4000000000, .. }));

        let def = definition(
            "split",
            vec![("split", action(&["work(1000)"])), ("work", action(&[]))],
        );
        assert_eq!(WorkflowDag::from_definition(&def).unwrap().rank("work"), MAX_RANK);
    }

    #[test]
    fn test_unknown_successor_rejected() {
        let def = definition("a", vec![("a", action(&["ghost"]))]);

        let err = WorkflowDag::from_definition(&def).unwrap_err();
        assert!(matches!(err, DagError::UnknownSuccessor { ref successor, .. } if successor == "ghost"));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_unknown_start_rejected() {
        let def = definition("missing", vec![("a", action(&[]))]);

        let result = WorkflowDag::from_definition(&def);
        assert!(matches!(result, Err(DagError::UnknownStartAction(_))));
    }

    #[test]
    fn test_cyclic_dag_rejected() {
        let def = definition(
            "step1",
            vec![("step1", action(&["step2"])), ("step2", action(&["step1"]))],
        );

        let result = WorkflowDag::from_definition(&def);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("circular invocations"));
    }
}
