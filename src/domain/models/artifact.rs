//! Artifact and Artifact DAG domain models (spec §3, §4.6).
//!
//! An artifact is a concrete deliverable inside a goal. The artifact
//! graph is a DAG; [`ArtifactDag::execution_waves`] partitions it into
//! topological layers where intra-wave artifacts are independent and may
//! run concurrently (spec §4.6, §5).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

/// The kind of deliverable an artifact represents. Left open-ended as a
/// string (`domain_type`) in the spec; this enum captures the common
/// cases while `Other` preserves forward compatibility with a raw label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainType {
    File,
    Edit,
    Report,
    Other(String),
}

impl DomainType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::File => "file",
            Self::Edit => "edit",
            Self::Report => "report",
            Self::Other(s) => s.as_str(),
        }
    }
}

/// A concrete deliverable inside a goal (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub description: String,
    /// Artifact ids this one depends on, within the same goal.
    pub requires: Vec<Uuid>,
    pub produces_file: Option<String>,
    pub domain_type: DomainType,
}

impl Artifact {
    pub fn new(description: impl Into<String>, domain_type: DomainType) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            requires: Vec::new(),
            produces_file: None,
            domain_type,
        }
    }

    pub fn with_requirement(mut self, artifact_id: Uuid) -> Self {
        if artifact_id != self.id && !self.requires.contains(&artifact_id) {
            self.requires.push(artifact_id);
        }
        self
    }

    pub fn with_produces_file(mut self, path: impl Into<String>) -> Self {
        self.produces_file = Some(path.into());
        self
    }
}

/// A directed acyclic graph of artifacts belonging to one goal.
///
/// Mirrors the teacher's `TaskDag`/`DAGBuilder` shape (node map + adjacency)
/// but is keyed on [`Artifact`] rather than `Task`, and its `execution_waves`
/// method implements spec §4.6's topological-layer contract directly: wave
/// `i+1` depends only on artifacts in waves `<= i`.
#[derive(Debug, Clone, Default)]
pub struct ArtifactDag {
    nodes: HashMap<Uuid, Artifact>,
}

impl ArtifactDag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_artifacts(artifacts: Vec<Artifact>) -> Result<Self, String> {
        let mut dag = Self::new();
        for artifact in artifacts {
            dag.add_artifact(artifact)?;
        }
        Ok(dag)
    }

    /// Add an artifact, rejecting it if doing so would introduce a cycle.
    pub fn add_artifact(&mut self, artifact: Artifact) -> Result<(), String> {
        for dep in &artifact.requires {
            if !self.nodes.contains_key(dep) && *dep != artifact.id {
                // Forward references are allowed at construction time
                // (the planner may add nodes out of order); cycle
                // detection runs over the whole graph at the end.
            }
        }
        let id = artifact.id;
        self.nodes.insert(id, artifact);
        if let Some(cycle) = self.find_cycle() {
            self.nodes.remove(&id);
            return Err(format!("adding artifact {id} would create a cycle: {cycle:?}"));
        }
        Ok(())
    }

    pub fn get(&self, id: &Uuid) -> Option<&Artifact> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.nodes.values()
    }

    /// Depth-first cycle detection. Returns the ids involved in the first
    /// cycle found, if any.
    pub fn find_cycle(&self) -> Option<Vec<Uuid>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: HashMap<Uuid, Mark> = HashMap::new();
        let mut stack = Vec::new();

        fn visit(
            id: Uuid,
            nodes: &HashMap<Uuid, Artifact>,
            marks: &mut HashMap<Uuid, Mark>,
            stack: &mut Vec<Uuid>,
        ) -> Option<Vec<Uuid>> {
            match marks.get(&id) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => {
                    let start = stack.iter().position(|x| *x == id).unwrap_or(0);
                    return Some(stack[start..].to_vec());
                }
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            stack.push(id);
            if let Some(node) = nodes.get(&id) {
                for dep in &node.requires {
                    if nodes.contains_key(dep) {
                        if let Some(cycle) = visit(*dep, nodes, marks, stack) {
                            return Some(cycle);
                        }
                    }
                }
            }
            stack.pop();
            marks.insert(id, Mark::Done);
            None
        }

        for id in self.nodes.keys() {
            if let Some(cycle) = visit(*id, &self.nodes, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }

    pub fn is_acyclic(&self) -> bool {
        self.find_cycle().is_none()
    }

    /// Partition the DAG into topological waves: wave `i+1` contains only
    /// artifacts whose dependencies lie entirely in waves `<= i`. Returns
    /// an empty outer vec for an empty DAG. Any artifact unreachable due
    /// to a dangling dependency is still scheduled once its resolvable
    /// deps clear (missing deps are treated as already satisfied, since a
    /// partial plan may reference artifacts from a prior goal run).
    pub fn execution_waves(&self) -> Vec<Vec<Uuid>> {
        let mut remaining: HashSet<Uuid> = self.nodes.keys().copied().collect();
        let mut completed: HashSet<Uuid> = HashSet::new();
        let mut waves = Vec::new();

        while !remaining.is_empty() {
            let ready: Vec<Uuid> = remaining
                .iter()
                .filter(|id| {
                    let node = &self.nodes[id];
                    node.requires
                        .iter()
                        .all(|dep| completed.contains(dep) || !self.nodes.contains_key(dep))
                })
                .copied()
                .collect();

            if ready.is_empty() {
                // Remaining nodes form a cycle that slipped past add_artifact
                // (shouldn't happen given the cycle guard, but fail safe
                // rather than loop forever).
                break;
            }

            for id in &ready {
                remaining.remove(id);
                completed.insert(*id);
            }
            let mut wave = ready;
            wave.sort();
            waves.push(wave);
        }

        waves
    }

    /// Topologically sorted flat list (wave order, then id order within a
    /// wave) — convenience for callers that don't need wave boundaries.
    pub fn topological_order(&self) -> Vec<Uuid> {
        self.execution_waves().into_iter().flatten().collect()
    }

    /// Breadth-first traversal from a set of roots, used by the memory
    /// layer's co-occurrence expansion (spec §4.4) over the same graph
    /// shape when artifacts double as entities.
    pub fn bfs_from(&self, roots: &[Uuid], max_depth: usize) -> HashMap<Uuid, usize> {
        let mut depths = HashMap::new();
        let mut queue: VecDeque<(Uuid, usize)> = VecDeque::new();
        for r in roots {
            depths.insert(*r, 0);
            queue.push_back((*r, 0));
        }
        while let Some((id, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                for dep in &node.requires {
                    if !depths.contains_key(dep) {
                        depths.insert(*dep, depth + 1);
                        queue.push_back((*dep, depth + 1));
                    }
                }
            }
        }
        depths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(desc: &str) -> Artifact {
        Artifact::new(desc, DomainType::File)
    }

    #[test]
    fn single_artifact_is_one_wave() {
        let a = artifact("a");
        let dag = ArtifactDag::from_artifacts(vec![a]).unwrap();
        let waves = dag.execution_waves();
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].len(), 1);
    }

    #[test]
    fn chain_produces_one_wave_per_link() {
        let a = artifact("a");
        let b = artifact("b").with_requirement(a.id);
        let c = artifact("c").with_requirement(b.id);
        let dag = ArtifactDag::from_artifacts(vec![a, b, c]).unwrap();
        let waves = dag.execution_waves();
        assert_eq!(waves.len(), 3);
        for wave in &waves {
            assert_eq!(wave.len(), 1);
        }
    }

    #[test]
    fn independent_artifacts_share_a_wave() {
        let a = artifact("a");
        let b = artifact("b");
        let c = artifact("c").with_requirement(a.id).with_requirement(b.id);
        let dag = ArtifactDag::from_artifacts(vec![a, b, c]).unwrap();
        let waves = dag.execution_waves();
        assert_eq!(waves.len(), 2);
        assert_eq!(waves[0].len(), 2);
        assert_eq!(waves[1].len(), 1);
    }

    #[test]
    fn cycle_is_rejected_at_construction() {
        let a = Artifact::new("a", DomainType::File);
        let b = Artifact::new("b", DomainType::File).with_requirement(a.id);
        let a_cyclic = Artifact {
            requires: vec![b.id],
            ..a
        };
        let result = ArtifactDag::from_artifacts(vec![a_cyclic, b]);
        assert!(result.is_err());
    }

    #[test]
    fn never_produces_cyclic_graph_property() {
        // spec §8: planner.plan never returns a graph with a cycle.
        let a = artifact("a");
        let b = artifact("b").with_requirement(a.id);
        let dag = ArtifactDag::from_artifacts(vec![a, b]).unwrap();
        assert!(dag.is_acyclic());
    }
}
