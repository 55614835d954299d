//! The relationship graph of built producers.
//!
//! Every dependency a registration finds while building is recorded as a
//! [`KnownRelationship`]. [`ProducerGraph`] turns those records into an
//! arena of nodes linked by integer ids, so analyzers can walk dependents
//! and dependencies without back-pointers.
//!
//! The graph only sees producers that were built; build (or verify) the
//! container first.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::key::ServiceKey;
use crate::lifestyle::Lifestyle;
use crate::producer::InstanceProducer;

/// One dependency of one component: the consumer's implementation and
/// lifestyle, and the producer it depends on.
#[derive(Clone)]
pub struct KnownRelationship {
    implementation: ServiceKey,
    lifestyle: Lifestyle,
    dependency: Arc<InstanceProducer>,
    parameter: &'static str,
}

impl KnownRelationship {
    pub(crate) fn new(
        implementation: ServiceKey,
        lifestyle: Lifestyle,
        dependency: Arc<InstanceProducer>,
        parameter: &'static str,
    ) -> Self {
        Self {
            implementation,
            lifestyle,
            dependency,
            parameter,
        }
    }

    /// The consuming implementation.
    pub fn implementation(&self) -> &ServiceKey {
        &self.implementation
    }

    /// The consumer's lifestyle.
    pub fn lifestyle(&self) -> &Lifestyle {
        &self.lifestyle
    }

    pub fn dependency(&self) -> &Arc<InstanceProducer> {
        &self.dependency
    }

    /// The constructor parameter the dependency is injected into.
    pub fn parameter(&self) -> &'static str {
        self.parameter
    }
}

impl fmt::Debug for KnownRelationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnownRelationship")
            .field("implementation", &self.implementation)
            .field("lifestyle", &self.lifestyle)
            .field("dependency", self.dependency.service_key())
            .field("parameter", &self.parameter)
            .finish()
    }
}

/// Index of a node in a [`ProducerGraph`].
pub type NodeId = usize;

/// A producer with its edges.
pub struct GraphNode {
    producer: Arc<InstanceProducer>,
    relationships: Vec<KnownRelationship>,
    dependencies: Vec<NodeId>,
    dependents: Vec<NodeId>,
}

impl GraphNode {
    pub fn producer(&self) -> &Arc<InstanceProducer> {
        &self.producer
    }

    /// Direct dependencies recorded while building.
    pub fn relationships(&self) -> &[KnownRelationship] {
        &self.relationships
    }

    /// Nodes this node depends on, including collection elements.
    pub fn dependencies(&self) -> &[NodeId] {
        &self.dependencies
    }

    /// Nodes depending on this node.
    pub fn dependents(&self) -> &[NodeId] {
        &self.dependents
    }
}

/// Arena of producers reachable from a set of starting producers.
#[derive(Default)]
pub struct ProducerGraph {
    nodes: Vec<GraphNode>,
    /// Producer id → node id
    index: HashMap<u64, NodeId>,
}

impl ProducerGraph {
    /// Walks relationships and collection elements breadth-first from
    /// `producers`.
    #[instrument(skip_all, fields(producers = producers.len()))]
    pub fn build(producers: &[Arc<InstanceProducer>]) -> Self {
        let mut graph = Self::default();
        let mut queue: VecDeque<NodeId> = VecDeque::new();

        for producer in producers {
            let (id, added) = graph.intern(producer);
            if added {
                queue.push_back(id);
            }
        }

        while let Some(id) = queue.pop_front() {
            let producer = graph.nodes[id].producer.clone();
            let relationships = producer.relationships();

            let targets = relationships
                .iter()
                .map(|relationship| relationship.dependency().clone())
                .chain(producer.collection_elements());

            for target in targets {
                let (target_id, added) = graph.intern(&target);
                if added {
                    queue.push_back(target_id);
                }
                graph.link(id, target_id);
            }

            graph.nodes[id].relationships = relationships;
        }

        debug!(nodes = graph.nodes.len(), "Built producer graph");
        graph
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    /// The node of a producer, by producer id.
    pub fn find(&self, producer_id: u64) -> Option<NodeId> {
        self.index.get(&producer_id).copied()
    }

    /// Nodes nothing depends on.
    pub fn roots(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter().filter(|node| node.dependents.is_empty())
    }

    /// Every node reachable from `id`, excluding `id` itself, nearest first.
    pub fn transitive_dependencies(&self, id: NodeId) -> Vec<NodeId> {
        let mut visited = vec![false; self.nodes.len()];
        let mut order = Vec::new();
        let mut queue = VecDeque::from([id]);

        if let Some(slot) = visited.get_mut(id) {
            *slot = true;
        }

        while let Some(current) = queue.pop_front() {
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            for &next in &node.dependencies {
                if !visited[next] {
                    visited[next] = true;
                    order.push(next);
                    queue.push_back(next);
                }
            }
        }
        order
    }

    fn intern(&mut self, producer: &Arc<InstanceProducer>) -> (NodeId, bool) {
        if let Some(&id) = self.index.get(&producer.id()) {
            return (id, false);
        }

        let id = self.nodes.len();
        self.nodes.push(GraphNode {
            producer: producer.clone(),
            relationships: Vec::new(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
        });
        self.index.insert(producer.id(), id);
        (id, true)
    }

    fn link(&mut self, from: NodeId, to: NodeId) {
        if !self.nodes[from].dependencies.contains(&to) {
            self.nodes[from].dependencies.push(to);
            self.nodes[to].dependents.push(from);
        }
    }
}

impl fmt::Debug for ProducerGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerGraph")
            .field("nodes", &self.nodes.len())
            .field("roots", &self.roots().count())
            .finish()
    }
}
