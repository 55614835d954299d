//! Configuration diagnostics.
//!
//! Analyzers walk the [`ProducerGraph`] of a verified container and report
//! likely configuration mistakes. Diagnostics never fail resolution; they
//! are collected into an [`Analysis`] by [`Container::analyze`].
//!
//! Results are grouped per kind, then per service. Groups live in a flat
//! arena and point at each other by [`GroupId`].
//!
//! [`Container::analyze`]: crate::container::Container::analyze

mod analyzers;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::graph::ProducerGraph;
use crate::key::ServiceKey;
use crate::options::ContainerOptions;
use crate::producer::InstanceProducer;

pub use analyzers::{
    AmbiguousLifestylesAnalyzer, DisposableTransientAnalyzer, LifestyleMismatchAnalyzer,
    ShortCircuitAnalyzer, SingleResponsibilityAnalyzer, TornLifestyleAnalyzer,
};

/// The kinds of diagnostic the built-in analyzers report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DiagnosticType {
    LifestyleMismatch,
    ShortCircuitedDependency,
    SingleResponsibilityViolation,
    AmbiguousLifestyles,
    DisposableTransientComponent,
    TornLifestyle,
}

impl DiagnosticType {
    pub const ALL: [DiagnosticType; 6] = [
        DiagnosticType::LifestyleMismatch,
        DiagnosticType::ShortCircuitedDependency,
        DiagnosticType::SingleResponsibilityViolation,
        DiagnosticType::AmbiguousLifestyles,
        DiagnosticType::DisposableTransientComponent,
        DiagnosticType::TornLifestyle,
    ];

    pub fn severity(self) -> Severity {
        match self {
            DiagnosticType::SingleResponsibilityViolation => Severity::Information,
            _ => Severity::Warning,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DiagnosticType::LifestyleMismatch => "Lifestyle Mismatch",
            DiagnosticType::ShortCircuitedDependency => "Short Circuited Dependency",
            DiagnosticType::SingleResponsibilityViolation => "Single Responsibility Violation",
            DiagnosticType::AmbiguousLifestyles => "Ambiguous Lifestyles",
            DiagnosticType::DisposableTransientComponent => "Disposable Transient Component",
            DiagnosticType::TornLifestyle => "Torn Lifestyle",
        }
    }
}

impl fmt::Display for DiagnosticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Information,
    Warning,
}

/// What an analyzer found, before suppression and grouping.
#[derive(Debug, Clone)]
pub struct Finding {
    /// The producer the finding is about
    pub producer: Arc<InstanceProducer>,
    pub description: String,
}

impl Finding {
    pub fn new(producer: Arc<InstanceProducer>, description: impl Into<String>) -> Self {
        Self {
            producer,
            description: description.into(),
        }
    }
}

/// One diagnostic check over the relationship graph.
pub trait Analyzer: Send + Sync {
    fn kind(&self) -> DiagnosticType;

    fn analyze(&self, graph: &ProducerGraph, options: &ContainerOptions) -> Vec<Finding>;
}

/// The built-in analyzers, in report order.
pub fn default_analyzers() -> Vec<Box<dyn Analyzer>> {
    vec![
        Box::new(LifestyleMismatchAnalyzer),
        Box::new(ShortCircuitAnalyzer),
        Box::new(SingleResponsibilityAnalyzer),
        Box::new(AmbiguousLifestylesAnalyzer),
        Box::new(DisposableTransientAnalyzer),
        Box::new(TornLifestyleAnalyzer),
    ]
}

pub(crate) fn analyze(graph: &ProducerGraph, options: &ContainerOptions) -> Analysis {
    run(graph, options, &default_analyzers())
}

/// Runs `analyzers` over `graph`. Findings on registrations that suppress
/// the analyzer's kind are dropped, and identical findings for one service
/// are reported once.
pub fn run(
    graph: &ProducerGraph,
    options: &ContainerOptions,
    analyzers: &[Box<dyn Analyzer>],
) -> Analysis {
    let mut analysis = Analysis::default();
    let mut seen: HashSet<(DiagnosticType, ServiceKey, String)> = HashSet::new();

    for analyzer in analyzers {
        let kind = analyzer.kind();
        for finding in analyzer.analyze(graph, options) {
            if finding.producer.registration().is_suppressed(kind) {
                trace!(%kind, service = %finding.producer.service_key(), "Diagnostic suppressed");
                continue;
            }

            let service = finding.producer.service_key().clone();
            if !seen.insert((kind, service, finding.description.clone())) {
                continue;
            }
            analysis.push(kind, finding);
        }
    }

    debug!(results = analysis.results.len(), groups = analysis.groups.len(), "Analysis finished");
    analysis
}

// ═══════════════════════════════════════════
// Results and groups
// ═══════════════════════════════════════════

pub type GroupId = usize;

#[derive(Clone)]
pub struct DiagnosticResult {
    kind: DiagnosticType,
    producer: Arc<InstanceProducer>,
    description: String,
    group: GroupId,
}

impl DiagnosticResult {
    pub fn kind(&self) -> DiagnosticType {
        self.kind
    }

    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }

    pub fn service_key(&self) -> &ServiceKey {
        self.producer.service_key()
    }

    pub fn producer(&self) -> &Arc<InstanceProducer> {
        &self.producer
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The per-service group this result belongs to.
    pub fn group(&self) -> GroupId {
        self.group
    }
}

impl fmt::Debug for DiagnosticResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticResult")
            .field("kind", &self.kind)
            .field("service", self.service_key())
            .field("description", &self.description)
            .finish()
    }
}

/// A node of the result tree: one root per kind, one child per service.
#[derive(Debug, Clone)]
pub struct DiagnosticGroup {
    id: GroupId,
    kind: DiagnosticType,
    name: String,
    parent: Option<GroupId>,
    children: Vec<GroupId>,
    results: Vec<usize>,
}

impl DiagnosticGroup {
    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn kind(&self) -> DiagnosticType {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<GroupId> {
        self.parent
    }

    pub fn children(&self) -> &[GroupId] {
        &self.children
    }

    /// Indexes into [`Analysis::results`].
    pub fn results(&self) -> &[usize] {
        &self.results
    }
}

/// One result, flattened for serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub kind: DiagnosticType,
    pub severity: Severity,
    pub service: String,
    pub implementation: String,
    pub lifestyle: String,
    pub description: String,
}

/// Everything the analyzers reported.
#[derive(Default)]
pub struct Analysis {
    results: Vec<DiagnosticResult>,
    groups: Vec<DiagnosticGroup>,
}

impl Analysis {
    pub fn results(&self) -> &[DiagnosticResult] {
        &self.results
    }

    pub fn of_kind(&self, kind: DiagnosticType) -> impl Iterator<Item = &DiagnosticResult> {
        self.results.iter().filter(move |result| result.kind == kind)
    }

    /// Results with [`Severity::Warning`].
    pub fn warnings(&self) -> impl Iterator<Item = &DiagnosticResult> {
        self.results
            .iter()
            .filter(|result| result.severity() == Severity::Warning)
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn groups(&self) -> &[DiagnosticGroup] {
        &self.groups
    }

    pub fn group(&self, id: GroupId) -> Option<&DiagnosticGroup> {
        self.groups.get(id)
    }

    /// Walks parent links up to the kind's root group.
    pub fn root_of(&self, id: GroupId) -> Option<GroupId> {
        let mut current = self.groups.get(id)?;
        while let Some(parent) = current.parent {
            current = self.groups.get(parent)?;
        }
        Some(current.id)
    }

    pub fn report(&self) -> Vec<DiagnosticRecord> {
        self.results
            .iter()
            .map(|result| DiagnosticRecord {
                kind: result.kind,
                severity: result.severity(),
                service: result.service_key().short_name(),
                implementation: result.producer.implementation().short_name(),
                lifestyle: result.producer.lifestyle().name().to_string(),
                description: result.description.clone(),
            })
            .collect()
    }

    fn push(&mut self, kind: DiagnosticType, finding: Finding) {
        let root = self.root_group(kind);
        let name = finding.producer.service_key().short_name();
        let group = self.child_group(root, kind, name);

        let index = self.results.len();
        self.groups[group].results.push(index);
        self.results.push(DiagnosticResult {
            kind,
            producer: finding.producer,
            description: finding.description,
            group,
        });
    }

    fn root_group(&mut self, kind: DiagnosticType) -> GroupId {
        if let Some(group) = self
            .groups
            .iter()
            .find(|group| group.parent.is_none() && group.kind == kind)
        {
            return group.id;
        }
        self.new_group(kind, kind.name().to_string(), None)
    }

    fn child_group(&mut self, root: GroupId, kind: DiagnosticType, name: String) -> GroupId {
        let existing = self.groups[root]
            .children
            .iter()
            .copied()
            .find(|&child| self.groups[child].name == name);
        match existing {
            Some(child) => child,
            None => {
                let child = self.new_group(kind, name, Some(root));
                self.groups[root].children.push(child);
                child
            }
        }
    }

    fn new_group(&mut self, kind: DiagnosticType, name: String, parent: Option<GroupId>) -> GroupId {
        let id = self.groups.len();
        self.groups.push(DiagnosticGroup {
            id,
            kind,
            name,
            parent,
            children: Vec::new(),
            results: Vec::new(),
        });
        id
    }
}

impl fmt::Debug for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analysis")
            .field("results", &self.results)
            .field("groups", &self.groups.len())
            .finish()
    }
}

impl fmt::Display for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.results.is_empty() {
            return writeln!(f, "No diagnostic warnings ✓");
        }
        for result in &self.results {
            writeln!(f, "-[{}] {}", result.kind, result.description)?;
        }
        Ok(())
    }
}
