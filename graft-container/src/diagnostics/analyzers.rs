//! The built-in analyzers.

use std::collections::HashSet;
use std::sync::Arc;

use graft_support::rendering::format_list;

use super::{Analyzer, DiagnosticType, Finding};
use crate::graph::{GraphNode, KnownRelationship, ProducerGraph};
use crate::key::ServiceKey;
use crate::lifestyle::Lifestyle;
use crate::options::ContainerOptions;
use crate::producer::InstanceProducer;

/// Relationships the node's own registration recorded. A decorated
/// producer carries its outermost decorator's relationships; those are
/// reported on the decorator's node instead.
fn own_relationships(node: &GraphNode) -> impl Iterator<Item = &KnownRelationship> {
    let implementation = node.producer().implementation();
    node.relationships()
        .iter()
        .filter(move |relationship| relationship.implementation() == implementation)
}

fn describe(producer: &InstanceProducer) -> String {
    if producer.service_key() == producer.implementation() {
        format!("{} ({})", producer.implementation().short_name(), producer.lifestyle())
    } else {
        format!(
            "{} implemented by {} ({})",
            producer.service_key().short_name(),
            producer.implementation().short_name(),
            producer.lifestyle()
        )
    }
}

/// Explicit component producers, one per producer, grouped by
/// implementation in first-seen order.
fn by_implementation(graph: &ProducerGraph) -> Vec<(ServiceKey, Vec<Arc<InstanceProducer>>)> {
    let mut groups: Vec<(ServiceKey, Vec<Arc<InstanceProducer>>)> = Vec::new();
    let mut seen = HashSet::new();

    for node in graph.nodes() {
        let producer = node.producer();
        if !producer.is_explicit() || !producer.registration().is_component() {
            continue;
        }
        if !seen.insert(producer.id()) {
            continue;
        }

        let implementation = producer.implementation();
        match groups.iter_mut().find(|(key, _)| key == implementation) {
            Some((_, producers)) => producers.push(producer.clone()),
            None => groups.push((implementation.clone(), vec![producer.clone()])),
        }
    }
    groups
}

// ═══════════════════════════════════════════
// Lifestyle mismatch
// ═══════════════════════════════════════════

/// A component depends on something that lives shorter than itself.
pub struct LifestyleMismatchAnalyzer;

impl Analyzer for LifestyleMismatchAnalyzer {
    fn kind(&self) -> DiagnosticType {
        DiagnosticType::LifestyleMismatch
    }

    fn analyze(&self, graph: &ProducerGraph, _: &ContainerOptions) -> Vec<Finding> {
        let mut findings = Vec::new();
        for node in graph.nodes() {
            for relationship in own_relationships(node) {
                let dependency = relationship.dependency();
                let candidates = if dependency.is_collection() {
                    dependency.collection_elements()
                } else {
                    vec![dependency.clone()]
                };

                for shorter in candidates
                    .iter()
                    .filter(|candidate| relationship.lifestyle().outlives(candidate.lifestyle()))
                {
                    findings.push(Finding::new(
                        node.producer().clone(),
                        format!(
                            "{} ({}) depends on {}.",
                            relationship.implementation().short_name(),
                            relationship.lifestyle(),
                            describe(shorter)
                        ),
                    ));
                }
            }
        }
        findings
    }
}

// ═══════════════════════════════════════════
// Short-circuited dependency
// ═══════════════════════════════════════════

/// A component depends on an implementation directly, bypassing the
/// service it is registered under (and that registration's lifestyle).
pub struct ShortCircuitAnalyzer;

impl Analyzer for ShortCircuitAnalyzer {
    fn kind(&self) -> DiagnosticType {
        DiagnosticType::ShortCircuitedDependency
    }

    fn analyze(&self, graph: &ProducerGraph, _: &ContainerOptions) -> Vec<Finding> {
        let explicit: Vec<&Arc<InstanceProducer>> = graph
            .nodes()
            .iter()
            .map(GraphNode::producer)
            .filter(|producer| producer.is_explicit() && !producer.is_collection())
            .collect();

        let mut findings = Vec::new();
        for node in graph.nodes() {
            for relationship in own_relationships(node) {
                let dependency = relationship.dependency();
                if dependency.is_explicit() || dependency.is_collection() {
                    continue;
                }

                let registered: Vec<String> = explicit
                    .iter()
                    .filter(|producer| {
                        producer.implementation() == dependency.implementation()
                            && producer.service_key() != dependency.service_key()
                    })
                    .map(|producer| {
                        format!("{} ({})", producer.service_key().short_name(), producer.lifestyle())
                    })
                    .collect();
                if registered.is_empty() {
                    continue;
                }

                findings.push(Finding::new(
                    node.producer().clone(),
                    format!(
                        "{} might incorrectly depend on unregistered type {} ({}) instead of {}.",
                        relationship.implementation().short_name(),
                        dependency.implementation().short_name(),
                        dependency.lifestyle(),
                        format_list(&registered)
                    ),
                ));
            }
        }
        findings
    }
}

// ═══════════════════════════════════════════
// Single responsibility
// ═══════════════════════════════════════════

/// A component with more distinct dependencies than the configured
/// threshold.
pub struct SingleResponsibilityAnalyzer;

impl Analyzer for SingleResponsibilityAnalyzer {
    fn kind(&self) -> DiagnosticType {
        DiagnosticType::SingleResponsibilityViolation
    }

    fn analyze(&self, graph: &ProducerGraph, options: &ContainerOptions) -> Vec<Finding> {
        let mut findings = Vec::new();
        for node in graph.nodes() {
            let distinct: HashSet<&ServiceKey> = own_relationships(node)
                .map(|relationship| relationship.dependency().service_key())
                .collect();

            if distinct.len() > options.srp_dependency_threshold {
                findings.push(Finding::new(
                    node.producer().clone(),
                    format!(
                        "{} has {} dependencies which might indicate a SRP violation.",
                        node.producer().implementation().short_name(),
                        distinct.len()
                    ),
                ));
            }
        }
        findings
    }
}

// ═══════════════════════════════════════════
// Ambiguous lifestyles
// ═══════════════════════════════════════════

/// One implementation registered with different lifestyles.
pub struct AmbiguousLifestylesAnalyzer;

impl Analyzer for AmbiguousLifestylesAnalyzer {
    fn kind(&self) -> DiagnosticType {
        DiagnosticType::AmbiguousLifestyles
    }

    fn analyze(&self, graph: &ProducerGraph, _: &ContainerOptions) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (implementation, producers) in by_implementation(graph) {
            let mut lifestyles: Vec<&Lifestyle> = Vec::new();
            for producer in &producers {
                if !lifestyles.contains(&producer.lifestyle()) {
                    lifestyles.push(producer.lifestyle());
                }
            }
            if lifestyles.len() < 2 {
                continue;
            }

            for producer in &producers {
                let others: Vec<String> = producers
                    .iter()
                    .filter(|other| other.lifestyle() != producer.lifestyle())
                    .map(|other| format!("{} ({})", other.service_key().short_name(), other.lifestyle()))
                    .collect();

                findings.push(Finding::new(
                    producer.clone(),
                    format!(
                        "The registration for {} ({}) maps to the same implementation ({}) as the \
                         registration for {}, but with a different lifestyle. Each will resolve to a \
                         different instance.",
                        producer.service_key().short_name(),
                        producer.lifestyle(),
                        implementation.short_name(),
                        format_list(&others)
                    ),
                ));
            }
        }
        findings
    }
}

// ═══════════════════════════════════════════
// Torn lifestyle
// ═══════════════════════════════════════════

/// One implementation with the same non-transient lifestyle in several
/// registrations, so each registration caches its own instance.
pub struct TornLifestyleAnalyzer;

impl Analyzer for TornLifestyleAnalyzer {
    fn kind(&self) -> DiagnosticType {
        DiagnosticType::TornLifestyle
    }

    fn analyze(&self, graph: &ProducerGraph, _: &ContainerOptions) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (implementation, producers) in by_implementation(graph) {
            for producer in &producers {
                if producer.lifestyle() == &Lifestyle::Transient {
                    continue;
                }

                let torn: Vec<String> = producers
                    .iter()
                    .filter(|other| {
                        other.lifestyle() == producer.lifestyle()
                            && other.registration().id() != producer.registration().id()
                    })
                    .map(|other| other.service_key().short_name())
                    .collect();
                if torn.is_empty() {
                    continue;
                }

                findings.push(Finding::new(
                    producer.clone(),
                    format!(
                        "The registration for {} ({}) maps to the same implementation and lifestyle \
                         as the registration for {}. They each create their own instance of {}.",
                        producer.service_key().short_name(),
                        producer.lifestyle(),
                        format_list(&torn),
                        implementation.short_name()
                    ),
                ));
            }
        }
        findings
    }
}

// ═══════════════════════════════════════════
// Disposable transient
// ═══════════════════════════════════════════

/// A transient component with a disposer. Transient instances are never
/// tracked, so the disposer never runs.
pub struct DisposableTransientAnalyzer;

impl Analyzer for DisposableTransientAnalyzer {
    fn kind(&self) -> DiagnosticType {
        DiagnosticType::DisposableTransientComponent
    }

    fn analyze(&self, graph: &ProducerGraph, _: &ContainerOptions) -> Vec<Finding> {
        graph
            .nodes()
            .iter()
            .map(GraphNode::producer)
            .filter(|producer| {
                producer.lifestyle() == &Lifestyle::Transient && producer.registration().is_disposable()
            })
            .map(|producer| {
                Finding::new(
                    producer.clone(),
                    format!(
                        "{} is registered as transient, but has a disposer.",
                        producer.implementation().short_name()
                    ),
                )
            })
            .collect()
    }
}
