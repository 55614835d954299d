//! Diagnostics over verified containers.

use graft_container::diagnostics::{DiagnosticType, Severity};
use graft_container::error::GraftError;
use graft_container::prelude::*;
use std::sync::Arc;

trait UserRepository: Send + Sync {}

struct InMemoryUserRepository;
impl UserRepository for InMemoryUserRepository {}
impl Component for InMemoryUserRepository {
    fn construct(_: &mut Arguments<'_>) -> Result<Self> {
        Ok(InMemoryUserRepository)
    }
}
graft_container::implements!(InMemoryUserRepository => dyn UserRepository);

struct RealUserService {
    _repository: Arc<dyn UserRepository>,
}
impl Component for RealUserService {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::on::<dyn UserRepository>("repository")]
    }
    fn construct(args: &mut Arguments<'_>) -> Result<Self> {
        Ok(RealUserService {
            _repository: args.get()?,
        })
    }
}

fn mismatched_container(options: ContainerOptions) -> Container {
    let container = Container::with_options(options);
    container
        .register_transient::<dyn UserRepository, InMemoryUserRepository>()
        .unwrap();
    container
        .register_singleton::<RealUserService, RealUserService>()
        .unwrap();
    container
}

// ═══════════════════════════════════════════
// Lifestyle mismatches
// ═══════════════════════════════════════════

#[test]
fn singleton_depending_on_transient_is_reported() {
    let container = mismatched_container(ContainerOptions::default());

    let analysis = container.analyze().unwrap();
    let mismatches: Vec<_> = analysis.of_kind(DiagnosticType::LifestyleMismatch).collect();

    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].severity(), Severity::Warning);
    assert_eq!(
        mismatches[0].description(),
        "RealUserService (Singleton) depends on dyn UserRepository implemented by \
         InMemoryUserRepository (Transient)."
    );
}

#[test]
fn verify_and_diagnose_fails_on_warnings() {
    let container = mismatched_container(ContainerOptions::default());

    match container.verify_and_diagnose().unwrap_err() {
        GraftError::Diagnostics(error) => {
            assert_eq!(error.warnings.len(), 1);
            assert!(error.warnings[0].starts_with("[Lifestyle Mismatch]"));
        }
        other => panic!("expected diagnostics error, got {other}"),
    }
}

#[test]
fn suppressed_warnings_are_not_reported() {
    let container = Container::new();
    container
        .register_transient::<dyn UserRepository, InMemoryUserRepository>()
        .unwrap();

    let registration = Lifestyle::Singleton.create_registration::<RealUserService>();
    registration
        .suppress_diagnostic_warning(
            DiagnosticType::LifestyleMismatch,
            "the repository holds no state",
        )
        .unwrap();
    container
        .add_registration::<RealUserService, RealUserService>(registration)
        .unwrap();

    let analysis = container.verify_and_diagnose().unwrap();
    assert_eq!(analysis.of_kind(DiagnosticType::LifestyleMismatch).count(), 0);
}

#[test]
fn enforced_lifestyles_fail_resolution() {
    let container =
        mismatched_container(ContainerOptions::default().with_lifestyle_enforcement(true));

    let err = container.get_instance::<RealUserService>().err().unwrap();
    assert!(matches!(err, GraftError::LifestyleMismatch(_)));
    assert!(err.to_string().contains("Lifestyle mismatch"));
}

#[test]
fn mismatch_rule_follows_lifestyle_length() {
    let scoped = Lifestyle::scoped();
    let all = [Lifestyle::Transient, scoped.clone(), Lifestyle::Singleton];

    // Singleton over scoped is a mismatch; the reverse is fine
    assert!(Lifestyle::Singleton.outlives(&scoped));
    assert!(!scoped.outlives(&Lifestyle::Singleton));

    for lifestyle in &all {
        // Anything may depend on a singleton, a transient may depend on anything
        assert!(!lifestyle.outlives(&Lifestyle::Singleton));
        assert!(!Lifestyle::Transient.outlives(lifestyle));
        // A lifestyle never outlives itself
        assert!(!lifestyle.outlives(lifestyle));
    }
}

trait Plugin: Send + Sync {}

struct RequestPlugin;
impl Plugin for RequestPlugin {}
impl Component for RequestPlugin {
    fn construct(_: &mut Arguments<'_>) -> Result<Self> {
        Ok(RequestPlugin)
    }
}
graft_container::implements!(RequestPlugin => dyn Plugin);

struct PluginHost {
    _plugins: Arc<Collection<dyn Plugin>>,
}
impl Component for PluginHost {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::collection::<dyn Plugin>("plugins")]
    }
    fn construct(args: &mut Arguments<'_>) -> Result<Self> {
        Ok(PluginHost {
            _plugins: args.get()?,
        })
    }
}

fn host_with_scoped_plugin(options: ContainerOptions) -> Container {
    let container = Container::with_options(options);
    container.register_singleton::<PluginHost, PluginHost>().unwrap();
    container
        .append_to_collection::<dyn Plugin, RequestPlugin>(Lifestyle::scoped())
        .unwrap();
    container
        .append_to_collection::<dyn Plugin, RequestPlugin>(Lifestyle::Singleton)
        .unwrap();
    container
}

#[test]
fn shorter_lived_collection_elements_are_reported() {
    let container = host_with_scoped_plugin(ContainerOptions::default());

    let analysis = container.analyze().unwrap();
    let mismatches: Vec<_> = analysis.of_kind(DiagnosticType::LifestyleMismatch).collect();

    // Only the scoped element, the singleton one lives as long as the host
    assert_eq!(mismatches.len(), 1);
    assert_eq!(
        mismatches[0].description(),
        "PluginHost (Singleton) depends on dyn Plugin implemented by RequestPlugin (Scoped)."
    );
}

#[test]
fn enforced_lifestyles_cover_collection_elements() {
    let container =
        host_with_scoped_plugin(ContainerOptions::default().with_lifestyle_enforcement(true));

    let err = container.get_instance::<PluginHost>().err().unwrap();
    match err {
        GraftError::LifestyleMismatch(error) => {
            assert!(error.consumer.is::<PluginHost>());
            assert!(error.dependency_implementation.is::<RequestPlugin>());
        }
        other => panic!("expected lifestyle mismatch, got {other}"),
    }
}

// ═══════════════════════════════════════════
// Single responsibility
// ═══════════════════════════════════════════

macro_rules! leaf {
    ($($name:ident),+) => {
        $(
            struct $name;
            impl Component for $name {
                fn construct(_: &mut Arguments<'_>) -> Result<Self> {
                    Ok($name)
                }
            }
        )+
    };
}

leaf!(D1, D2, D3, D4, D5, D6, D7, D8);

struct PluginWith8Dependencies;
impl Component for PluginWith8Dependencies {
    fn dependencies() -> Vec<Dependency> {
        vec![
            Dependency::concrete::<D1>("d1"),
            Dependency::concrete::<D2>("d2"),
            Dependency::concrete::<D3>("d3"),
            Dependency::concrete::<D4>("d4"),
            Dependency::concrete::<D5>("d5"),
            Dependency::concrete::<D6>("d6"),
            Dependency::concrete::<D7>("d7"),
            Dependency::concrete::<D8>("d8"),
        ]
    }
    fn construct(_: &mut Arguments<'_>) -> Result<Self> {
        Ok(PluginWith8Dependencies)
    }
}

struct PluginWith6Dependencies;
impl Component for PluginWith6Dependencies {
    fn dependencies() -> Vec<Dependency> {
        vec![
            Dependency::concrete::<D1>("d1"),
            Dependency::concrete::<D2>("d2"),
            Dependency::concrete::<D3>("d3"),
            Dependency::concrete::<D4>("d4"),
            Dependency::concrete::<D5>("d5"),
            Dependency::concrete::<D6>("d6"),
        ]
    }
    fn construct(_: &mut Arguments<'_>) -> Result<Self> {
        Ok(PluginWith6Dependencies)
    }
}

#[test]
fn many_dependencies_are_reported_as_information() {
    let container = Container::new();
    container
        .register_transient::<PluginWith8Dependencies, PluginWith8Dependencies>()
        .unwrap();
    container
        .register_transient::<PluginWith6Dependencies, PluginWith6Dependencies>()
        .unwrap();

    // Information results do not fail the check
    let analysis = container.verify_and_diagnose().unwrap();
    let srp: Vec<_> = analysis
        .of_kind(DiagnosticType::SingleResponsibilityViolation)
        .collect();

    assert_eq!(srp.len(), 1);
    assert_eq!(srp[0].severity(), Severity::Information);
    assert_eq!(
        srp[0].description(),
        "PluginWith8Dependencies has 8 dependencies which might indicate a SRP violation."
    );
}

#[test]
fn srp_threshold_is_configurable() {
    let container =
        Container::with_options(ContainerOptions::default().with_srp_dependency_threshold(5));
    container
        .register_transient::<PluginWith6Dependencies, PluginWith6Dependencies>()
        .unwrap();

    let analysis = container.analyze().unwrap();
    assert_eq!(
        analysis
            .of_kind(DiagnosticType::SingleResponsibilityViolation)
            .count(),
        1
    );
}

// ═══════════════════════════════════════════
// Reports and options
// ═══════════════════════════════════════════

#[test]
fn report_serializes_to_json() {
    let container = mismatched_container(ContainerOptions::default());
    let analysis = container.analyze().unwrap();

    let json = serde_json::to_value(analysis.report()).unwrap();
    let first = &json[0];
    assert_eq!(first["kind"], "LifestyleMismatch");
    assert_eq!(first["severity"], "Warning");
}

#[test]
fn options_load_from_json_with_defaults() {
    let options: ContainerOptions = serde_json::from_str(
        r#"{ "allow_overriding_registrations": true, "srp_dependency_threshold": 3 }"#,
    )
    .unwrap();

    assert!(options.allow_overriding_registrations);
    assert_eq!(options.srp_dependency_threshold, 3);
    assert!(!options.enforce_lifestyle_compatibility);
    assert!(options.resolve_unregistered_concrete_types);
    assert!(options.resolve_unregistered_collections);
    assert!(options.default_scoped_lifestyle.is_none());

    let container = Container::with_options(options);
    container
        .register_transient::<InMemoryUserRepository, InMemoryUserRepository>()
        .unwrap();
    container
        .register_singleton::<InMemoryUserRepository, InMemoryUserRepository>()
        .unwrap();
}
