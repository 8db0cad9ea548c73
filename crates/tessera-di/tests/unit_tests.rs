//! Unit tests for container registration and resolution
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tessera_di::types::{DefId, TypeMetadataProvider, TypeRef, TypeRegistry};
use tessera_di::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// `IClock` <- `SystemClock`, `Scheduler(clock: IClock)`, `IPlugin` <- `AuditPlugin`, `MetricsPlugin`
struct Types {
    registry: TypeRegistry,
    clock: DefId,
    system_clock: DefId,
    scheduler: DefId,
    plugin: DefId,
    audit_plugin: DefId,
    metrics_plugin: DefId,
    mailer: DefId,
}

fn types() -> Types {
    let mut registry = TypeRegistry::new();
    let clock = registry.interface("IClock", &[]).build();
    let system_clock = registry
        .class("SystemClock", &[])
        .implements(TypeRef::named(clock))
        .build();
    let scheduler = registry
        .class("Scheduler", &[])
        .constructor([("clock", TypeRef::named(clock))])
        .build();
    let plugin = registry.interface("IPlugin", &[]).build();
    let audit_plugin = registry
        .class("AuditPlugin", &[])
        .implements(TypeRef::named(plugin))
        .build();
    let metrics_plugin = registry
        .class("MetricsPlugin", &[])
        .implements(TypeRef::named(plugin))
        .build();
    let mailer = registry.interface("IMailer", &[]).build();

    Types {
        registry,
        clock,
        system_clock,
        scheduler,
        plugin,
        audit_plugin,
        metrics_plugin,
        mailer,
    }
}

fn object_id(value: &Value) -> u64 {
    value.as_object().map(|object| object.id()).unwrap()
}

#[test]
fn test_transient_creates_new_instances() {
    init_tracing();
    let t = types();
    let container = Container::new(Arc::new(t.registry));
    let clock = TypeRef::named(t.clock);
    container
        .register_transient(&clock, &TypeRef::named(t.system_clock))
        .unwrap();

    let first = container.get_instance(&clock).unwrap();
    let second = container.get_instance(&clock).unwrap();

    assert_eq!(first.ty(), &TypeRef::named(t.system_clock));
    assert_ne!(object_id(&first), object_id(&second));
}

#[test]
fn test_singleton_returns_same_instance() {
    let t = types();
    let container = Container::new(Arc::new(t.registry));
    let clock = TypeRef::named(t.clock);
    container
        .register_singleton(&clock, &TypeRef::named(t.system_clock))
        .unwrap();

    let first = container.get_instance(&clock).unwrap();
    let second = container.get_instance(&clock).unwrap();
    assert_eq!(object_id(&first), object_id(&second));
}

#[test]
fn test_scoped_instances_are_shared_within_a_scope() {
    let t = types();
    let container = Container::new(Arc::new(t.registry));
    let clock = TypeRef::named(t.clock);
    container
        .register_scoped(&clock, &TypeRef::named(t.system_clock))
        .unwrap();

    let scope = container.begin_scope();
    let first = container.get_instance_in_scope(&clock, &scope).unwrap();
    let second = container.get_instance_in_scope(&clock, &scope).unwrap();
    assert_eq!(object_id(&first), object_id(&second));
    assert_eq!(scope.len(), 1);

    let other_scope = container.begin_scope();
    let third = container.get_instance_in_scope(&clock, &other_scope).unwrap();
    assert_ne!(object_id(&first), object_id(&third));

    assert!(matches!(
        container.get_instance(&clock),
        Err(DIError::ScopeRequired { .. })
    ));
}

#[test]
fn test_constructor_injection() {
    let t = types();
    let container = Container::new(Arc::new(t.registry));
    container
        .register(&TypeRef::named(t.clock), &TypeRef::named(t.system_clock))
        .unwrap();

    // Scheduler is concrete and never registered
    let scheduler = container.get_instance(&TypeRef::named(t.scheduler)).unwrap();
    let scheduler = scheduler.as_object().unwrap();
    let clock = scheduler.dependency("clock").unwrap();
    assert_eq!(clock.ty(), &TypeRef::named(t.system_clock));
}

#[test]
fn test_unregistered_concrete_types_can_be_disabled() {
    let t = types();
    let options = ContainerOptions::default().with_unregistered_concrete_types(false);
    let container = Container::with_options(Arc::new(t.registry), options).unwrap();

    assert!(matches!(
        container.get_instance(&TypeRef::named(t.scheduler)),
        Err(DIError::ServiceNotRegistered { .. })
    ));
}

#[test]
fn test_service_not_registered() {
    let t = types();
    let container = Container::new(Arc::new(t.registry));

    match container.get_instance(&TypeRef::named(t.mailer)) {
        Err(DIError::ServiceNotRegistered { service_type }) => assert_eq!(service_type, "IMailer"),
        other => panic!("expected ServiceNotRegistered, got {other:?}"),
    }
    assert!(!container.is_registered(&TypeRef::named(t.mailer)));
}

#[test]
fn test_duplicate_registration() {
    let t = types();
    let container = Container::new(Arc::new(t.registry));
    let clock = TypeRef::named(t.clock);
    let system_clock = TypeRef::named(t.system_clock);

    container.register(&clock, &system_clock).unwrap();
    assert!(matches!(
        container.register(&clock, &system_clock),
        Err(DIError::ServiceAlreadyRegistered { .. })
    ));
}

#[test]
fn test_overriding_registrations() {
    let t = types();
    let options = ContainerOptions::default().with_overriding_registrations(true);
    let container = Container::with_options(Arc::new(t.registry), options).unwrap();
    let plugin = TypeRef::named(t.plugin);

    container.register(&plugin, &TypeRef::named(t.audit_plugin)).unwrap();
    container.register(&plugin, &TypeRef::named(t.metrics_plugin)).unwrap();

    let instance = container.get_instance(&plugin).unwrap();
    assert_eq!(instance.ty(), &TypeRef::named(t.metrics_plugin));
    assert_eq!(container.registration_count(), 1);
}

#[test]
fn test_registration_validation() {
    let t = types();
    let container = Container::new(Arc::new(t.registry));

    // Does not implement the service
    assert!(matches!(
        container.register(&TypeRef::named(t.clock), &TypeRef::named(t.audit_plugin)),
        Err(DIError::InvalidServiceType { .. })
    ));
    // Not concrete
    assert!(matches!(
        container.register(&TypeRef::named(t.clock), &TypeRef::named(t.clock)),
        Err(DIError::InvalidServiceType { .. })
    ));
    assert_eq!(container.registration_count(), 0);
}

#[test]
fn test_register_instance() {
    let t = types();
    let container = Container::new(Arc::new(t.registry));
    let clock = TypeRef::named(t.clock);
    let instance = Arc::new(Object::new(TypeRef::named(t.system_clock), Vec::new()));

    container.register_instance(&clock, Arc::clone(&instance)).unwrap();

    let resolved = container.get_instance(&clock).unwrap();
    assert_eq!(object_id(&resolved), instance.id());
    assert_eq!(
        container.get_registration(&clock).unwrap().lifestyle(),
        Lifestyle::Singleton
    );
}

#[test]
fn test_register_factory() {
    let t = types();
    let container = Container::new(Arc::new(t.registry));
    let clock = TypeRef::named(t.clock);
    let system_clock = TypeRef::named(t.system_clock);
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    container
        .register_factory(&clock, Lifestyle::Transient, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Object(Arc::new(Object::new(system_clock.clone(), Vec::new()))))
        })
        .unwrap();

    container.get_instance(&clock).unwrap();
    container.get_instance(&clock).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_factory_errors_are_propagated() {
    let t = types();
    let container = Container::new(Arc::new(t.registry));
    let clock = TypeRef::named(t.clock);

    container
        .register_factory(&clock, Lifestyle::Transient, |_| {
            Err(DIError::DependencyResolutionFailed {
                message: "clock offline".to_string(),
            })
        })
        .unwrap();

    match container.get_instance(&clock) {
        Err(DIError::DependencyResolutionFailed { message }) => assert_eq!(message, "clock offline"),
        other => panic!("expected the factory error, got {other:?}"),
    }
}

#[test]
fn test_collections_are_lazy_and_fresh_per_enumeration() {
    let t = types();
    let registry = Arc::new(t.registry);
    let container = Container::new(Arc::clone(&registry) as Arc<dyn TypeMetadataProvider>);
    let plugin = TypeRef::named(t.plugin);

    container
        .register_collection(&plugin, [TypeRef::named(t.audit_plugin)])
        .unwrap();
    container
        .register_collection(&plugin, [TypeRef::named(t.metrics_plugin)])
        .unwrap();

    let plugins = registry.enumerable_of(&plugin);
    assert!(container.is_registered(&plugins));

    let value = container.get_instance(&plugins).unwrap();
    let sequence = value.as_sequence().unwrap();
    assert_eq!(sequence.len(), 2);

    let first: Vec<Value> = sequence.to_vec().unwrap();
    let second: Vec<Value> = sequence.to_vec().unwrap();
    let types: Vec<&TypeRef> = first.iter().map(Value::ty).collect();
    assert_eq!(
        types,
        vec![&TypeRef::named(t.audit_plugin), &TypeRef::named(t.metrics_plugin)]
    );
    assert_ne!(object_id(&first[0]), object_id(&second[0]));
}

#[test]
fn test_func_factories() {
    let t = types();
    let registry = Arc::new(t.registry);
    let container = Container::new(Arc::clone(&registry) as Arc<dyn TypeMetadataProvider>);
    let clock = TypeRef::named(t.clock);
    container
        .register(&clock, &TypeRef::named(t.system_clock))
        .unwrap();

    let value = container.get_instance(&registry.factory_of(&clock)).unwrap();
    let factory = value.as_factory().unwrap();

    let first = factory.invoke().unwrap();
    let second = factory.invoke().unwrap();
    assert_eq!(first.ty(), &TypeRef::named(t.system_clock));
    assert_ne!(object_id(&first), object_id(&second));

    // Nothing to produce for an unregistered interface
    let mailer_factory = registry.factory_of(&TypeRef::named(t.mailer));
    assert!(container.get_registration(&mailer_factory).is_none());
}

#[test]
fn test_initializers_run_for_every_instance() {
    let t = types();
    let container = Container::new(Arc::new(t.registry));
    let clock = TypeRef::named(t.clock);
    let initialized = Arc::new(AtomicUsize::new(0));

    container
        .register(&clock, &TypeRef::named(t.system_clock))
        .unwrap();
    let counter = Arc::clone(&initialized);
    container
        .register_initializer(&clock, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    container.get_instance(&clock).unwrap();
    container.get_instance(&TypeRef::named(t.scheduler)).unwrap();
    assert_eq!(initialized.load(Ordering::SeqCst), 2);
}

#[test]
fn test_verify_collects_failures() {
    let mut t = types();
    let needs_mailer = t
        .registry
        .class("Notifier", &[])
        .implements(TypeRef::named(t.plugin))
        .constructor([("mailer", TypeRef::named(t.mailer))])
        .build();

    let container = Container::new(Arc::new(t.registry));
    container
        .register(&TypeRef::named(t.clock), &TypeRef::named(t.system_clock))
        .unwrap();
    container
        .register(&TypeRef::named(t.plugin), &TypeRef::named(needs_mailer))
        .unwrap();

    match container.verify() {
        Err(DIError::Verification { failures }) => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].starts_with("IPlugin"), "{}", failures[0]);
            assert!(failures[0].contains("IMailer"), "{}", failures[0]);
        }
        other => panic!("expected a verification error, got {other:?}"),
    }
    assert!(container.is_locked());
}

#[test]
fn test_verify_succeeds_for_valid_container() {
    let t = types();
    let container = Container::new(Arc::new(t.registry));
    container
        .register_scoped(&TypeRef::named(t.clock), &TypeRef::named(t.system_clock))
        .unwrap();
    container
        .register_collection(
            &TypeRef::named(t.plugin),
            [TypeRef::named(t.audit_plugin), TypeRef::named(t.metrics_plugin)],
        )
        .unwrap();

    container.verify().unwrap();
}
