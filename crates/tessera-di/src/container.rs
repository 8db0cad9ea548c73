//! The container: registrations, instance producers and the build pipeline
//!
//! Resolving a closed service type goes through three steps:
//!
//! 1. find a registration: explicit, then open generic (first registered
//!    implementation that closes over the requested type), then collections,
//!    `Func<T>` factories and finally unregistered concrete types,
//! 2. build the plan once per service type: constructor injection,
//!    initializers, lifestyle, then every expression-built interceptor
//!    (decorators) in registration order,
//! 3. evaluate the cached plan.
//!
//! The first resolution locks the container against further registrations.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};

use crate::decoration::{
    DecoratorInterceptor, DecoratorPredicateContext, DependencyResolver, ExpressionBuiltEventArgs,
    ExpressionBuiltInterceptor, ServiceTypeDecoratorInfo,
};
use crate::error::{DIError, DIResult};
use crate::expression::{Delegate, Expression, InstanceFactory, Object, ResolutionContext, Value};
use crate::generics::{service_is_assignable_from_implementation, GenericTypeBuilder};
use crate::lifestyle::{Lifestyle, ServiceScope};
use crate::options::ContainerOptions;
use crate::types::{TypeMetadataProvider, TypeRef};

/// Action run on every instance of a matching type right after construction
pub type Initializer = Arc<dyn Fn(&Arc<Object>) -> DIResult<()> + Send + Sync>;

#[derive(Clone)]
enum RegistrationSource {
    Implementation(TypeRef),
    Instance(Arc<Object>),
    Factory(Delegate),
}

#[derive(Clone)]
struct Registration {
    implementation_type: TypeRef,
    lifestyle: Lifestyle,
    source: RegistrationSource,
}

struct OpenGenericRegistration {
    service_definition: TypeRef,
    implementation: TypeRef,
    lifestyle: Lifestyle,
}

struct InitializerRegistration {
    target: TypeRef,
    action: Initializer,
}

enum ProducerSource {
    Registration(RegistrationSource),
    Collection { implementations: Vec<TypeRef> },
    Factory { result_type: TypeRef },
}

/// Produces instances of one closed service type.
///
/// The plan is built on first use and then shared. Two threads racing on the
/// first build may both build; the first plan stored wins.
pub struct InstanceProducer {
    service_type: TypeRef,
    implementation_type: TypeRef,
    lifestyle: Lifestyle,
    source: ProducerSource,
    factory: OnceCell<InstanceFactory>,
}

impl InstanceProducer {
    fn new(service_type: TypeRef, implementation_type: TypeRef, lifestyle: Lifestyle, source: ProducerSource) -> Self {
        Self {
            service_type,
            implementation_type,
            lifestyle,
            source,
            factory: OnceCell::new(),
        }
    }

    pub fn service_type(&self) -> &TypeRef {
        &self.service_type
    }

    /// Registered implementation type, before decoration
    pub fn implementation_type(&self) -> &TypeRef {
        &self.implementation_type
    }

    pub fn lifestyle(&self) -> Lifestyle {
        self.lifestyle
    }

    pub fn is_built(&self) -> bool {
        self.factory.get().is_some()
    }

    /// The finished plan, once built
    pub fn expression(&self) -> Option<&Expression> {
        self.factory.get().map(InstanceFactory::expression)
    }
}

impl fmt::Debug for InstanceProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceProducer")
            .field("service_type", &self.service_type)
            .field("implementation_type", &self.implementation_type)
            .field("lifestyle", &self.lifestyle)
            .field("built", &self.is_built())
            .finish()
    }
}

/// The dependency injection container
pub struct Container {
    metadata: Arc<dyn TypeMetadataProvider>,
    options: ContainerOptions,
    registrations: RwLock<HashMap<TypeRef, Registration>>,
    open_generic_registrations: RwLock<Vec<OpenGenericRegistration>>,
    collections: RwLock<HashMap<TypeRef, Vec<TypeRef>>>,
    initializers: RwLock<Vec<InitializerRegistration>>,
    interceptors: RwLock<Vec<Arc<dyn ExpressionBuiltInterceptor>>>,
    producers: DashMap<TypeRef, Arc<InstanceProducer>>,
    decorator_infos: DashMap<TypeRef, Arc<ServiceTypeDecoratorInfo>>,
    locked: AtomicBool,
}

impl Container {
    /// Create a container with default options
    pub fn new(metadata: Arc<dyn TypeMetadataProvider>) -> Self {
        Self::build(metadata, ContainerOptions::default())
    }

    /// Create a container with validated options
    pub fn with_options(metadata: Arc<dyn TypeMetadataProvider>, options: ContainerOptions) -> DIResult<Self> {
        options.validate()?;
        Ok(Self::build(metadata, options))
    }

    fn build(metadata: Arc<dyn TypeMetadataProvider>, options: ContainerOptions) -> Self {
        Self {
            metadata,
            options,
            registrations: RwLock::new(HashMap::new()),
            open_generic_registrations: RwLock::new(Vec::new()),
            collections: RwLock::new(HashMap::new()),
            initializers: RwLock::new(Vec::new()),
            interceptors: RwLock::new(Vec::new()),
            producers: DashMap::new(),
            decorator_infos: DashMap::new(),
            locked: AtomicBool::new(false),
        }
    }

    pub fn metadata(&self) -> &dyn TypeMetadataProvider {
        &*self.metadata
    }

    pub fn options(&self) -> &ContainerOptions {
        &self.options
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    fn display(&self, ty: &TypeRef) -> String {
        self.metadata.display(ty)
    }

    fn ensure_unlocked(&self, what: &TypeRef) -> DIResult<()> {
        if self.is_locked() {
            return Err(DIError::ContainerLocked {
                message: format!("can't register {}", self.display(what)),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register `implementation` for `service` with the default lifestyle
    pub fn register(&self, service: &TypeRef, implementation: &TypeRef) -> DIResult<()> {
        self.register_with_lifestyle(service, implementation, self.options.default_lifestyle)
    }

    pub fn register_transient(&self, service: &TypeRef, implementation: &TypeRef) -> DIResult<()> {
        self.register_with_lifestyle(service, implementation, Lifestyle::Transient)
    }

    pub fn register_singleton(&self, service: &TypeRef, implementation: &TypeRef) -> DIResult<()> {
        self.register_with_lifestyle(service, implementation, Lifestyle::Singleton)
    }

    pub fn register_scoped(&self, service: &TypeRef, implementation: &TypeRef) -> DIResult<()> {
        self.register_with_lifestyle(service, implementation, Lifestyle::Scoped)
    }

    /// Register a closed implementation for a closed service type
    pub fn register_with_lifestyle(
        &self,
        service: &TypeRef,
        implementation: &TypeRef,
        lifestyle: Lifestyle,
    ) -> DIResult<()> {
        self.ensure_unlocked(service)?;

        if service.contains_generic_parameters() || implementation.contains_generic_parameters() {
            return Err(DIError::InvalidServiceType {
                message: format!(
                    "{} -> {} is open generic; use register_open_generic",
                    self.display(service),
                    self.display(implementation)
                ),
            });
        }
        if !self.metadata.is_concrete(implementation) {
            return Err(DIError::InvalidServiceType {
                message: format!("{} is not a concrete type", self.display(implementation)),
            });
        }
        if !self.metadata.is_assignable_from(service, implementation) {
            return Err(DIError::InvalidServiceType {
                message: format!(
                    "{} does not implement {}",
                    self.display(implementation),
                    self.display(service)
                ),
            });
        }

        self.add_registration(
            service,
            Registration {
                implementation_type: implementation.clone(),
                lifestyle,
                source: RegistrationSource::Implementation(implementation.clone()),
            },
        )
    }

    /// Register a pre-built instance; always a singleton
    pub fn register_instance(&self, service: &TypeRef, instance: Arc<Object>) -> DIResult<()> {
        self.ensure_unlocked(service)?;

        if !self.metadata.is_assignable_from(service, instance.ty()) {
            return Err(DIError::InvalidServiceType {
                message: format!(
                    "instance of {} does not implement {}",
                    self.display(instance.ty()),
                    self.display(service)
                ),
            });
        }

        self.add_registration(
            service,
            Registration {
                implementation_type: instance.ty().clone(),
                lifestyle: Lifestyle::Singleton,
                source: RegistrationSource::Instance(instance),
            },
        )
    }

    /// Register a factory delegate for a closed service type
    pub fn register_factory<F>(&self, service: &TypeRef, lifestyle: Lifestyle, factory: F) -> DIResult<()>
    where
        F: Fn(&ResolutionContext) -> DIResult<Value> + Send + Sync + 'static,
    {
        self.ensure_unlocked(service)?;

        if service.contains_generic_parameters() {
            return Err(DIError::InvalidServiceType {
                message: format!("factories can't produce open generic {}", self.display(service)),
            });
        }

        let delegate: Delegate = Arc::new(move |context: &ResolutionContext, _: &[Value]| factory(context));
        self.add_registration(
            service,
            Registration {
                implementation_type: service.clone(),
                lifestyle,
                source: RegistrationSource::Factory(delegate),
            },
        )
    }

    fn add_registration(&self, service: &TypeRef, registration: Registration) -> DIResult<()> {
        let mut registrations = self.registrations.write();

        if registrations.contains_key(service) {
            if !self.options.allow_overriding_registrations {
                return Err(DIError::ServiceAlreadyRegistered {
                    service_type: self.display(service),
                });
            }
            debug!("Overriding registration for {}", self.display(service));
        }

        debug!(
            "Registered {} -> {} ({:?})",
            self.display(service),
            self.display(&registration.implementation_type),
            registration.lifestyle
        );
        registrations.insert(service.clone(), registration);
        Ok(())
    }

    /// Register an open generic (or partially-closed) implementation for an
    /// open generic service type.
    ///
    /// Registrations are tried in order; the first one that closes over a
    /// requested service type wins. A closed registration for the same
    /// closed type always takes precedence.
    pub fn register_open_generic(
        &self,
        service: &TypeRef,
        implementation: &TypeRef,
        lifestyle: Lifestyle,
    ) -> DIResult<()> {
        self.ensure_unlocked(service)?;

        if !service.contains_generic_parameters() {
            return Err(DIError::InvalidServiceType {
                message: format!("{} is not an open generic type; use register", self.display(service)),
            });
        }
        let service_definition = self
            .metadata
            .generic_type_definition(service)
            .ok_or_else(|| DIError::UnknownType {
                message: self.display(service),
            })?;

        if !implementation.contains_generic_parameters() {
            return Err(DIError::InvalidServiceType {
                message: format!(
                    "{} is not an open generic type; use register",
                    self.display(implementation)
                ),
            });
        }
        if !self.metadata.is_concrete(implementation) {
            return Err(DIError::InvalidServiceType {
                message: format!("{} is not a concrete type", self.display(implementation)),
            });
        }
        if !service_is_assignable_from_implementation(&*self.metadata, &service_definition, implementation) {
            return Err(DIError::InvalidServiceType {
                message: format!(
                    "{} does not implement {}",
                    self.display(implementation),
                    self.display(&service_definition)
                ),
            });
        }

        if !GenericTypeBuilder::is_implementation_applicable_to_every_generic_type(
            &*self.metadata,
            &service_definition,
            implementation,
        ) {
            debug!(
                "{} only applies to some closed versions of {}",
                self.display(implementation),
                self.display(&service_definition)
            );
        }

        debug!(
            "Registered open generic {} -> {} ({:?})",
            self.display(&service_definition),
            self.display(implementation),
            lifestyle
        );
        self.open_generic_registrations.write().push(OpenGenericRegistration {
            service_definition,
            implementation: implementation.clone(),
            lifestyle,
        });
        Ok(())
    }

    /// Register implementations resolved as `IEnumerable<service>`.
    ///
    /// `service` may be an open generic definition, in which case each
    /// implementation is closed per requested element type and skipped when
    /// it doesn't apply. Repeated calls append.
    pub fn register_collection<I>(&self, service: &TypeRef, implementations: I) -> DIResult<()>
    where
        I: IntoIterator<Item = TypeRef>,
    {
        self.ensure_unlocked(service)?;

        let key = if service.contains_generic_parameters() {
            self.metadata
                .generic_type_definition(service)
                .unwrap_or_else(|| service.clone())
        } else {
            service.clone()
        };

        let implementations: Vec<TypeRef> = implementations.into_iter().collect();
        for implementation in &implementations {
            if !self.metadata.is_concrete(implementation)
                || !service_is_assignable_from_implementation(&*self.metadata, &key, implementation)
            {
                return Err(DIError::InvalidServiceType {
                    message: format!(
                        "{} is not a concrete implementation of {}",
                        self.display(implementation),
                        self.display(&key)
                    ),
                });
            }
        }

        debug!(
            "Registered collection of {} with {} implementation(s)",
            self.display(&key),
            implementations.len()
        );
        self.collections
            .write()
            .entry(key)
            .or_default()
            .extend(implementations);
        Ok(())
    }

    /// Run `action` on every instance whose type is assignable to `target`
    pub fn register_initializer<F>(&self, target: &TypeRef, action: F) -> DIResult<()>
    where
        F: Fn(&Arc<Object>) -> DIResult<()> + Send + Sync + 'static,
    {
        self.ensure_unlocked(target)?;

        let target = if target.contains_generic_parameters() {
            self.metadata
                .generic_type_definition(target)
                .unwrap_or_else(|| target.clone())
        } else {
            target.clone()
        };

        debug!("Registered initializer for {}", self.display(&target));
        self.initializers.write().push(InitializerRegistration {
            target,
            action: Arc::new(action),
        });
        Ok(())
    }

    /// Decorate `service` (closed, or an open generic definition) with `decorator`.
    ///
    /// Decorators wrap in registration order: the first registered ends up
    /// closest to the decorated implementation.
    pub fn register_decorator(&self, service: &TypeRef, decorator: &TypeRef, lifestyle: Lifestyle) -> DIResult<()> {
        self.ensure_unlocked(service)?;
        let interceptor =
            DecoratorInterceptor::new(&*self.metadata, service.clone(), decorator.clone(), lifestyle, None)?;
        self.interceptors.write().push(Arc::new(interceptor));
        Ok(())
    }

    /// Like [`Container::register_decorator`], applied only where `predicate` holds
    pub fn register_decorator_with_predicate<P>(
        &self,
        service: &TypeRef,
        decorator: &TypeRef,
        lifestyle: Lifestyle,
        predicate: P,
    ) -> DIResult<()>
    where
        P: Fn(&DecoratorPredicateContext) -> bool + Send + Sync + 'static,
    {
        self.ensure_unlocked(service)?;
        let interceptor = DecoratorInterceptor::new(
            &*self.metadata,
            service.clone(),
            decorator.clone(),
            lifestyle,
            Some(Arc::new(predicate)),
        )?;
        self.interceptors.write().push(Arc::new(interceptor));
        Ok(())
    }

    /// Add a custom stage to the expression-built pipeline
    pub fn register_interceptor(&self, interceptor: Arc<dyn ExpressionBuiltInterceptor>) -> DIResult<()> {
        if self.is_locked() {
            return Err(DIError::ContainerLocked {
                message: "can't add an interceptor".to_string(),
            });
        }
        self.interceptors.write().push(interceptor);
        Ok(())
    }

    /// Whether `service` can be resolved without falling back to unregistered concrete types
    pub fn is_registered(&self, service: &TypeRef) -> bool {
        if self.registrations.read().contains_key(service) {
            return true;
        }
        if self
            .open_generic_registrations
            .read()
            .iter()
            .any(|registration| registration.service_definition.has_same_definition(service))
        {
            return true;
        }
        self.metadata
            .element_of_enumerable(service)
            .map(|element| self.collection_implementations(&element).is_some())
            .unwrap_or(false)
    }

    /// Number of explicit, open generic and collection registrations
    pub fn registration_count(&self) -> usize {
        self.registrations.read().len()
            + self.open_generic_registrations.read().len()
            + self.collections.read().len()
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    pub fn begin_scope(&self) -> Arc<ServiceScope> {
        Arc::new(ServiceScope::new())
    }

    /// Resolve an instance outside of any scope
    pub fn get_instance(&self, service: &TypeRef) -> DIResult<Value> {
        self.resolve(service, None)
    }

    pub fn get_instance_in_scope(&self, service: &TypeRef, scope: &Arc<ServiceScope>) -> DIResult<Value> {
        self.resolve(service, Some(Arc::clone(scope)))
    }

    fn resolve(&self, service: &TypeRef, scope: Option<Arc<ServiceScope>>) -> DIResult<Value> {
        let producer = self
            .get_registration(service)
            .ok_or_else(|| DIError::ServiceNotRegistered {
                service_type: self.display(service),
            })?;
        let factory = BuildSession::new(self).producer_factory(&producer)?;
        factory.create(&ResolutionContext::new(Arc::clone(&self.metadata), scope))
    }

    /// The producer for a closed service type, if one can be found.
    ///
    /// Producers are created once per service type and cached. Calling this
    /// locks the container.
    pub fn get_registration(&self, service: &TypeRef) -> Option<Arc<InstanceProducer>> {
        if !self.locked.swap(true, Ordering::AcqRel) {
            debug!("Container locked");
        }

        if let Some(existing) = self.producers.get(service).map(|entry| Arc::clone(entry.value())) {
            return Some(existing);
        }

        let producer = Arc::new(self.create_producer(service)?);
        Some(Arc::clone(
            self.producers
                .entry(service.clone())
                .or_insert(producer)
                .value(),
        ))
    }

    /// Decoration history of a service type whose plan has been built
    pub fn decorator_info(&self, service: &TypeRef) -> Option<Arc<ServiceTypeDecoratorInfo>> {
        self.decorator_infos
            .get(service)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn create_producer(&self, service: &TypeRef) -> Option<InstanceProducer> {
        if service.contains_generic_parameters() {
            return None;
        }

        let explicit = self.registrations.read().get(service).cloned();
        if let Some(registration) = explicit {
            return Some(InstanceProducer::new(
                service.clone(),
                registration.implementation_type,
                registration.lifestyle,
                ProducerSource::Registration(registration.source),
            ));
        }

        if let Some(producer) = self.open_generic_producer(service) {
            return Some(producer);
        }

        if let Some(element) = self.metadata.element_of_enumerable(service) {
            if let Some(implementations) = self.collection_implementations(&element) {
                return Some(InstanceProducer::new(
                    service.clone(),
                    service.clone(),
                    Lifestyle::Transient,
                    ProducerSource::Collection { implementations },
                ));
            }
        }

        if let Some(result_type) = self.metadata.result_of_factory(service) {
            if self.get_registration(&result_type).is_some() {
                return Some(InstanceProducer::new(
                    service.clone(),
                    service.clone(),
                    Lifestyle::Transient,
                    ProducerSource::Factory { result_type },
                ));
            }
        }

        if self.options.resolve_unregistered_concrete_types && self.metadata.is_concrete(service) {
            trace!("Resolving unregistered concrete type {}", self.display(service));
            return Some(InstanceProducer::new(
                service.clone(),
                service.clone(),
                Lifestyle::Transient,
                ProducerSource::Registration(RegistrationSource::Implementation(service.clone())),
            ));
        }

        None
    }

    fn open_generic_producer(&self, service: &TypeRef) -> Option<InstanceProducer> {
        let registrations = self.open_generic_registrations.read();

        for registration in registrations
            .iter()
            .filter(|registration| registration.service_definition.has_same_definition(service))
        {
            match GenericTypeBuilder::make_closed_implementation(&*self.metadata, service, &registration.implementation) {
                Some(closed) => {
                    debug!(
                        "Closed {} as {} for {}",
                        self.display(&registration.implementation),
                        self.display(&closed),
                        self.display(service)
                    );
                    return Some(InstanceProducer::new(
                        service.clone(),
                        closed.clone(),
                        registration.lifestyle,
                        ProducerSource::Registration(RegistrationSource::Implementation(closed)),
                    ));
                }
                None => trace!(
                    "{} does not apply to {}",
                    self.display(&registration.implementation),
                    self.display(service)
                ),
            }
        }

        None
    }

    /// Closed implementations registered for `IEnumerable<element>`
    fn collection_implementations(&self, element: &TypeRef) -> Option<Vec<TypeRef>> {
        let collections = self.collections.read();
        let close = |implementations: &Vec<TypeRef>| -> Vec<TypeRef> {
            implementations
                .iter()
                .filter_map(|implementation| {
                    GenericTypeBuilder::make_closed_implementation(&*self.metadata, element, implementation)
                })
                .collect()
        };

        if let Some(implementations) = collections.get(element) {
            return Some(close(implementations));
        }
        if !element.is_generic_type() || element.contains_generic_parameters() {
            return None;
        }

        let definition = self.metadata.generic_type_definition(element)?;
        collections.get(&definition).map(close)
    }

    // ------------------------------------------------------------------
    // Verification
    // ------------------------------------------------------------------

    /// Build and instantiate every registered closed service, collecting failures.
    ///
    /// Scoped services are created in a throwaway scope. Collections are
    /// enumerated once. Locks the container.
    pub fn verify(&self) -> DIResult<()> {
        self.locked.store(true, Ordering::Release);

        let mut service_types: Vec<TypeRef> = self.registrations.read().keys().cloned().collect();
        service_types.extend(
            self.collections
                .read()
                .keys()
                .filter(|element| !element.contains_generic_parameters())
                .map(|element| self.metadata.enumerable_of(element)),
        );

        for registration in self.open_generic_registrations.read().iter() {
            if !GenericTypeBuilder::is_implementation_applicable_to_every_generic_type(
                &*self.metadata,
                &registration.service_definition,
                &registration.implementation,
            ) {
                debug!(
                    "{} is a conditional registration for {}",
                    self.display(&registration.implementation),
                    self.display(&registration.service_definition)
                );
            }
        }

        info!("Verifying {} service type(s)", service_types.len());

        let mut failures = Vec::new();
        for service in &service_types {
            let scope = self.begin_scope();
            let verified = self.get_instance_in_scope(service, &scope).and_then(|value| match value {
                Value::Sequence(sequence) => sequence.to_vec().map(|_| ()),
                _ => Ok(()),
            });
            if let Err(err) = verified {
                failures.push(format!("{}: {}", self.display(service), err));
            }
        }

        if failures.is_empty() {
            info!("Container verified");
            return Ok(());
        }

        failures.sort();
        warn!("Container verification failed with {} error(s)", failures.len());
        Err(DIError::Verification { failures })
    }
}

/// State of one top-level build: the chain of service types being built
struct BuildSession<'c> {
    container: &'c Container,
    path: RefCell<Vec<TypeRef>>,
}

impl<'c> BuildSession<'c> {
    fn new(container: &'c Container) -> Self {
        Self {
            container,
            path: RefCell::new(Vec::new()),
        }
    }

    fn producer_factory(&self, producer: &InstanceProducer) -> DIResult<InstanceFactory> {
        if let Some(factory) = producer.factory.get() {
            return Ok(factory.clone());
        }

        self.enter(&producer.service_type)?;
        let built = self.build_pipeline(producer);
        self.path.borrow_mut().pop();
        let (expression, decorator_info) = built?;

        let mut stored = false;
        let factory = producer
            .factory
            .get_or_init(|| {
                stored = true;
                InstanceFactory::new(expression)
            })
            .clone();

        if stored {
            if let Some(info) = decorator_info {
                self.container
                    .decorator_infos
                    .entry(producer.service_type.clone())
                    .or_insert_with(|| Arc::new(info));
            }
            trace!("Built plan for {}", self.container.display(&producer.service_type));
        }
        Ok(factory)
    }

    fn enter(&self, service: &TypeRef) -> DIResult<()> {
        let mut path = self.path.borrow_mut();

        if path.contains(service) {
            let cycle: Vec<String> = path
                .iter()
                .chain(std::iter::once(service))
                .map(|ty| self.container.display(ty))
                .collect();
            return Err(DIError::DependencyResolutionFailed {
                message: format!("cyclic dependency: {}", cycle.join(" -> ")),
            });
        }
        if path.len() >= self.container.options.max_resolution_depth {
            return Err(DIError::DependencyResolutionFailed {
                message: format!(
                    "{} is nested deeper than {} dependencies",
                    self.container.display(service),
                    self.container.options.max_resolution_depth
                ),
            });
        }

        path.push(service.clone());
        Ok(())
    }

    fn build_pipeline(&self, producer: &InstanceProducer) -> DIResult<(Expression, Option<ServiceTypeDecoratorInfo>)> {
        let service = &producer.service_type;

        let expression = match &producer.source {
            ProducerSource::Registration(RegistrationSource::Implementation(implementation)) => {
                self.constructor_expression(implementation)?
            }
            ProducerSource::Registration(RegistrationSource::Instance(instance)) => {
                Expression::constant(Value::Object(Arc::clone(instance)))
            }
            ProducerSource::Registration(RegistrationSource::Factory(delegate)) => self.apply_initializers(
                service,
                Expression::Invoke {
                    ty: service.clone(),
                    delegate: Arc::clone(delegate),
                    arguments: Vec::new(),
                },
            ),
            ProducerSource::Collection { implementations } => {
                let elements = implementations
                    .iter()
                    .map(|implementation| self.constructor_expression(implementation))
                    .collect::<DIResult<Vec<_>>>()?;
                Expression::Sequence {
                    ty: service.clone(),
                    elements: Arc::new(elements),
                }
            }
            ProducerSource::Factory { result_type } => Expression::Lambda {
                ty: service.clone(),
                body: Arc::new(self.build_dependency_expression(result_type)?),
            },
        };

        let expression = producer.lifestyle.apply(expression, &self.root_context())?;

        let mut args =
            ExpressionBuiltEventArgs::new(service.clone(), producer.implementation_type.clone(), expression);
        let interceptors = self.container.interceptors.read().clone();
        for interceptor in interceptors {
            interceptor.on_expression_built(self, &mut args)?;
        }

        Ok(args.into_parts())
    }

    /// `New` over the single public constructor, dependencies resolved recursively
    fn constructor_expression(&self, implementation: &TypeRef) -> DIResult<Expression> {
        let metadata = self.container.metadata();

        if !metadata.is_concrete(implementation) {
            return Err(DIError::DependencyResolutionFailed {
                message: format!("{} is not a concrete type", metadata.display(implementation)),
            });
        }

        let constructors = metadata.constructors_of(implementation);
        let [constructor] = constructors.as_slice() else {
            return Err(DIError::DependencyResolutionFailed {
                message: format!(
                    "{} must have exactly one public constructor to be auto-wired, found {}",
                    metadata.display(implementation),
                    constructors.len()
                ),
            });
        };

        let arguments = constructor
            .parameters
            .iter()
            .map(|parameter| Ok((parameter.name.clone(), self.build_dependency_expression(&parameter.ty)?)))
            .collect::<DIResult<Vec<_>>>()?;

        Ok(self.apply_initializers(
            implementation,
            Expression::New {
                ty: implementation.clone(),
                arguments,
            },
        ))
    }
}

impl DependencyResolver for BuildSession<'_> {
    fn metadata(&self) -> &dyn TypeMetadataProvider {
        self.container.metadata()
    }

    fn build_dependency_expression(&self, service: &TypeRef) -> DIResult<Expression> {
        let producer = self
            .container
            .get_registration(service)
            .ok_or_else(|| DIError::ServiceNotRegistered {
                service_type: self.container.display(service),
            })?;
        Ok(self.producer_factory(&producer)?.expression().clone())
    }

    fn apply_initializers(&self, implementation: &TypeRef, expression: Expression) -> Expression {
        let metadata = self.container.metadata();
        let actions: Vec<Initializer> = self
            .container
            .initializers
            .read()
            .iter()
            .filter(|initializer| service_is_assignable_from_implementation(metadata, &initializer.target, implementation))
            .map(|initializer| Arc::clone(&initializer.action))
            .collect();

        if actions.is_empty() {
            return expression;
        }

        let delegate: Delegate = Arc::new(move |_: &ResolutionContext, values: &[Value]| {
            let value = values.first().cloned().ok_or_else(|| DIError::DependencyResolutionFailed {
                message: "initializer invoked without an instance".to_string(),
            })?;
            if let Value::Object(object) = &value {
                for action in &actions {
                    action(object)?;
                }
            }
            Ok(value)
        });

        Expression::Invoke {
            ty: implementation.clone(),
            delegate,
            arguments: vec![expression],
        }
    }

    fn root_context(&self) -> ResolutionContext {
        ResolutionContext::new(Arc::clone(&self.container.metadata), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DefId, TypeRegistry};

    struct Fixture {
        registry: TypeRegistry,
        clock: DefId,
        system_clock: DefId,
    }

    fn fixture() -> Fixture {
        let mut registry = TypeRegistry::new();
        let clock = registry.interface("IClock", &[]).build();
        let system_clock = registry
            .class("SystemClock", &[])
            .implements(TypeRef::named(clock))
            .build();
        Fixture {
            registry,
            clock,
            system_clock,
        }
    }

    #[test]
    fn test_registration_is_rejected_after_first_resolution() {
        let f = fixture();
        let container = Container::new(Arc::new(f.registry));
        let clock = TypeRef::named(f.clock);
        let system_clock = TypeRef::named(f.system_clock);

        container.register(&clock, &system_clock).unwrap();
        container.get_instance(&clock).unwrap();

        let err = container.register(&clock, &system_clock).unwrap_err();
        assert!(matches!(err, DIError::ContainerLocked { .. }));
    }

    #[test]
    fn test_producers_are_cached_per_service_type() {
        let f = fixture();
        let container = Container::new(Arc::new(f.registry));
        let clock = TypeRef::named(f.clock);
        container
            .register(&clock, &TypeRef::named(f.system_clock))
            .unwrap();

        let first = container.get_registration(&clock).unwrap();
        assert!(!first.is_built());
        container.get_instance(&clock).unwrap();
        let second = container.get_registration(&clock).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.is_built());
    }

    #[test]
    fn test_cycles_are_reported() {
        let mut registry = TypeRegistry::new();
        let (a, b) = (registry.interface("IA", &[]).build(), registry.interface("IB", &[]).build());
        let a_impl = registry
            .class("A", &[])
            .implements(TypeRef::named(a))
            .constructor([("b", TypeRef::named(b))])
            .build();
        let b_impl = registry
            .class("B", &[])
            .implements(TypeRef::named(b))
            .constructor([("a", TypeRef::named(a))])
            .build();

        let container = Container::new(Arc::new(registry));
        container.register(&TypeRef::named(a), &TypeRef::named(a_impl)).unwrap();
        container.register(&TypeRef::named(b), &TypeRef::named(b_impl)).unwrap();

        match container.get_instance(&TypeRef::named(a)) {
            Err(DIError::DependencyResolutionFailed { message }) => {
                assert!(message.contains("IA -> IB -> IA"), "{message}");
            }
            other => panic!("expected a cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_depth_limit() {
        let mut registry = TypeRegistry::new();
        let leaf = registry.class("Leaf", &[]).build();
        let middle = registry
            .class("Middle", &[])
            .constructor([("leaf", TypeRef::named(leaf))])
            .build();
        let root = registry
            .class("Root", &[])
            .constructor([("middle", TypeRef::named(middle))])
            .build();

        let options = ContainerOptions::default().with_max_resolution_depth(2);
        let container = Container::with_options(Arc::new(registry), options).unwrap();

        assert!(matches!(
            container.get_instance(&TypeRef::named(root)),
            Err(DIError::DependencyResolutionFailed { .. })
        ));
        assert!(container.get_instance(&TypeRef::named(middle)).is_ok());
    }
}
