//! Build plans and the interpreter that turns them into instances
//!
//! An [`Expression`] describes how to construct a value of some type. The
//! container builds one per closed service type, interceptors (decorators)
//! may wrap or replace it, and [`InstanceFactory`] evaluates the finished
//! plan against a [`ResolutionContext`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{DIError, DIResult};
use crate::lifestyle::ServiceScope;
use crate::types::{TypeMetadataProvider, TypeRef};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_PARAMETER_ID: AtomicU64 = AtomicU64::new(1);

/// A compiled callable invoked by [`Expression::Invoke`]
pub type Delegate = Arc<dyn Fn(&ResolutionContext, &[Value]) -> DIResult<Value> + Send + Sync>;

/// Allocate an id for an [`Expression::Parameter`]
pub fn next_parameter_id() -> u64 {
    NEXT_PARAMETER_ID.fetch_add(1, Ordering::Relaxed)
}

/// A build plan node
#[derive(Clone)]
pub enum Expression {
    /// A pre-built value (singletons, registered instances)
    Constant { ty: TypeRef, value: Value },
    /// Call the single public constructor of `ty`; arguments are keyed by parameter name
    New {
        ty: TypeRef,
        arguments: Vec<(String, Expression)>,
    },
    /// Evaluate the arguments and hand them to a delegate
    Invoke {
        ty: TypeRef,
        delegate: Delegate,
        arguments: Vec<Expression>,
    },
    /// Cache the inner value in the active scope under `key`
    Scoped {
        key: u64,
        ty: TypeRef,
        inner: Box<Expression>,
    },
    /// A `Func<T>` producing the body on each call
    Lambda { ty: TypeRef, body: Arc<Expression> },
    /// An `IEnumerable<T>` whose elements are built on enumeration
    Sequence {
        ty: TypeRef,
        elements: Arc<Vec<Expression>>,
    },
    /// Lazy projection of each element of `source` through `projection`,
    /// with the element bound to `parameter`
    Select {
        ty: TypeRef,
        source: Box<Expression>,
        parameter: u64,
        projection: Arc<Expression>,
    },
    /// Reference to a value bound by an enclosing [`Expression::Select`]
    Parameter { id: u64, ty: TypeRef },
}

impl Expression {
    pub fn constant(value: Value) -> Self {
        Expression::Constant {
            ty: value.ty().clone(),
            value,
        }
    }

    /// The type of the value this expression produces
    pub fn ty(&self) -> &TypeRef {
        match self {
            Expression::Constant { ty, .. }
            | Expression::New { ty, .. }
            | Expression::Invoke { ty, .. }
            | Expression::Scoped { ty, .. }
            | Expression::Lambda { ty, .. }
            | Expression::Sequence { ty, .. }
            | Expression::Select { ty, .. }
            | Expression::Parameter { ty, .. } => ty,
        }
    }

    pub fn evaluate(&self, context: &ResolutionContext) -> DIResult<Value> {
        match self {
            Expression::Constant { value, .. } => Ok(value.clone()),
            Expression::New { ty, arguments } => {
                let dependencies = arguments
                    .iter()
                    .map(|(name, argument)| Ok((name.clone(), argument.evaluate(context)?)))
                    .collect::<DIResult<Vec<_>>>()?;
                Ok(Value::Object(Arc::new(Object::new(ty.clone(), dependencies))))
            }
            Expression::Invoke {
                delegate, arguments, ..
            } => {
                let values = arguments
                    .iter()
                    .map(|argument| argument.evaluate(context))
                    .collect::<DIResult<Vec<_>>>()?;
                delegate(context, &values)
            }
            Expression::Scoped { key, ty, inner } => {
                let scope = context.scope().ok_or_else(|| DIError::ScopeRequired {
                    service_type: context.metadata().display(ty),
                })?;
                scope.get_or_create(*key, || inner.evaluate(context))
            }
            Expression::Lambda { ty, body } => Ok(Value::Factory(FactoryValue {
                ty: ty.clone(),
                body: Arc::clone(body),
                context: context.clone(),
            })),
            Expression::Sequence { ty, elements } => {
                let elements = Arc::clone(elements);
                let context = context.clone();
                let len = elements.len();
                Ok(Value::Sequence(LazySequence::new(ty.clone(), len, move |index| {
                    match elements.get(index) {
                        Some(element) => element.evaluate(&context),
                        None => Err(out_of_range(index)),
                    }
                })))
            }
            Expression::Select {
                ty,
                source,
                parameter,
                projection,
            } => {
                let Value::Sequence(source) = source.evaluate(context)? else {
                    return Err(DIError::DependencyResolutionFailed {
                        message: format!(
                            "{} projects over a value that is not a sequence",
                            context.metadata().display(ty)
                        ),
                    });
                };
                let projection = Arc::clone(projection);
                let parameter = *parameter;
                let context = context.clone();
                let len = source.len();
                Ok(Value::Sequence(LazySequence::new(ty.clone(), len, move |index| {
                    let element = source.get(index).unwrap_or_else(|| Err(out_of_range(index)))?;
                    projection.evaluate(&context.bind(parameter, element))
                })))
            }
            Expression::Parameter { id, ty } => {
                context
                    .binding(*id)
                    .cloned()
                    .ok_or_else(|| DIError::DependencyResolutionFailed {
                        message: format!(
                            "unbound parameter #{id} of type {}",
                            context.metadata().display(ty)
                        ),
                    })
            }
        }
    }
}

fn out_of_range(index: usize) -> DIError {
    DIError::DependencyResolutionFailed {
        message: format!("sequence element {index} is out of range"),
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Constant { ty, value } => f
                .debug_struct("Constant")
                .field("ty", ty)
                .field("value", value)
                .finish(),
            Expression::New { ty, arguments } => f
                .debug_struct("New")
                .field("ty", ty)
                .field("arguments", arguments)
                .finish(),
            Expression::Invoke { ty, arguments, .. } => f
                .debug_struct("Invoke")
                .field("ty", ty)
                .field("arguments", arguments)
                .finish_non_exhaustive(),
            Expression::Scoped { key, ty, inner } => f
                .debug_struct("Scoped")
                .field("key", key)
                .field("ty", ty)
                .field("inner", inner)
                .finish(),
            Expression::Lambda { ty, body } => f
                .debug_struct("Lambda")
                .field("ty", ty)
                .field("body", body)
                .finish(),
            Expression::Sequence { ty, elements } => f
                .debug_struct("Sequence")
                .field("ty", ty)
                .field("elements", elements)
                .finish(),
            Expression::Select {
                ty,
                source,
                parameter,
                projection,
            } => f
                .debug_struct("Select")
                .field("ty", ty)
                .field("source", source)
                .field("parameter", parameter)
                .field("projection", projection)
                .finish(),
            Expression::Parameter { id, ty } => f
                .debug_struct("Parameter")
                .field("id", id)
                .field("ty", ty)
                .finish(),
        }
    }
}

/// Everything an expression needs at evaluation time
#[derive(Clone)]
pub struct ResolutionContext {
    metadata: Arc<dyn TypeMetadataProvider>,
    scope: Option<Arc<ServiceScope>>,
    bindings: Vec<(u64, Value)>,
}

impl ResolutionContext {
    pub fn new(metadata: Arc<dyn TypeMetadataProvider>, scope: Option<Arc<ServiceScope>>) -> Self {
        Self {
            metadata,
            scope,
            bindings: Vec::new(),
        }
    }

    pub fn metadata(&self) -> &dyn TypeMetadataProvider {
        &*self.metadata
    }

    pub fn scope(&self) -> Option<&Arc<ServiceScope>> {
        self.scope.as_ref()
    }

    /// A copy of this context with `parameter` bound to `value`
    pub fn bind(&self, parameter: u64, value: Value) -> Self {
        let mut bound = self.clone();
        bound.bindings.push((parameter, value));
        bound
    }

    fn binding(&self, parameter: u64) -> Option<&Value> {
        self.bindings
            .iter()
            .rev()
            .find(|(id, _)| *id == parameter)
            .map(|(_, value)| value)
    }
}

impl fmt::Debug for ResolutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionContext")
            .field("scoped", &self.scope.is_some())
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

/// A constructed instance.
///
/// Objects keep the values they were constructed with, keyed by constructor
/// parameter name, so a resolved object graph can be walked.
#[derive(Debug)]
pub struct Object {
    id: u64,
    ty: TypeRef,
    dependencies: Vec<(String, Value)>,
}

impl Object {
    pub fn new(ty: TypeRef, dependencies: Vec<(String, Value)>) -> Self {
        Self {
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            ty,
            dependencies,
        }
    }

    /// Unique per constructed instance
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    pub fn dependencies(&self) -> &[(String, Value)] {
        &self.dependencies
    }

    /// The value passed for the constructor parameter `name`
    pub fn dependency(&self, name: &str) -> Option<&Value> {
        self.dependencies
            .iter()
            .find(|(parameter, _)| parameter == name)
            .map(|(_, value)| value)
    }
}

/// A resolved value
#[derive(Debug, Clone)]
pub enum Value {
    Object(Arc<Object>),
    Factory(FactoryValue),
    Sequence(LazySequence),
}

impl Value {
    pub fn ty(&self) -> &TypeRef {
        match self {
            Value::Object(object) => object.ty(),
            Value::Factory(factory) => &factory.ty,
            Value::Sequence(sequence) => &sequence.ty,
        }
    }

    pub fn as_object(&self) -> Option<&Arc<Object>> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_factory(&self) -> Option<&FactoryValue> {
        match self {
            Value::Factory(factory) => Some(factory),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&LazySequence> {
        match self {
            Value::Sequence(sequence) => Some(sequence),
            _ => None,
        }
    }

    pub fn into_object(self) -> Option<Arc<Object>> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }
}

/// A resolved `Func<T>`: builds a `T` each time it is invoked
#[derive(Clone)]
pub struct FactoryValue {
    ty: TypeRef,
    body: Arc<Expression>,
    context: ResolutionContext,
}

impl FactoryValue {
    /// The `Func<T>` type
    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    pub fn invoke(&self) -> DIResult<Value> {
        self.body.evaluate(&self.context)
    }
}

impl fmt::Debug for FactoryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryValue")
            .field("ty", &self.ty)
            .finish_non_exhaustive()
    }
}

type ElementFn = Arc<dyn Fn(usize) -> DIResult<Value> + Send + Sync>;

/// A sequence whose elements are built every time they are enumerated
#[derive(Clone)]
pub struct LazySequence {
    ty: TypeRef,
    len: usize,
    element: ElementFn,
}

impl LazySequence {
    pub fn new<F>(ty: TypeRef, len: usize, element: F) -> Self
    where
        F: Fn(usize) -> DIResult<Value> + Send + Sync + 'static,
    {
        Self {
            ty,
            len,
            element: Arc::new(element),
        }
    }

    /// The `IEnumerable<T>` type
    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Build the element at `index`, `None` past the end
    pub fn get(&self, index: usize) -> Option<DIResult<Value>> {
        (index < self.len).then(|| (self.element)(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = DIResult<Value>> + '_ {
        (0..self.len).map(move |index| (self.element)(index))
    }

    /// Enumerate once, failing on the first element that can't be built
    pub fn to_vec(&self) -> DIResult<Vec<Value>> {
        self.iter().collect()
    }
}

impl fmt::Debug for LazySequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazySequence")
            .field("ty", &self.ty)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// A finished build plan, ready to produce instances
#[derive(Debug, Clone)]
pub struct InstanceFactory {
    expression: Arc<Expression>,
}

impl InstanceFactory {
    pub fn new(expression: Expression) -> Self {
        Self {
            expression: Arc::new(expression),
        }
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    pub fn create(&self, context: &ResolutionContext) -> DIResult<Value> {
        self.expression.evaluate(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeRegistry;

    fn context(registry: TypeRegistry, scope: Option<Arc<ServiceScope>>) -> ResolutionContext {
        ResolutionContext::new(Arc::new(registry), scope)
    }

    #[test]
    fn test_new_records_dependencies_by_name() {
        let mut registry = TypeRegistry::new();
        let engine = registry.class("Engine", &[]).build();
        let car = registry.class("Car", &[]).build();
        let ctx = context(registry, None);

        let expression = Expression::New {
            ty: TypeRef::named(car),
            arguments: vec![(
                "engine".to_string(),
                Expression::New {
                    ty: TypeRef::named(engine),
                    arguments: Vec::new(),
                },
            )],
        };

        let value = expression.evaluate(&ctx).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.ty(), &TypeRef::named(car));
        let inner = object.dependency("engine").and_then(Value::as_object).unwrap();
        assert_eq!(inner.ty(), &TypeRef::named(engine));
        assert!(object.dependency("wheels").is_none());
    }

    #[test]
    fn test_scoped_requires_scope_and_caches() {
        let mut registry = TypeRegistry::new();
        let unit = registry.class("UnitOfWork", &[]).build();
        let expression = Expression::Scoped {
            key: 7,
            ty: TypeRef::named(unit),
            inner: Box::new(Expression::New {
                ty: TypeRef::named(unit),
                arguments: Vec::new(),
            }),
        };

        let unscoped = context(registry.clone(), None);
        assert!(matches!(
            expression.evaluate(&unscoped),
            Err(DIError::ScopeRequired { .. })
        ));

        let scoped = context(registry, Some(Arc::new(ServiceScope::new())));
        let first = expression.evaluate(&scoped).unwrap().into_object().unwrap();
        let second = expression.evaluate(&scoped).unwrap().into_object().unwrap();
        assert_eq!(first.id(), second.id());
    }

    #[test]
    fn test_select_projects_lazily_per_enumeration() {
        let mut registry = TypeRegistry::new();
        let plugin = registry.class("Plugin", &[]).build();
        let wrapper = registry.class("Wrapper", &[]).build();
        let sequence_type = registry.enumerable_of(&TypeRef::named(plugin));
        let ctx = context(registry, None);

        let parameter = next_parameter_id();
        let expression = Expression::Select {
            ty: sequence_type.clone(),
            source: Box::new(Expression::Sequence {
                ty: sequence_type,
                elements: Arc::new(vec![Expression::New {
                    ty: TypeRef::named(plugin),
                    arguments: Vec::new(),
                }]),
            }),
            parameter,
            projection: Arc::new(Expression::New {
                ty: TypeRef::named(wrapper),
                arguments: vec![(
                    "inner".to_string(),
                    Expression::Parameter {
                        id: parameter,
                        ty: TypeRef::named(plugin),
                    },
                )],
            }),
        };

        let value = expression.evaluate(&ctx).unwrap();
        let sequence = value.as_sequence().unwrap();
        assert_eq!(sequence.len(), 1);

        let first = sequence.to_vec().unwrap();
        let second = sequence.to_vec().unwrap();
        let first = first[0].as_object().unwrap();
        let second = second[0].as_object().unwrap();
        assert_eq!(first.ty(), &TypeRef::named(wrapper));
        assert_ne!(first.id(), second.id());
        assert!(sequence.get(1).is_none());
    }

    #[test]
    fn test_unbound_parameter_fails() {
        let registry = TypeRegistry::new();
        let string = TypeRef::named(registry.well_known().string);
        let ctx = context(registry, None);
        let expression = Expression::Parameter { id: 0, ty: string };
        assert!(matches!(
            expression.evaluate(&ctx),
            Err(DIError::DependencyResolutionFailed { .. })
        ));
    }
}
