//! Decoration: the expression-built pipeline stage and the decorator rules that run in it
//!
//! Whenever the container finishes the build plan for a closed service type
//! it runs every registered [`ExpressionBuiltInterceptor`] over it, in
//! registration order. [`DecoratorInterceptor`] is the interceptor behind
//! `Container::register_decorator`: it wraps the plan in a decorator
//! construction when the rule applies, and records what it applied in the
//! service type's [`ServiceTypeDecoratorInfo`].

mod interceptor;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::DIResult;
use crate::expression::{Expression, ResolutionContext, Value};
use crate::types::{TypeMetadataProvider, TypeRef};

pub use interceptor::DecoratorInterceptor;

/// User predicate deciding whether a decorator applies
pub type DecoratorPredicate = Arc<dyn Fn(&DecoratorPredicateContext) -> bool + Send + Sync>;

/// One applied decoration layer
#[derive(Debug, Clone)]
pub struct DecoratorInfo {
    decorator_type: TypeRef,
    expression: Expression,
}

impl DecoratorInfo {
    pub fn new(decorator_type: TypeRef, expression: Expression) -> Self {
        Self {
            decorator_type,
            expression,
        }
    }

    /// The closed decorator type
    pub fn decorator_type(&self) -> &TypeRef {
        &self.decorator_type
    }

    /// The plan of this layer, lifestyle applied
    pub fn expression(&self) -> &Expression {
        &self.expression
    }
}

/// Decoration history of one closed service type, in application order
#[derive(Debug, Clone)]
pub struct ServiceTypeDecoratorInfo {
    implementation_type: TypeRef,
    applied_decorators: Vec<DecoratorInfo>,
}

impl ServiceTypeDecoratorInfo {
    pub fn new(implementation_type: TypeRef) -> Self {
        Self {
            implementation_type,
            applied_decorators: Vec::new(),
        }
    }

    /// Best-effort implementation type of the undecorated plan
    pub fn implementation_type(&self) -> &TypeRef {
        &self.implementation_type
    }

    pub fn applied_decorators(&self) -> &[DecoratorInfo] {
        &self.applied_decorators
    }

    pub fn applied_decorator_types(&self) -> Vec<TypeRef> {
        self.applied_decorators
            .iter()
            .map(|info| info.decorator_type.clone())
            .collect()
    }

    pub(crate) fn push(&mut self, info: DecoratorInfo) {
        self.applied_decorators.push(info);
    }
}

/// What a decorator predicate gets to see
#[derive(Debug, Clone)]
pub struct DecoratorPredicateContext {
    service_type: TypeRef,
    implementation_type: TypeRef,
    applied_decorators: Vec<TypeRef>,
    expression: Expression,
}

impl DecoratorPredicateContext {
    pub(crate) fn new(service_type: TypeRef, info: &ServiceTypeDecoratorInfo, expression: Expression) -> Self {
        Self {
            service_type,
            implementation_type: info.implementation_type().clone(),
            applied_decorators: info.applied_decorator_types(),
            expression,
        }
    }

    pub fn service_type(&self) -> &TypeRef {
        &self.service_type
    }

    pub fn implementation_type(&self) -> &TypeRef {
        &self.implementation_type
    }

    /// Decorators already applied to this service type, innermost first
    pub fn applied_decorators(&self) -> &[TypeRef] {
        &self.applied_decorators
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }
}

/// Access to the container while a build plan is being finalized
pub trait DependencyResolver {
    fn metadata(&self) -> &dyn TypeMetadataProvider;

    /// The build plan of a dependency, resolved the normal way
    fn build_dependency_expression(&self, service_type: &TypeRef) -> DIResult<Expression>;

    /// Wrap `expression` with the initializers registered for `implementation_type`
    fn apply_initializers(&self, implementation_type: &TypeRef, expression: Expression) -> Expression;

    /// Context used to create singletons while building
    fn root_context(&self) -> ResolutionContext;
}

/// Payload of the expression-built stage
#[derive(Debug)]
pub struct ExpressionBuiltEventArgs {
    registered_service_type: TypeRef,
    implementation_type: TypeRef,
    /// The current build plan; interceptors may replace it
    pub expression: Expression,
    decorator_info: Option<ServiceTypeDecoratorInfo>,
    element_decorator_infos: HashMap<usize, ServiceTypeDecoratorInfo>,
}

impl ExpressionBuiltEventArgs {
    pub fn new(registered_service_type: TypeRef, implementation_type: TypeRef, expression: Expression) -> Self {
        Self {
            registered_service_type,
            implementation_type,
            expression,
            decorator_info: None,
            element_decorator_infos: HashMap::new(),
        }
    }

    pub fn registered_service_type(&self) -> &TypeRef {
        &self.registered_service_type
    }

    /// Decoration history for this build, created on first use from the
    /// shape of the current plan
    pub fn decorator_info(&mut self) -> &mut ServiceTypeDecoratorInfo {
        let expression = &self.expression;
        let fallback = &self.implementation_type;
        self.decorator_info
            .get_or_insert_with(|| ServiceTypeDecoratorInfo::new(implementation_type_of(expression, fallback)))
    }

    /// Decoration history of one element of a collection plan, created on
    /// first use from the shape of that element
    pub(crate) fn element_decorator_info(
        &mut self,
        index: usize,
        element: &Expression,
        fallback: &TypeRef,
    ) -> &mut ServiceTypeDecoratorInfo {
        self.element_decorator_infos
            .entry(index)
            .or_insert_with(|| ServiceTypeDecoratorInfo::new(implementation_type_of(element, fallback)))
    }

    pub fn into_parts(self) -> (Expression, Option<ServiceTypeDecoratorInfo>) {
        (self.expression, self.decorator_info)
    }
}

/// A stage of the build pipeline, run once per closed service type
pub trait ExpressionBuiltInterceptor: Send + Sync {
    fn on_expression_built(
        &self,
        resolver: &dyn DependencyResolver,
        args: &mut ExpressionBuiltEventArgs,
    ) -> DIResult<()>;
}

/// Implementation type read off the plan: the constant's type, the
/// constructed type, or the constructed type an initializer wraps.
pub(crate) fn implementation_type_of(expression: &Expression, fallback: &TypeRef) -> TypeRef {
    match expression {
        Expression::Constant {
            value: Value::Object(object),
            ..
        } => object.ty().clone(),
        Expression::New { ty, .. } => ty.clone(),
        Expression::Invoke { arguments, .. } => match arguments.first() {
            Some(Expression::New { ty, .. }) => ty.clone(),
            _ => fallback.clone(),
        },
        Expression::Scoped { inner, .. } => implementation_type_of(inner, fallback),
        _ => fallback.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Object;
    use crate::types::TypeRegistry;

    #[test]
    fn test_implementation_type_from_plan_shape() {
        let mut registry = TypeRegistry::new();
        let service = TypeRef::named(registry.interface("IClock", &[]).build());
        let clock = TypeRef::named(registry.class("SystemClock", &[]).build());

        let new = Expression::New {
            ty: clock.clone(),
            arguments: Vec::new(),
        };
        assert_eq!(implementation_type_of(&new, &service), clock);

        let constant = Expression::constant(Value::Object(Arc::new(Object::new(clock.clone(), Vec::new()))));
        assert_eq!(implementation_type_of(&constant, &service), clock);

        let invoke = Expression::Invoke {
            ty: service.clone(),
            delegate: Arc::new(|_: &ResolutionContext, values: &[Value]| Ok(values[0].clone())),
            arguments: vec![new],
        };
        assert_eq!(implementation_type_of(&invoke, &service), clock);

        let factory = Expression::Invoke {
            ty: service.clone(),
            delegate: Arc::new(|_: &ResolutionContext, _: &[Value]| -> DIResult<Value> {
                unreachable!("factory is never invoked")
            }),
            arguments: Vec::new(),
        };
        assert_eq!(implementation_type_of(&factory, &service), service);
    }

    #[test]
    fn test_decorator_info_is_created_once() {
        let mut registry = TypeRegistry::new();
        let service = TypeRef::named(registry.interface("IClock", &[]).build());
        let clock = TypeRef::named(registry.class("SystemClock", &[]).build());
        let logging = TypeRef::named(registry.class("LoggingClock", &[]).build());

        let mut args = ExpressionBuiltEventArgs::new(
            service.clone(),
            clock.clone(),
            Expression::New {
                ty: clock.clone(),
                arguments: Vec::new(),
            },
        );
        args.decorator_info().push(DecoratorInfo::new(
            logging.clone(),
            Expression::New {
                ty: logging.clone(),
                arguments: Vec::new(),
            },
        ));
        args.expression = Expression::New {
            ty: logging.clone(),
            arguments: Vec::new(),
        };

        let info = args.decorator_info();
        assert_eq!(info.implementation_type(), &clock);
        assert_eq!(info.applied_decorator_types(), vec![logging]);
    }
}
