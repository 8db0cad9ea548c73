use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{DIError, DIResult};
use crate::expression::{next_parameter_id, Expression};
use crate::generics::{service_is_assignable_from_implementation, GenericTypeBuilder};
use crate::lifestyle::Lifestyle;
use crate::types::{TypeMetadataProvider, TypeRef};

use super::{
    DecoratorInfo, DecoratorPredicate, DecoratorPredicateContext, DependencyResolver,
    ExpressionBuiltEventArgs, ExpressionBuiltInterceptor, ServiceTypeDecoratorInfo,
};

/// A registered decorator rule.
///
/// The service type is either a closed type, decorated on exact match, or an
/// open generic definition, in which case the decorator is closed for each
/// requested service type through [`GenericTypeBuilder`]. `IEnumerable<S>`
/// plans are decorated element by element, with the predicate asked once per
/// element when the elements are known at build time.
pub struct DecoratorInterceptor {
    service_type: TypeRef,
    decorator_type: TypeRef,
    lifestyle: Lifestyle,
    predicate: Option<DecoratorPredicate>,
    decoratee_parameter: usize,
    decoratee_is_factory: bool,
}

impl DecoratorInterceptor {
    /// Validate the decorator's shape and create the rule.
    ///
    /// The decorator must be concrete, implement the service type and have
    /// exactly one public constructor taking the decorated service (or a
    /// `Func` of it) exactly once.
    pub fn new(
        metadata: &dyn TypeMetadataProvider,
        service_type: TypeRef,
        decorator_type: TypeRef,
        lifestyle: Lifestyle,
        predicate: Option<DecoratorPredicate>,
    ) -> DIResult<Self> {
        let service_type = if service_type.contains_generic_parameters() {
            metadata
                .generic_type_definition(&service_type)
                .unwrap_or(service_type)
        } else {
            service_type
        };

        let invalid = |message: String| DIError::InvalidDecorator {
            decorator_type: metadata.display(&decorator_type),
            message,
        };

        if !metadata.is_concrete(&decorator_type) {
            return Err(invalid("a decorator must be a concrete type".to_string()));
        }
        if service_type.contains_generic_parameters() && !decorator_type.contains_generic_parameters() {
            return Err(invalid(format!(
                "open generic service {} can only be decorated by an open generic decorator",
                metadata.display(&service_type)
            )));
        }
        if !service_is_assignable_from_implementation(metadata, &service_type, &decorator_type) {
            return Err(invalid(format!(
                "it does not implement {}",
                metadata.display(&service_type)
            )));
        }

        let constructors = metadata.constructors_of(&decorator_type);
        let [constructor] = constructors.as_slice() else {
            return Err(invalid(format!(
                "it must have exactly one public constructor, found {}",
                constructors.len()
            )));
        };

        // The decorated service as the decorator's constructor spells it.
        let decorated = service_type
            .definition()
            .and_then(|def| {
                metadata
                    .hierarchy_for_definition(&decorator_type, def)
                    .into_iter()
                    .next()
            })
            .unwrap_or_else(|| service_type.clone());

        let decoratees: Vec<(usize, bool)> = constructor
            .parameters
            .iter()
            .enumerate()
            .filter_map(|(index, parameter)| {
                if parameter.ty == decorated {
                    Some((index, false))
                } else if metadata.result_of_factory(&parameter.ty).as_ref() == Some(&decorated) {
                    Some((index, true))
                } else {
                    None
                }
            })
            .collect();

        let [(decoratee_parameter, decoratee_is_factory)] = decoratees.as_slice() else {
            return Err(invalid(format!(
                "its constructor must take exactly one {} or {}, found {}",
                metadata.display(&decorated),
                metadata.display(&metadata.factory_of(&decorated)),
                decoratees.len()
            )));
        };
        let (decoratee_parameter, decoratee_is_factory) = (*decoratee_parameter, *decoratee_is_factory);

        debug!(
            "Registered decorator {} for {} ({:?})",
            metadata.display(&decorator_type),
            metadata.display(&service_type),
            lifestyle
        );

        Ok(Self {
            service_type,
            decorator_type,
            lifestyle,
            predicate,
            decoratee_parameter,
            decoratee_is_factory,
        })
    }

    pub fn service_type(&self) -> &TypeRef {
        &self.service_type
    }

    pub fn decorator_type(&self) -> &TypeRef {
        &self.decorator_type
    }

    pub fn lifestyle(&self) -> Lifestyle {
        self.lifestyle
    }

    fn applies_to(&self, service_type: &TypeRef) -> bool {
        if service_type.contains_generic_parameters() {
            return false;
        }
        service_type == &self.service_type
            || (self.service_type.is_generic_type_definition()
                && service_type.has_same_definition(&self.service_type))
    }

    fn closed_decorator_for(
        &self,
        metadata: &dyn TypeMetadataProvider,
        service_type: &TypeRef,
    ) -> Option<TypeRef> {
        if !self.applies_to(service_type) {
            return None;
        }
        if !self.decorator_type.contains_generic_parameters() {
            return Some(self.decorator_type.clone());
        }

        let closed = GenericTypeBuilder::make_closed_implementation(metadata, service_type, &self.decorator_type);
        if closed.is_none() {
            trace!(
                "{} can't be closed for {}",
                metadata.display(&self.decorator_type),
                metadata.display(service_type)
            );
        }
        closed
    }

    fn predicate_allows(
        &self,
        service_type: &TypeRef,
        info: &ServiceTypeDecoratorInfo,
        expression: &Expression,
    ) -> bool {
        match &self.predicate {
            Some(predicate) => predicate(&DecoratorPredicateContext::new(
                service_type.clone(),
                info,
                expression.clone(),
            )),
            None => true,
        }
    }

    fn decorate(
        &self,
        resolver: &dyn DependencyResolver,
        args: &mut ExpressionBuiltEventArgs,
        service_type: &TypeRef,
        decorator: &TypeRef,
    ) -> DIResult<()> {
        let metadata = resolver.metadata();
        let current = args.expression.clone();

        if !self.predicate_allows(service_type, args.decorator_info(), &current) {
            trace!(
                "Predicate skipped {} for {}",
                metadata.display(decorator),
                metadata.display(service_type)
            );
            return Ok(());
        }

        let decorated = self.build_decorator_expression(resolver, service_type, decorator, current)?;
        let decorated = self.lifestyle.apply(decorated, &resolver.root_context())?;

        debug!(
            "Decorated {} with {}",
            metadata.display(service_type),
            metadata.display(decorator)
        );
        args.decorator_info()
            .push(DecoratorInfo::new(decorator.clone(), decorated.clone()));
        args.expression = decorated;
        Ok(())
    }

    fn decorate_collection(
        &self,
        resolver: &dyn DependencyResolver,
        args: &mut ExpressionBuiltEventArgs,
        element_type: &TypeRef,
        decorator: &TypeRef,
    ) -> DIResult<()> {
        let metadata = resolver.metadata();
        if self.lifestyle != Lifestyle::Transient {
            debug!(
                "{} decorates collection elements; one instance is created per element regardless of its {:?} lifestyle",
                metadata.display(decorator),
                self.lifestyle
            );
        }

        if let Expression::Sequence { ty, elements } = &args.expression {
            let (ty, elements) = (ty.clone(), Arc::clone(elements));
            return self.decorate_elements(resolver, args, element_type, decorator, ty, &elements);
        }

        // The elements aren't known until the plan runs: decorate each one lazily.
        let parameter = next_parameter_id();
        let element = Expression::Parameter {
            id: parameter,
            ty: element_type.clone(),
        };

        if !self.predicate_allows(element_type, args.decorator_info(), &element) {
            trace!(
                "Predicate skipped {} for elements of {}",
                metadata.display(decorator),
                metadata.display(args.registered_service_type())
            );
            return Ok(());
        }

        let projection = self.build_decorator_expression(resolver, element_type, decorator, element)?;
        let decorated = Expression::Select {
            ty: args.registered_service_type().clone(),
            source: Box::new(args.expression.clone()),
            parameter,
            projection: Arc::new(projection.clone()),
        };

        debug!(
            "Decorated elements of {} with {}",
            metadata.display(args.registered_service_type()),
            metadata.display(decorator)
        );
        args.decorator_info()
            .push(DecoratorInfo::new(decorator.clone(), projection));
        args.expression = decorated;
        Ok(())
    }

    /// Each element of a known sequence gets its own predicate check and history
    fn decorate_elements(
        &self,
        resolver: &dyn DependencyResolver,
        args: &mut ExpressionBuiltEventArgs,
        element_type: &TypeRef,
        decorator: &TypeRef,
        sequence_type: TypeRef,
        elements: &[Expression],
    ) -> DIResult<()> {
        let metadata = resolver.metadata();
        let mut decorated_elements = Vec::with_capacity(elements.len());
        let mut decorated_count = 0;

        for (index, element) in elements.iter().enumerate() {
            let info = args.element_decorator_info(index, element, element_type);
            if !self.predicate_allows(element_type, info, element) {
                trace!(
                    "Predicate skipped {} for {}",
                    metadata.display(decorator),
                    metadata.display(info.implementation_type())
                );
                decorated_elements.push(element.clone());
                continue;
            }

            let wrapped = self.build_decorator_expression(resolver, element_type, decorator, element.clone())?;
            args.element_decorator_info(index, element, element_type)
                .push(DecoratorInfo::new(decorator.clone(), wrapped.clone()));
            decorated_elements.push(wrapped);
            decorated_count += 1;
        }

        if decorated_count == 0 {
            return Ok(());
        }

        debug!(
            "Decorated {} of {} element(s) of {} with {}",
            decorated_count,
            elements.len(),
            metadata.display(args.registered_service_type()),
            metadata.display(decorator)
        );
        let decorated = Expression::Sequence {
            ty: sequence_type,
            elements: Arc::new(decorated_elements),
        };
        args.decorator_info()
            .push(DecoratorInfo::new(decorator.clone(), decorated.clone()));
        args.expression = decorated;
        Ok(())
    }

    fn build_decorator_expression(
        &self,
        resolver: &dyn DependencyResolver,
        service_type: &TypeRef,
        decorator: &TypeRef,
        decoratee: Expression,
    ) -> DIResult<Expression> {
        let metadata = resolver.metadata();
        let constructor = metadata
            .constructors_of(decorator)
            .into_iter()
            .next()
            .ok_or_else(|| DIError::InvalidDecorator {
                decorator_type: metadata.display(decorator),
                message: "it has no public constructor".to_string(),
            })?;

        let mut arguments = Vec::with_capacity(constructor.parameters.len());
        for (index, parameter) in constructor.parameters.into_iter().enumerate() {
            let argument = if index == self.decoratee_parameter {
                if self.decoratee_is_factory {
                    Expression::Lambda {
                        ty: metadata.factory_of(service_type),
                        body: Arc::new(decoratee.clone()),
                    }
                } else {
                    decoratee.clone()
                }
            } else {
                resolver
                    .build_dependency_expression(&parameter.ty)
                    .map_err(|source| DIError::DecoratorConstructionFailed {
                        decorator_type: metadata.display(decorator),
                        source: Box::new(source),
                    })?
            };
            arguments.push((parameter.name, argument));
        }

        let expression = Expression::New {
            ty: decorator.clone(),
            arguments,
        };
        Ok(resolver.apply_initializers(decorator, expression))
    }
}

impl ExpressionBuiltInterceptor for DecoratorInterceptor {
    fn on_expression_built(
        &self,
        resolver: &dyn DependencyResolver,
        args: &mut ExpressionBuiltEventArgs,
    ) -> DIResult<()> {
        let metadata = resolver.metadata();
        let service_type = args.registered_service_type().clone();

        if let Some(decorator) = self.closed_decorator_for(metadata, &service_type) {
            return self.decorate(resolver, args, &service_type, &decorator);
        }

        if let Some(element_type) = metadata.element_of_enumerable(&service_type) {
            if let Some(decorator) = self.closed_decorator_for(metadata, &element_type) {
                return self.decorate_collection(resolver, args, &element_type, &decorator);
            }
        }

        Ok(())
    }
}
