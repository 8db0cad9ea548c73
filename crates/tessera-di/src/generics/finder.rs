//! Unification of a requested service type against an implementation's generic parameters

use std::collections::HashSet;

use tracing::trace;

use crate::types::{TypeMetadataProvider, TypeRef};

use super::mapping::ArgumentMapping;

/// Computes the concrete type arguments needed to close an implementation.
///
/// Given `SqlRepo<T> : IRepo<T>` the finder is created with the open
/// candidate service type as seen from the implementation (`IRepo<T>` with
/// `SqlRepo`'s own `T`), the requested service type (`IRepo<Customer>`) and
/// the implementation definition (`SqlRepo<T>`), and produces `[Customer]`.
///
/// The finder only unifies. Constraint checks are left to the caller.
pub struct GenericArgumentFinder<'a> {
    metadata: &'a dyn TypeMetadataProvider,
    service_type_definition_arguments: Vec<TypeRef>,
    service_type_to_resolve_arguments: Vec<TypeRef>,
    implementation_type_definition_arguments: Vec<TypeRef>,
    partial_implementation_arguments: Vec<TypeRef>,
    tolerate_ambiguity: bool,
}

impl<'a> GenericArgumentFinder<'a> {
    pub fn new(
        metadata: &'a dyn TypeMetadataProvider,
        service_type_definition: &TypeRef,
        service_type_to_resolve: &TypeRef,
        implementation_type_definition: &TypeRef,
        partial_open_generic_implementation: Option<&TypeRef>,
    ) -> Self {
        let partial = partial_open_generic_implementation.unwrap_or(implementation_type_definition);
        Self {
            metadata,
            service_type_definition_arguments: service_type_definition.generic_arguments().to_vec(),
            service_type_to_resolve_arguments: service_type_to_resolve.generic_arguments().to_vec(),
            implementation_type_definition_arguments: implementation_type_definition
                .generic_arguments()
                .to_vec(),
            partial_implementation_arguments: partial.generic_arguments().to_vec(),
            // Verifying an open registration: there is no caller type to disambiguate with.
            tolerate_ambiguity: service_type_to_resolve.contains_generic_parameters(),
        }
    }

    /// Concrete arguments in the implementation's declaration order.
    ///
    /// Parameters that could not be unified are missing, so a result shorter
    /// than the implementation's arity means the implementation can't be closed.
    pub fn concrete_type_arguments_for_closed_implementation(&self) -> Vec<TypeRef> {
        self.concrete_argument_mappings()
            .into_iter()
            .map(|mapping| mapping.concrete_type().clone())
            .collect()
    }

    /// One mapping per unified implementation parameter, in declaration order
    pub fn concrete_argument_mappings(&self) -> Vec<ArgumentMapping> {
        let mappings = self.find_argument_mappings();
        self.implementation_type_definition_arguments
            .iter()
            .filter_map(|argument| mappings.iter().find(|m| m.argument() == argument).cloned())
            .collect()
    }

    fn find_argument_mappings(&self) -> Vec<ArgumentMapping> {
        let service_type_mappings = ArgumentMapping::zip(
            &self.service_type_definition_arguments,
            &self.service_type_to_resolve_arguments,
        );

        let partial_mappings = ArgumentMapping::zip(
            &self.implementation_type_definition_arguments,
            &self.partial_implementation_arguments,
        )
        .into_iter()
        .filter(|mapping| !mapping.concrete_type().contains_generic_parameters());

        let mut converted = Vec::new();
        for mapping in service_type_mappings.into_iter().chain(partial_mappings) {
            let mut processed = Vec::new();
            self.convert_to_open_implementation_argument_mappings(&mapping, &mut processed, &mut converted);
        }

        self.remove_ambiguous_arguments(distinct(converted))
    }

    /// Rewrites a mapping into mappings whose arguments are the implementation's own parameters.
    ///
    /// `processed` only stops revisiting the same mapping. A parameter reached
    /// again with a different concrete type still yields a second mapping, which
    /// is what lets ambiguity removal see the conflict.
    fn convert_to_open_implementation_argument_mappings(
        &self,
        mapping: &ArgumentMapping,
        processed: &mut Vec<ArgumentMapping>,
        out: &mut Vec<ArgumentMapping>,
    ) {
        let argument = mapping.argument();
        if !argument.is_generic_argument() || processed.contains(mapping) {
            return;
        }
        processed.push(mapping.clone());

        if self.implementation_type_definition_arguments.contains(argument) {
            out.push(mapping.clone());
            self.type_constraint_argument_mappings(mapping, processed, out);
        } else if argument.is_generic_type() {
            self.convert_composite_argument_mappings(mapping, processed, out);
        }
    }

    /// `TCommand : ICommand<TResult>` mapped to `CreateOrder` also tells us what
    /// `TResult` is, through `CreateOrder`'s `ICommand<Guid>` interface.
    fn type_constraint_argument_mappings(
        &self,
        mapping: &ArgumentMapping,
        processed: &mut Vec<ArgumentMapping>,
        out: &mut Vec<ArgumentMapping>,
    ) {
        let Some(param) = mapping.argument().as_parameter() else {
            return;
        };

        for constraint in self.metadata.constraints_of(param).types {
            // Bare parameter constraints (`TIn : TOut`) relate two arguments
            // without fixing either; they are enforced when the type is constructed.
            if constraint.is_generic_parameter() {
                continue;
            }
            let constraint_mapping = ArgumentMapping::new(constraint, mapping.concrete_type().clone());
            self.convert_to_open_implementation_argument_mappings(&constraint_mapping, processed, out);
        }
    }

    /// The parameter is buried inside a composite argument such as `Nullable<T>`:
    /// find the matching shapes in the concrete type's hierarchy and unify their arguments.
    fn convert_composite_argument_mappings(
        &self,
        mapping: &ArgumentMapping,
        processed: &mut Vec<ArgumentMapping>,
        out: &mut Vec<ArgumentMapping>,
    ) {
        let Some(argument_definition) = mapping.argument().definition() else {
            return;
        };
        let arguments = mapping.argument().generic_arguments();

        for candidate in self
            .metadata
            .hierarchy_for_definition(mapping.concrete_type(), argument_definition)
        {
            let concrete_types = candidate.generic_arguments();
            if arguments.len() != concrete_types.len() {
                continue;
            }
            for nested in ArgumentMapping::zip(arguments, concrete_types) {
                self.convert_to_open_implementation_argument_mappings(&nested, processed, out);
            }
        }
    }

    fn remove_ambiguous_arguments(&self, mappings: Vec<ArgumentMapping>) -> Vec<ArgumentMapping> {
        if self.tolerate_ambiguity {
            let mut seen = HashSet::new();
            return mappings
                .into_iter()
                .filter(|mapping| seen.insert(mapping.argument().clone()))
                .collect();
        }

        let (unique, ambiguous): (Vec<_>, Vec<_>) = mappings.iter().cloned().partition(|mapping| {
            mappings
                .iter()
                .filter(|other| other.argument() == mapping.argument())
                .count()
                == 1
        });

        for mapping in &ambiguous {
            trace!(
                "Dropping ambiguous mapping {} -> {}",
                self.metadata.display(mapping.argument()),
                self.metadata.display(mapping.concrete_type())
            );
        }
        unique
    }
}

fn distinct(mappings: Vec<ArgumentMapping>) -> Vec<ArgumentMapping> {
    let mut seen = HashSet::new();
    mappings
        .into_iter()
        .filter(|mapping| seen.insert(mapping.clone()))
        .collect()
}
