//! Argument mappings: hypothesised bindings of a generic argument to a concrete type

use crate::types::{TypeMetadataProvider, TypeRef};

use super::constraints::TypeConstraintValidator;

/// Pairs a generic argument (a parameter, or a type still containing
/// parameters) with the concrete type it is hypothesised to resolve to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArgumentMapping {
    argument: TypeRef,
    concrete_type: TypeRef,
}

impl ArgumentMapping {
    pub fn new(argument: TypeRef, concrete_type: TypeRef) -> Self {
        Self {
            argument,
            concrete_type,
        }
    }

    pub fn argument(&self) -> &TypeRef {
        &self.argument
    }

    pub fn concrete_type(&self) -> &TypeRef {
        &self.concrete_type
    }

    /// Positional pairing of two argument lists
    pub fn zip(arguments: &[TypeRef], concrete_types: &[TypeRef]) -> Vec<ArgumentMapping> {
        arguments
            .iter()
            .zip(concrete_types)
            .map(|(argument, concrete)| ArgumentMapping::new(argument.clone(), concrete.clone()))
            .collect()
    }

    pub fn type_constraints_are_satisfied(&self, metadata: &dyn TypeMetadataProvider) -> bool {
        TypeConstraintValidator::new(metadata, self).are_type_constraints_satisfied()
    }

    /// Whether an already filled-in argument of a partially-closed type agrees
    /// with the concrete type found by unification. Parameters match anything;
    /// composite arguments must have the same definition and matching arguments.
    pub fn concrete_type_matches_partial_argument(&self) -> bool {
        if self.argument.is_generic_parameter() || self.argument == self.concrete_type {
            return true;
        }

        if !self.argument.is_generic_type()
            || !self.concrete_type.is_generic_type()
            || !self.argument.has_same_definition(&self.concrete_type)
        {
            return false;
        }

        ArgumentMapping::zip(
            self.argument.generic_arguments(),
            self.concrete_type.generic_arguments(),
        )
        .iter()
        .all(ArgumentMapping::concrete_type_matches_partial_argument)
    }
}
