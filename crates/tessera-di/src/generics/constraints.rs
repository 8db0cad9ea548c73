//! Validation of a single argument mapping against the argument's declared constraints

use crate::types::{ParamConstraints, TypeMetadataProvider, TypeRef};

use super::mapping::ArgumentMapping;

/// Decides whether the concrete type of a mapping satisfies the constraints
/// declared on the mapping's argument.
///
/// Failing a constraint is routine during type search, so the result is a
/// plain `bool`. Only generic parameters carry constraints; any other argument
/// is trivially satisfied.
pub struct TypeConstraintValidator<'a> {
    metadata: &'a dyn TypeMetadataProvider,
    mapping: &'a ArgumentMapping,
    constraints: ParamConstraints,
}

impl<'a> TypeConstraintValidator<'a> {
    pub fn new(metadata: &'a dyn TypeMetadataProvider, mapping: &'a ArgumentMapping) -> Self {
        let constraints = mapping
            .argument()
            .as_parameter()
            .map(|param| metadata.constraints_of(param))
            .unwrap_or_default();
        Self {
            metadata,
            mapping,
            constraints,
        }
    }

    pub fn are_type_constraints_satisfied(&self) -> bool {
        self.satisfies_not_nullable_value_type_constraint()
            && self.satisfies_default_constructor_constraint()
            && self.satisfies_reference_type_constraint()
            && self.satisfies_generic_parameter_constraints()
    }

    fn concrete_type(&self) -> &TypeRef {
        self.mapping.concrete_type()
    }

    fn satisfies_not_nullable_value_type_constraint(&self) -> bool {
        if !self.constraints.not_nullable_value_type {
            return true;
        }
        self.metadata.is_value_type(self.concrete_type()) && !self.metadata.is_nullable(self.concrete_type())
    }

    fn satisfies_default_constructor_constraint(&self) -> bool {
        if !self.constraints.default_constructor {
            return true;
        }
        self.metadata.is_value_type(self.concrete_type())
            || self.metadata.has_default_constructor(self.concrete_type())
    }

    fn satisfies_reference_type_constraint(&self) -> bool {
        !self.constraints.reference_type || !self.metadata.is_value_type(self.concrete_type())
    }

    fn satisfies_generic_parameter_constraints(&self) -> bool {
        self.constraints
            .types
            .iter()
            .all(|constraint| self.might_be_compatible_with_type_constraint(constraint))
    }

    fn might_be_compatible_with_type_constraint(&self, constraint: &TypeRef) -> bool {
        if self.metadata.is_assignable_from(constraint, self.concrete_type()) {
            return true;
        }

        if !constraint.contains_generic_parameters() {
            return false;
        }

        // Another parameter of the same definition; its own mapping is checked separately.
        if constraint.is_generic_parameter() {
            return true;
        }

        // `T : IComparable<T>` with `Int32`: the definition has to show up somewhere in
        // the concrete type's hierarchy, the arguments are unified elsewhere.
        let Some(constraint_definition) = constraint.definition() else {
            return false;
        };
        self.metadata
            .type_hierarchy(self.concrete_type())
            .iter()
            .any(|t| t.is_generic_type() && t.definition() == Some(constraint_definition))
    }
}
