//! Closing open (or partially-closed) generic implementations over a requested service type

use tracing::{debug, trace};

use crate::types::{TypeMetadataProvider, TypeRef};

use super::finder::GenericArgumentFinder;
use super::mapping::ArgumentMapping;

/// Outcome of trying to close an implementation for a service type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildResult {
    Valid(TypeRef),
    Invalid,
}

impl BuildResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, BuildResult::Valid(_))
    }

    pub fn closed_type(&self) -> Option<&TypeRef> {
        match self {
            BuildResult::Valid(ty) => Some(ty),
            BuildResult::Invalid => None,
        }
    }

    pub fn into_closed_type(self) -> Option<TypeRef> {
        match self {
            BuildResult::Valid(ty) => Some(ty),
            BuildResult::Invalid => None,
        }
    }
}

#[derive(Debug)]
struct CandidateServiceType {
    service_type: TypeRef,
    arguments: Vec<TypeRef>,
}

/// Builds the closed implementation type for a requested closed service type.
///
/// This runs for every open-generic registration against every requested
/// closed type, so every failure is reported as [`BuildResult::Invalid`]
/// rather than an error.
///
/// ```rust
/// use tessera_di::generics::GenericTypeBuilder;
/// use tessera_di::types::{TypeRef, TypeRegistry};
///
/// let mut registry = TypeRegistry::new();
/// let repo = registry.interface("IRepo", &["T"]).build();
/// let sql_repo = {
///     let b = registry.class("SqlRepo", &["T"]);
///     let t = b.param(0);
///     b.implements(TypeRef::generic(repo, [t])).build()
/// };
/// let customer = registry.class("Customer", &[]).build();
///
/// let requested = TypeRef::generic(repo, [TypeRef::named(customer)]);
/// let result = GenericTypeBuilder::new(&registry, &requested, &registry.type_of(sql_repo))
///     .build_closed_generic_implementation();
/// assert_eq!(
///     result.into_closed_type(),
///     Some(TypeRef::generic(sql_repo, [TypeRef::named(customer)]))
/// );
/// ```
pub struct GenericTypeBuilder<'a> {
    metadata: &'a dyn TypeMetadataProvider,
    closed_generic_base_type: TypeRef,
    open_generic_implementation: TypeRef,
    partial_open_generic_implementation: Option<TypeRef>,
}

impl<'a> GenericTypeBuilder<'a> {
    /// `implementation` may be non-generic, an open generic definition, or a
    /// partially-closed type such as `Repo<Guid, TValue>`.
    pub fn new(
        metadata: &'a dyn TypeMetadataProvider,
        closed_generic_base_type: &TypeRef,
        implementation: &TypeRef,
    ) -> Self {
        let partially_closed =
            implementation.contains_generic_parameters() && !implementation.is_generic_type_definition();

        let (open_generic_implementation, partial_open_generic_implementation) = match partially_closed
            .then(|| metadata.generic_type_definition(implementation))
            .flatten()
        {
            Some(definition) => (definition, Some(implementation.clone())),
            None => (implementation.clone(), None),
        };

        Self {
            metadata,
            closed_generic_base_type: closed_generic_base_type.clone(),
            open_generic_implementation,
            partial_open_generic_implementation,
        }
    }

    pub fn is_partially_closed(&self) -> bool {
        self.partial_open_generic_implementation.is_some()
    }

    pub fn build_closed_generic_implementation(&self) -> BuildResult {
        let Some(candidate) = self.find_matching_open_generic_service_type() else {
            return BuildResult::Invalid;
        };

        if !self.partial_arguments_match(&candidate.arguments) {
            trace!(
                "{} does not agree with arguments unified from {}",
                self.display_implementation(),
                self.metadata.display(&self.closed_generic_base_type)
            );
            return BuildResult::Invalid;
        }

        let Some(closed) = self.build_closed_generic_implementation_based_on(&candidate) else {
            return BuildResult::Invalid;
        };

        if !self
            .metadata
            .is_assignable_from(&self.closed_generic_base_type, &closed)
        {
            debug!(
                "Closed {} is not assignable to {}",
                self.metadata.display(&closed),
                self.metadata.display(&self.closed_generic_base_type)
            );
            return BuildResult::Invalid;
        }

        BuildResult::Valid(closed)
    }

    fn implementation_is_generic(&self) -> bool {
        self.open_generic_implementation.contains_generic_parameters()
    }

    fn implementation_arity(&self) -> usize {
        self.open_generic_implementation.generic_arguments().len()
    }

    fn display_implementation(&self) -> String {
        let implementation = self
            .partial_open_generic_implementation
            .as_ref()
            .unwrap_or(&self.open_generic_implementation);
        self.metadata.display(implementation)
    }

    /// Candidates never disagree on their arguments: they all derive from the same implementation.
    fn find_matching_open_generic_service_type(&self) -> Option<CandidateServiceType> {
        self.candidate_service_types()
            .into_iter()
            .find(|candidate| self.matches_closed_generic_base_type(candidate))
    }

    fn candidate_service_types(&self) -> Vec<CandidateServiceType> {
        let Some(target_definition) = self.closed_generic_base_type.definition() else {
            return Vec::new();
        };

        self.metadata
            .hierarchy_for_definition(&self.open_generic_implementation, target_definition)
            .into_iter()
            .map(|service_type| {
                let arguments = if self.implementation_is_generic() {
                    self.matching_generic_arguments(&service_type)
                } else {
                    Vec::new()
                };
                CandidateServiceType {
                    service_type,
                    arguments,
                }
            })
            .collect()
    }

    fn matching_generic_arguments(&self, open_candidate_service_type: &TypeRef) -> Vec<TypeRef> {
        let finder = GenericArgumentFinder::new(
            self.metadata,
            open_candidate_service_type,
            &self.closed_generic_base_type,
            &self.open_generic_implementation,
            self.partial_open_generic_implementation.as_ref(),
        );

        finder
            .concrete_argument_mappings()
            .into_iter()
            .filter(|mapping| {
                let satisfied = mapping.type_constraints_are_satisfied(self.metadata);
                if !satisfied {
                    trace!(
                        "{} can't be {}: constraint not satisfied",
                        self.metadata.display(mapping.argument()),
                        self.metadata.display(mapping.concrete_type())
                    );
                }
                satisfied
            })
            .map(|mapping| mapping.concrete_type().clone())
            .collect()
    }

    fn matches_closed_generic_base_type(&self, candidate: &CandidateServiceType) -> bool {
        if self.implementation_is_generic() {
            // Parameters without a usable mapping are left out of the arguments.
            return candidate.arguments.len() == self.implementation_arity();
        }

        // A non-generic implementation has nothing to unify: it either is the requested type or not.
        candidate.service_type == self.closed_generic_base_type
    }

    fn partial_arguments_match(&self, arguments: &[TypeRef]) -> bool {
        let Some(partial) = &self.partial_open_generic_implementation else {
            return true;
        };
        ArgumentMapping::zip(partial.generic_arguments(), arguments)
            .iter()
            .all(ArgumentMapping::concrete_type_matches_partial_argument)
    }

    fn build_closed_generic_implementation_based_on(
        &self,
        candidate: &CandidateServiceType,
    ) -> Option<TypeRef> {
        if !self.implementation_is_generic() {
            return Some(self.open_generic_implementation.clone());
        }

        let definition = self.open_generic_implementation.definition()?;
        match self.metadata.make_generic_type(definition, &candidate.arguments) {
            Ok(closed) => Some(closed),
            Err(err) => {
                // Constraints unification can't see, e.g. `TIn : TOut`.
                debug!("Rejected {}: {}", self.display_implementation(), err);
                None
            }
        }
    }

    /// Close `implementation` for `closed_abstraction`, if possible
    pub fn make_closed_implementation(
        metadata: &dyn TypeMetadataProvider,
        closed_abstraction: &TypeRef,
        implementation: &TypeRef,
    ) -> Option<TypeRef> {
        GenericTypeBuilder::new(metadata, closed_abstraction, implementation)
            .build_closed_generic_implementation()
            .into_closed_type()
    }

    /// Whether `open_implementation` can serve every closed version of
    /// `open_abstraction`, i.e. its constraints are no stricter than the abstraction's.
    pub fn is_implementation_applicable_to_every_generic_type(
        metadata: &dyn TypeMetadataProvider,
        open_abstraction: &TypeRef,
        open_implementation: &TypeRef,
    ) -> bool {
        GenericTypeBuilder::new(metadata, open_abstraction, open_implementation)
            .build_closed_generic_implementation()
            .is_valid()
    }
}

/// Whether `implementation` implements `service`. An open generic service only
/// needs to show up, by definition, somewhere in the implementation's hierarchy.
pub fn service_is_assignable_from_implementation(
    metadata: &dyn TypeMetadataProvider,
    service: &TypeRef,
    implementation: &TypeRef,
) -> bool {
    if !service.contains_generic_parameters() {
        return metadata.is_assignable_from(service, implementation)
            || GenericTypeBuilder::make_closed_implementation(metadata, service, implementation).is_some();
    }

    let Some(service_definition) = service.definition() else {
        return false;
    };
    !metadata
        .hierarchy_for_definition(implementation, service_definition)
        .is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DefId, TypeRegistry, WellKnown};

    struct Fixture {
        registry: TypeRegistry,
        wk: WellKnown,
        repo: DefId,
        customer: DefId,
    }

    fn fixture() -> Fixture {
        let mut registry = TypeRegistry::new();
        let wk = registry.well_known();
        let repo = registry.interface("IRepo", &["T"]).build();
        let customer = registry.class("Customer", &[]).build();
        Fixture {
            registry,
            wk,
            repo,
            customer,
        }
    }

    fn build(registry: &TypeRegistry, service: &TypeRef, implementation: &TypeRef) -> BuildResult {
        GenericTypeBuilder::new(registry, service, implementation).build_closed_generic_implementation()
    }

    #[test]
    fn test_struct_constraint_rejects_reference_type() {
        let mut f = fixture();
        let struct_repo = {
            let b = f.registry.class("StructRepo", &["T"]).value_type_constraint(0);
            let t = b.param(0);
            b.implements(TypeRef::generic(f.repo, [t])).build()
        };
        let open = f.registry.type_of(struct_repo);

        let for_customer = TypeRef::generic(f.repo, [TypeRef::named(f.customer)]);
        assert_eq!(build(&f.registry, &for_customer, &open), BuildResult::Invalid);

        let for_int = TypeRef::generic(f.repo, [TypeRef::named(f.wk.int32)]);
        assert!(build(&f.registry, &for_int, &open).is_valid());
    }

    #[test]
    fn test_non_generic_implementation_requires_exact_service() {
        let mut f = fixture();
        let customer_repo = f
            .registry
            .class("CustomerRepo", &[])
            .implements(TypeRef::generic(f.repo, [TypeRef::named(f.customer)]))
            .build();
        let implementation = TypeRef::named(customer_repo);

        let for_customer = TypeRef::generic(f.repo, [TypeRef::named(f.customer)]);
        assert_eq!(
            build(&f.registry, &for_customer, &implementation),
            BuildResult::Valid(implementation.clone())
        );

        let for_int = TypeRef::generic(f.repo, [TypeRef::named(f.wk.int32)]);
        assert_eq!(build(&f.registry, &for_int, &implementation), BuildResult::Invalid);
    }

    #[test]
    fn test_cross_parameter_constraint_failure_is_no_match() {
        let mut f = fixture();
        let animal = f.registry.class("Animal", &[]).build();
        let cat = f.registry.class("Cat", &[]).extends(TypeRef::named(animal)).build();
        let converter = f.registry.interface("IConverter", &["TIn", "TOut"]).build();
        let upcast = {
            let b = f.registry.class("Upcast", &["TIn", "TOut"]);
            let (t_in, t_out) = (b.param(0), b.param(1));
            b.type_constraint(0, t_out.clone())
                .implements(TypeRef::generic(converter, [t_in, t_out]))
                .build()
        };
        let open = f.registry.type_of(upcast);

        let valid = TypeRef::generic(converter, [TypeRef::named(cat), TypeRef::named(animal)]);
        assert_eq!(
            build(&f.registry, &valid, &open),
            BuildResult::Valid(TypeRef::generic(upcast, [TypeRef::named(cat), TypeRef::named(animal)]))
        );

        let invalid = TypeRef::generic(converter, [TypeRef::named(animal), TypeRef::named(cat)]);
        assert_eq!(build(&f.registry, &invalid, &open), BuildResult::Invalid);
    }

    #[test]
    fn test_applicability_to_every_generic_type() {
        let mut f = fixture();
        let sql_repo = {
            let b = f.registry.class("SqlRepo", &["T"]);
            let t = b.param(0);
            b.implements(TypeRef::generic(f.repo, [t])).build()
        };
        let class_repo = {
            let b = f.registry.class("ClassRepo", &["T"]).reference_type_constraint(0);
            let t = b.param(0);
            b.implements(TypeRef::generic(f.repo, [t])).build()
        };
        let open_service = f.registry.type_of(f.repo);

        assert!(GenericTypeBuilder::is_implementation_applicable_to_every_generic_type(
            &f.registry,
            &open_service,
            &f.registry.type_of(sql_repo)
        ));
        assert!(!GenericTypeBuilder::is_implementation_applicable_to_every_generic_type(
            &f.registry,
            &open_service,
            &f.registry.type_of(class_repo)
        ));
    }

    #[test]
    fn test_service_is_assignable_from_open_implementation() {
        let mut f = fixture();
        let sql_repo = {
            let b = f.registry.class("SqlRepo", &["T"]);
            let t = b.param(0);
            b.implements(TypeRef::generic(f.repo, [t])).build()
        };
        let unrelated = f.registry.class("Unrelated", &["T"]).build();

        let open_service = f.registry.type_of(f.repo);
        assert!(service_is_assignable_from_implementation(
            &f.registry,
            &open_service,
            &f.registry.type_of(sql_repo)
        ));
        assert!(!service_is_assignable_from_implementation(
            &f.registry,
            &open_service,
            &f.registry.type_of(unrelated)
        ));

        let closed_service = TypeRef::generic(f.repo, [TypeRef::named(f.customer)]);
        assert!(service_is_assignable_from_implementation(
            &f.registry,
            &closed_service,
            &f.registry.type_of(sql_repo)
        ));
    }
}
