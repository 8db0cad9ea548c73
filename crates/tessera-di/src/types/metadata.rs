//! The metadata oracle consumed by the resolution engine

use crate::error::{DIError, DIResult};

use super::{Constructor, DefId, GenericParam, ParamConstraints, TypeDef, TypeKind, TypeRef, WellKnown};

/// Pure, side-effect free queries over type metadata.
///
/// Implementors only supply the definition lookup; every structural query
/// (hierarchies, assignability, constraint checks on construction) is derived
/// from the definitions, so the matching engine can run against any synthetic
/// type graph.
pub trait TypeMetadataProvider: Send + Sync {
    fn definition(&self, def: DefId) -> Option<&TypeDef>;

    fn find_definition(&self, name: &str) -> Option<DefId>;

    fn well_known(&self) -> WellKnown;

    /// Human readable rendering, e.g. `IRepo<Customer>`
    fn display(&self, ty: &TypeRef) -> String {
        match ty {
            TypeRef::Parameter(param) => param.name().to_string(),
            TypeRef::Named { def, args } => {
                let name = self
                    .definition(*def)
                    .map(|d| d.name().to_string())
                    .unwrap_or_else(|| format!("#{}", def.index()));
                if args.is_empty() {
                    name
                } else {
                    let args: Vec<String> = args.iter().map(|a| self.display(a)).collect();
                    format!("{}<{}>", name, args.join(", "))
                }
            }
        }
    }

    /// The open definition type of `ty` (`Repo<TKey, TValue>` for `Repo<Guid, String>`)
    fn generic_type_definition(&self, ty: &TypeRef) -> Option<TypeRef> {
        let def = ty.definition()?;
        self.definition(def).map(TypeDef::definition_type)
    }

    fn generic_parameters(&self, def: DefId) -> Vec<TypeRef> {
        self.definition(def)
            .map(TypeDef::parameter_types)
            .unwrap_or_default()
    }

    fn constraints_of(&self, param: &GenericParam) -> ParamConstraints {
        self.definition(param.owner())
            .and_then(|d| d.params().get(param.position()))
            .map(|decl| decl.constraints.clone())
            .unwrap_or_default()
    }

    /// The type itself, its base types, and every interface it implements,
    /// with the arguments of `ty` substituted. Non-interface types end in `Object`.
    fn type_hierarchy(&self, ty: &TypeRef) -> Vec<TypeRef> {
        let mut hierarchy = Vec::new();
        collect_hierarchy(self, ty, &mut hierarchy);
        if !self.is_interface(ty) {
            let object = TypeRef::named(self.well_known().object);
            if !hierarchy.contains(&object) {
                hierarchy.push(object);
            }
        }
        hierarchy
    }

    /// Members of the hierarchy of `ty` built from `def`
    fn hierarchy_for_definition(&self, ty: &TypeRef, def: DefId) -> Vec<TypeRef> {
        self.type_hierarchy(ty)
            .into_iter()
            .filter(|t| t.definition() == Some(def))
            .collect()
    }

    fn is_interface(&self, ty: &TypeRef) -> bool {
        self.kind_of(ty) == Some(TypeKind::Interface)
    }

    fn kind_of(&self, ty: &TypeRef) -> Option<TypeKind> {
        ty.definition()
            .and_then(|def| self.definition(def))
            .map(TypeDef::kind)
    }

    /// A generic parameter counts as a value type when it carries the `struct` constraint
    fn is_value_type(&self, ty: &TypeRef) -> bool {
        match ty {
            TypeRef::Parameter(param) => self.constraints_of(param).not_nullable_value_type,
            TypeRef::Named { .. } => self.kind_of(ty) == Some(TypeKind::Struct),
        }
    }

    fn is_nullable(&self, ty: &TypeRef) -> bool {
        ty.definition() == Some(self.well_known().nullable)
    }

    /// Non-abstract class or struct
    fn is_concrete(&self, ty: &TypeRef) -> bool {
        match ty.definition().and_then(|def| self.definition(def)) {
            Some(def) => def.kind() != TypeKind::Interface && !def.is_abstract(),
            None => false,
        }
    }

    fn has_default_constructor(&self, ty: &TypeRef) -> bool {
        match ty {
            TypeRef::Parameter(param) => {
                let constraints = self.constraints_of(param);
                constraints.default_constructor || constraints.not_nullable_value_type
            }
            TypeRef::Named { .. } => {
                if self.is_value_type(ty) {
                    return true;
                }
                self.is_concrete(ty)
                    && self
                        .constructors_of(ty)
                        .iter()
                        .any(|ctor| ctor.parameters.is_empty())
            }
        }
    }

    /// True when a value of `source` can be used where `target` is expected
    fn is_assignable_from(&self, target: &TypeRef, source: &TypeRef) -> bool {
        if target == source || target.definition() == Some(self.well_known().object) {
            return true;
        }
        self.type_hierarchy(source).contains(target)
    }

    /// Public constructors with the arguments of `ty` substituted
    fn constructors_of(&self, ty: &TypeRef) -> Vec<Constructor> {
        match ty {
            TypeRef::Named { def, args } => self
                .definition(*def)
                .map(|d| {
                    d.constructors()
                        .iter()
                        .map(|ctor| ctor.substitute(*def, args))
                        .collect()
                })
                .unwrap_or_default(),
            TypeRef::Parameter(_) => Vec::new(),
        }
    }

    fn properties_of(&self, ty: &TypeRef) -> Vec<String> {
        ty.definition()
            .and_then(|def| self.definition(def))
            .map(|d| d.properties().to_vec())
            .unwrap_or_default()
    }

    /// Close a generic definition over `args`, validating every constraint.
    ///
    /// Constraint types are checked after substitution, so cross-parameter
    /// constraints such as `TIn : TOut` are enforced here even though the
    /// unification engine can't see them.
    fn make_generic_type(&self, def: DefId, args: &[TypeRef]) -> DIResult<TypeRef> {
        let definition = self.definition(def).ok_or_else(|| DIError::UnknownType {
            message: format!("no definition with id {}", def.index()),
        })?;

        if definition.arity() == 0 || definition.arity() != args.len() {
            return Err(DIError::InvalidServiceType {
                message: format!(
                    "{} expects {} type argument(s), got {}",
                    definition.name(),
                    definition.arity(),
                    args.len()
                ),
            });
        }

        let closed = TypeRef::generic(def, args.iter().cloned());
        for (decl, arg) in definition.params().iter().zip(args) {
            let constraints = &decl.constraints;
            let violation = |message: String| DIError::ConstraintViolation {
                type_name: self.display(&closed),
                message,
            };

            if constraints.not_nullable_value_type && (!self.is_value_type(arg) || self.is_nullable(arg)) {
                return Err(violation(format!(
                    "{} for {} must be a non-nullable value type",
                    self.display(arg),
                    decl.name
                )));
            }
            if constraints.reference_type && !satisfies_reference_type(self, arg) {
                return Err(violation(format!(
                    "{} for {} must be a reference type",
                    self.display(arg),
                    decl.name
                )));
            }
            if constraints.default_constructor && !self.has_default_constructor(arg) {
                return Err(violation(format!(
                    "{} for {} must have a public parameterless constructor",
                    self.display(arg),
                    decl.name
                )));
            }
            for constraint in &constraints.types {
                let expected = constraint.substitute(def, args);
                if !self.is_assignable_from(&expected, arg) {
                    return Err(violation(format!(
                        "{} for {} must be assignable to {}",
                        self.display(arg),
                        decl.name,
                        self.display(&expected)
                    )));
                }
            }
        }

        Ok(closed)
    }

    fn enumerable_of(&self, element: &TypeRef) -> TypeRef {
        TypeRef::generic(self.well_known().enumerable, [element.clone()])
    }

    /// `T` for `IEnumerable<T>`
    fn element_of_enumerable(&self, ty: &TypeRef) -> Option<TypeRef> {
        single_argument_of(ty, self.well_known().enumerable)
    }

    fn factory_of(&self, result: &TypeRef) -> TypeRef {
        TypeRef::generic(self.well_known().func, [result.clone()])
    }

    /// `T` for `Func<T>`
    fn result_of_factory(&self, ty: &TypeRef) -> Option<TypeRef> {
        single_argument_of(ty, self.well_known().func)
    }
}

fn single_argument_of(ty: &TypeRef, def: DefId) -> Option<TypeRef> {
    match ty {
        TypeRef::Named { def: d, args } if *d == def && args.len() == 1 => Some(args[0].clone()),
        _ => None,
    }
}

fn collect_hierarchy<M>(meta: &M, ty: &TypeRef, out: &mut Vec<TypeRef>)
where
    M: TypeMetadataProvider + ?Sized,
{
    if out.contains(ty) {
        return;
    }
    out.push(ty.clone());

    match ty {
        TypeRef::Parameter(param) => {
            for constraint in meta.constraints_of(param).types {
                collect_hierarchy(meta, &constraint, out);
            }
        }
        TypeRef::Named { def, args } => {
            let Some(definition) = meta.definition(*def) else {
                return;
            };
            if let Some(base) = definition.base() {
                collect_hierarchy(meta, &base.substitute(*def, args), out);
            }
            for interface in definition.interfaces() {
                collect_hierarchy(meta, &interface.substitute(*def, args), out);
            }
        }
    }
}

/// Parameters only qualify when they are themselves constrained to reference types
fn satisfies_reference_type<M>(meta: &M, ty: &TypeRef) -> bool
where
    M: TypeMetadataProvider + ?Sized,
{
    match ty {
        TypeRef::Parameter(param) => {
            let constraints = meta.constraints_of(param);
            constraints.reference_type
                || constraints
                    .types
                    .iter()
                    .any(|t| meta.kind_of(t) == Some(TypeKind::Class))
        }
        TypeRef::Named { .. } => !meta.is_value_type(ty),
    }
}
