//! In-memory type registry used as the metadata oracle

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use super::{
    Constructor, ConstructorParameter, DefId, GenericParam, ParamConstraints, ParamDecl, TypeDef,
    TypeKind, TypeMetadataProvider, TypeRef,
};

/// Definitions every registry starts with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WellKnown {
    pub object: DefId,
    pub string: DefId,
    pub int32: DefId,
    pub boolean: DefId,
    pub guid: DefId,
    /// `Nullable<T> where T : struct`
    pub nullable: DefId,
    /// `IEnumerable<T>`
    pub enumerable: DefId,
    /// `Func<T>`, the zero-argument factory form
    pub func: DefId,
}

/// A registry of type definitions.
///
/// ```rust
/// use tessera_di::types::{TypeRef, TypeRegistry};
///
/// let mut registry = TypeRegistry::new();
/// let repo = registry.interface("IRepo", &["T"]).build();
/// let sql_repo = {
///     let builder = registry.class("SqlRepo", &["T"]);
///     let t = builder.param(0);
///     builder.implements(TypeRef::generic(repo, [t])).build()
/// };
/// assert_eq!(registry.lookup("SqlRepo"), Some(sql_repo));
/// ```
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    defs: Vec<TypeDef>,
    by_name: HashMap<String, DefId>,
    well_known: WellKnown,
}

impl TypeRegistry {
    /// Create a registry containing the well-known definitions
    pub fn new() -> Self {
        let placeholder = DefId(0);
        let mut registry = Self {
            defs: Vec::new(),
            by_name: HashMap::new(),
            well_known: WellKnown {
                object: placeholder,
                string: placeholder,
                int32: placeholder,
                boolean: placeholder,
                guid: placeholder,
                nullable: placeholder,
                enumerable: placeholder,
                func: placeholder,
            },
        };

        let object = registry.class("Object", &[]).build();
        let string = registry
            .class("String", &[])
            .without_default_constructor()
            .build();
        let int32 = registry.value_type("Int32", &[]).build();
        let boolean = registry.value_type("Boolean", &[]).build();
        let guid = registry.value_type("Guid", &[]).build();
        let nullable = registry
            .value_type("Nullable", &["T"])
            .value_type_constraint(0)
            .build();
        let enumerable = registry.interface("IEnumerable", &["T"]).build();
        let func = registry.class("Func", &["TResult"]).abstract_type().build();

        registry.well_known = WellKnown {
            object,
            string,
            int32,
            boolean,
            guid,
            nullable,
            enumerable,
            func,
        };
        registry
    }

    /// Start defining a class
    pub fn class(&mut self, name: &str, params: &[&str]) -> TypeDefBuilder<'_> {
        TypeDefBuilder::new(self, name, TypeKind::Class, params)
    }

    /// Start defining an interface
    pub fn interface(&mut self, name: &str, params: &[&str]) -> TypeDefBuilder<'_> {
        TypeDefBuilder::new(self, name, TypeKind::Interface, params)
    }

    /// Start defining a value type
    pub fn value_type(&mut self, name: &str, params: &[&str]) -> TypeDefBuilder<'_> {
        TypeDefBuilder::new(self, name, TypeKind::Struct, params)
    }

    pub fn get(&self, def: DefId) -> Option<&TypeDef> {
        self.defs.get(def.index())
    }

    /// Find the most recently defined type with this name
    pub fn lookup(&self, name: &str) -> Option<DefId> {
        self.by_name.get(name).copied()
    }

    /// The type a definition denotes: its generic type definition when it has
    /// parameters, the plain type otherwise.
    pub fn type_of(&self, def: DefId) -> TypeRef {
        self.get(def)
            .map(TypeDef::definition_type)
            .unwrap_or_else(|| TypeRef::named(def))
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    fn next_id(&self) -> DefId {
        DefId(self.defs.len() as u32)
    }

    fn insert(&mut self, def: TypeDef) -> DefId {
        let id = def.id;
        trace!("Defined type {} ({:?})", def.name, id);
        self.by_name.insert(def.name.clone(), id);
        self.defs.push(def);
        id
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeMetadataProvider for TypeRegistry {
    fn definition(&self, def: DefId) -> Option<&TypeDef> {
        self.get(def)
    }

    fn find_definition(&self, name: &str) -> Option<DefId> {
        self.lookup(name)
    }

    fn well_known(&self) -> WellKnown {
        self.well_known
    }
}

/// Builder for a single type definition
pub struct TypeDefBuilder<'r> {
    registry: &'r mut TypeRegistry,
    def: TypeDef,
    implicit_default_constructor: bool,
}

impl<'r> TypeDefBuilder<'r> {
    fn new(registry: &'r mut TypeRegistry, name: &str, kind: TypeKind, params: &[&str]) -> Self {
        let id = registry.next_id();
        let def = TypeDef {
            id,
            name: name.to_string(),
            kind,
            params: params
                .iter()
                .map(|p| ParamDecl {
                    name: Arc::from(*p),
                    constraints: ParamConstraints::default(),
                })
                .collect(),
            base: None,
            interfaces: Vec::new(),
            constructors: Vec::new(),
            properties: Vec::new(),
            is_abstract: false,
        };
        Self {
            registry,
            def,
            implicit_default_constructor: kind != TypeKind::Interface,
        }
    }

    /// Id the definition will have once built
    pub fn id(&self) -> DefId {
        self.def.id
    }

    /// One of the definition's own generic parameters
    pub fn param(&self, position: usize) -> TypeRef {
        let name = self
            .def
            .params
            .get(position)
            .map(|decl| decl.name.clone())
            .unwrap_or_else(|| Arc::from(format!("T{position}")));
        TypeRef::Parameter(GenericParam::new(self.def.id, position, name))
    }

    /// The definition's own type (`Name<T, ...>` for generic definitions)
    pub fn self_type(&self) -> TypeRef {
        self.def.definition_type()
    }

    pub fn extends(mut self, base: TypeRef) -> Self {
        self.def.base = Some(base);
        self
    }

    pub fn implements(mut self, interface: TypeRef) -> Self {
        self.def.interfaces.push(interface);
        self
    }

    /// Declare a public constructor
    pub fn constructor<I, S>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = (S, TypeRef)>,
        S: Into<String>,
    {
        self.def.constructors.push(Constructor {
            parameters: parameters
                .into_iter()
                .map(|(name, ty)| ConstructorParameter {
                    name: name.into(),
                    ty,
                })
                .collect(),
        });
        self
    }

    pub fn property(mut self, name: &str) -> Self {
        self.def.properties.push(name.to_string());
        self
    }

    pub fn abstract_type(mut self) -> Self {
        self.def.is_abstract = true;
        self
    }

    /// No implicit public parameterless constructor
    pub fn without_default_constructor(mut self) -> Self {
        self.implicit_default_constructor = false;
        self
    }

    /// `where T : class`
    pub fn reference_type_constraint(mut self, position: usize) -> Self {
        if let Some(decl) = self.def.params.get_mut(position) {
            decl.constraints.reference_type = true;
        }
        self
    }

    /// `where T : struct`
    pub fn value_type_constraint(mut self, position: usize) -> Self {
        if let Some(decl) = self.def.params.get_mut(position) {
            decl.constraints.not_nullable_value_type = true;
        }
        self
    }

    /// `where T : new()`
    pub fn default_constructor_constraint(mut self, position: usize) -> Self {
        if let Some(decl) = self.def.params.get_mut(position) {
            decl.constraints.default_constructor = true;
        }
        self
    }

    /// `where T : SomeType`; the constraint may mention the definition's parameters
    pub fn type_constraint(mut self, position: usize, constraint: TypeRef) -> Self {
        if let Some(decl) = self.def.params.get_mut(position) {
            decl.constraints.types.push(constraint);
        }
        self
    }

    pub fn build(mut self) -> DefId {
        let constructible = self.def.kind != TypeKind::Interface && !self.def.is_abstract;
        if self.def.constructors.is_empty() && self.implicit_default_constructor && constructible {
            self.def.constructors.push(Constructor::default());
        }
        self.registry.insert(self.def)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known_definitions() {
        let registry = TypeRegistry::new();
        let wk = registry.well_known();
        assert_eq!(registry.lookup("Nullable"), Some(wk.nullable));
        assert!(registry.is_value_type(&TypeRef::named(wk.int32)));
        assert!(!registry.is_value_type(&TypeRef::named(wk.string)));
        assert!(!registry.has_default_constructor(&TypeRef::named(wk.string)));
        assert_eq!(registry.type_of(wk.nullable).generic_arguments().len(), 1);
    }

    #[test]
    fn test_builder_adds_implicit_constructor() {
        let mut registry = TypeRegistry::new();
        let plain = registry.class("Plain", &[]).build();
        let iface = registry.interface("IThing", &[]).build();
        let base = registry.class("Base", &[]).abstract_type().build();

        assert_eq!(registry.constructors_of(&TypeRef::named(plain)).len(), 1);
        assert!(registry.constructors_of(&TypeRef::named(iface)).is_empty());
        assert!(registry.constructors_of(&TypeRef::named(base)).is_empty());
    }

    #[test]
    fn test_display_renders_arguments() {
        let mut registry = TypeRegistry::new();
        let wk = registry.well_known();
        let map = registry.interface("IMap", &["TKey", "TValue"]).build();
        let open = registry.type_of(map);
        let closed = TypeRef::generic(map, [TypeRef::named(wk.guid), TypeRef::named(wk.string)]);

        assert_eq!(registry.display(&open), "IMap<TKey, TValue>");
        assert_eq!(registry.display(&closed), "IMap<Guid, String>");
    }
}
