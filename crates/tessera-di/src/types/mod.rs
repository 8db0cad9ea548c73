//! Synthetic type system the container resolves against.
//!
//! Types are plain values: a [`TypeRef`] is either a generic parameter or a
//! named definition applied to zero or more arguments. Everything that needs
//! to know what a definition *looks like* (its base type, interfaces,
//! constraints, constructors) goes through [`TypeMetadataProvider`], which
//! [`TypeRegistry`] implements.

mod metadata;
mod registry;

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use metadata::TypeMetadataProvider;
pub use registry::{TypeDefBuilder, TypeRegistry, WellKnown};

/// Index of a type definition inside a type registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefId(pub(crate) u32);

impl DefId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A generic type parameter declared by a type definition.
///
/// Two parameters are the same parameter when they have the same owner and
/// position; the name is only used for display.
#[derive(Debug, Clone)]
pub struct GenericParam {
    owner: DefId,
    position: usize,
    name: Arc<str>,
}

impl GenericParam {
    pub(crate) fn new(owner: DefId, position: usize, name: Arc<str>) -> Self {
        Self {
            owner,
            position,
            name,
        }
    }

    /// The definition that declares this parameter
    pub fn owner(&self) -> DefId {
        self.owner
    }

    /// Position in the owner's parameter list
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for GenericParam {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.position == other.position
    }
}

impl Eq for GenericParam {}

impl Hash for GenericParam {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.owner.hash(state);
        self.position.hash(state);
    }
}

/// Reference to a type: a generic parameter, or a definition applied to arguments.
///
/// `Named { def, args }` covers every shape the resolution engine cares about:
/// - non-generic types have no arguments,
/// - generic type definitions have exactly their own parameters as arguments,
/// - partially-closed types mix concrete arguments with the definition's parameters,
/// - closed types contain no parameters at all.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Parameter(GenericParam),
    Named { def: DefId, args: Vec<TypeRef> },
}

impl TypeRef {
    /// A non-generic type
    pub fn named(def: DefId) -> Self {
        TypeRef::Named {
            def,
            args: Vec::new(),
        }
    }

    /// A generic definition applied to the given arguments (unchecked)
    pub fn generic(def: DefId, args: impl IntoIterator<Item = TypeRef>) -> Self {
        TypeRef::Named {
            def,
            args: args.into_iter().collect(),
        }
    }

    pub fn definition(&self) -> Option<DefId> {
        match self {
            TypeRef::Named { def, .. } => Some(*def),
            TypeRef::Parameter(_) => None,
        }
    }

    pub fn generic_arguments(&self) -> &[TypeRef] {
        match self {
            TypeRef::Named { args, .. } => args,
            TypeRef::Parameter(_) => &[],
        }
    }

    pub fn as_parameter(&self) -> Option<&GenericParam> {
        match self {
            TypeRef::Parameter(param) => Some(param),
            TypeRef::Named { .. } => None,
        }
    }

    pub fn is_generic_parameter(&self) -> bool {
        matches!(self, TypeRef::Parameter(_))
    }

    /// True for any named type that has type arguments (open, partial or closed)
    pub fn is_generic_type(&self) -> bool {
        matches!(self, TypeRef::Named { args, .. } if !args.is_empty())
    }

    /// True when the arguments are exactly the definition's own parameters, in order
    pub fn is_generic_type_definition(&self) -> bool {
        match self {
            TypeRef::Named { def, args } if !args.is_empty() => {
                args.iter().enumerate().all(|(position, arg)| {
                    matches!(arg, TypeRef::Parameter(p) if p.owner == *def && p.position == position)
                })
            }
            _ => false,
        }
    }

    pub fn contains_generic_parameters(&self) -> bool {
        match self {
            TypeRef::Parameter(_) => true,
            TypeRef::Named { args, .. } => args.iter().any(TypeRef::contains_generic_parameters),
        }
    }

    /// A parameter, or a composite type that still has a parameter somewhere inside
    pub fn is_generic_argument(&self) -> bool {
        self.contains_generic_parameters()
    }

    /// Both are named types built from the same definition
    pub fn has_same_definition(&self, other: &TypeRef) -> bool {
        match (self.definition(), other.definition()) {
            (Some(left), Some(right)) => left == right,
            _ => false,
        }
    }

    /// Replaces the parameters declared by `owner` with the given arguments.
    pub fn substitute(&self, owner: DefId, args: &[TypeRef]) -> TypeRef {
        match self {
            TypeRef::Parameter(param) if param.owner == owner => args
                .get(param.position)
                .cloned()
                .unwrap_or_else(|| self.clone()),
            TypeRef::Parameter(_) => self.clone(),
            TypeRef::Named { def, args: inner } => TypeRef::Named {
                def: *def,
                args: inner.iter().map(|arg| arg.substitute(owner, args)).collect(),
            },
        }
    }
}

/// Kind of a type definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeKind {
    Class,
    Interface,
    Struct,
}

/// Constraints declared on a generic parameter.
///
/// Constraint types are expressed in terms of the owner's own parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamConstraints {
    pub reference_type: bool,
    pub not_nullable_value_type: bool,
    pub default_constructor: bool,
    pub types: Vec<TypeRef>,
}

impl ParamConstraints {
    pub fn is_empty(&self) -> bool {
        !self.reference_type
            && !self.not_nullable_value_type
            && !self.default_constructor
            && self.types.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: Arc<str>,
    pub constraints: ParamConstraints,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructorParameter {
    pub name: String,
    pub ty: TypeRef,
}

/// A public constructor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Constructor {
    pub parameters: Vec<ConstructorParameter>,
}

impl Constructor {
    pub(crate) fn substitute(&self, owner: DefId, args: &[TypeRef]) -> Constructor {
        Constructor {
            parameters: self
                .parameters
                .iter()
                .map(|p| ConstructorParameter {
                    name: p.name.clone(),
                    ty: p.ty.substitute(owner, args),
                })
                .collect(),
        }
    }
}

/// A type definition: everything the metadata oracle knows about a type
#[derive(Debug, Clone)]
pub struct TypeDef {
    pub(crate) id: DefId,
    pub(crate) name: String,
    pub(crate) kind: TypeKind,
    pub(crate) params: Vec<ParamDecl>,
    pub(crate) base: Option<TypeRef>,
    pub(crate) interfaces: Vec<TypeRef>,
    pub(crate) constructors: Vec<Constructor>,
    pub(crate) properties: Vec<String>,
    pub(crate) is_abstract: bool,
}

impl TypeDef {
    pub fn id(&self) -> DefId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn params(&self) -> &[ParamDecl] {
        &self.params
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn base(&self) -> Option<&TypeRef> {
        self.base.as_ref()
    }

    pub fn interfaces(&self) -> &[TypeRef] {
        &self.interfaces
    }

    pub fn constructors(&self) -> &[Constructor] {
        &self.constructors
    }

    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// The definition's own parameters as types
    pub fn parameter_types(&self) -> Vec<TypeRef> {
        self.params
            .iter()
            .enumerate()
            .map(|(position, decl)| {
                TypeRef::Parameter(GenericParam::new(self.id, position, decl.name.clone()))
            })
            .collect()
    }

    /// `Name<T1, T2>` for generic definitions, `Name` otherwise
    pub fn definition_type(&self) -> TypeRef {
        TypeRef::generic(self.id, self.parameter_types())
    }
}
