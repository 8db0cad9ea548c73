//! Dependency injection container with open-generic resolution and decorators
//!
//! The container resolves services against a synthetic type system: types are
//! [`TypeRef`] values described by a [`TypeMetadataProvider`] (usually a
//! [`TypeRegistry`]). On top of plain registrations it can close open generic
//! implementations over requested service types, respecting generic
//! constraints and partially-closed registrations, and wrap build plans in
//! decorators.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use tessera_di::types::{TypeRef, TypeRegistry};
//! use tessera_di::{Container, Lifestyle};
//!
//! let mut types = TypeRegistry::new();
//! let customer = types.class("Customer", &[]).build();
//! let repo = types.interface("IRepo", &["T"]).build();
//! let sql_repo = {
//!     let class = types.class("SqlRepo", &["T"]);
//!     let t = class.param(0);
//!     class.implements(TypeRef::generic(repo, [t])).build()
//! };
//! let open_repo = types.type_of(repo);
//! let open_sql_repo = types.type_of(sql_repo);
//!
//! let container = Container::new(Arc::new(types));
//! container
//!     .register_open_generic(&open_repo, &open_sql_repo, Lifestyle::Transient)
//!     .unwrap();
//!
//! let customers = TypeRef::generic(repo, [TypeRef::named(customer)]);
//! let instance = container.get_instance(&customers).unwrap();
//! assert_eq!(instance.ty(), &TypeRef::generic(sql_repo, [TypeRef::named(customer)]));
//! ```
//!
//! Registrations are grouped with [`packaging::Package`]s or contributed at
//! link time through [`registration::PackageRegistration`].

pub mod container;
pub mod decoration;
pub mod error;
pub mod expression;
pub mod generics;
pub mod lifestyle;
pub mod options;
pub mod packaging;
pub mod registration;
pub mod types;

use std::sync::Arc;

use tracing::info;

pub use container::{Container, Initializer, InstanceProducer};
pub use decoration::{
    DecoratorInfo, DecoratorPredicateContext, DependencyResolver, ExpressionBuiltEventArgs,
    ExpressionBuiltInterceptor, ServiceTypeDecoratorInfo,
};
pub use error::{DIError, DIResult};
pub use expression::{Expression, InstanceFactory, Object, ResolutionContext, Value};
pub use generics::{BuildResult, GenericArgumentFinder, GenericTypeBuilder, TypeConstraintValidator};
pub use lifestyle::{Lifestyle, ServiceScope};
pub use options::ContainerOptions;
pub use types::{TypeMetadataProvider, TypeRef, TypeRegistry};

use packaging::{Package, PackageRegistry};

/// Builder pattern for configuring a container from options and packages
pub struct ContainerBuilder {
    metadata: Arc<dyn TypeMetadataProvider>,
    options: ContainerOptions,
    packages: PackageRegistry,
    discover_packages: bool,
}

impl ContainerBuilder {
    /// Create a builder over the given type metadata
    pub fn new(metadata: Arc<dyn TypeMetadataProvider>) -> Self {
        Self {
            metadata,
            options: ContainerOptions::default(),
            packages: PackageRegistry::new(),
            discover_packages: false,
        }
    }

    pub fn options(mut self, options: ContainerOptions) -> Self {
        self.options = options;
        self
    }

    /// Add a package; packages register in priority order on build
    pub fn package<P: Package + 'static>(mut self, package: P) -> Self {
        self.packages.add(package);
        self
    }

    /// Also run every [`registration::PackageRegistration`] linked into the binary
    pub fn with_discovered_packages(mut self) -> Self {
        self.discover_packages = true;
        self
    }

    /// Build the container and apply every package
    pub fn build(self) -> DIResult<Container> {
        let container = Container::with_options(self.metadata, self.options)?;

        if self.discover_packages {
            registration::register_all_discovered_packages(&container)?;
        }
        if !self.packages.is_empty() {
            self.packages.register_all(&container)?;
        }

        info!(
            "Container built with {} registration(s)",
            container.registration_count()
        );
        Ok(container)
    }
}
