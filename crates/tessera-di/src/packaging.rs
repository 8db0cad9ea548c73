//! Packages: named groups of registrations
//!
//! A package bundles the registrations of one feature so applications can
//! compose containers from packages instead of listing every service.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use tessera_di::packaging::{Package, PackageRegistry};
//! use tessera_di::types::{TypeRef, TypeRegistry};
//! use tessera_di::{Container, DIResult};
//!
//! struct ClockPackage {
//!     clock: TypeRef,
//!     system_clock: TypeRef,
//! }
//!
//! impl Package for ClockPackage {
//!     fn name(&self) -> &'static str {
//!         "clock"
//!     }
//!
//!     fn register(&self, container: &Container) -> DIResult<()> {
//!         container.register_singleton(&self.clock, &self.system_clock)
//!     }
//! }
//!
//! let mut types = TypeRegistry::new();
//! let clock = TypeRef::named(types.interface("IClock", &[]).build());
//! let system_clock = TypeRef::named(types.class("SystemClock", &[]).implements(clock.clone()).build());
//!
//! let container = Container::new(Arc::new(types));
//! let mut packages = PackageRegistry::new();
//! packages.add(ClockPackage { clock: clock.clone(), system_clock });
//! packages.register_all(&container).unwrap();
//!
//! assert!(container.is_registered(&clock));
//! ```

use std::sync::Arc;

use tracing::{debug, info};

use crate::container::Container;
use crate::error::DIResult;

/// A group of registrations applied to a container
pub trait Package: Send + Sync {
    /// Used for logging and diagnostics
    fn name(&self) -> &'static str;

    /// Lower values are registered first. Default is 100.
    fn priority(&self) -> u32 {
        100
    }

    fn register(&self, container: &Container) -> DIResult<()>;

    /// Called once every package has registered, e.g. to check that a
    /// dependency provided by another package is present.
    #[allow(unused_variables)]
    fn validate(&self, container: &Container) -> DIResult<()> {
        Ok(())
    }
}

/// Ordered collection of packages
#[derive(Default)]
pub struct PackageRegistry {
    packages: Vec<Arc<dyn Package>>,
}

impl PackageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<P: Package + 'static>(&mut self, package: P) -> &mut Self {
        self.packages.push(Arc::new(package));
        self
    }

    pub fn add_boxed(&mut self, package: Arc<dyn Package>) -> &mut Self {
        self.packages.push(package);
        self
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn package_names(&self) -> Vec<&'static str> {
        self.packages.iter().map(|p| p.name()).collect()
    }

    /// Register every package by ascending priority, then validate them all.
    ///
    /// Packages with equal priority keep the order they were added in.
    pub fn register_all(&self, container: &Container) -> DIResult<()> {
        let mut sorted: Vec<_> = self.packages.iter().collect();
        sorted.sort_by_key(|p| p.priority());

        info!("Registering {} packages", sorted.len());

        for package in &sorted {
            debug!(
                "Registering package '{}' (priority: {})",
                package.name(),
                package.priority()
            );
            package.register(container)?;
        }

        for package in &sorted {
            package.validate(container)?;
        }

        info!("All packages registered");
        Ok(())
    }
}
