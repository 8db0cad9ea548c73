//! Packages contributed at link time
//!
//! A crate that can't be handed to [`crate::ContainerBuilder`] directly, such
//! as a plugin linked into the binary, submits a [`PackageRegistration`]
//! instead. Discovered packages go through the same [`PackageRegistry`] pass
//! as explicit ones: sorted by priority, registered, then validated.
//!
//! ```rust,ignore
//! use tessera_di::registration::PackageRegistration;
//!
//! inventory::submit! {
//!     PackageRegistration::new("clock", |container| {
//!         let clock = container.metadata().find_definition("IClock");
//!         // register services...
//!         Ok(())
//!     })
//! }
//! ```

use tracing::info;

use crate::container::Container;
use crate::error::DIResult;
use crate::packaging::{Package, PackageRegistry};

type PackageFn = fn(&Container) -> DIResult<()>;

/// A [`Package`] spelled as plain functions so it can live in a static
pub struct PackageRegistration {
    pub name: &'static str,
    pub register_fn: PackageFn,
    /// Runs after every discovered package has registered
    pub validate_fn: Option<PackageFn>,
    pub priority: u32,
}

impl PackageRegistration {
    pub const fn new(name: &'static str, register_fn: PackageFn) -> Self {
        Self::with_priority(name, register_fn, 100)
    }

    pub const fn with_priority(name: &'static str, register_fn: PackageFn, priority: u32) -> Self {
        Self {
            name,
            register_fn,
            validate_fn: None,
            priority,
        }
    }

    pub const fn validated_by(mut self, validate_fn: PackageFn) -> Self {
        self.validate_fn = Some(validate_fn);
        self
    }
}

impl Package for &'static PackageRegistration {
    fn name(&self) -> &'static str {
        self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn register(&self, container: &Container) -> DIResult<()> {
        (self.register_fn)(container)
    }

    fn validate(&self, container: &Container) -> DIResult<()> {
        match self.validate_fn {
            Some(validate) => validate(container),
            None => Ok(()),
        }
    }
}

inventory::collect!(PackageRegistration);

/// Every package submitted with `inventory::submit!`, in link order
pub fn discovered_packages() -> PackageRegistry {
    let mut packages = PackageRegistry::new();
    for registration in inventory::iter::<PackageRegistration>() {
        packages.add(registration);
    }
    packages
}

/// Apply every discovered package to `container`
pub fn register_all_discovered_packages(container: &Container) -> DIResult<()> {
    let packages = discovered_packages();
    info!("Discovered {} package(s)", packages.len());
    packages.register_all(container)
}

pub fn discovered_package_count() -> usize {
    inventory::iter::<PackageRegistration>().count()
}

pub fn list_discovered_packages() -> Vec<&'static str> {
    inventory::iter::<PackageRegistration>()
        .map(|registration| registration.name)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::DIError;
    use crate::types::{TypeRef, TypeRegistry};

    fn register_test_clock(container: &Container) -> DIResult<()> {
        let metadata = container.metadata();
        match (metadata.find_definition("ITestClock"), metadata.find_definition("TestClock")) {
            (Some(service), Some(implementation)) => {
                container.register(&TypeRef::named(service), &TypeRef::named(implementation))
            }
            _ => Ok(()),
        }
    }

    /// Only enforced for containers that know about `ITestAlarm`
    fn alarm_needs_clock(container: &Container) -> DIResult<()> {
        let metadata = container.metadata();
        let (Some(_), Some(clock)) = (metadata.find_definition("ITestAlarm"), metadata.find_definition("ITestClock"))
        else {
            return Ok(());
        };
        if container.is_registered(&TypeRef::named(clock)) {
            Ok(())
        } else {
            Err(DIError::ServiceNotRegistered {
                service_type: "ITestClock".to_string(),
            })
        }
    }

    inventory::submit! {
        PackageRegistration::with_priority("test_clock", register_test_clock, 10)
    }

    inventory::submit! {
        PackageRegistration::new("test_alarm", |_| Ok(())).validated_by(alarm_needs_clock)
    }

    #[test]
    fn test_discovered_packages_include_test_packages() {
        let names = list_discovered_packages();
        assert!(names.contains(&"test_clock"));
        assert!(names.contains(&"test_alarm"));
        assert!(discovered_package_count() >= 2);
        assert_eq!(discovered_packages().len(), discovered_package_count());
    }

    #[test]
    fn test_register_all_discovered() {
        let mut types = TypeRegistry::new();
        let clock = types.interface("ITestClock", &[]).build();
        types
            .class("TestClock", &[])
            .implements(TypeRef::named(clock))
            .build();
        types.interface("ITestAlarm", &[]).build();

        let container = Container::new(Arc::new(types));
        register_all_discovered_packages(&container).unwrap();
        assert!(container.is_registered(&TypeRef::named(clock)));
    }

    #[test]
    fn test_discovered_validation_runs_after_registration() {
        // ITestClock exists but has no implementation to register
        let mut types = TypeRegistry::new();
        types.interface("ITestClock", &[]).build();
        types.interface("ITestAlarm", &[]).build();

        let container = Container::new(Arc::new(types));
        let err = register_all_discovered_packages(&container).unwrap_err();
        assert!(matches!(err, DIError::ServiceNotRegistered { .. }));
    }
}
