//! Open-generic matching: unification, constraint checks and closing implementations

mod builder;
mod constraints;
mod finder;
mod mapping;

pub use builder::{service_is_assignable_from_implementation, BuildResult, GenericTypeBuilder};
pub use constraints::TypeConstraintValidator;
pub use finder::GenericArgumentFinder;
pub use mapping::ArgumentMapping;
