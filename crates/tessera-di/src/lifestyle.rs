//! Lifestyles and scopes

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::DIResult;
use crate::expression::{Expression, ResolutionContext, Value};

static NEXT_SCOPE_KEY: AtomicU64 = AtomicU64::new(1);

/// Caching policy for created instances
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifestyle {
    /// A new instance on every request
    #[default]
    Transient,
    /// One instance for the lifetime of the container
    Singleton,
    /// One instance per [`ServiceScope`]
    Scoped,
}

impl Lifestyle {
    /// Wrap a build plan so it honours this lifestyle.
    ///
    /// Singletons are created right away and become constants; scoped plans
    /// get a fresh cache key.
    pub fn apply(self, expression: Expression, context: &ResolutionContext) -> DIResult<Expression> {
        match self {
            Lifestyle::Transient => Ok(expression),
            Lifestyle::Singleton => {
                if matches!(expression, Expression::Constant { .. }) {
                    return Ok(expression);
                }
                let ty = expression.ty().clone();
                let value = expression.evaluate(context)?;
                trace!("Created singleton {}", context.metadata().display(&ty));
                Ok(Expression::Constant { ty, value })
            }
            Lifestyle::Scoped => Ok(Expression::Scoped {
                key: NEXT_SCOPE_KEY.fetch_add(1, Ordering::Relaxed),
                ty: expression.ty().clone(),
                inner: Box::new(expression),
            }),
        }
    }
}

/// Per-scope instance cache
#[derive(Debug, Default)]
pub struct ServiceScope {
    instances: Mutex<HashMap<u64, Value>>,
}

impl ServiceScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached value for `key`, creating it when absent.
    ///
    /// The lock is not held while creating, so scoped dependencies of scoped
    /// services can be created re-entrantly. When two threads race, the first
    /// stored value wins and both get it.
    pub fn get_or_create<F>(&self, key: u64, create: F) -> DIResult<Value>
    where
        F: FnOnce() -> DIResult<Value>,
    {
        if let Some(existing) = self.instances.lock().get(&key) {
            return Ok(existing.clone());
        }

        let created = create()?;
        Ok(self.instances.lock().entry(key).or_insert(created).clone())
    }

    /// Number of instances cached so far
    pub fn len(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::types::{TypeRef, TypeRegistry};

    #[test]
    fn test_singleton_becomes_constant() {
        let mut registry = TypeRegistry::new();
        let clock = registry.class("Clock", &[]).build();
        let ctx = ResolutionContext::new(Arc::new(registry), None);

        let expression = Expression::New {
            ty: TypeRef::named(clock),
            arguments: Vec::new(),
        };
        let applied = Lifestyle::Singleton.apply(expression, &ctx).unwrap();
        assert!(matches!(applied, Expression::Constant { .. }));

        let first = applied.evaluate(&ctx).unwrap().into_object().unwrap();
        let second = applied.evaluate(&ctx).unwrap().into_object().unwrap();
        assert_eq!(first.id(), second.id());
    }

    #[test]
    fn test_scoped_keys_are_distinct() {
        let mut registry = TypeRegistry::new();
        let clock = registry.class("Clock", &[]).build();
        let ctx = ResolutionContext::new(Arc::new(registry), None);
        let new = || Expression::New {
            ty: TypeRef::named(clock),
            arguments: Vec::new(),
        };

        let key_of = |expression: Expression| match expression {
            Expression::Scoped { key, .. } => key,
            other => panic!("expected a scoped expression, got {other:?}"),
        };
        let first = key_of(Lifestyle::Scoped.apply(new(), &ctx).unwrap());
        let second = key_of(Lifestyle::Scoped.apply(new(), &ctx).unwrap());
        assert_ne!(first, second);
    }

    #[test]
    fn test_lifestyle_serde_names() {
        let parsed: Lifestyle = serde_json::from_str("\"scoped\"").unwrap();
        assert_eq!(parsed, Lifestyle::Scoped);
        assert_eq!(serde_json::to_string(&Lifestyle::Singleton).unwrap(), "\"singleton\"");
        assert_eq!(Lifestyle::default(), Lifestyle::Transient);
    }
}
