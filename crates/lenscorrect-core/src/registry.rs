//! Explicit tag -> factory registry for primitive model classes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::models::{
    Affine2D, ModelParseError, NonLinear2D, Rigid2D, Translation2D, AFFINE_TAG, NON_LINEAR_TAG,
    RIGID_TAG, TRANSLATION_TAG,
};
use crate::transform::{PointMapping, PrimitiveTransform};

/// Builds a model instance from its parameter text.
pub type ModelFactory = fn(&str) -> Result<Arc<dyn PointMapping>, ModelParseError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no factory registered for model tags: {}", .0.join(", "))]
    MissingModels(Vec<String>),
}

/// Lookup from type tag to model factory.
///
/// There is no process-wide registry: callers build one (usually
/// [`ModelRegistry::builtin`]) and hand it to the codec.
#[derive(Clone)]
pub struct ModelRegistry {
    factories: BTreeMap<String, ModelFactory>,
}

impl ModelRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with every model class shipped by this crate.
    pub fn builtin() -> Self {
        Self::empty()
            .with(TRANSLATION_TAG, translation_factory)
            .with(RIGID_TAG, rigid_factory)
            .with(AFFINE_TAG, affine_factory)
            .with(NON_LINEAR_TAG, non_linear_factory)
    }

    /// Register `factory` for `tag`, returning the factory it replaced.
    pub fn register(&mut self, tag: impl Into<String>, factory: ModelFactory) -> Option<ModelFactory> {
        self.factories.insert(tag.into(), factory)
    }

    pub fn with(mut self, tag: impl Into<String>, factory: ModelFactory) -> Self {
        self.register(tag, factory);
        self
    }

    pub fn resolve(&self, tag: &str) -> Option<ModelFactory> {
        self.factories.get(tag).copied()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Startup completeness check: every tag in `required` must resolve.
    pub fn ensure_registered(&self, required: &[&str]) -> Result<(), RegistryError> {
        let missing: Vec<String> = required
            .iter()
            .filter(|t| !self.contains(t))
            .map(|t| t.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::MissingModels(missing))
        }
    }

    /// Resolve `tag` and initialize the model from `data`.
    ///
    /// Returns `None` for an unknown tag.
    pub fn instantiate(
        &self,
        tag: &str,
        data: &str,
    ) -> Option<Result<PrimitiveTransform, ModelParseError>> {
        let factory = self.resolve(tag)?;
        Some(factory(data).map(|m| PrimitiveTransform::new(tag, m)))
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

fn translation_factory(data: &str) -> Result<Arc<dyn PointMapping>, ModelParseError> {
    Ok(Arc::new(Translation2D::parse(data)?))
}

fn rigid_factory(data: &str) -> Result<Arc<dyn PointMapping>, ModelParseError> {
    Ok(Arc::new(Rigid2D::parse(data)?))
}

fn affine_factory(data: &str) -> Result<Arc<dyn PointMapping>, ModelParseError> {
    Ok(Arc::new(Affine2D::parse(data)?))
}

fn non_linear_factory(data: &str) -> Result<Arc<dyn PointMapping>, ModelParseError> {
    Ok(Arc::new(NonLinear2D::parse(data)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Point;

    #[test]
    fn builtin_covers_shipped_tags() {
        let reg = ModelRegistry::builtin();
        reg.ensure_registered(&[TRANSLATION_TAG, RIGID_TAG, AFFINE_TAG, NON_LINEAR_TAG])
            .unwrap();
        assert_eq!(reg.tags().count(), 4);
    }

    #[test]
    fn missing_tags_are_listed() {
        let reg = ModelRegistry::empty().with(TRANSLATION_TAG, translation_factory);
        let err = reg
            .ensure_registered(&[TRANSLATION_TAG, "my.Model", AFFINE_TAG])
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::MissingModels(vec!["my.Model".into(), AFFINE_TAG.into()])
        );
    }

    #[test]
    fn instantiate_resolves_and_parses() {
        let reg = ModelRegistry::builtin();
        let t = reg.instantiate(TRANSLATION_TAG, "1 2").unwrap().unwrap();
        assert_eq!(t.tag(), TRANSLATION_TAG);
        assert_eq!(t.apply(Point::new(0.0, 0.0)), Point::new(1.0, 2.0));

        assert!(reg.instantiate("unknown.Model", "").is_none());
        assert!(reg.instantiate(RIGID_TAG, "1").unwrap().is_err());
    }

    #[test]
    fn custom_factory_can_be_registered() {
        fn swap(_: &str) -> Result<Arc<dyn PointMapping>, ModelParseError> {
            #[derive(Debug)]
            struct Swap;
            impl PointMapping for Swap {
                fn apply(&self, p: Point) -> Point {
                    Point::new(p.y, p.x)
                }
                fn to_data_string(&self) -> String {
                    String::new()
                }
            }
            Ok(Arc::new(Swap))
        }

        let mut reg = ModelRegistry::builtin();
        assert!(reg.register("test.Swap", swap).is_none());
        let t = reg.instantiate("test.Swap", "").unwrap().unwrap();
        assert_eq!(t.apply(Point::new(1.0, 2.0)), Point::new(2.0, 1.0));
    }
}
