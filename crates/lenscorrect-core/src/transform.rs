//! Composite transform model.
//!
//! A [`Transform`] is either a leaf [`PrimitiveTransform`] (a registered model
//! class identified by its tag, carrying its own parameter encoding) or a
//! [`CompositeTransform`] that applies an ordered chain of children.

use std::fmt;
use std::sync::Arc;

use nalgebra::Point2;

use crate::models::COMPOSITE_TAG;

/// 2D coordinate in pixel units.
pub type Point = Point2<f64>;

/// A point mapping provided by a model class.
///
/// Implementations must be pure: `apply` never mutates `self`, and
/// `to_data_string` must be accepted by the factory registered for the
/// model's tag.
pub trait PointMapping: fmt::Debug + Send + Sync {
    fn apply(&self, p: Point) -> Point;

    fn to_data_string(&self) -> String;
}

/// Leaf transform: a type tag plus the model instance it resolved to.
///
/// The model is shared behind an `Arc` and never mutated, so cloning a
/// primitive into several chains cannot alias mutable state.
#[derive(Clone, Debug)]
pub struct PrimitiveTransform {
    tag: String,
    mapping: Arc<dyn PointMapping>,
}

impl PrimitiveTransform {
    pub fn new(tag: impl Into<String>, mapping: Arc<dyn PointMapping>) -> Self {
        Self {
            tag: tag.into(),
            mapping,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Parameter text as produced by the model's own serializer.
    pub fn data_string(&self) -> String {
        self.mapping.to_data_string()
    }

    #[inline]
    pub fn apply(&self, p: Point) -> Point {
        self.mapping.apply(p)
    }
}

impl PartialEq for PrimitiveTransform {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag && self.data_string() == other.data_string()
    }
}

/// Ordered chain of transforms; the output of each child feeds the next.
///
/// Children are only ever appended. An empty composite is the identity.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompositeTransform {
    children: Vec<Transform>,
}

impl CompositeTransform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_children(children: Vec<Transform>) -> Self {
        Self { children }
    }

    /// Apply every child in insertion order.
    pub fn apply(&self, p: Point) -> Point {
        self.children.iter().fold(p, |q, t| t.apply(q))
    }

    /// Append `child` after the existing children.
    ///
    /// The child is taken by value; callers that hold a transform used by
    /// another chain pass a clone, so chains never share a child position.
    pub fn append(&mut self, child: impl Into<Transform>) {
        self.children.push(child.into());
    }

    /// Builder-style [`append`](Self::append).
    pub fn with(mut self, child: impl Into<Transform>) -> Self {
        self.append(child);
        self
    }

    pub fn children(&self) -> &[Transform] {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn into_children(self) -> Vec<Transform> {
        self.children
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Transform {
    Primitive(PrimitiveTransform),
    Composite(CompositeTransform),
}

impl Transform {
    /// The identity: an empty composite.
    pub fn identity() -> Self {
        Transform::Composite(CompositeTransform::new())
    }

    #[inline]
    pub fn apply(&self, p: Point) -> Point {
        match self {
            Transform::Primitive(t) => t.apply(p),
            Transform::Composite(t) => t.apply(p),
        }
    }

    /// Type tag used by the codec.
    pub fn tag(&self) -> &str {
        match self {
            Transform::Primitive(t) => t.tag(),
            Transform::Composite(_) => COMPOSITE_TAG,
        }
    }

    pub fn as_composite(&self) -> Option<&CompositeTransform> {
        match self {
            Transform::Composite(c) => Some(c),
            Transform::Primitive(_) => None,
        }
    }
}

impl From<PrimitiveTransform> for Transform {
    fn from(t: PrimitiveTransform) -> Self {
        Transform::Primitive(t)
    }
}

impl From<CompositeTransform> for Transform {
    fn from(t: CompositeTransform) -> Self {
        Transform::Composite(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Affine2D, Rigid2D, Translation2D};
    use approx::assert_relative_eq;

    fn sample_points() -> [Point; 4] {
        [
            Point::new(0.0, 0.0),
            Point::new(12.5, -3.0),
            Point::new(511.0, 200.25),
            Point::new(-40.0, 17.0),
        ]
    }

    #[test]
    fn empty_composite_is_identity() {
        let c = CompositeTransform::new();
        for p in sample_points() {
            assert_eq!(c.apply(p), p);
        }
    }

    #[test]
    fn composite_applies_children_in_order() {
        let a: Transform = Rigid2D::new(0.3, 4.0, -2.0).into_transform();
        let b: Transform = Affine2D::new(1.1, 0.05, -0.02, 0.95, 7.0, 1.0).into_transform();
        let chain = CompositeTransform::new().with(a.clone()).with(b.clone());

        for p in sample_points() {
            let expected = b.apply(a.apply(p));
            let got = chain.apply(p);
            assert_relative_eq!(got.x, expected.x, epsilon = 1e-12);
            assert_relative_eq!(got.y, expected.y, epsilon = 1e-12);
        }

        let reversed = CompositeTransform::new().with(b).with(a);
        let p = Point::new(100.0, 50.0);
        assert!((reversed.apply(p) - chain.apply(p)).norm() > 1e-3);
    }

    #[test]
    fn nested_grouping_matches_flat_chain() {
        let a: Transform = Translation2D::new(1.0, 2.0).into_transform();
        let b: Transform = Rigid2D::new(-0.4, 0.0, 3.0).into_transform();
        let c: Transform = Translation2D::new(-5.0, 0.5).into_transform();

        let flat = CompositeTransform::from_children(vec![a.clone(), b.clone(), c.clone()]);
        let nested = CompositeTransform::new()
            .with(CompositeTransform::from_children(vec![a, b]))
            .with(c);

        for p in sample_points() {
            let f = flat.apply(p);
            let n = nested.apply(p);
            assert_relative_eq!(f.x, n.x, epsilon = 1e-12);
            assert_relative_eq!(f.y, n.y, epsilon = 1e-12);
        }
    }

    #[test]
    fn append_keeps_existing_children_and_other_chains() {
        let shared: Transform = Translation2D::new(3.0, 4.0).into_transform();
        let mut left = CompositeTransform::new().with(shared.clone());
        let right = CompositeTransform::new().with(shared.clone());

        left.append(Translation2D::new(-10.0, 0.0));

        assert_eq!(left.len(), 2);
        assert_eq!(left.children()[0], shared);
        assert_eq!(right.len(), 1);
        assert_eq!(right.apply(Point::new(0.0, 0.0)), Point::new(3.0, 4.0));
    }

    #[test]
    fn tag_of_composite_is_list_tag() {
        assert_eq!(Transform::identity().tag(), COMPOSITE_TAG);
        let t = Translation2D::new(0.0, 0.0).into_transform();
        assert_eq!(t.tag(), crate::models::TRANSLATION_TAG);
    }
}
