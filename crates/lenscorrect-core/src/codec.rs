//! Tagged JSON encoding of transform trees.
//!
//! Every node is an object with a `className` tag. Composite nodes carry an
//! ordered `transforms` array, primitive nodes a `dataString` with the
//! model's own parameter text:
//!
//! ```json
//! {
//!   "className": "mpicbg.trakem2.transform.CoordinateTransformList",
//!   "transforms": [
//!     { "className": "lenscorrection.NonLinearTransform", "dataString": "..." },
//!     { "className": "mpicbg.trakem2.transform.AffineModel2D", "dataString": "..." }
//!   ]
//! }
//! ```

use serde_json::{Map, Value};

use crate::models::{ModelParseError, COMPOSITE_TAG};
use crate::registry::ModelRegistry;
use crate::transform::{CompositeTransform, Transform};

pub const CLASS_NAME_KEY: &str = "className";
pub const TRANSFORMS_KEY: &str = "transforms";
pub const DATA_STRING_KEY: &str = "dataString";

#[derive(thiserror::Error, Debug)]
pub enum TransformDecodeError {
    #[error("transform node is not a JSON object")]
    NotAnObject,
    #[error("`className` is not a string: {0}")]
    InvalidClassName(Value),
    #[error("unknown transform class `{tag}`")]
    UnknownTag { tag: String },
    #[error("transform class `{tag}` has no `dataString`")]
    MissingData { tag: String },
    #[error("invalid `dataString` for `{tag}`: {source}")]
    InvalidData {
        tag: String,
        #[source]
        source: ModelParseError,
    },
}

impl TransformDecodeError {
    /// The tag of the node that failed, if it had one.
    pub fn tag(&self) -> Option<&str> {
        match self {
            Self::UnknownTag { tag } | Self::MissingData { tag } | Self::InvalidData { tag, .. } => {
                Some(tag)
            }
            Self::NotAnObject | Self::InvalidClassName(_) => None,
        }
    }
}

/// Encode a transform tree. Needs no registry: primitives serialize themselves.
pub fn encode_transform(t: &Transform) -> Value {
    let mut node = Map::new();
    node.insert(CLASS_NAME_KEY.into(), Value::String(t.tag().to_string()));
    match t {
        Transform::Composite(c) => {
            node.insert(TRANSFORMS_KEY.into(), encode_children(c));
        }
        Transform::Primitive(p) => {
            node.insert(DATA_STRING_KEY.into(), Value::String(p.data_string()));
        }
    }
    Value::Object(node)
}

/// Encode the children of `c` as a bare node array.
pub fn encode_children(c: &CompositeTransform) -> Value {
    Value::Array(c.children().iter().map(encode_transform).collect())
}

/// Decoder bound to a model registry.
#[derive(Clone, Copy, Debug)]
pub struct TransformCodec<'r> {
    registry: &'r ModelRegistry,
}

impl<'r> TransformCodec<'r> {
    pub fn new(registry: &'r ModelRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'r ModelRegistry {
        self.registry
    }

    pub fn encode(&self, t: &Transform) -> Value {
        encode_transform(t)
    }

    /// Decode one node.
    ///
    /// A node without `className` decodes to `Ok(None)`.
    pub fn decode(&self, node: &Value) -> Result<Option<Transform>, TransformDecodeError> {
        let obj = node.as_object().ok_or(TransformDecodeError::NotAnObject)?;
        let Some(class_name) = obj.get(CLASS_NAME_KEY) else {
            return Ok(None);
        };
        let tag = class_name
            .as_str()
            .ok_or_else(|| TransformDecodeError::InvalidClassName(class_name.clone()))?;

        if tag == COMPOSITE_TAG {
            let children = match obj.get(TRANSFORMS_KEY) {
                Some(Value::Array(nodes)) => self.decode_composite(nodes)?,
                _ => CompositeTransform::new(),
            };
            if children.is_empty() {
                log::warn!("decoded an empty `{COMPOSITE_TAG}`; treating it as identity");
            }
            return Ok(Some(Transform::Composite(children)));
        }

        let factory = self
            .registry
            .resolve(tag)
            .ok_or_else(|| TransformDecodeError::UnknownTag { tag: tag.into() })?;
        let data = obj
            .get(DATA_STRING_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| TransformDecodeError::MissingData { tag: tag.into() })?;
        let mapping = factory(data).map_err(|source| TransformDecodeError::InvalidData {
            tag: tag.into(),
            source,
        })?;
        Ok(Some(
            crate::transform::PrimitiveTransform::new(tag, mapping).into(),
        ))
    }

    /// Decode a node list into a composite, preserving order.
    ///
    /// Nodes that decode to nothing are skipped.
    pub fn decode_composite(
        &self,
        nodes: &[Value],
    ) -> Result<CompositeTransform, TransformDecodeError> {
        let mut out = CompositeTransform::new();
        for (i, node) in nodes.iter().enumerate() {
            match self.decode(node)? {
                Some(t) => out.append(t),
                None => log::warn!("transform node {i} has no `{CLASS_NAME_KEY}`; skipped"),
            }
        }
        Ok(out)
    }

    pub fn decode_str(&self, json: &str) -> Result<Option<Transform>, CodecError> {
        let value: Value = serde_json::from_str(json)?;
        Ok(self.decode(&value)?)
    }
}

/// Decoding from text: JSON syntax or transform structure.
#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Decode(#[from] TransformDecodeError),
}
