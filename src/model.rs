//! Collection and embedding record types shared by the index and record store.

use crate::error::{Result, VectorDbError};
use crate::vector::Vector;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque collection identifier (a UUID v4 rendered as a string).
pub type CollectionId = String;

/// Per-collection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    /// Length every embedding in the collection must have.
    pub dimensionality: usize,
    /// Starting index capacity.
    pub max_elements: Option<usize>,
    /// HNSW neighbor-list size.
    pub m: Option<usize>,
    /// Capacity multiplier applied when the index grows.
    pub resize_factor: Option<f64>,
}

impl CollectionMetadata {
    pub fn new(dimensionality: usize) -> Self {
        Self {
            dimensionality,
            max_elements: None,
            m: None,
            resize_factor: None,
        }
    }

    pub fn with_max_elements(mut self, max_elements: usize) -> Self {
        self.max_elements = Some(max_elements);
        self
    }

    pub fn with_m(mut self, m: usize) -> Self {
        self.m = Some(m);
        self
    }

    pub fn with_resize_factor(mut self, resize_factor: f64) -> Self {
        self.resize_factor = Some(resize_factor);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimensionality == 0 {
            return Err(VectorDbError::InvalidArgument(
                "dimensionality must be a positive integer".to_string(),
            ));
        }
        if self.max_elements == Some(0) {
            return Err(VectorDbError::InvalidArgument(
                "max_elements must be positive".to_string(),
            ));
        }
        if self.m == Some(0) {
            return Err(VectorDbError::InvalidArgument(
                "m must be positive".to_string(),
            ));
        }
        if let Some(factor) = self.resize_factor {
            if !(factor.is_finite() && factor > 0.0) {
                return Err(VectorDbError::InvalidArgument(format!(
                    "resize_factor must be positive, got {}",
                    factor
                )));
            }
        }
        Ok(())
    }

    /// Fields present in `patch` replace ours; absent fields are kept.
    pub fn merge(&self, patch: &CollectionMetadataPatch) -> CollectionMetadata {
        CollectionMetadata {
            dimensionality: patch.dimensionality.unwrap_or(self.dimensionality),
            max_elements: patch.max_elements.or(self.max_elements),
            m: patch.m.or(self.m),
            resize_factor: patch.resize_factor.or(self.resize_factor),
        }
    }
}

/// Partial update of [`CollectionMetadata`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionMetadataPatch {
    pub dimensionality: Option<usize>,
    pub max_elements: Option<usize>,
    pub m: Option<usize>,
    pub resize_factor: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,
    pub name: String,
    pub metadata: CollectionMetadata,
}

/// Scalar value of an auxiliary filter attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl AttrValue {
    /// Parse CLI-style input: integers, then floats, then booleans, else a string.
    pub fn parse(s: &str) -> AttrValue {
        if let Ok(i) = s.parse::<i64>() {
            AttrValue::Int(i)
        } else if let Ok(f) = s.parse::<f64>() {
            AttrValue::Float(f)
        } else if let Ok(b) = s.parse::<bool>() {
            AttrValue::Bool(b)
        } else {
            AttrValue::Str(s.to_string())
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Str(s) => write!(f, "{}", s),
            AttrValue::Int(i) => write!(f, "{}", i),
            AttrValue::Float(x) => write!(f, "{}", x),
            AttrValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// A stored embedding row.
///
/// The three `arg` slots are the only filterable attributes. Supporting more
/// would mean a key/value side table rather than more columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: String,
    pub collection_id: CollectionId,
    pub embedding: Vector,
    pub document: Option<String>,
    pub document_id: Option<String>,
    pub arg1: Option<AttrValue>,
    pub arg2: Option<AttrValue>,
    pub arg3: Option<AttrValue>,
}

/// An embedding as submitted for insertion, before it is bound to a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEmbedding {
    pub id: String,
    pub embedding: Vector,
    pub document: Option<String>,
    pub document_id: Option<String>,
    pub arg1: Option<AttrValue>,
    pub arg2: Option<AttrValue>,
    pub arg3: Option<AttrValue>,
}

impl NewEmbedding {
    pub fn new(id: impl Into<String>, embedding: impl Into<Vector>) -> Self {
        Self {
            id: id.into(),
            embedding: embedding.into(),
            document: None,
            document_id: None,
            arg1: None,
            arg2: None,
            arg3: None,
        }
    }

    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }

    pub fn with_document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn with_args(
        mut self,
        arg1: Option<AttrValue>,
        arg2: Option<AttrValue>,
        arg3: Option<AttrValue>,
    ) -> Self {
        self.arg1 = arg1;
        self.arg2 = arg2;
        self.arg3 = arg3;
        self
    }

    pub fn into_record(self, collection_id: &str) -> EmbeddingRecord {
        EmbeddingRecord {
            id: self.id,
            collection_id: collection_id.to_string(),
            embedding: self.embedding,
            document: self.document,
            document_id: self.document_id,
            arg1: self.arg1,
            arg2: self.arg2,
            arg3: self.arg3,
        }
    }
}

/// Partial update of an embedding row. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingPatch {
    pub embedding: Option<Vector>,
    pub document: Option<String>,
    pub document_id: Option<String>,
    pub arg1: Option<AttrValue>,
    pub arg2: Option<AttrValue>,
    pub arg3: Option<AttrValue>,
}

impl EmbeddingPatch {
    pub fn apply_to(&self, record: &EmbeddingRecord) -> EmbeddingRecord {
        EmbeddingRecord {
            id: record.id.clone(),
            collection_id: record.collection_id.clone(),
            embedding: self
                .embedding
                .clone()
                .unwrap_or_else(|| record.embedding.clone()),
            document: self.document.clone().or_else(|| record.document.clone()),
            document_id: self
                .document_id
                .clone()
                .or_else(|| record.document_id.clone()),
            arg1: self.arg1.clone().or_else(|| record.arg1.clone()),
            arg2: self.arg2.clone().or_else(|| record.arg2.clone()),
            arg3: self.arg3.clone().or_else(|| record.arg3.clone()),
        }
    }
}

/// Exact-match predicates over embedding rows. Present predicates are ANDed;
/// an empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Where {
    pub ids: Option<Vec<String>>,
    pub document_id: Option<String>,
    pub embedding: Option<Vector>,
    pub arg1: Option<AttrValue>,
    pub arg2: Option<AttrValue>,
    pub arg3: Option<AttrValue>,
}

impl Where {
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: Some(ids.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_none()
            && self.document_id.is_none()
            && self.embedding.is_none()
            && self.arg1.is_none()
            && self.arg2.is_none()
            && self.arg3.is_none()
    }

    pub fn matches(&self, record: &EmbeddingRecord) -> bool {
        fn eq<T: PartialEq>(want: &Option<T>, have: &Option<T>) -> bool {
            match want {
                Some(w) => have.as_ref() == Some(w),
                None => true,
            }
        }

        self.ids
            .as_ref()
            .map_or(true, |ids| ids.iter().any(|id| id == &record.id))
            && eq(&self.document_id, &record.document_id)
            && self
                .embedding
                .as_ref()
                .map_or(true, |e| e == &record.embedding)
            && eq(&self.arg1, &record.arg1)
            && eq(&self.arg2, &record.arg2)
            && eq(&self.arg3, &record.arg3)
    }
}

/// Input to `CollectionStore::get`.
#[derive(Debug, Clone, Default)]
pub struct GetQuery {
    /// Restrict to one collection; `None` scans every collection.
    pub collection_name: Option<String>,
    pub filter: Where,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl GetQuery {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: Where) -> Self {
        self.filter = filter;
        self
    }
}

/// Input to `CollectionStore::get_nearest_neighbors`.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub collection_name: String,
    pub query: Vector,
    pub k: usize,
    pub filter: Where,
}

impl SearchQuery {
    pub fn new(collection_name: impl Into<String>, query: impl Into<Vector>, k: usize) -> Self {
        Self {
            collection_name: collection_name.into(),
            query: query.into(),
            k,
            filter: Where::default(),
        }
    }

    pub fn with_filter(mut self, filter: Where) -> Self {
        self.filter = filter;
        self
    }
}

/// A nearest-neighbor hit hydrated with its document fields.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    pub id: String,
    pub distance: f32,
    pub embedding: Vector,
    pub document: Option<String>,
    pub document_id: Option<String>,
}
