//! Examples, uids, and the batches collated from them.

use crate::error::EvalError;
use ndarray::{Array1, Array2, ArrayD, ArrayView, Axis, Ix2, IxDyn, stack};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique example identifier: numeric ids for tensor-backed datasets, strings otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Uid {
    Int(i64),
    Text(String),
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uid::Int(id) => write!(f, "{id}"),
            Uid::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for Uid {
    fn from(id: i64) -> Self {
        Uid::Int(id)
    }
}

impl From<&str> for Uid {
    fn from(id: &str) -> Self {
        Uid::Text(id.to_string())
    }
}

impl From<String> for Uid {
    fn from(id: String) -> Self {
        Uid::Text(id)
    }
}

/// A single tokenized evaluation record.
#[derive(Debug, Clone)]
pub struct Example {
    pub uid: Uid,
    pub text: ArrayD<i64>,
    pub types: Option<ArrayD<i64>>,
    pub position: Option<ArrayD<i64>>,
    pub attention_mask: Option<ArrayD<i64>>,
    pub label: i64,
    pub target: Option<ArrayD<i64>>,
    pub logit_mask: Option<ArrayD<i64>>,
    pub loss_mask: Option<ArrayD<f32>>,
}

impl Example {
    /// An example with token ids and a label and no optional tensors.
    pub fn new(uid: impl Into<Uid>, text: ArrayD<i64>, label: i64) -> Self {
        Self {
            uid: uid.into(),
            text,
            types: None,
            position: None,
            attention_mask: None,
            label,
            target: None,
            logit_mask: None,
            loss_mask: None,
        }
    }

    pub fn with_types(mut self, types: ArrayD<i64>) -> Self {
        self.types = Some(types);
        self
    }

    pub fn with_position(mut self, position: ArrayD<i64>) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_attention_mask(mut self, mask: ArrayD<i64>) -> Self {
        self.attention_mask = Some(mask);
        self
    }

    pub fn with_target(mut self, target: ArrayD<i64>) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_logit_mask(mut self, mask: ArrayD<i64>) -> Self {
        self.logit_mask = Some(mask);
        self
    }

    pub fn with_loss_mask(mut self, mask: ArrayD<f32>) -> Self {
        self.loss_mask = Some(mask);
        self
    }
}

/// Examples stacked along a new leading batch axis.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Parallel to axis 0 of every tensor.
    pub uid: Vec<Uid>,
    pub text: ArrayD<i64>,
    pub types: Option<ArrayD<i64>>,
    pub position: Option<ArrayD<i64>>,
    pub attention_mask: Option<ArrayD<i64>>,
    pub label: Array1<i64>,
    pub target: Option<ArrayD<i64>>,
    pub logit_mask: Option<ArrayD<i64>>,
    pub loss_mask: Option<Array2<f32>>,
}

impl Batch {
    /// Stack examples into a batch.
    ///
    /// Every example must carry the same optional fields with the same shapes.
    pub fn collate(examples: &[Example]) -> Result<Self, EvalError> {
        if examples.is_empty() {
            return Err(EvalError::batch("cannot collate an empty batch"));
        }

        let loss_mask = stack_optional(examples, "loss_mask", |e| e.loss_mask.as_ref())?
            .map(|mask| {
                mask.into_dimensionality::<Ix2>().map_err(|_| {
                    EvalError::batch("loss_mask must be one-dimensional per example")
                })
            })
            .transpose()?;

        Ok(Self {
            uid: examples.iter().map(|e| e.uid.clone()).collect(),
            text: stack_field(examples, "text", |e| Some(&e.text))?,
            types: stack_optional(examples, "types", |e| e.types.as_ref())?,
            position: stack_optional(examples, "position", |e| e.position.as_ref())?,
            attention_mask: stack_optional(examples, "attention_mask", |e| {
                e.attention_mask.as_ref()
            })?,
            label: examples.iter().map(|e| e.label).collect(),
            target: stack_optional(examples, "target", |e| e.target.as_ref())?,
            logit_mask: stack_optional(examples, "logit_mask", |e| e.logit_mask.as_ref())?,
            loss_mask,
        })
    }

    pub fn len(&self) -> usize {
        self.uid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uid.is_empty()
    }
}

fn stack_optional<'a, T, F>(
    examples: &'a [Example],
    field: &str,
    get: F,
) -> Result<Option<ArrayD<T>>, EvalError>
where
    T: Clone + 'a,
    F: Fn(&'a Example) -> Option<&'a ArrayD<T>>,
{
    let present = examples.iter().filter(|e| get(*e).is_some()).count();
    match present {
        0 => Ok(None),
        n if n == examples.len() => stack_field(examples, field, get).map(Some),
        n => Err(EvalError::batch(format!(
            "field `{field}` present on {n} of {} examples",
            examples.len()
        ))),
    }
}

fn stack_field<'a, T, F>(examples: &'a [Example], field: &str, get: F) -> Result<ArrayD<T>, EvalError>
where
    T: Clone + 'a,
    F: Fn(&'a Example) -> Option<&'a ArrayD<T>>,
{
    let views: Vec<ArrayView<'a, T, IxDyn>> = examples
        .iter()
        .filter_map(|e| get(e).map(|a| a.view()))
        .collect();
    stack(Axis(0), &views)
        .map_err(|e| EvalError::batch(format!("cannot stack field `{field}`: {e}")))
}
