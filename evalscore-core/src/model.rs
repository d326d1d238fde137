//! The model seam: forward calls, train/eval mode, and input assembly.

use crate::data::Batch;
use crate::error::EvalError;
use ndarray::{Array2, ArrayD};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// Result of one forward call.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// `[batch, positions]` scores; the argmax over the last axis is the prediction.
    pub logits: Array2<f32>,
    /// Auxiliary state (e.g. memories) returned by non-encoder models. Not used for scoring.
    pub mems: Vec<ArrayD<f32>>,
}

impl ModelOutput {
    pub fn logits(logits: Array2<f32>) -> Self {
        Self {
            logits,
            mems: Vec::new(),
        }
    }
}

/// A trained model that can be run for inference.
///
/// `forward` takes `&self`: scoring only reads the model. The train/eval flag is
/// the one piece of state scoring changes, and it is always restored through
/// [`EvalModeGuard`].
pub trait Model: Send {
    fn forward(&self, inputs: &[ArrayD<i64>]) -> Result<ModelOutput, EvalError>;

    fn is_training(&self) -> bool;

    fn set_training(&mut self, training: bool);
}

/// Puts a model in evaluation mode and restores its previous mode on drop.
pub struct EvalModeGuard<'a, M: Model + ?Sized> {
    model: &'a mut M,
    was_training: bool,
}

impl<'a, M: Model + ?Sized> EvalModeGuard<'a, M> {
    pub fn acquire(model: &'a mut M) -> Self {
        let was_training = model.is_training();
        model.set_training(false);
        Self {
            model,
            was_training,
        }
    }
}

impl<M: Model + ?Sized> Deref for EvalModeGuard<'_, M> {
    type Target = M;

    fn deref(&self) -> &M {
        &*self.model
    }
}

impl<M: Model + ?Sized> Drop for EvalModeGuard<'_, M> {
    fn drop(&mut self) {
        self.model.set_training(self.was_training);
    }
}

/// Which batch fields make up the model's inputs, and in what order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputAssemblyMode {
    /// `[text, types, attention_mask]`; the model returns logits only.
    PretrainedEncoder,
    /// `[text, position, attention_mask, target, logit_mask]` for cloze / multiple choice.
    Cloze,
    /// `[text, position, attention_mask]`.
    #[default]
    Default,
}

impl InputAssemblyMode {
    /// Map the legacy `pretrained_bert` / `cloze_eval` switches onto a mode.
    /// `pretrained_bert` wins when both are set.
    pub fn from_flags(pretrained_bert: bool, cloze_eval: bool) -> Self {
        if pretrained_bert {
            Self::PretrainedEncoder
        } else if cloze_eval {
            Self::Cloze
        } else {
            Self::Default
        }
    }

    pub fn assemble(&self, batch: &Batch) -> Result<Vec<ArrayD<i64>>, EvalError> {
        let text = batch.text.clone();
        let attention_mask = required(&batch.attention_mask, "attention_mask")?;
        let inputs = match self {
            Self::PretrainedEncoder => {
                vec![text, required(&batch.types, "types")?, attention_mask]
            }
            Self::Cloze => vec![
                text,
                required(&batch.position, "position")?,
                attention_mask,
                required(&batch.target, "target")?,
                required(&batch.logit_mask, "logit_mask")?,
            ],
            Self::Default => vec![text, required(&batch.position, "position")?, attention_mask],
        };
        Ok(inputs)
    }
}

fn required(field: &Option<ArrayD<i64>>, name: &str) -> Result<ArrayD<i64>, EvalError> {
    field
        .clone()
        .ok_or_else(|| EvalError::batch(format!("batch is missing `{name}`")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Example;
    use ndarray::arr1;

    struct Flagged {
        training: bool,
    }

    impl Model for Flagged {
        fn forward(&self, _inputs: &[ArrayD<i64>]) -> Result<ModelOutput, EvalError> {
            Err(EvalError::model("not used"))
        }

        fn is_training(&self) -> bool {
            self.training
        }

        fn set_training(&mut self, training: bool) {
            self.training = training;
        }
    }

    fn ids(v: &[i64]) -> ArrayD<i64> {
        arr1(v).into_dyn()
    }

    fn batch(with_cloze_fields: bool) -> Batch {
        let mut example = Example::new(1i64, ids(&[5, 6]), 0)
            .with_position(ids(&[0, 1]))
            .with_attention_mask(ids(&[1, 1]))
            .with_types(ids(&[0, 0]));
        if with_cloze_fields {
            example = example.with_target(ids(&[7, 8])).with_logit_mask(ids(&[1, 0]));
        }
        Batch::collate(&[example]).unwrap()
    }

    #[test]
    fn test_guard_restores_training_mode() {
        let mut model = Flagged { training: true };
        {
            let guard = EvalModeGuard::acquire(&mut model);
            assert!(!guard.is_training());
        }
        assert!(model.training);
    }

    #[test]
    fn test_guard_keeps_eval_mode_if_it_was_eval() {
        let mut model = Flagged { training: false };
        drop(EvalModeGuard::acquire(&mut model));
        assert!(!model.training);
    }

    #[test]
    fn test_guard_restores_on_panic() {
        let mut model = Flagged { training: true };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = EvalModeGuard::acquire(&mut model);
            panic!("metric blew up");
        }));
        assert!(result.is_err());
        assert!(model.training);
    }

    #[test]
    fn test_assemble_orders_per_mode() {
        let b = batch(true);
        let encoder = InputAssemblyMode::PretrainedEncoder.assemble(&b).unwrap();
        assert_eq!(encoder.len(), 3);
        assert_eq!(encoder[1], b.types.clone().unwrap());

        let cloze = InputAssemblyMode::Cloze.assemble(&b).unwrap();
        assert_eq!(cloze.len(), 5);
        assert_eq!(cloze[3], b.target.clone().unwrap());
        assert_eq!(cloze[4], b.logit_mask.clone().unwrap());

        let default = InputAssemblyMode::Default.assemble(&b).unwrap();
        assert_eq!(default.len(), 3);
        assert_eq!(default[1], b.position.clone().unwrap());
    }

    #[test]
    fn test_cloze_requires_target() {
        let err = InputAssemblyMode::Cloze.assemble(&batch(false)).unwrap_err();
        assert!(err.to_string().contains("target"));
    }

    #[test]
    fn test_from_flags() {
        assert_eq!(
            InputAssemblyMode::from_flags(true, true),
            InputAssemblyMode::PretrainedEncoder
        );
        assert_eq!(InputAssemblyMode::from_flags(false, true), InputAssemblyMode::Cloze);
        assert_eq!(InputAssemblyMode::from_flags(false, false), InputAssemblyMode::Default);
    }

    #[test]
    fn test_mode_serde_names() {
        let mode: InputAssemblyMode = serde_json::from_str("\"pretrained_encoder\"").unwrap();
        assert_eq!(mode, InputAssemblyMode::PretrainedEncoder);
    }
}
