//! Typed per-step state handed to a guidance function.
use candle::{bail, DType, Result, Tensor};

/// The model state for one denoising step.
///
/// All three tensors share the same shape with a leading batch dimension;
/// `sigma` holds one noise level per batch element.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// The conditional model prediction.
    pub cond: Tensor,
    /// The unconditional model prediction.
    pub uncond: Tensor,
    /// The raw model input at this step.
    pub input: Tensor,
    /// Per-batch-element noise level, rank 1.
    pub sigma: Tensor,
    /// The guidance scale requested by the caller.
    pub cond_scale: f64,
}

impl StepContext {
    pub fn new(
        cond: Tensor,
        uncond: Tensor,
        input: Tensor,
        sigma: Tensor,
        cond_scale: f64,
    ) -> Result<Self> {
        if cond.dims() != uncond.dims() || cond.dims() != input.dims() {
            bail!(
                "incompatible shapes in step context: cond {:?}, uncond {:?}, input {:?}",
                cond.shape(),
                uncond.shape(),
                input.shape()
            )
        }
        if cond.rank() < 2 {
            bail!(
                "step context tensors need a batch and at least one feature dimension, got {:?}",
                cond.shape()
            )
        }
        let batch = cond.dim(0)?;
        if batch == 0 {
            bail!("empty batch in step context")
        }
        if sigma.rank() != 1 || sigma.dim(0)? != batch {
            bail!(
                "sigma must hold one value per batch element, got {:?} for batch size {batch}",
                sigma.shape()
            )
        }
        Ok(Self {
            cond,
            uncond,
            input,
            sigma,
            cond_scale,
        })
    }

    /// The representative noise level used for gating, taken from the first
    /// batch element.
    pub fn first_sigma(&self) -> Result<f64> {
        match self.sigma_values()?.first() {
            Some(sigma) => Ok(*sigma),
            None => bail!("empty sigma tensor in step context"),
        }
    }

    pub(crate) fn sigma_values(&self) -> Result<Vec<f64>> {
        self.sigma.to_dtype(DType::F64)?.to_vec1::<f64>()
    }
}
