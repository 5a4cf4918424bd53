//! A guider for custom sampling loops, limiting cfg to a sigma interval.
use candle::{bail, Result, Tensor};

use crate::guidance::{limit_scale, validate_sigma_bound};

/// The sampling backend a guider drives: a denoising model together with its
/// noise schedule and a cfg-aware sampling primitive.
pub trait SamplingModel {
    /// Opaque conditioning payload, passed through unchanged.
    type Cond;

    /// The noise level of the model's schedule at the given timestep.
    fn sigma(&self, timestep: usize) -> Result<f64>;

    /// Runs the model on `x` at `timestep` and blends the conditional and
    /// unconditional predictions with the given cfg scale.
    fn sampling_function(
        &self,
        x: &Tensor,
        timestep: usize,
        negative: Option<&Self::Cond>,
        positive: Option<&Self::Cond>,
        cfg: f64,
        seed: Option<u64>,
    ) -> Result<Tensor>;
}

/// The capability a custom sampling loop consumes: one noise prediction per
/// step.
pub trait Guider {
    fn predict_noise(&self, x: &Tensor, timestep: usize, seed: Option<u64>) -> Result<Tensor>;
}

/// A [`Guider`] applying classifier-free guidance only within the sigma
/// interval `(sigma_end, sigma_start]`.
///
/// All fields are fixed at construction; no state is carried across steps.
/// There is no rescale on this path.
pub struct CfgLimiterGuider<M: SamplingModel> {
    model: M,
    positive: M::Cond,
    negative: M::Cond,
    cfg: f64,
    sigma_start: f64,
    sigma_end: f64,
}

impl<M: SamplingModel> CfgLimiterGuider<M> {
    /// Creates a guider, rejecting a negative cfg or invalid sigma bounds.
    pub fn new(
        model: M,
        positive: M::Cond,
        negative: M::Cond,
        cfg: f64,
        sigma_start: f64,
        sigma_end: f64,
    ) -> Result<Self> {
        if cfg < 0. {
            bail!("cfg must be non-negative, got {cfg}")
        }
        validate_sigma_bound("sigma_start", sigma_start)?;
        validate_sigma_bound("sigma_end", sigma_end)?;
        Ok(Self {
            model,
            positive,
            negative,
            cfg,
            sigma_start,
            sigma_end,
        })
    }

    pub fn cfg(&self) -> f64 {
        self.cfg
    }
}

impl<M: SamplingModel> Guider for CfgLimiterGuider<M> {
    fn predict_noise(&self, x: &Tensor, timestep: usize, seed: Option<u64>) -> Result<Tensor> {
        let sigma = self.model.sigma(timestep)?;
        let cfg = limit_scale(sigma, self.sigma_start, self.sigma_end, self.cfg);
        self.model.sampling_function(
            x,
            timestep,
            Some(&self.negative),
            Some(&self.positive),
            cfg,
            seed,
        )
    }
}
