//! Guidance scale limiting and the classifier-free guidance blend.
use candle::{bail, Result, Tensor};

/// The configuration for interval-limited guidance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuidanceConfig {
    /// Guidance is disabled while sigma is above this value, -1 disables the
    /// bound.
    pub sigma_start: f64,
    /// Guidance is disabled once sigma reaches this value, -1 disables the
    /// bound.
    pub sigma_end: f64,
    /// Blend weight of the renormalized cfg output, in [0, 1]. 0 keeps the
    /// plain cfg blend.
    pub cfg_rescale: f64,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            sigma_start: 5.42,
            sigma_end: 0.28,
            cfg_rescale: 0.,
        }
    }
}

impl GuidanceConfig {
    /// Creates a config, rejecting out-of-range values. Sigma bounds must be
    /// either -1 (disabled) or non-negative, `cfg_rescale` must lie in
    /// [0, 1].
    pub fn new(sigma_start: f64, sigma_end: f64, cfg_rescale: f64) -> Result<Self> {
        validate_sigma_bound("sigma_start", sigma_start)?;
        validate_sigma_bound("sigma_end", sigma_end)?;
        if !(0. ..=1.).contains(&cfg_rescale) {
            bail!("cfg_rescale must be in [0, 1], got {cfg_rescale}")
        }
        Ok(Self {
            sigma_start,
            sigma_end,
            cfg_rescale,
        })
    }

    /// The effective guidance scale at the given noise level.
    pub fn scale_at(&self, sigma: f64, requested: f64) -> f64 {
        limit_scale(sigma, self.sigma_start, self.sigma_end, requested)
    }
}

pub(crate) fn validate_sigma_bound(name: &str, value: f64) -> Result<()> {
    if value != -1. && value < 0. {
        bail!("{name} must be -1 (disabled) or non-negative, got {value}")
    }
    Ok(())
}

/// Limits the guidance scale to the sigma interval `(sigma_end, sigma_start]`.
///
/// Outside the interval the no-guidance scale 1 is returned, inside it the
/// requested scale passes through unchanged. Each bound is checked
/// independently and is skipped when set to -1; note the asymmetry: a sigma
/// equal to `sigma_start` keeps guidance active while one equal to
/// `sigma_end` turns it off.
pub fn limit_scale(sigma: f64, sigma_start: f64, sigma_end: f64, scale: f64) -> f64 {
    if sigma_start >= 0. && sigma > sigma_start {
        return 1.;
    }
    if sigma_end >= 0. && sigma <= sigma_end {
        return 1.;
    }
    scale
}

/// The classifier-free guidance blend `uncond + (cond - uncond) * scale`.
///
/// A scale of 1 returns `cond` and a scale of 0 returns `uncond`, both
/// bit-exactly.
pub fn cfg_combine(uncond: &Tensor, cond: &Tensor, scale: f64) -> Result<Tensor> {
    if cond.dims() != uncond.dims() {
        bail!(
            "incompatible shapes in cfg blend: cond {:?}, uncond {:?}",
            cond.shape(),
            uncond.shape()
        )
    }
    if scale == 1. {
        return Ok(cond.clone());
    }
    if scale == 0. {
        return Ok(uncond.clone());
    }
    uncond + ((cond - uncond)? * scale)?
}
