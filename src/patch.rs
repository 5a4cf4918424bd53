//! Installing interval-limited guidance on an existing model handle.
use std::sync::Arc;

use candle::{Result, Tensor};

use crate::guidance::{cfg_combine, GuidanceConfig};
use crate::rescale::rescale_cfg;
use crate::step::StepContext;

/// A per-step guidance callback: the host sampling loop invokes it once per
/// denoising step with the current model state.
pub trait CfgFunction {
    fn guide(&self, ctx: &StepContext) -> Result<Tensor>;
}

/// Interval-limited cfg, optionally rescaled.
///
/// Pure strategy object: the config is captured at construction and never
/// mutated, every call is a function of the [`StepContext`] alone.
#[derive(Debug, Clone, Copy)]
pub struct LimitedCfg {
    config: GuidanceConfig,
}

impl LimitedCfg {
    pub fn new(config: GuidanceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GuidanceConfig {
        &self.config
    }
}

impl CfgFunction for LimitedCfg {
    /// Gating inspects only the first batch element's sigma; callers must
    /// keep sigma uniform across the batch.
    fn guide(&self, ctx: &StepContext) -> Result<Tensor> {
        let scale = self.config.scale_at(ctx.first_sigma()?, ctx.cond_scale);
        if self.config.cfg_rescale > 0. {
            rescale_cfg(ctx, scale, self.config.cfg_rescale)
        } else {
            cfg_combine(&ctx.uncond, &ctx.cond, scale)
        }
    }
}

/// A model handle that accepts a per-step cfg callback in its sampling
/// configuration.
pub trait PatchableModel: Clone {
    fn set_cfg_function(&mut self, cfg_function: Arc<dyn CfgFunction + Send + Sync>);
}

/// Returns a clone of `model` with interval-limited cfg installed; the handle
/// passed in is left unmodified.
pub fn patch_model<M: PatchableModel>(model: &M, config: GuidanceConfig) -> M {
    let mut patched = model.clone();
    patched.set_cfg_function(Arc::new(LimitedCfg::new(config)));
    patched
}
