//! Variance renormalization of the guided output ("rescale cfg").
use candle::{bail, Result, Tensor};

use crate::guidance::cfg_combine;
use crate::step::StepContext;

/// Classifier-free guidance with the guided output renormalized towards the
/// conditional prediction's statistics.
///
/// The predictions must come from a v-prediction model: they are mapped into
/// denoised-sample space through the `(sigma² + 1)` relation, blended and
/// renormalized there, then mapped back. The behavior is unspecified for
/// other parameterizations. `cfg_rescale` blends between the renormalized
/// result (1) and the plain cfg blend (0).
///
/// The denoised-space mapping divides by sigma, so at a zero noise level the
/// transform is undefined; if any batch element's sigma is zero the rescale
/// is skipped and the plain blend is returned instead.
pub fn rescale_cfg(ctx: &StepContext, cond_scale: f64, cfg_rescale: f64) -> Result<Tensor> {
    if !(0. ..=1.).contains(&cfg_rescale) {
        bail!("cfg_rescale must be in [0, 1], got {cfg_rescale}")
    }
    if ctx.sigma_values()?.iter().any(|&sigma| sigma <= 0.) {
        return cfg_combine(&ctx.uncond, &ctx.cond, cond_scale);
    }

    let x_orig = &ctx.input;
    let mut dims = vec![1; x_orig.rank()];
    dims[0] = x_orig.dim(0)?;
    let sigma = ctx.sigma.to_dtype(x_orig.dtype())?.reshape(dims)?;
    let sigma_sq_one = (sigma.sqr()? + 1.)?;

    // map both predictions into denoised-sample space
    let x = x_orig.broadcast_div(&sigma_sq_one)?;
    let to_denoised = (sigma_sq_one.sqrt()? / &sigma)?;
    let cond = (&x - (x_orig - &ctx.cond)?)?.broadcast_mul(&to_denoised)?;
    let uncond = (&x - (x_orig - &ctx.uncond)?)?.broadcast_mul(&to_denoised)?;

    let x_cfg = cfg_combine(&uncond, &cond, cond_scale)?;

    // renormalize the blend to the conditional prediction's std
    let ro_pos = batch_std(&cond)?;
    let ro_cfg = batch_std(&x_cfg)?;
    let x_rescaled = x_cfg.broadcast_mul(&(ro_pos / ro_cfg)?)?;
    let x_final = ((x_rescaled * cfg_rescale)? + (x_cfg * (1. - cfg_rescale))?)?;

    // map back to the model's native output space
    let from_denoised = (&sigma / sigma_sq_one.sqrt()?)?;
    x_orig - (x - x_final.broadcast_mul(&from_denoised)?)?
}

/// Per-batch-element standard deviation over all non-batch dimensions, with
/// Bessel's correction, keeping a broadcastable shape.
fn batch_std(t: &Tensor) -> Result<Tensor> {
    let mut dims = vec![1; t.rank()];
    dims[0] = t.dim(0)?;
    t.flatten_from(1)?.var_keepdim(1)?.sqrt()?.reshape(dims)
}
