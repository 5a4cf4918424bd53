use anyhow::Result;
use candle::{DType, Device, Tensor};
use candle_guidance_limiter::{cfg_combine, rescale_cfg, StepContext};

/// Deterministic, well-conditioned test data.
fn wave(shape: &[usize], phase: f32) -> Result<Tensor> {
    let len: usize = shape.iter().product();
    let data: Vec<f32> = (0..len).map(|i| (i as f32 * 0.37 + phase).sin()).collect();
    Ok(Tensor::from_vec(data, shape, &Device::Cpu)?)
}

fn step_context(shape: &[usize], sigma: f64, cond_scale: f64) -> Result<StepContext> {
    let cond = wave(shape, 0.0)?;
    let uncond = wave(shape, 1.3)?;
    let input = wave(shape, 2.9)?;
    let sigma = Tensor::full(sigma as f32, (shape[0],), &Device::Cpu)?;
    Ok(StepContext::new(cond, uncond, input, sigma, cond_scale)?)
}

fn max_abs_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
    Ok((a - b)?.abs()?.max_all()?.to_vec0::<f32>()?)
}

/// Maps a model-space prediction into denoised-sample space at a uniform
/// sigma, mirroring the v-prediction relation the rescale works in.
fn to_denoised(t: &Tensor, x_orig: &Tensor, sigma: f64) -> Result<Tensor> {
    let x = (x_orig / (sigma * sigma + 1.))?;
    Ok(((x - (x_orig - t)?)? * ((sigma * sigma + 1.).sqrt() / sigma))?)
}

fn batch_std(t: &Tensor) -> Result<Tensor> {
    Ok(t.flatten_from(1)?.var_keepdim(1)?.sqrt()?)
}

#[test]
fn zero_rescale_matches_the_plain_blend() -> Result<()> {
    let ctx = step_context(&[1, 4, 8, 8], 1.0, 7.0)?;
    let rescaled = rescale_cfg(&ctx, 7.0, 0.0)?;
    let plain = cfg_combine(&ctx.uncond, &ctx.cond, 7.0)?;
    assert!(max_abs_diff(&rescaled, &plain)? < 1e-4);
    Ok(())
}

#[test]
fn full_rescale_matches_the_conditional_std() -> Result<()> {
    let ctx = step_context(&[2, 4, 8, 8], 1.0, 9.0)?;
    let out = rescale_cfg(&ctx, 9.0, 1.0)?;

    let out_denoised = to_denoised(&out, &ctx.input, 1.0)?;
    let cond_denoised = to_denoised(&ctx.cond, &ctx.input, 1.0)?;
    let diff = max_abs_diff(&batch_std(&out_denoised)?, &batch_std(&cond_denoised)?)?;
    assert!(diff < 1e-3, "std diff too large: {diff}");
    Ok(())
}

#[test]
fn rescale_is_the_identity_at_unit_cond_scale() -> Result<()> {
    // at cond_scale 1 the blend equals the conditional prediction, so the
    // std ratio is exactly 1 and the round trip recovers cond
    let ctx = step_context(&[1, 4, 8, 8], 0.7, 1.0)?;
    let out = rescale_cfg(&ctx, 1.0, 1.0)?;
    assert!(max_abs_diff(&out, &ctx.cond)? < 1e-5);
    Ok(())
}

#[test]
fn half_rescale_keeps_the_output_shape_and_finite() -> Result<()> {
    let shape = [2usize, 4, 16, 16];
    let cond = Tensor::randn(0f32, 1f32, &shape[..], &Device::Cpu)?;
    let uncond = Tensor::randn(0f32, 1f32, &shape[..], &Device::Cpu)?;
    let input = Tensor::randn(0f32, 1f32, &shape[..], &Device::Cpu)?;
    let sigma = Tensor::full(1f32, (2,), &Device::Cpu)?;
    let ctx = StepContext::new(cond, uncond, input, sigma, 7.5)?;

    let out = rescale_cfg(&ctx, 7.5, 0.5)?;
    assert_eq!(out.dims(), &shape);
    for v in out.flatten_all()?.to_vec1::<f32>()? {
        assert!(v.is_finite(), "non-finite value in rescaled output: {v}");
    }
    Ok(())
}

#[test]
fn rescale_is_skipped_at_zero_noise_level() -> Result<()> {
    let ctx = step_context(&[1, 4, 8, 8], 0.0, 7.0)?;
    let out = rescale_cfg(&ctx, 7.0, 0.5)?;
    let plain = cfg_combine(&ctx.uncond, &ctx.cond, 7.0)?;
    assert_eq!(
        out.flatten_all()?.to_vec1::<f32>()?,
        plain.flatten_all()?.to_vec1::<f32>()?
    );
    Ok(())
}

#[test]
fn rescale_rejects_an_out_of_range_weight() -> Result<()> {
    let ctx = step_context(&[1, 4, 8, 8], 1.0, 7.0)?;
    assert!(rescale_cfg(&ctx, 7.0, 1.5).is_err());
    assert!(rescale_cfg(&ctx, 7.0, -0.5).is_err());
    Ok(())
}

#[test]
fn rescale_output_dtype_follows_the_input() -> Result<()> {
    let ctx = step_context(&[1, 4, 8, 8], 1.0, 7.0)?;
    let out = rescale_cfg(&ctx, 7.0, 0.5)?;
    assert_eq!(out.dtype(), DType::F32);
    Ok(())
}
