//! Interval-limited classifier-free guidance for diffusion sampling.
//!
//! Classifier-free guidance distorts samples the most at the extremes of the
//! noise schedule. This crate restricts guidance amplification to a
//! configurable sigma interval and can renormalize the guided output
//! statistics to counter oversaturation at large guidance scales.
//!
//! Based on "Applying Guidance in a Limited Interval Improves Sample and
//! Distribution Quality in Diffusion Models", Kynkäänniemi et al., 2024.
//! https://arxiv.org/abs/2404.07724
//!
//! The rescale step follows "Common Diffusion Noise Schedules and Sample
//! Steps are Flawed", Lin et al., 2023. https://arxiv.org/abs/2305.08891
//!
//! Two integration shapes are provided: [`patch::patch_model`] installs a
//! per-step [`patch::CfgFunction`] on a cloneable model handle, and
//! [`guider::CfgLimiterGuider`] drives a custom sampling loop through the
//! [`guider::Guider`] capability.

pub mod guidance;
pub mod guider;
pub mod patch;
pub mod rescale;
pub mod step;

pub use guidance::{cfg_combine, limit_scale, GuidanceConfig};
pub use guider::{CfgLimiterGuider, Guider, SamplingModel};
pub use patch::{patch_model, CfgFunction, LimitedCfg, PatchableModel};
pub use rescale::rescale_cfg;
pub use step::StepContext;
