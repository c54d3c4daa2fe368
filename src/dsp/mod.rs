//! DSP Stages
//!
//! Every stage of the voice chain. All stages implement [`ProcessingNode`]
//! for uniform processing, parameter updates and disposal.

pub mod biquad;
mod compressor;
mod delay;
mod distortion;
mod enhancer;
mod filter;
mod limiter;
pub mod mastering;
mod meter;
mod node;
mod noise_reduction;
mod reverb;

pub use compressor::{gain_change_db, Compressor, CompressorParams, Dynamics};
pub use delay::Delay;
pub use distortion::{waveshape, Distortion};
pub use enhancer::{AdaptiveEnhancer, BasicEnhancer, EnhancementAmounts};
pub use filter::{PassFilter, PassKind, PASS_FILTER_Q};
pub use limiter::{SafetyLimiter, SAFETY_CEILING_DB};
pub use mastering::{MasteringChain, MasteringConfig, MasteringMetrics};
pub use meter::{MeterHandle, MeterReading, MeterTap};
pub use node::{time_to_coeff, NodeContext, ProcessingNode, SmoothedParam, StageKind};
pub use noise_reduction::{
    band_threshold, estimate_noise_floor, expander_gain, NoiseReduction, BANDS, BAND_SENSITIVITY,
    MIN_NOISE_FLOOR,
};
pub use reverb::Reverb;
