//! Batch processing of warp-preprocessed electron tomography tilt series:
//! catalog construction from warp's metadata, GPU-exclusive AreTomo
//! alignment and reconstruction, half-stack preparation and topaz
//! denoising, sequenced as a fixed multi-stage pipeline.

pub mod aretomo;
pub mod catalog;
pub mod context;
pub mod error;
pub mod gpu;
pub mod halves;
pub mod mdoc_tilt;
pub mod mrc;
pub mod paths;
pub mod pipeline;
pub mod runner;
pub mod series;
pub mod topaz;
pub mod warp;

pub use error::{Result, TomoError};
