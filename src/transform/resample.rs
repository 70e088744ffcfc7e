use nalgebra::{Matrix3, Point3, Vector3};
use ndarray::{ArrayD, IxDyn};
use rayon::prelude::*;
use snafu::{ensure, ResultExt, Snafu};
use std::fmt;

use crate::errors::GeometryError;
use crate::transform::AffineTransform;
use crate::volume::{Volume, SPATIAL_AXES};

pub const DEFAULT_FILL_VALUE: f32 = 0.0;

/// Fractional indices this close outside the grid still count as inside
const BOUNDS_TOLERANCE: f64 = 1e-6;
/// Half-width of the single sample along a length-one axis
const SINGLETON_HALF_WIDTH: f64 = 0.5;
const MAX_RANK: usize = SPATIAL_AXES + 1;

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Interpolation {
    Nearest,
    #[default]
    Trilinear,
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let interpolation_str = match self {
            Interpolation::Nearest => "nearest",
            Interpolation::Trilinear => "trilinear",
        };
        write!(f, "{interpolation_str}")
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ResampleError {
    #[snafu(display(
        "dimension mismatch: {} volume has {} axes, expected {} or {}",
        role,
        ndim,
        SPATIAL_AXES,
        MAX_RANK
    ))]
    UnsupportedRank { role: &'static str, ndim: usize },

    #[snafu(display(
        "dimension mismatch: moving volume has {} channels, fixed volume has {}",
        moving,
        fixed
    ))]
    ChannelMismatch { moving: usize, fixed: usize },

    #[snafu(display("cannot resample: {}", source))]
    Geometry { source: GeometryError },

    #[snafu(display("cannot build output of shape {:?}", shape))]
    OutputShape {
        shape: Vec<usize>,
        source: ndarray::ShapeError,
    },
}

impl ResampleError {
    /// Whether the error concerns array dimensions rather than geometry
    pub fn is_dimension_mismatch(&self) -> bool {
        matches!(
            self,
            ResampleError::UnsupportedRank { .. } | ResampleError::ChannelMismatch { .. }
        )
    }
}

/// Resamples a moving volume onto the grid of a fixed volume
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resampler {
    pub interpolation: Interpolation,
    pub fill_value: f32,
}

impl Default for Resampler {
    fn default() -> Self {
        Resampler {
            interpolation: Interpolation::default(),
            fill_value: DEFAULT_FILL_VALUE,
        }
    }
}

impl Resampler {
    pub fn new(interpolation: Interpolation, fill_value: f32) -> Self {
        Resampler {
            interpolation,
            fill_value,
        }
    }

    /// Sample `moving` on `fixed`'s grid, where `transform` maps moving world
    /// coordinates to fixed world coordinates.
    ///
    /// The output has `fixed`'s spatial shape and affine and `moving`'s
    /// channels. Samples that fall outside `moving` take the fill value.
    pub fn resample(
        &self,
        moving: &Volume,
        fixed: &Volume,
        transform: &AffineTransform,
    ) -> Result<Volume, ResampleError> {
        ensure!(
            moving.ndim() <= MAX_RANK,
            UnsupportedRankSnafu {
                role: "moving",
                ndim: moving.ndim()
            }
        );
        ensure!(
            fixed.ndim() <= MAX_RANK,
            UnsupportedRankSnafu {
                role: "fixed",
                ndim: fixed.ndim()
            }
        );
        if let (Some(moving_channels), Some(fixed_channels)) = (moving.channels(), fixed.channels()) {
            ensure!(
                moving_channels == fixed_channels,
                ChannelMismatchSnafu {
                    moving: moving_channels,
                    fixed: fixed_channels
                }
            );
        }

        // Fixed voxel index to moving voxel index
        let index_map = moving
            .affine()
            .inverse()
            .and_then(|moving_inverse| {
                Ok(moving_inverse
                    .compose(&transform.inverse()?)
                    .compose(fixed.affine()))
            })
            .context(GeometrySnafu)?;
        let linear = index_map.linear();
        let offset = index_map.translation_part();

        let samples = moving.samples();
        let sampler = Sampler {
            samples: &samples,
            shape: moving.spatial_shape(),
            channels: moving.channels().unwrap_or(1),
            fill_value: self.fill_value,
            interpolation: self.interpolation,
        };

        let [fx, fy, fz] = fixed.spatial_shape();
        let channels = sampler.channels;
        let slab_len = fy * fz * channels;
        let mut output = vec![self.fill_value; fx * slab_len];
        output
            .par_chunks_mut(slab_len)
            .enumerate()
            .for_each(|(x, slab)| {
                for (voxel, values) in slab.chunks_mut(channels).enumerate() {
                    let (y, z) = (voxel / fz, voxel % fz);
                    let index = map_index(&linear, &offset, x, y, z);
                    sampler.sample(&index, values);
                }
            });

        let mut shape = vec![fx, fy, fz];
        shape.extend(moving.channels());
        let data = ArrayD::from_shape_vec(IxDyn(&shape), output)
            .context(OutputShapeSnafu { shape: shape.clone() })?;
        tracing::debug!(
            "Resampled {:?} onto {:?} with {} interpolation",
            moving.data().shape(),
            shape,
            self.interpolation
        );
        Volume::new(data, *fixed.affine()).context(GeometrySnafu)
    }
}

/// Resample with an explicit interpolation mode and fill value
pub fn resample(
    moving: &Volume,
    fixed: &Volume,
    transform: &AffineTransform,
    interpolation: Interpolation,
    fill_value: f32,
) -> Result<Volume, ResampleError> {
    Resampler::new(interpolation, fill_value).resample(moving, fixed, transform)
}

fn map_index(linear: &Matrix3<f64>, offset: &Vector3<f64>, x: usize, y: usize, z: usize) -> Point3<f64> {
    Point3::from(linear * Vector3::new(x as f64, y as f64, z as f64) + offset)
}

/// Neighbouring samples and the weight of the upper one along one axis
#[derive(Debug, Clone, Copy, PartialEq)]
struct AxisWeights {
    lower: usize,
    upper: usize,
    weight: f64,
}

impl AxisWeights {
    fn new(position: f64, len: usize) -> Option<Self> {
        if len == 1 {
            return (position.abs() <= SINGLETON_HALF_WIDTH).then_some(AxisWeights {
                lower: 0,
                upper: 0,
                weight: 0.0,
            });
        }
        let last = (len - 1) as f64;
        if position < -BOUNDS_TOLERANCE || position > last + BOUNDS_TOLERANCE {
            return None;
        }
        let position = position.clamp(0.0, last);
        let lower = (position.floor() as usize).min(len - 2);
        Some(AxisWeights {
            lower,
            upper: lower + 1,
            weight: position - lower as f64,
        })
    }
}

struct Sampler<'a> {
    samples: &'a [f32],
    shape: [usize; 3],
    channels: usize,
    fill_value: f32,
    interpolation: Interpolation,
}

impl Sampler<'_> {
    fn offset(&self, x: usize, y: usize, z: usize) -> usize {
        ((x * self.shape[1] + y) * self.shape[2] + z) * self.channels
    }

    /// Write the sample at a fractional moving index into `values`, one per channel
    fn sample(&self, index: &Point3<f64>, values: &mut [f32]) {
        match self.interpolation {
            Interpolation::Nearest => self.nearest(index, values),
            Interpolation::Trilinear => self.trilinear(index, values),
        }
    }

    fn nearest(&self, index: &Point3<f64>, values: &mut [f32]) {
        let mut rounded = [0usize; 3];
        for (axis, target) in rounded.iter_mut().enumerate() {
            let position = index[axis].round();
            if position < 0.0 || position > (self.shape[axis] - 1) as f64 {
                values.fill(self.fill_value);
                return;
            }
            *target = position as usize;
        }
        let start = self.offset(rounded[0], rounded[1], rounded[2]);
        values.copy_from_slice(&self.samples[start..start + self.channels]);
    }

    fn trilinear(&self, index: &Point3<f64>, values: &mut [f32]) {
        let (Some(wx), Some(wy), Some(wz)) = (
            AxisWeights::new(index.x, self.shape[0]),
            AxisWeights::new(index.y, self.shape[1]),
            AxisWeights::new(index.z, self.shape[2]),
        ) else {
            values.fill(self.fill_value);
            return;
        };

        for (channel, value) in values.iter_mut().enumerate() {
            let mut total = 0.0;
            for (x, fx) in [(wx.lower, 1.0 - wx.weight), (wx.upper, wx.weight)] {
                for (y, fy) in [(wy.lower, 1.0 - wy.weight), (wy.upper, wy.weight)] {
                    for (z, fz) in [(wz.lower, 1.0 - wz.weight), (wz.upper, wz.weight)] {
                        let factor = fx * fy * fz;
                        if factor != 0.0 {
                            total += factor * f64::from(self.samples[self.offset(x, y, z) + channel]);
                        }
                    }
                }
            }
            *value = total as f32;
        }
    }
}
