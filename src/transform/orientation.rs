use itertools::Itertools;
use nalgebra::Matrix4;
use ndarray::Axis;
use snafu::{ensure, Snafu};
use std::fmt;
use std::str::FromStr;

use crate::errors::GeometryError;
use crate::transform::AffineTransform;
use crate::volume::{Volume, SPATIAL_AXES};

/// Letters naming the positive (RAS) and negative direction of each world axis
const POSITIVE_LETTERS: [char; 3] = ['R', 'A', 'S'];
const NEGATIVE_LETTERS: [char; 3] = ['L', 'P', 'I'];

#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(display(
    "invalid axis convention '{}': expected R|L, A|P and S|I in that order (e.g. LAS)",
    code
))]
pub struct ConventionError {
    code: String,
}

/// Anatomical axis convention, e.g. `RAS` or `LAS`.
///
/// Each letter picks the positive direction of one world axis. Conventions are
/// expressed relative to RAS by the set of world axes they flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AxisConvention {
    flipped: [bool; 3],
}

impl AxisConvention {
    pub const RAS: AxisConvention = AxisConvention {
        flipped: [false, false, false],
    };
    /// Radiological convention
    pub const LAS: AxisConvention = AxisConvention {
        flipped: [true, false, false],
    };
    /// DICOM patient convention
    pub const LPS: AxisConvention = AxisConvention {
        flipped: [true, true, false],
    };

    /// Whether the positive direction of `world_axis` is opposite to RAS
    pub fn is_flipped(&self, world_axis: usize) -> bool {
        self.flipped[world_axis]
    }
}

impl Default for AxisConvention {
    fn default() -> Self {
        AxisConvention::LAS
    }
}

impl FromStr for AxisConvention {
    type Err = ConventionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let letters = s.trim().to_ascii_uppercase().chars().collect::<Vec<_>>();
        ensure!(letters.len() == 3, ConventionSnafu { code: s });

        let mut flipped = [false; 3];
        for (axis, letter) in letters.iter().enumerate() {
            flipped[axis] = match letter {
                l if *l == POSITIVE_LETTERS[axis] => false,
                l if *l == NEGATIVE_LETTERS[axis] => true,
                _ => return ConventionSnafu { code: s }.fail(),
            };
        }
        Ok(AxisConvention { flipped })
    }
}

impl fmt::Display for AxisConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for axis in 0..3 {
            let letter = if self.flipped[axis] {
                NEGATIVE_LETTERS[axis]
            } else {
                POSITIVE_LETTERS[axis]
            };
            write!(f, "{letter}")?;
        }
        Ok(())
    }
}

/// Which array axis encodes a world axis, and in which polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisOrientation {
    pub array_axis: usize,
    pub flipped: bool,
}

/// Orientation of an array relative to a convention, indexed by world axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrientationCode([AxisOrientation; 3]);

impl OrientationCode {
    pub fn axes(&self) -> &[AxisOrientation; 3] {
        &self.0
    }

    /// Re-express an RAS-relative code relative to another convention
    pub fn retarget(&self, convention: AxisConvention) -> OrientationCode {
        let mut axes = self.0;
        for (world_axis, axis) in axes.iter_mut().enumerate() {
            if convention.is_flipped(world_axis) {
                axis.flipped = !axis.flipped;
            }
        }
        OrientationCode(axes)
    }

    /// Whether the array already runs along the world axes in positive order
    pub fn is_canonical(&self) -> bool {
        self.0
            .iter()
            .enumerate()
            .all(|(world_axis, axis)| axis.array_axis == world_axis && !axis.flipped)
    }

    /// RAS-relative letters naming the direction each array axis points to
    pub fn axis_codes(&self) -> String {
        let mut codes = ['?'; 3];
        for (world_axis, axis) in self.0.iter().enumerate() {
            codes[axis.array_axis] = if axis.flipped {
                NEGATIVE_LETTERS[world_axis]
            } else {
                POSITIVE_LETTERS[world_axis]
            };
        }
        codes.iter().collect()
    }
}

/// RAS-relative orientation of a voxel-to-world affine.
///
/// Each world axis is assigned the array axis whose normalized direction has
/// the largest component along it. Oblique affines resolve to their dominant
/// component; any residual rotation stays in the affine.
pub fn orientation(affine: &AffineTransform) -> Result<OrientationCode, GeometryError> {
    if affine.is_singular() {
        return Err(GeometryError::SingularAffine {
            determinant: affine.determinant(),
        });
    }
    let linear = affine.linear();
    let norms = affine.column_norms();

    let mut axes = [AxisOrientation {
        array_axis: 0,
        flipped: false,
    }; 3];
    for (world_axis, axis) in axes.iter_mut().enumerate() {
        let component = |d: usize| linear[(world_axis, d)] / norms[d];
        let array_axis = (0..SPATIAL_AXES)
            .max_by(|&a, &b| component(a).abs().total_cmp(&component(b).abs()))
            .unwrap_or(world_axis);
        *axis = AxisOrientation {
            array_axis,
            flipped: component(array_axis) < 0.0,
        };
    }

    if let Some((first, second)) = (0..3)
        .tuple_combinations()
        .find(|&(a, b)| axes[a].array_axis == axes[b].array_axis)
    {
        return Err(GeometryError::AmbiguousOrientation {
            first_world_axis: first,
            second_world_axis: second,
            array_axis: axes[first].array_axis,
        });
    }
    Ok(OrientationCode(axes))
}

/// Axis codes of an affine, e.g. `"LAS"` for a radiological volume
pub fn axis_codes(affine: &AffineTransform) -> Result<String, GeometryError> {
    Ok(orientation(affine)?.axis_codes())
}

/// Maps a new voxel index to the old one for a reorientation
fn reorientation_operator(code: &OrientationCode, shape: [usize; 3]) -> Matrix4<f64> {
    let mut operator = Matrix4::zeros();
    operator[(3, 3)] = 1.0;
    for (new_axis, axis) in code.axes().iter().enumerate() {
        let old_axis = axis.array_axis;
        if axis.flipped {
            operator[(old_axis, new_axis)] = -1.0;
            operator[(old_axis, 3)] = (shape[old_axis] - 1) as f64;
        } else {
            operator[(old_axis, new_axis)] = 1.0;
        }
    }
    operator
}

/// Reorder and flip the spatial axes of a volume so that array axis `i` runs
/// along the positive direction of world axis `i` in `target`.
///
/// The affine is rewritten so that every voxel keeps its world position.
/// Trailing non-spatial axes are carried through unchanged.
pub fn canonicalize(volume: &Volume, target: AxisConvention) -> Result<Volume, GeometryError> {
    let source = orientation(volume.affine())?;
    let code = source.retarget(target);
    if code.is_canonical() {
        return Ok(volume.clone());
    }

    let permutation = code
        .axes()
        .iter()
        .map(|axis| axis.array_axis)
        .chain(SPATIAL_AXES..volume.ndim())
        .collect::<Vec<_>>();
    let mut view = volume.data().view().permuted_axes(permutation.as_slice());
    for (new_axis, axis) in code.axes().iter().enumerate() {
        if axis.flipped {
            view.invert_axis(Axis(new_axis));
        }
    }
    let data = view.as_standard_layout().into_owned();

    let operator = reorientation_operator(&code, volume.spatial_shape());
    let affine = AffineTransform::from_matrix(volume.affine().matrix() * operator)?;
    tracing::debug!(
        "Reoriented {} to {} with permutation {:?}",
        source.axis_codes(),
        target,
        permutation
    );
    Volume::new(data, affine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;
    use ndarray::{Array3, Array4, ArrayD, IxDyn};
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use rstest::rstest;

    use crate::transform::Transform;

    fn random_affine(rng: &mut StdRng) -> AffineTransform {
        let mut permutation = [0usize, 1, 2];
        permutation.shuffle(rng);
        let mut rows = [[0.0; 4]; 4];
        for (array_axis, &world_axis) in permutation.iter().enumerate() {
            let sign = if rng.gen::<bool>() { 1.0 } else { -1.0 };
            rows[world_axis][array_axis] = sign * rng.gen_range(0.5..3.0);
        }
        for row in rows.iter_mut().take(3) {
            row[3] = rng.gen_range(-100.0..100.0);
        }
        rows[3][3] = 1.0;
        AffineTransform::from_rows(rows).unwrap()
    }

    fn random_volume(rng: &mut StdRng, shape: &[usize]) -> Volume {
        let len = shape.iter().product::<usize>();
        let samples = (0..len).map(|_| rng.gen::<f32>()).collect();
        let data = ArrayD::from_shape_vec(IxDyn(shape), samples).unwrap();
        Volume::new(data, random_affine(rng)).unwrap()
    }

    #[rstest]
    #[case("RAS", AxisConvention::RAS)]
    #[case("las", AxisConvention::LAS)]
    #[case("LPS", AxisConvention::LPS)]
    #[case("RPI", AxisConvention { flipped: [false, true, true] })]
    fn test_parse_convention(#[case] code: &str, #[case] expected: AxisConvention) {
        let convention = code.parse::<AxisConvention>().unwrap();
        assert_eq!(convention, expected);
        assert_eq!(convention.to_string(), code.to_ascii_uppercase());
    }

    #[rstest]
    #[case("LA")]
    #[case("ALS")]
    #[case("LASX")]
    #[case("XYZ")]
    fn test_parse_convention_invalid(#[case] code: &str) {
        assert!(code.parse::<AxisConvention>().is_err());
    }

    #[rstest]
    #[case([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]], "RAS")]
    #[case([[-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]], "LAS")]
    #[case([[-1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.0, 0.0, 1.0]], "LPS")]
    // Array axes run posterior, inferior, left
    #[case([[0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, -1.0, 0.0]], "PIL")]
    // 20 degree oblique rotation about z keeps its dominant components
    #[case([[0.9397, -0.3420, 0.0], [0.3420, 0.9397, 0.0], [0.0, 0.0, 1.0]], "RAS")]
    fn test_axis_codes(#[case] linear: [[f64; 3]; 3], #[case] expected: &str) {
        let mut rows = AffineTransform::identity().rows();
        for r in 0..3 {
            rows[r][..3].copy_from_slice(&linear[r]);
        }
        let affine = AffineTransform::from_rows(rows).unwrap();
        assert_eq!(axis_codes(&affine).unwrap(), expected);
    }

    #[test]
    fn test_pil_to_las() {
        // Array axes (P, I, L) relative to RAS
        let affine = AffineTransform::from_rows([
            [0.0, 0.0, -2.0, 10.0],
            [-1.0, 0.0, 0.0, 20.0],
            [0.0, -3.0, 0.0, 30.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
        .unwrap();
        let code = orientation(&affine).unwrap();
        assert_eq!(
            code.axes(),
            &[
                AxisOrientation { array_axis: 2, flipped: true },
                AxisOrientation { array_axis: 0, flipped: true },
                AxisOrientation { array_axis: 1, flipped: true },
            ]
        );
        // Relative to LAS the left-pointing axis is no longer flipped
        assert_eq!(
            code.retarget(AxisConvention::LAS).axes()[0],
            AxisOrientation { array_axis: 2, flipped: false }
        );

        let data = Array3::from_shape_fn((4, 5, 6), |(p, i, l)| (p * 100 + i * 10 + l) as f32);
        let volume = Volume::new(data.into_dyn(), affine).unwrap();
        let canonical = canonicalize(&volume, AxisConvention::LAS).unwrap();

        assert_eq!(canonical.spatial_shape(), [6, 4, 5]);
        assert_eq!(axis_codes(canonical.affine()).unwrap(), "LAS");
        // New (l, a, s) = old (p = 3 - a, i = 4 - s, l)
        assert_eq!(canonical.data()[[2, 0, 0]], volume.data()[[3, 4, 2]]);
        assert_eq!(canonical.data()[[5, 3, 4]], volume.data()[[0, 0, 5]]);
        assert_eq!(canonical.spacing(), crate::metadata::Spacing::new(2.0, 1.0, 3.0));
    }

    #[rstest]
    #[case(AxisConvention::RAS)]
    #[case(AxisConvention::LAS)]
    #[case(AxisConvention::LPS)]
    fn test_idempotent(#[case] target: AxisConvention) {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10 {
            let volume = random_volume(&mut rng, &[3, 4, 5]);
            let once = canonicalize(&volume, target).unwrap();
            let twice = canonicalize(&once, target).unwrap();
            assert_eq!(once, twice);
            assert!(orientation(once.affine()).unwrap().retarget(target).is_canonical());
            assert_eq!(axis_codes(once.affine()).unwrap(), target.to_string());
        }
    }

    #[test]
    fn test_world_positions_preserved() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..10 {
            let volume = random_volume(&mut rng, &[3, 4, 5]);
            let canonical = canonicalize(&volume, AxisConvention::LAS).unwrap();
            let inverse = canonical.affine().inverse().unwrap();

            for ((i, j, k), value) in volume
                .data()
                .view()
                .into_dimensionality::<ndarray::Ix3>()
                .unwrap()
                .indexed_iter()
            {
                let world = volume.voxel_to_world([i as f64, j as f64, k as f64]);
                let index = inverse.apply(&world);
                let rounded = index.map(f64::round);
                assert!((index - rounded).norm() < 1e-6);

                let new_index = [rounded.x as usize, rounded.y as usize, rounded.z as usize];
                let moved = canonical.voxel_to_world(new_index.map(|v| v as f64));
                assert!((moved - world).norm() < 1e-6);
                assert_eq!(canonical.data()[&new_index[..]], *value);
            }
        }
    }

    #[test]
    fn test_channels_carried() {
        let affine = AffineTransform::from_rows([
            [0.0, 1.0, 0.0, 0.0],
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, -1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
        .unwrap();
        let data = Array4::from_shape_fn((2, 3, 4, 2), |(x, y, z, c)| {
            (x * 1000 + y * 100 + z * 10 + c) as f32
        });
        let volume = Volume::new(data.into_dyn(), affine).unwrap();
        let canonical = canonicalize(&volume, AxisConvention::RAS).unwrap();

        assert_eq!(canonical.data().shape(), &[3, 2, 4, 2]);
        for c in 0..2 {
            // New (r, a, s) = old (a, r, 3 - s)
            assert_eq!(canonical.data()[[1, 0, 0, c]], volume.data()[[0, 1, 3, c]]);
            assert_eq!(canonical.data()[[2, 1, 3, c]], volume.data()[[1, 2, 0, c]]);
        }
        assert_eq!(
            canonical.voxel_to_world([0.0, 0.0, 0.0]),
            volume.voxel_to_world([0.0, 0.0, 3.0])
        );
        assert_eq!(canonical.voxel_to_world([0.0, 0.0, 0.0]), Point3::new(0.0, 0.0, -3.0));
    }

    #[test]
    fn test_singular_affine() {
        let mut rows = AffineTransform::identity().rows();
        rows[2][2] = 0.0;
        let volume = Volume::zeros(&[2, 2, 2], AffineTransform::from_rows(rows).unwrap()).unwrap();
        assert!(matches!(
            canonicalize(&volume, AxisConvention::LAS),
            Err(GeometryError::SingularAffine { .. })
        ));
    }

    #[test]
    fn test_ambiguous_orientation() {
        // Columns 0 and 1 both point mostly along x; column 2 is mostly y
        let affine = AffineTransform::from_rows([
            [1.0, 0.9, 0.0, 0.0],
            [0.1, -0.3, 0.9, 0.0],
            [0.0, 0.3, 0.5, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
        .unwrap();
        let volume = Volume::zeros(&[2, 2, 2], affine).unwrap();
        assert!(matches!(
            canonicalize(&volume, AxisConvention::LAS),
            Err(GeometryError::AmbiguousOrientation { .. })
        ));
    }
}
