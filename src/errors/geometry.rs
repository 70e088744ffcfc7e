use snafu::Snafu;

#[derive(Debug, Snafu, PartialEq)]
#[snafu(visibility(pub))]
/// Errors describing a voxel-to-world affine that cannot be used
pub enum GeometryError {
    #[snafu(display("invalid geometry: affine is singular (determinant={})", determinant))]
    SingularAffine { determinant: f64 },

    #[snafu(display(
        "invalid geometry: world axes {} and {} both resolve to array axis {}",
        first_world_axis,
        second_world_axis,
        array_axis
    ))]
    AmbiguousOrientation {
        first_world_axis: usize,
        second_world_axis: usize,
        array_axis: usize,
    },

    #[snafu(display(
        "invalid geometry: bottom row {:?} is not [0, 0, 0, 1] within {}",
        bottom_row,
        tolerance
    ))]
    NotAffine { bottom_row: [f64; 4], tolerance: f64 },

    #[snafu(display("invalid geometry: affine contains non-finite values"))]
    NonFiniteAffine,

    #[snafu(display("invalid geometry: expected at least 3 spatial axes, found {}", ndim))]
    TooFewAxes { ndim: usize },

    #[snafu(display("invalid geometry: axis {} has zero length", axis))]
    EmptyAxis { axis: usize },
}
