pub mod geometry;
pub mod volume;

pub use geometry::GeometryError;
pub use volume::VolumeError;
