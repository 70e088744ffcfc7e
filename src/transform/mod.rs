pub mod affine;
pub mod codec;
pub mod fsl;
pub mod orientation;
pub mod resample;

pub use affine::*;
pub use codec::*;
pub use fsl::*;
pub use orientation::*;
pub use resample::*;

pub trait Transform<T> {
    fn apply(&self, target: &T) -> T;

    fn apply_iter(&self, target: impl Iterator<Item = T>) -> impl Iterator<Item = T> {
        target.map(|t| self.apply(&t))
    }
}
