pub mod spacing;
pub use spacing::*;
