mod distortion;
mod intrinsics;
mod sensor;

pub use distortion::*;
pub use intrinsics::*;
pub use sensor::*;
