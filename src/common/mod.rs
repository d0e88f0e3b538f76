//! VP8 building blocks: mode types, intra prediction and the inverse transforms.

pub(crate) mod prediction;
pub(crate) mod transform;
pub(crate) mod types;
