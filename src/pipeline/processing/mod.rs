// Pipeline stages, in run order

pub mod normalize;
pub mod dedup;
pub mod spatial;
pub mod aggregate;
