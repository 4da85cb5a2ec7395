pub mod lm;
pub mod lyrics;
pub mod sampling;
