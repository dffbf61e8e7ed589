pub mod split;
pub mod types;

pub use split::{Segment, SegmentRole, SeriesSplit, SplitBoundaries, TrainSegment};
pub use types::{Covariate, CovariateFrame, SegmentFingerprint, Series};
