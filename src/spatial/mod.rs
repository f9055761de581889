//! Neighbourhood queries: the longitudinal cell index and the candidate filter.

pub mod candidates;
pub mod grid;

pub use candidates::filter_candidates;
pub use grid::SpatialIndex;
