//! Small signed neural motifs (collider, fork, chain, coherent and incoherent
//! feed-forward loops), the input-output landscapes they compute over a 2-D
//! grid, robustness measures on those landscapes, and a bi-level search for
//! the parameters that keep one motif least imitable by a population of others.

#[path = "core/error.rs"]
pub mod error;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/dual.rs"]
pub mod dual;

#[path = "core/motif.rs"]
pub mod motif;

#[path = "core/landscape.rs"]
pub mod landscape;

#[path = "core/robustness.rs"]
pub mod robustness;

#[path = "core/search.rs"]
pub mod search;

#[cfg(all(feature = "std", feature = "serde"))]
#[path = "core/storage.rs"]
pub mod storage;

#[cfg(all(feature = "std", feature = "serde"))]
pub mod batch;

pub mod observer;

pub use error::{MotifError, MotifResult};
pub use landscape::{gradient_field, landscape, ExecutionTier, Grid, InputRange, Landscape, LandscapeSampler};
pub use motif::{
    build_motif, build_motif_population, Activation, Aggregation, MotifModel, MotifSpec,
    Normalization, Topology,
};
pub use observer::{NoProgress, Progress};
pub use prng::Prng;
pub use robustness::{lipschitz, propagation, rugosity, ComputeType, NormType, Rugosity};
pub use search::{
    max_min_search, minimum_search, MinimumSearchOutcome, SearchConfig, SearchRecord,
    SimilaritySearch, Termination,
};
