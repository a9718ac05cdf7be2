//! Score-based player matchmaking for matchd
//!
//! Players submit a score and a tolerance. Requests are partitioned into
//! score buckets; a periodic parallel scan pairs compatible players inside each
//! bucket and a low-traffic global sweep pairs players across bucket
//! boundaries. Pairs flow through a bounded notification pipeline that writes
//! the outcome to both players' live connections.
//!
//! # Compatibility
//!
//! Two requests `a` and `b` are compatible when
//! `|a.score - b.score| <= a.match_range` and
//! `|a.score - b.score| <= b.match_range`.
//!
//! # Features
//!
//! - `api`: axum router with the join, stats and health endpoints

pub mod bucket;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod metrics;
pub mod notifier;
pub mod pair;
pub mod registry;
pub mod request;
pub mod transport;

#[cfg(feature = "api")]
pub mod api;

pub use engine::{EngineSettings, MatchingEngine};
pub use error::{MatchingError, PipelineError, Result, TransportError};
pub use notifier::{NotificationPipeline, PairMirror, PipelineConfig};
pub use pair::{MatchPair, PairSide, PairState};
pub use registry::ConnectionRegistry;
pub use request::{ChannelId, PlayerRequest, RequestState};
pub use transport::{ChannelHandle, SharedHandle, TransportHandle};
