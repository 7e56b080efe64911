//! Series identity and selection models shared by queries and storage.

pub mod matcher;
pub mod tags;

pub use matcher::{MatchType, Matcher, MatcherError, Matchers};
pub use tags::{Metric, Tags, METRIC_NAME_TAG};
