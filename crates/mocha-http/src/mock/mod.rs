//! Mock definitions and storage.
//!
//! A mock pairs an ordered list of [`Expectation`]s with a reply. Mocks are
//! created through [`MockBuilder`], validated when built and kept in a
//! [`MockStore`] sorted by priority.

mod builder;
mod store;
mod types;

pub use builder::{BuildContext, MockBuilder};
pub use store::MockStore;
pub use types::{
    weight, Callback, Expectation, Mapper, MatchResult, MismatchDetail, Mock, PostAction,
    ServedContext, Target, ValueSelector,
};
