//! Multi-category code review.
//!
//! ## Components
//!
//! - [`category`]: review categories, their order and findings files
//! - [`engine`]: the reviewer/fixer loop run during the `Review` phase
//!
//! ## Example
//!
//! ```
//! use harness::review::ReviewCategory;
//!
//! let enabled = [ReviewCategory::Testing, ReviewCategory::General];
//! let order = ReviewCategory::in_declared_order(&enabled);
//! assert_eq!(order[0], ReviewCategory::General);
//! ```

pub mod category;
pub mod engine;

pub use category::ReviewCategory;
pub use engine::{PassResult, ReviewEngine, ReviewEnv, ReviewStep};
