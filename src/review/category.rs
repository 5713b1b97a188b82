//! Review categories for the review loop.
//!
//! Each category is an independently tracked class of code review with its own
//! findings file under `review/`. Categories always run in the declared order,
//! general concerns first and narrow ones last.
//!
//! ## Example
//!
//! ```
//! use harness::review::ReviewCategory;
//!
//! let safety: ReviewCategory = "security".parse().unwrap();
//! assert_eq!(safety, ReviewCategory::Safety);
//! assert_eq!(safety.findings_file(), "review/safety.md");
//! ```

use serde::Serialize;
use std::str::FromStr;

/// One class of code review.
///
/// ## Deserialization
///
/// Accepts the snake_case name (`"error_handling"`), hyphenated names
/// (`"error-handling"`) and short aliases (`"errors"`, `"security"`, `"docs"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewCategory {
    /// Broad pass over the task's changes.
    General,
    Architecture,
    Efficiency,
    ErrorHandling,
    /// Security and data-safety concerns.
    Safety,
    Testing,
    Documentation,
    UiUx,
}

impl ReviewCategory {
    /// Declared execution order.
    pub const ORDER: [ReviewCategory; 8] = [
        ReviewCategory::General,
        ReviewCategory::Architecture,
        ReviewCategory::Efficiency,
        ReviewCategory::ErrorHandling,
        ReviewCategory::Safety,
        ReviewCategory::Testing,
        ReviewCategory::Documentation,
        ReviewCategory::UiUx,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            Self::General => "General",
            Self::Architecture => "Architecture",
            Self::Efficiency => "Efficiency",
            Self::ErrorHandling => "Error Handling",
            Self::Safety => "Safety",
            Self::Testing => "Testing",
            Self::Documentation => "Documentation",
            Self::UiUx => "UI/UX",
        }
    }

    /// Stable identifier used in file names and config.
    pub fn slug(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Architecture => "architecture",
            Self::Efficiency => "efficiency",
            Self::ErrorHandling => "error_handling",
            Self::Safety => "safety",
            Self::Testing => "testing",
            Self::Documentation => "documentation",
            Self::UiUx => "ui_ux",
        }
    }

    /// Findings file, relative to the working directory.
    pub fn findings_file(self) -> String {
        format!("review/{}.md", self.slug())
    }

    /// What the reviewer for this category looks for.
    pub fn focus_areas(self) -> &'static [&'static str] {
        match self {
            Self::General => &[
                "Incorrect or incomplete implementation of the task",
                "Obvious bugs and regressions",
                "Code that does not match the product description",
            ],
            Self::Architecture => &[
                "Excessive coupling between modules",
                "Layering violations",
                "Separation of concerns issues",
                "Circular dependencies",
                "God objects or functions",
            ],
            Self::Efficiency => &[
                "Algorithmic complexity issues",
                "Unnecessary allocations or copies",
                "Blocking operations in async code",
                "Repeated work that could be cached",
            ],
            Self::ErrorHandling => &[
                "Swallowed errors",
                "Missing error propagation",
                "Panics on recoverable conditions",
                "Unhelpful error messages",
            ],
            Self::Safety => &[
                "Injection vulnerabilities",
                "Secrets exposure in code or logs",
                "Input validation gaps",
                "Path traversal",
                "Unsafe resource handling",
            ],
            Self::Testing => &[
                "Untested behavior introduced by the task",
                "Tests that cannot fail",
                "Missing edge cases",
            ],
            Self::Documentation => &[
                "Outdated developer guides",
                "Public APIs without documentation",
                "Misleading comments",
            ],
            Self::UiUx => &[
                "Inconsistent interaction patterns",
                "Missing feedback for long operations",
                "Accessibility gaps",
            ],
        }
    }

    /// Enabled categories sorted into declared order, duplicates removed.
    pub fn in_declared_order(selected: &[ReviewCategory]) -> Vec<ReviewCategory> {
        Self::ORDER
            .into_iter()
            .filter(|c| selected.contains(c))
            .collect()
    }
}

impl std::fmt::Display for ReviewCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ReviewCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' ', '/'], "_");
        match normalized.as_str() {
            "general" => Ok(Self::General),
            "architecture" | "arch" => Ok(Self::Architecture),
            "efficiency" | "performance" | "perf" => Ok(Self::Efficiency),
            "error_handling" | "errors" => Ok(Self::ErrorHandling),
            "safety" | "security" => Ok(Self::Safety),
            "testing" | "tests" => Ok(Self::Testing),
            "documentation" | "docs" => Ok(Self::Documentation),
            "ui_ux" | "ui" | "ux" => Ok(Self::UiUx),
            _ => Err(format!(
                "Unknown review category '{}'. Valid values: {}",
                s,
                Self::ORDER.map(|c| c.slug()).join(", ")
            )),
        }
    }
}

/// Routes every string form through `FromStr` so config files can use aliases.
impl<'de> serde::Deserialize<'de> for ReviewCategory {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ReviewCategory::from_str(&raw).map_err(serde::de::Error::custom)
    }
}
