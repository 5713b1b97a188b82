pub mod breakpoints;
pub mod icons;
pub mod progress;

pub use breakpoints::spawn_breakpoint_prompt;
pub use progress::RunReporter;
