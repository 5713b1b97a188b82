//! CLI command implementations.
//!
//! | Module     | Commands handled              |
//! |------------|-------------------------------|
//! | `run`      | `Run`                         |
//! | `project`  | `Init`, `Status`, `Reset`     |
//! | `config`   | `Config`                      |

pub mod config;
pub mod project;
pub mod run;

pub use config::cmd_config;
pub use project::{cmd_init, cmd_reset, cmd_status};
pub use run::cmd_run;
