//! Terminal output
//!
//! Interactive terminals get `cliclack` steps, spinners and an `indicatif`
//! layer bar; pipes and CI get plain bracketed lines.

mod context;
mod output;
mod progress;
mod prompts;

pub use context::UiContext;
pub use output::{
    intro, key_value, note, outro_error, outro_success, remark, section, step_info, step_ok,
    step_ok_detail, step_warn,
};
pub use progress::{BuildProgress, TaskSpinner};
pub use prompts::confirm;
