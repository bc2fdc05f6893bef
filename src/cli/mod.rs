pub mod commands;
pub mod survey_commands;

pub use commands::{Cli, Commands, RunArgs};
pub use survey_commands::SurveyCommandHandler;
