pub mod execute;
pub mod report;
pub mod script;
pub mod validate;

pub const NO_SCRIPT_MESSAGE: &str = "Unable to generate a backtest script for this strategy description";

pub fn validation_failed_message(attempts: u32, error: &str) -> String {
    format!("Validation failed after {attempts} attempts. Last error: {error}")
}
