pub mod retrigger;
pub mod status;
pub mod submit;

pub use retrigger::RetriggerError;
pub use submit::{IntakeError, SubmitRequest};
