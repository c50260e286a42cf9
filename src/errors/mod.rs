mod control_error;

pub use control_error::{ControlError, ControlErrorKind};
