pub mod activity;
pub mod appointment;
pub mod enums;
pub mod package;
pub mod test_result;

pub use activity::ActivityEntry;
pub use appointment::{Appointment, AppointmentPatch};
pub use enums::{ActivityAction, AppointmentStatus, ResultType};
pub use package::Package;
pub use test_result::{ResultAnalysis, TestResult, TestResultPatch};
