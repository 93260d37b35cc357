use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(AppointmentStatus {
    Pending => "pending",
    Submitted => "submitted",
    InTransit => "in_transit",
    Received => "received",
    InProgress => "in_progress",
    ReRunRequired => "re_run_required",
    ReCollectRequired => "re_collect_required",
    Reported => "reported",
    Canceled => "canceled",
});

impl AppointmentStatus {
    /// Terminal for reconciliation: a late-arriving scheduling event must
    /// not alter an appointment in one of these states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Reported | Self::Canceled | Self::ReCollectRequired
        )
    }
}

str_enum!(ResultType {
    Pending => "pending",
    Positive => "positive",
    Negative => "negative",
    PresumptivePositive => "presumptive_positive",
    PreliminaryPositive => "preliminary_positive",
    Invalid => "invalid",
    Inconclusive => "inconclusive",
});

str_enum!(ActivityAction {
    AppointmentCreated => "appointment_created",
    AppointmentUpdated => "appointment_updated",
    AppointmentCanceled => "appointment_canceled",
    ResultCreated => "result_created",
    ResultUpdated => "result_updated",
    ResultReported => "result_reported",
    ResultReRun => "result_re_run",
    ResultRecollected => "result_recollected",
    ResultDeleted => "result_deleted",
});
