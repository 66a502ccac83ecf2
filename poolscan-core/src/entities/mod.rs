pub mod events;
pub mod pool_changes;

use poolscan_sdk::objects::EventStatus;

/// Event status for database operations.
///
/// This is the sqlx::Type version. For the domain type, see
/// `poolscan_sdk::objects::EventStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "event_status")]
pub enum EventStatusName {
    Pending,
    Success,
}

impl From<EventStatusName> for EventStatus {
    fn from(value: EventStatusName) -> Self {
        match value {
            EventStatusName::Pending => EventStatus::Pending,
            EventStatusName::Success => EventStatus::Success,
        }
    }
}

impl From<EventStatus> for EventStatusName {
    fn from(value: EventStatus) -> Self {
        match value {
            EventStatus::Pending => EventStatusName::Pending,
            EventStatus::Success => EventStatusName::Success,
        }
    }
}
