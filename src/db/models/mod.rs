pub mod assignment_event;
pub mod phone_number;

pub use assignment_event::{AssignmentEvent, EventType, HistoryEntry, LedgerWrite, NewAssignmentEvent};
pub use phone_number::{NewPhoneNumber, NumberState, OrgCostRow, PhoneNumber, StateTotal};
