pub mod assignment_events;
pub mod directory;
pub mod phone_numbers;
