pub mod assignments;
pub mod backup_exchange;
pub mod core;
pub mod gradebook;
pub mod notifications;
pub mod quiz;
pub mod roster;
pub mod submissions;
