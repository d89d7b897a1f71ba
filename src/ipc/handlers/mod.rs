pub mod attendance;
pub mod backup_exchange;
pub mod core;
pub mod dashboard;
pub mod evaluations;
pub mod fees;
pub mod payments;
pub mod reports;
pub mod revenues;
pub mod scout;
pub mod students;
pub mod users;
