pub mod availability;
pub mod batch;
pub mod contact;
pub mod reservation;
pub mod settings;
pub mod slot;
pub mod suggestion;
