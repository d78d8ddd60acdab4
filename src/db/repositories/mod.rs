pub mod batch_repository;
pub mod reservation_repository;
pub mod settings_repository;
pub mod suggestion_repository;
