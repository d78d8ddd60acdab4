pub mod availability_normalizer;
pub mod batch_scheduling_service;
pub mod calendar_provider;
pub mod contact_directory;
pub mod fairness_search;
pub mod greedy_allocator;
pub mod quality_matrix;
pub mod quality_scorer;
pub mod reservation_service;
pub mod schedule_utils;
pub mod settings_service;
