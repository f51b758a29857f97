pub mod app_config;
pub mod database;
pub mod memory_repo;
pub mod order_repo;
pub mod paypal;

pub use app_config::Config;
pub use database::DbClient;
pub use memory_repo::MemoryOrderRepository;
pub use order_repo::PgOrderRepository;
pub use paypal::PaypalProcessor;
