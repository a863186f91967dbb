//! SQLite persistence: connection management, the durable mutation queue,
//! and the local product cache.

pub mod manager;
pub mod mutation_queue;
pub mod product_repository;

pub use manager::DbManager;
pub use mutation_queue::SqliteMutationQueue;
pub use product_repository::SqliteProductRepository;
