pub mod models;
pub mod repo;

mod memory;
pub use memory::MemoryStore;

pub use models::{Append, NewUser, Symbol, User, UserId, Watchlist};
pub use repo::{StoreError, UserStore};
