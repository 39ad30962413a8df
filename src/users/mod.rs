mod memory;
mod repo;
mod repo_types;

pub use memory::MemoryUserStore;
pub use repo::{PgUserStore, StoreError, UserStore};
pub use repo_types::{normalize_email, NewUser, ResetToken, Role, User, UserUpdate};
