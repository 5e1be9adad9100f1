//! User directory backends.

mod in_memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use in_memory::InMemoryUserDirectory;
#[cfg(feature = "postgres")]
pub use postgres::PgUserDirectory;
