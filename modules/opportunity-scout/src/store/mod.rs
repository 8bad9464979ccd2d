pub mod postgres;

pub use postgres::PgPostStore;
