pub mod availability;
pub mod compactor;
pub mod config;
pub mod error;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reservation;
pub mod storage;
pub mod wal;
