pub mod catalog;
pub mod clock;
pub mod collab;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod tenant;
pub mod timegrid;
pub mod wal;
