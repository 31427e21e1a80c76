//! Event sink implementations (C8's durable half). `sql` is the default,
//! `sqlx`-backed Postgres sink; other implementations only need to satisfy
//! `EventSink`.

pub mod sql;

pub use sql::PostgresSink;
