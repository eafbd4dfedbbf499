//! # Database module: Postgres-backed user store
//!
//! Entirely gated behind `#[cfg(feature = "server")]` so the core crate and its
//! tests build without SQLx.
//!
//! ## Design
//!
//! The pool is a **lazy, process-wide singleton** backed by a
//! [`tokio::sync::OnceCell`]. The first call to [`get_pool`] opens a pool with up
//! to 5 connections and caches it for every later caller.
//!
//! [`PgStore`] implements [`store::UserStore`] on top of that pool. Watchlist
//! appends are compare-and-swap transactions on `users.watchlist_version`, which
//! keeps concurrent writers on several server processes consistent.
//!
//! ## Re-exports
//!
//! - [`get_pool`]: returns `&'static PgPool`, initialising it on first use.
//! - [`PgStore`]: the store itself; [`PgStore::migrate`] applies `migrations/`.

#[cfg(feature = "server")]
mod pg_store;
#[cfg(feature = "server")]
mod pool;

#[cfg(feature = "server")]
pub use pg_store::PgStore;
#[cfg(feature = "server")]
pub use pool::get_pool;
