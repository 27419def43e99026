//! Financial transaction and installment reconciliation engine for
//! GadgetPoint POS.
//!
//! This crate is the backend the storefront shells call into: it prices a
//! sale, tracks in-house installment balances over time, surfaces unpaid
//! receivables, reconciles a day's transactions into a saved report, and
//! keeps the manual display ordering of same-day lists stable. Screens,
//! navigation, scanning, and the sync transport are collaborators on the
//! other side of the [`db`] layer's document rows and sync outbox.
//!
//! Component dependency order, leaves first: [`pricing`], then
//! [`installments`], [`receivables`], and [`reports`] on top; [`ordering`]
//! stands alone and is consumed by the list screens.

pub mod db;
pub mod error;
pub mod installments;
pub mod models;
pub mod ordering;
pub mod pricing;
pub mod receivables;
pub mod reports;
pub mod sales;
pub mod services;

pub use db::DbState;
pub use error::{EngineError, EngineResult};
