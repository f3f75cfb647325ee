//! `tally-engine` — the balance-mutation engine.
//!
//! Given a validated, typed operation request, the engine decides
//! admissibility, mutates one or two account balances, and appends the
//! matching transaction records — all as one atomic unit, even when
//! operations race against the same accounts.

pub mod engine;


pub use engine::LedgerEngine;
