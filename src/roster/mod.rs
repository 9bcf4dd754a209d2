//! Roster loading (`spec.md` §4.1/§6). CSV is the only documented input
//! shape; a caller that already has `Participant` records (e.g. from a host
//! application's own database) can skip this module entirely and hand the
//! list straight to the matcher.

pub mod csv_import;

pub use csv_import::{load_roster, RosterError};
