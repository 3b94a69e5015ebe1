//! L16 — Sheets Writer: appends one row per package outcome to a
//! tracking sheet, with status colors, batching, retry/backoff, and a
//! dead-letter spool for rows that ultimately fail (spec §4.16, §6).
//!
//! Grounded on the same decoupled-SDK-behind-a-trait shape
//! `metacam-drive` uses for the cloud drive client, and on
//! `metacam-tracker`'s atomic-append discipline for the dead-letter
//! spool.

mod row;
mod writer;

pub use row::{format_duration_hhmmss, CellStatus, RenderedCell, RowColor, SheetRow, COLUMN_HEADERS};
pub use writer::{
    read_dead_letter, DeadLetterRecord, FakeSheetsClient, SheetsClient, SheetsError, SheetsWriter,
    SheetsWriterConfig,
};
