//! Pipeline stages for a migration run.
//!
//! Each submodule implements exactly one step, so each can be tested with
//! fakes for its collaborators.
//!
//! ## Data Flow
//!
//! ```text
//! records ──▶ store ──▶ convert ──▶ upload
//! (dataset)  (skip done) (vendor API) (target app)
//! ```
//!
//! 1. [`records`] — load named payloads from the dataset file
//! 2. [`store`]   — read back artifacts of earlier runs; checkpoint new ones
//! 3. [`convert`] — bounded concurrent calls to the conversion API
//! 4. [`upload`]  — single login, then bounded concurrent form submissions
//!
//! Conversion and upload are separated by a barrier: the upload stage starts
//! only once every conversion has settled.

pub mod convert;
pub mod records;
pub mod store;
pub mod upload;
