//! Building blocks shared by every extraction stage.
//!
//! ## Data Flow
//!
//! ```text
//! render ──▶ encode ──▶ fanout ──▶ unit ──▶ response
//! (pdfium)   (base64)   (permits)  (retry)  (clean + validate)
//! ```
//!
//! 1. [`render`]   - rasterise every page once per job run; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 2. [`encode`]   - PNG-encode and base64-wrap each page as [`encode::PageImage`]
//! 3. [`fanout`]   - submit all units of a stage under one shared cap and
//!    reassemble the results in submission order
//! 4. [`unit`]     - one model call per attempt, bounded attempts, fixed backoff
//! 5. [`response`] - strip fences, parse JSON, validate against the record
//!    contract, build diagnostics for failures

pub mod encode;
pub mod fanout;
pub mod render;
pub mod response;
pub mod unit;
