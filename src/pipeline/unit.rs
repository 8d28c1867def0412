//! Unit-of-Work Extractor: one prompt + one page image → one validated record.
//!
//! ## Attempt loop
//!
//! ```text
//!            ┌──────────── backoff (fixed) ◀───────────┐
//!            ▼                                          │ attempts left
//! model.complete ──▶ clean ──▶ parse JSON ──▶ validate ─┤
//!   (timeout)                                           │ none left
//!                                                       ▼
//!                                     ExtractionFailure { last cause }
//! ```
//!
//! Provider errors, timeouts, syntax errors and schema violations all share
//! one budget. The backoff is fixed rather than exponential: a malformed
//! answer is not load-related, and the coordinator above already bounds how
//! many calls are in flight.
//!
//! The prompt is rendered by the caller before the loop, so template errors
//! never reach here and are never retried.

use crate::error::{ExtractionFailure, FailureCause};
use crate::model::{VisionModel, VisionRequest};
use crate::pipeline::response::parse_record;
use crate::progress::ProgressCallback;
use crate::schema::{Record, UnitId};
use edgequake_llm::ImageData;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Runs single units of work against a [`VisionModel`].
#[derive(Clone)]
pub struct UnitExtractor {
    model: Arc<dyn VisionModel>,
    retry_backoff: Duration,
    api_timeout: Duration,
    progress: Option<ProgressCallback>,
}

impl UnitExtractor {
    pub fn new(model: Arc<dyn VisionModel>, retry_backoff: Duration, api_timeout: Duration) -> Self {
        Self {
            model,
            retry_backoff,
            api_timeout,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Extract record `R` for `unit`, trying at most `attempts` times.
    ///
    /// On exhaustion the failure carries the cause of the *last* attempt.
    pub async fn extract<R: Record>(
        &self,
        unit: &UnitId,
        prompt: &str,
        image: &ImageData,
        attempts: u32,
    ) -> Result<R, ExtractionFailure> {
        let attempts = attempts.max(1);
        let schema = R::json_schema();
        if let Some(cb) = &self.progress {
            cb.on_unit_start(unit);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let request = VisionRequest {
                unit,
                prompt,
                image,
                record: R::NAME,
                schema: &schema,
            };

            let cause = match self.attempt::<R>(request).await {
                Ok(record) => {
                    debug!("{}: accepted on attempt {}/{}", unit, attempt, attempts);
                    if let Some(cb) = &self.progress {
                        cb.on_unit_complete(unit, attempt);
                    }
                    return Ok(record);
                }
                Err(cause) => cause,
            };

            warn!("{}: attempt {}/{} failed: {}", unit, attempt, attempts, cause);

            if attempt >= attempts {
                let failure = ExtractionFailure {
                    unit: unit.clone(),
                    attempts: attempt,
                    cause,
                };
                if let Some(cb) = &self.progress {
                    cb.on_unit_error(unit, &failure.cause.to_string());
                }
                return Err(failure);
            }

            if !self.retry_backoff.is_zero() {
                sleep(self.retry_backoff).await;
            }
        }
    }

    async fn attempt<R: Record>(&self, request: VisionRequest<'_>) -> Result<R, FailureCause> {
        let raw = match timeout(self.api_timeout, self.model.complete(request)).await {
            Err(_elapsed) => {
                return Err(FailureCause::Timeout {
                    secs: self.api_timeout.as_secs(),
                })
            }
            Ok(Err(e)) => {
                return Err(FailureCause::ProviderFailure {
                    message: e.to_string(),
                })
            }
            Ok(Ok(raw)) => raw,
        };
        Ok(parse_record::<R>(&raw)?)
    }
}
