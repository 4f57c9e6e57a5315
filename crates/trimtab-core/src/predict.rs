// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The load-prediction capability consumed by the adaptive governor.
//!
//! The model itself lives outside this core. This module specifies only the
//! input/output contract and ships [`NoPredictor`], a default whose
//! predictions are always ignored, so a real model can be substituted
//! without touching the governor.

use serde::{Deserialize, Serialize};

/// Predictions below this confidence are ignored by the governor.
pub const MIN_PREDICTION_CONFIDENCE: f64 = 0.8;

/// The situational inputs handed to the predictor on each consultation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionContext {
    /// Current aggregate load estimate, as a fraction of capacity (0.0–1.0).
    pub current_load: f64,
    /// Hour of day, 0–23 (UTC).
    pub time_of_day_hours: u8,
    /// Day of week, 0 = Monday through 6 = Sunday.
    pub day_of_week: u8,
    /// Resources currently leased from the pool.
    pub active_connections: usize,
    /// Tasks currently waiting for admission.
    pub queue_length: usize,
}

/// Concrete limits a prediction suggests for the admission layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedLimits {
    /// Ceiling on concurrently executing tasks.
    pub max_concurrent: usize,
    /// Preferred work batch size.
    pub batch_size: usize,
    /// Preferred per-task timeout, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for SuggestedLimits {
    fn default() -> Self {
        Self {
            max_concurrent: 64,
            batch_size: 50,
            timeout_ms: 30_000,
        }
    }
}

/// The output of one predictor consultation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Forecast load for the upcoming control period, as a fraction.
    pub estimated_load: f64,
    /// Limits the predictor recommends for that load.
    pub suggested_limits: SuggestedLimits,
    /// Model confidence in this prediction, 0.0–1.0.
    pub confidence: f64,
}

impl PredictionResult {
    /// Whether the governor should act on this prediction.
    pub fn is_actionable(&self) -> bool {
        self.confidence >= MIN_PREDICTION_CONFIDENCE
    }
}

/// A forward-looking load model.
///
/// Implementations should not fail fatally; the governor catches errors,
/// logs them, and retains its last-known-good limits.
pub trait Predictor: Send + Sync + 'static {
    /// Produces a load forecast for the given context.
    fn predict(&self, context: &PredictionContext) -> anyhow::Result<PredictionResult>;
}

/// The shipped default predictor.
///
/// Always reports zero confidence, so its output never drives an
/// adjustment; the governor's hard-threshold enforcement still runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPredictor;

impl Predictor for NoPredictor {
    fn predict(&self, context: &PredictionContext) -> anyhow::Result<PredictionResult> {
        Ok(PredictionResult {
            estimated_load: context.current_load,
            suggested_limits: SuggestedLimits::default(),
            confidence: 0.0,
        })
    }
}
