use anyhow::Context;
use tracing::{debug, info};

use crate::device::Surface;
use crate::error::EngineError;
use crate::model::Point;
use crate::synth::Synthesizer;

pub const DRIFT_THRESHOLD_PX: f64 = 5.0;
const CLICK_SETTLE_MS: u64 = 100;

/// Tracks where focus was established and whether the pointer has since moved.
#[derive(Debug, Clone, Default)]
pub struct FocusController {
    anchor: Option<Point>,
    reacquisitions: usize,
}

impl FocusController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reacquisitions(&self) -> usize {
        self.reacquisitions
    }

    /// Click into the target (at `point`, or wherever the pointer is) and record
    /// the anchor.
    pub fn acquire<S: Surface>(
        &mut self,
        synth: &mut Synthesizer<S>,
        point: Option<Point>,
    ) -> Result<Point, EngineError> {
        let anchor = Self::click_at(synth, point).map_err(EngineError::FocusAcquisition)?;
        info!("focus acquired at {anchor}");
        self.anchor = Some(anchor);
        Ok(anchor)
    }

    fn click_at<S: Surface>(
        synth: &mut Synthesizer<S>,
        point: Option<Point>,
    ) -> anyhow::Result<Point> {
        let surface = synth.surface_mut();
        if let Some(point) = point {
            surface
                .move_pointer(point)
                .with_context(|| format!("failed to move pointer to {point}"))?;
        }
        surface.click().context("failed to click target")?;
        let anchor = match point {
            Some(point) => point,
            None => surface
                .pointer_position()
                .context("failed to read pointer position")?,
        };
        synth.pause(CLICK_SETTLE_MS);
        Ok(anchor)
    }

    /// True when the pointer has moved more than [`DRIFT_THRESHOLD_PX`] from the
    /// anchor. A surface that cannot report the pointer never drifts.
    pub fn check_drift<S: Surface>(&self, synth: &mut Synthesizer<S>) -> bool {
        let Some(anchor) = self.anchor else {
            return false;
        };
        match synth.surface_mut().pointer_position() {
            Ok(current) => current.distance_to(anchor) > DRIFT_THRESHOLD_PX,
            Err(err) => {
                debug!("pointer position unavailable ({err:#}); assuming no drift");
                false
            }
        }
    }

    /// Click the anchor again after drift.
    pub fn reacquire<S: Surface>(
        &mut self,
        synth: &mut Synthesizer<S>,
    ) -> Result<Point, EngineError> {
        let anchor = self.anchor;
        let point = self.acquire(synth, anchor)?;
        self.reacquisitions += 1;
        Ok(point)
    }
}
