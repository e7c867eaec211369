//! Decides whether and when the device location may be requested.
//!
//! ```text
//! Unasked ──► PromptVisible ──allow──► Locating ──► Resolved
//!    │              └────────deny──────────────────► Resolved
//!    ├──► AutoGranted ──► Locating ──► Resolved
//!    ├──► AutoDenied ──────────────► Resolved
//!    ├──► Unsupported ─────────────► Resolved
//!    └──► Disabled (locale chosen manually)
//! ```
//!
//! Persisted flags are re-read on every entry; a resolved or disabled flow
//! ignores further evaluations.

use tracing::{debug, info, instrument, warn};

use crate::capabilities::{
    Geolocation, PermissionQueryState, PositionError, PositionOptions,
};
use crate::error::AppResult;
use crate::model::ValidatedCoordinate;
use crate::preferences::{GeoPermission, PreferenceStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Unasked,
    PromptVisible,
    AutoGranted,
    AutoDenied,
    Unsupported,
    Locating,
    Resolved { permission: GeoPermission },
    Disabled,
}

impl FlowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, FlowState::Resolved { .. } | FlowState::Disabled)
    }
}

/// What the caller should do after a flow step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlowStep {
    /// Nothing to do.
    Idle,
    /// Present the location prompt.
    ShowPrompt,
    /// A position was obtained; resolve locale and currency from it.
    Located(ValidatedCoordinate),
    /// The flow ended without a position.
    Finished(GeoPermission),
}

pub struct LocationFlow {
    state: FlowState,
    options: PositionOptions,
}

impl LocationFlow {
    pub fn new(options: PositionOptions) -> Self {
        Self {
            state: FlowState::Unasked,
            options,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn prompt_visible(&self) -> bool {
        self.state == FlowState::PromptVisible
    }

    /// Marks the flow disabled for this session.
    pub fn disable(&mut self) {
        self.transition(FlowState::Disabled);
    }

    fn transition(&mut self, next: FlowState) {
        debug!(from = ?self.state, to = ?next, "location flow transition");
        self.state = next;
    }

    #[instrument(skip_all, fields(state = ?self.state))]
    pub async fn evaluate(
        &mut self,
        prefs: &PreferenceStore,
        geo: &dyn Geolocation,
    ) -> AppResult<FlowStep> {
        if self.state != FlowState::Unasked {
            return Ok(FlowStep::Idle);
        }
        if !prefs.age_gate_accepted().await? {
            return Ok(FlowStep::Idle);
        }
        if prefs.manual_locale().await?.is_some() {
            self.transition(FlowState::Disabled);
            return Ok(FlowStep::Idle);
        }
        if prefs.prompt_shown().await? {
            let permission = prefs.geo_permission().await?;
            self.transition(FlowState::Resolved { permission });
            return Ok(FlowStep::Finished(permission));
        }

        if !geo.is_supported() {
            self.transition(FlowState::Unsupported);
            prefs.set_geo_permission(GeoPermission::Unsupported).await?;
            return Ok(self.finish(GeoPermission::Unsupported));
        }

        if !geo.supports_permission_query() {
            self.transition(FlowState::PromptVisible);
            return Ok(FlowStep::ShowPrompt);
        }

        match geo.query_permission().await {
            Ok(PermissionQueryState::Granted) => {
                self.transition(FlowState::AutoGranted);
                prefs.record_decision(GeoPermission::Granted).await?;
                self.locate(prefs, geo).await
            }
            Ok(PermissionQueryState::Denied) => {
                self.transition(FlowState::AutoDenied);
                prefs.record_decision(GeoPermission::Denied).await?;
                Ok(self.finish(GeoPermission::Denied))
            }
            Ok(PermissionQueryState::Prompt) => {
                self.transition(FlowState::PromptVisible);
                Ok(FlowStep::ShowPrompt)
            }
            Err(e) => {
                debug!(error = %e, "permission query failed; falling back to prompt");
                self.transition(FlowState::PromptVisible);
                Ok(FlowStep::ShowPrompt)
            }
        }
    }

    /// Handles the user's answer to the prompt.
    #[instrument(skip(self, prefs, geo))]
    pub async fn respond(
        &mut self,
        prefs: &PreferenceStore,
        geo: &dyn Geolocation,
        allow: bool,
    ) -> AppResult<FlowStep> {
        if self.state != FlowState::PromptVisible {
            return Ok(FlowStep::Idle);
        }
        if allow {
            prefs.set_prompt_shown().await?;
            self.locate(prefs, geo).await
        } else {
            prefs.record_decision(GeoPermission::Dismissed).await?;
            Ok(self.finish(GeoPermission::Dismissed))
        }
    }

    async fn locate(
        &mut self,
        prefs: &PreferenceStore,
        geo: &dyn Geolocation,
    ) -> AppResult<FlowStep> {
        self.transition(FlowState::Locating);
        // Bounds adapters that ignore `options.timeout`.
        let position = tokio::time::timeout(self.options.timeout, geo.current_position(&self.options))
            .await
            .unwrap_or(Err(PositionError::Timeout));
        match position {
            Ok(coordinate) => {
                prefs.set_geo_permission(GeoPermission::Granted).await?;
                self.transition(FlowState::Resolved {
                    permission: GeoPermission::Granted,
                });
                info!("device position obtained");
                Ok(FlowStep::Located(coordinate))
            }
            Err(e) => {
                if e == PositionError::Timeout {
                    warn!(timeout = ?self.options.timeout, "position request timed out");
                } else {
                    info!(error = %e, "position request failed");
                }
                prefs.set_geo_permission(GeoPermission::Denied).await?;
                Ok(self.finish(GeoPermission::Denied))
            }
        }
    }

    fn finish(&mut self, permission: GeoPermission) -> FlowStep {
        self.transition(FlowState::Resolved { permission });
        FlowStep::Finished(permission)
    }
}
