// src/focus.rs

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::error::AppError;

pub const MIN_MINUTES: u32 = 5;
pub const MAX_MINUTES: u32 = 120;
pub const DEFAULT_MINUTES: u32 = 45;
/// Granularity of duration changes.
pub const STEP_MINUTES: u32 = 5;

/// Countdown for a focus session. Time only moves through [`FocusTimer::tick`].
#[derive(Debug, Clone, PartialEq)]
pub struct FocusTimer {
    duration_secs: u32,
    remaining_secs: u32,
    running: bool,
}

impl FocusTimer {
    /// `minutes` is clamped to 5..=120; `None` means 45.
    pub fn new(minutes: Option<u32>) -> Self {
        let minutes = minutes
            .unwrap_or(DEFAULT_MINUTES)
            .clamp(MIN_MINUTES, MAX_MINUTES);
        let duration_secs = minutes * 60;
        Self {
            duration_secs,
            remaining_secs: duration_secs,
            running: false,
        }
    }

    /// Changes the length, snapped to 5-minute steps within 5..=120, and
    /// starts over from the new duration.
    pub fn set_minutes(&mut self, minutes: u32) {
        let snapped = (minutes + STEP_MINUTES / 2) / STEP_MINUTES * STEP_MINUTES;
        self.duration_secs = snapped.clamp(MIN_MINUTES, MAX_MINUTES) * 60;
        self.reset();
    }

    /// Stops and rewinds to the full duration.
    pub fn reset(&mut self) {
        self.running = false;
        self.remaining_secs = self.duration_secs;
    }

    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }

    pub fn remaining_secs(&self) -> u32 {
        self.remaining_secs
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Starts or pauses. A finished timer stays stopped.
    pub fn toggle(&mut self) -> bool {
        self.running = !self.running && self.remaining_secs > 0;
        self.running
    }

    /// Advances by `elapsed_secs` while running; stops at zero.
    pub fn tick(&mut self, elapsed_secs: u32) {
        if !self.running {
            return;
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(elapsed_secs);
        if self.remaining_secs == 0 {
            self.running = false;
        }
    }

    pub fn progress(&self) -> f64 {
        (1.0 - f64::from(self.remaining_secs) / f64::from(self.duration_secs)) * 100.0
    }

    /// `MM:SS` of the remaining time.
    pub fn display(&self) -> String {
        format!("{:02}:{:02}", self.remaining_secs / 60, self.remaining_secs % 60)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusQuery {
    pub task_id: Option<String>,
    pub mins: Option<u32>,
    /// Seconds the timer has already been running.
    pub elapsed_secs: Option<u32>,
    #[serde(default)]
    pub reset: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub duration_secs: u32,
    pub remaining_secs: u32,
    pub running: bool,
    pub progress: f64,
    pub display: String,
}

/// GET /focus?taskId=&mins=&elapsedSecs=&reset=
///
/// With a `taskId`, `mins` adjusts the task's estimate in 5-minute steps.
pub async fn focus_timer(
    data: web::Data<AppState>,
    query: web::Query<FocusQuery>,
) -> Result<HttpResponse, AppError> {
    let query = query.into_inner();
    let (minutes, title) = match &query.task_id {
        Some(task_id) => {
            let task = data
                .storage
                .get_task(task_id)
                .await?
                .ok_or_else(|| AppError::NotFound("Task".into()))?;
            (Some(task.estimated_minutes), Some(task.title))
        }
        None => (query.mins, None),
    };

    let mut timer = FocusTimer::new(minutes);
    if let (Some(_), Some(mins)) = (&query.task_id, query.mins) {
        timer.set_minutes(mins);
    }
    if let Some(elapsed) = query.elapsed_secs {
        timer.toggle();
        timer.tick(elapsed);
    }
    if query.reset {
        timer.reset();
    }

    Ok(HttpResponse::Ok().json(FocusSnapshot {
        task_id: query.task_id,
        title,
        duration_secs: timer.duration_secs(),
        remaining_secs: timer.remaining_secs(),
        running: timer.is_running(),
        progress: timer.progress(),
        display: timer.display(),
    }))
}
