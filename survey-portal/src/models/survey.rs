//! The canonical survey step order and per-user progress through it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SurveyStep {
    Demographic,
    ClosedQuestions,
    OpenQuestions,
    Completed,
}

/// Steps that take a submission, in platform-wide order.
pub const SURVEY_STEPS: [SurveyStep; 3] = [
    SurveyStep::Demographic,
    SurveyStep::ClosedQuestions,
    SurveyStep::OpenQuestions,
];

impl SurveyStep {
    /// Position in [`SURVEY_STEPS`]; `Completed` sits one past the end.
    pub fn index(&self) -> usize {
        match self {
            SurveyStep::Demographic => 0,
            SurveyStep::ClosedQuestions => 1,
            SurveyStep::OpenQuestions => 2,
            SurveyStep::Completed => 3,
        }
    }

    pub fn next(&self) -> SurveyStep {
        match self {
            SurveyStep::Demographic => SurveyStep::ClosedQuestions,
            SurveyStep::ClosedQuestions => SurveyStep::OpenQuestions,
            SurveyStep::OpenQuestions | SurveyStep::Completed => SurveyStep::Completed,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, SurveyStep::OpenQuestions)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SurveyStep::Demographic => "DEMOGRAPHIC",
            SurveyStep::ClosedQuestions => "CLOSED_QUESTIONS",
            SurveyStep::OpenQuestions => "OPEN_QUESTIONS",
            SurveyStep::Completed => "COMPLETED",
        }
    }

    /// URL segment used by `/survey/{team}/{slug}`.
    pub fn slug(&self) -> &'static str {
        match self {
            SurveyStep::Demographic => "demographic",
            SurveyStep::ClosedQuestions => "closed-questions",
            SurveyStep::OpenQuestions => "open-questions",
            SurveyStep::Completed => "completed",
        }
    }

    pub fn from_slug(slug: &str) -> Option<SurveyStep> {
        match slug {
            "demographic" => Some(SurveyStep::Demographic),
            "closed-questions" => Some(SurveyStep::ClosedQuestions),
            "open-questions" => Some(SurveyStep::OpenQuestions),
            "completed" => Some(SurveyStep::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for SurveyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SurveyStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEMOGRAPHIC" => Ok(SurveyStep::Demographic),
            "CLOSED_QUESTIONS" => Ok(SurveyStep::ClosedQuestions),
            "OPEN_QUESTIONS" => Ok(SurveyStep::OpenQuestions),
            "COMPLETED" => Ok(SurveyStep::Completed),
            other => Err(format!("unknown survey step '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOrderError {
    pub expected: SurveyStep,
    pub submitted: SurveyStep,
}

/// Progress of one user through one team's survey.
///
/// Only `current_step` is stored; the completed steps are always the prefix of
/// [`SURVEY_STEPS`] before it, so gaps and duplicates cannot be represented.
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyProgress {
    pub user_id: String,
    pub team_id: Uuid,
    pub current_step: SurveyStep,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SurveyProgress {
    pub fn new(user_id: String, team_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            team_id,
            current_step: SurveyStep::Demographic,
            completed_at: None,
            updated_at: now,
        }
    }

    pub fn completed_steps(&self) -> &'static [SurveyStep] {
        &SURVEY_STEPS[..self.current_step.index()]
    }

    pub fn is_complete(&self) -> bool {
        self.current_step == SurveyStep::Completed
    }

    /// Progress after submitting `step`, which must be the current step.
    pub fn advance(&self, step: SurveyStep, now: DateTime<Utc>) -> Result<SurveyProgress, StepOrderError> {
        if step != self.current_step || step == SurveyStep::Completed {
            return Err(StepOrderError {
                expected: self.current_step,
                submitted: step,
            });
        }

        let current_step = step.next();
        let completed_at = if step.is_final() { Some(now) } else { None };

        Ok(SurveyProgress {
            user_id: self.user_id.clone(),
            team_id: self.team_id,
            current_step,
            completed_at,
            updated_at: now,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub team_id: Uuid,
    pub current_step: SurveyStep,
    pub completed_steps: Vec<SurveyStep>,
    pub complete: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&SurveyProgress> for ProgressResponse {
    fn from(p: &SurveyProgress) -> Self {
        Self {
            team_id: p.team_id,
            current_step: p.current_step,
            completed_steps: p.completed_steps().to_vec(),
            complete: p.is_complete(),
            completed_at: p.completed_at,
        }
    }
}
