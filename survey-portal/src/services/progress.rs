//! Linear survey progression per (user, team).

use crate::middleware::guard::{GuardDecision, RedirectTarget};
use crate::models::{SurveyProgress, SurveyStep, TeamMembership};
use crate::services::error::PortalError;
use crate::services::repository::{CommitOutcome, StepCommit, SurveyRepository};
use chrono::Utc;
use metrics::counter;
use std::sync::Arc;
use uuid::Uuid;

pub const RESULTS_PATH: &str = "/results";

pub fn survey_entry_path(team_id: Uuid) -> String {
    format!("/survey/{}", team_id)
}

pub fn survey_step_path(team_id: Uuid, step: SurveyStep) -> String {
    format!("/survey/{}/{}", team_id, step.slug())
}

/// Which survey page a user may see: only the current step, and the results
/// once everything is submitted.
pub fn gate_survey_step(progress: &SurveyProgress, requested: SurveyStep) -> GuardDecision {
    if progress.is_complete() {
        return GuardDecision::Redirect(RedirectTarget::to(RESULTS_PATH));
    }
    if requested == progress.current_step {
        GuardDecision::Allow
    } else {
        GuardDecision::Redirect(RedirectTarget::to(survey_step_path(
            progress.team_id,
            progress.current_step,
        )))
    }
}

#[derive(Clone)]
pub struct SurveyProgressTracker {
    repository: Arc<dyn SurveyRepository>,
}

impl SurveyProgressTracker {
    pub fn new(repository: Arc<dyn SurveyRepository>) -> Self {
        Self { repository }
    }

    /// Stored progress, or a fresh one positioned at the first step.
    pub async fn progress(&self, user_id: &str, team_id: Uuid) -> Result<SurveyProgress, PortalError> {
        Ok(self
            .repository
            .find_progress(user_id, team_id)
            .await?
            .unwrap_or_else(|| SurveyProgress::new(user_id.to_string(), team_id, Utc::now())))
    }

    pub async fn get_current_step(&self, user_id: &str, team_id: Uuid) -> Result<SurveyStep, PortalError> {
        Ok(self.progress(user_id, team_id).await?.current_step)
    }

    pub async fn is_complete(&self, user_id: &str, team_id: Uuid) -> Result<bool, PortalError> {
        Ok(self.progress(user_id, team_id).await?.is_complete())
    }

    pub async fn membership(&self, user_id: &str, team_id: Uuid) -> Result<TeamMembership, PortalError> {
        self.repository
            .find_membership(user_id, team_id)
            .await?
            .ok_or(PortalError::NotTeamMember)
    }

    /// Record `step` for the user. Anything but the current step is refused
    /// with `OutOfOrderStep` and nothing is written.
    pub async fn submit_step(
        &self,
        user_id: &str,
        team_id: Uuid,
        step: SurveyStep,
        payload: &serde_json::Value,
    ) -> Result<SurveyProgress, PortalError> {
        let result = self.try_submit(user_id, team_id, step, payload).await;

        let outcome = match &result {
            Ok(_) => "accepted",
            Err(e) => e.error_code(),
        };
        counter!("survey_step_submissions_total", "step" => step.as_str(), "result" => outcome)
            .increment(1);

        match &result {
            Ok(progress) => tracing::info!(
                user_id,
                team_id = %team_id,
                step = %step,
                next = %progress.current_step,
                "Survey step recorded"
            ),
            Err(e) => tracing::warn!(user_id, team_id = %team_id, step = %step, error = %e, "Survey step rejected"),
        }
        result
    }

    async fn try_submit(
        &self,
        user_id: &str,
        team_id: Uuid,
        step: SurveyStep,
        payload: &serde_json::Value,
    ) -> Result<SurveyProgress, PortalError> {
        self.membership(user_id, team_id).await?;

        let current = self.progress(user_id, team_id).await?;
        let next = current
            .advance(step, Utc::now())
            .map_err(|e| PortalError::OutOfOrderStep {
                expected: e.expected,
                submitted: e.submitted,
            })?;

        let outcome = self
            .repository
            .commit_step(StepCommit {
                expected_step: current.current_step,
                submitted: step,
                progress: &next,
                payload,
            })
            .await?;

        match outcome {
            CommitOutcome::Committed => Ok(next),
            CommitOutcome::Stale => {
                // A concurrent submission won; report against what is stored now.
                let expected = self.get_current_step(user_id, team_id).await?;
                Err(PortalError::OutOfOrderStep {
                    expected,
                    submitted: step,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MembershipStatus, SURVEY_STEPS};
    use crate::services::repository::InMemoryRepository;
    use serde_json::json;

    async fn tracker_with_member() -> (SurveyProgressTracker, Arc<InMemoryRepository>, Uuid) {
        let repo = Arc::new(InMemoryRepository::new());
        let team = Uuid::new_v4();
        repo.ensure_membership(TeamMembership::invited("u1".into(), team, Utc::now()))
            .await
            .unwrap();
        (SurveyProgressTracker::new(repo.clone()), repo, team)
    }

    #[tokio::test]
    async fn fresh_user_starts_at_demographic() {
        let (tracker, _, team) = tracker_with_member().await;
        assert_eq!(
            tracker.get_current_step("u1", team).await.unwrap(),
            SurveyStep::Demographic
        );
        assert!(!tracker.is_complete("u1", team).await.unwrap());
    }

    #[tokio::test]
    async fn out_of_order_submission_changes_nothing() {
        let (tracker, repo, team) = tracker_with_member().await;
        tracker
            .submit_step("u1", team, SurveyStep::Demographic, &json!({"age": 30}))
            .await
            .unwrap();

        let err = tracker
            .submit_step("u1", team, SurveyStep::OpenQuestions, &json!({}))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PortalError::OutOfOrderStep {
                expected: SurveyStep::ClosedQuestions,
                submitted: SurveyStep::OpenQuestions
            }
        ));
        assert_eq!(
            tracker.get_current_step("u1", team).await.unwrap(),
            SurveyStep::ClosedQuestions
        );
        assert!(repo.response("u1", team, SurveyStep::OpenQuestions).await.is_none());
    }

    #[tokio::test]
    async fn resubmitting_a_completed_step_is_out_of_order() {
        let (tracker, _, team) = tracker_with_member().await;
        tracker
            .submit_step("u1", team, SurveyStep::Demographic, &json!({}))
            .await
            .unwrap();
        let err = tracker
            .submit_step("u1", team, SurveyStep::Demographic, &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "out_of_order_step");
    }

    #[tokio::test]
    async fn final_step_completes_survey_and_answers_membership() {
        let (tracker, repo, team) = tracker_with_member().await;
        let mut last = None;
        for step in SURVEY_STEPS {
            last = Some(tracker.submit_step("u1", team, step, &json!({})).await.unwrap());
        }

        let progress = last.unwrap();
        assert!(progress.is_complete());
        assert!(progress.completed_at.is_some());
        assert!(tracker.is_complete("u1", team).await.unwrap());
        let membership = repo.find_membership("u1", team).await.unwrap().unwrap();
        assert_eq!(membership.status, MembershipStatus::Answered);
    }

    #[tokio::test]
    async fn non_members_cannot_submit() {
        let repo = Arc::new(InMemoryRepository::new());
        let tracker = SurveyProgressTracker::new(repo);
        let err = tracker
            .submit_step("stranger", Uuid::new_v4(), SurveyStep::Demographic, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::NotTeamMember));
    }

    #[tokio::test]
    async fn racing_submissions_only_one_wins() {
        let (tracker, _, team) = tracker_with_member().await;
        let a = tracker.clone();
        let b = tracker.clone();
        let pa = json!({"n": 1});
        let pb = json!({"n": 2});
        let (ra, rb) = tokio::join!(
            a.submit_step("u1", team, SurveyStep::Demographic, &pa),
            b.submit_step("u1", team, SurveyStep::Demographic, &pb),
        );
        assert_eq!(ra.is_ok() as u8 + rb.is_ok() as u8, 1);
        assert_eq!(
            tracker.get_current_step("u1", team).await.unwrap(),
            SurveyStep::ClosedQuestions
        );
    }

    #[test]
    fn gate_sends_users_to_their_current_step() {
        let team = Uuid::new_v4();
        let progress = SurveyProgress::new("u1".into(), team, Utc::now())
            .advance(SurveyStep::Demographic, Utc::now())
            .unwrap();

        assert_eq!(gate_survey_step(&progress, SurveyStep::ClosedQuestions), GuardDecision::Allow);
        match gate_survey_step(&progress, SurveyStep::OpenQuestions) {
            GuardDecision::Redirect(target) => {
                assert_eq!(target.location(), format!("/survey/{}/closed-questions", team))
            }
            GuardDecision::Allow => panic!("skipping ahead must be redirected"),
        }
    }

    #[test]
    fn gate_sends_finished_users_to_results() {
        let mut progress = SurveyProgress::new("u1".into(), Uuid::new_v4(), Utc::now());
        for step in SURVEY_STEPS {
            progress = progress.advance(step, Utc::now()).unwrap();
        }
        assert_eq!(
            gate_survey_step(&progress, SurveyStep::Demographic),
            GuardDecision::Redirect(RedirectTarget::to(RESULTS_PATH))
        );
    }
}
