use super::{CommitOutcome, EnsuredMembership, StepCommit, SurveyRepository};
use crate::config::DatabaseSettings;
use crate::models::{MembershipStatus, SurveyProgress, SurveyStep, Team, TeamMembership};
use crate::services::error::PortalError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::FromRow;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct TeamRow {
    id: Uuid,
    name: String,
    owner_id: String,
    created_at: DateTime<Utc>,
}

impl From<TeamRow> for Team {
    fn from(r: TeamRow) -> Self {
        Team {
            id: r.id,
            name: r.name,
            owner_id: r.owner_id,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MembershipRow {
    user_id: String,
    team_id: Uuid,
    status: String,
    joined_at: DateTime<Utc>,
    answered_at: Option<DateTime<Utc>>,
}

impl TryFrom<MembershipRow> for TeamMembership {
    type Error = PortalError;

    fn try_from(r: MembershipRow) -> Result<Self, Self::Error> {
        let status = r
            .status
            .parse::<MembershipStatus>()
            .map_err(|e| PortalError::Storage(anyhow::anyhow!(e)))?;
        Ok(TeamMembership {
            user_id: r.user_id,
            team_id: r.team_id,
            status,
            joined_at: r.joined_at,
            answered_at: r.answered_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ProgressRow {
    user_id: String,
    team_id: Uuid,
    current_step: String,
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProgressRow> for SurveyProgress {
    type Error = PortalError;

    fn try_from(r: ProgressRow) -> Result<Self, Self::Error> {
        let current_step = r
            .current_step
            .parse::<SurveyStep>()
            .map_err(|e| PortalError::Storage(anyhow::anyhow!(e)))?;
        Ok(SurveyProgress {
            user_id: r.user_id,
            team_id: r.team_id,
            current_step,
            completed_at: r.completed_at,
            updated_at: r.updated_at,
        })
    }
}

/// PostgreSQL-backed repository.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, PortalError> {
        let url = settings
            .url
            .as_ref()
            .ok_or_else(|| PortalError::Storage(anyhow::anyhow!("database.url is not set")))?;

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(url.expose_secret())
            .await
            .map_err(|e| PortalError::Storage(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), PortalError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PortalError::Storage(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

const MEMBERSHIP_COLUMNS: &str = "user_id, team_id, status, joined_at, answered_at";

#[async_trait]
impl SurveyRepository for PgRepository {
    async fn health_check(&self) -> Result<(), PortalError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            PortalError::from(e)
        })?;
        Ok(())
    }

    async fn insert_team(&self, team: &Team) -> Result<(), PortalError> {
        sqlx::query(
            r#"
            INSERT INTO teams (id, name, owner_id, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(team.id)
        .bind(&team.name)
        .bind(&team.owner_id)
        .bind(team.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_team(&self, team_id: Uuid) -> Result<Option<Team>, PortalError> {
        let row = sqlx::query_as::<_, TeamRow>(
            "SELECT id, name, owner_id, created_at FROM teams WHERE id = $1",
        )
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Team::from))
    }

    async fn list_owned_teams(&self, owner_id: &str) -> Result<Vec<Team>, PortalError> {
        let rows = sqlx::query_as::<_, TeamRow>(
            "SELECT id, name, owner_id, created_at FROM teams WHERE owner_id = $1 ORDER BY created_at",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Team::from).collect())
    }

    async fn find_membership(
        &self,
        user_id: &str,
        team_id: Uuid,
    ) -> Result<Option<TeamMembership>, PortalError> {
        let sql = format!(
            "SELECT {} FROM team_memberships WHERE user_id = $1 AND team_id = $2",
            MEMBERSHIP_COLUMNS
        );
        sqlx::query_as::<_, MembershipRow>(&sql)
            .bind(user_id)
            .bind(team_id)
            .fetch_optional(&self.pool)
            .await?
            .map(TeamMembership::try_from)
            .transpose()
    }

    async fn list_memberships(&self, user_id: &str) -> Result<Vec<TeamMembership>, PortalError> {
        let sql = format!(
            "SELECT {} FROM team_memberships WHERE user_id = $1 ORDER BY joined_at",
            MEMBERSHIP_COLUMNS
        );
        sqlx::query_as::<_, MembershipRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(TeamMembership::try_from)
            .collect()
    }

    async fn list_team_members(&self, team_id: Uuid) -> Result<Vec<TeamMembership>, PortalError> {
        let sql = format!(
            "SELECT {} FROM team_memberships WHERE team_id = $1 ORDER BY joined_at",
            MEMBERSHIP_COLUMNS
        );
        sqlx::query_as::<_, MembershipRow>(&sql)
            .bind(team_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(TeamMembership::try_from)
            .collect()
    }

    async fn ensure_membership(
        &self,
        membership: TeamMembership,
    ) -> Result<EnsuredMembership, PortalError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO team_memberships (user_id, team_id, status, joined_at, answered_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, team_id) DO NOTHING
            "#,
        )
        .bind(&membership.user_id)
        .bind(membership.team_id)
        .bind(membership.status.as_str())
        .bind(membership.joined_at)
        .bind(membership.answered_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            return Ok(EnsuredMembership::Created(membership));
        }

        self.find_membership(&membership.user_id, membership.team_id)
            .await?
            .map(EnsuredMembership::Existing)
            .ok_or_else(|| {
                PortalError::Storage(anyhow::anyhow!(
                    "membership conflict reported but no row found"
                ))
            })
    }

    async fn find_progress(
        &self,
        user_id: &str,
        team_id: Uuid,
    ) -> Result<Option<SurveyProgress>, PortalError> {
        sqlx::query_as::<_, ProgressRow>(
            r#"
            SELECT user_id, team_id, current_step, completed_at, updated_at
            FROM survey_progress WHERE user_id = $1 AND team_id = $2
            "#,
        )
        .bind(user_id)
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?
        .map(SurveyProgress::try_from)
        .transpose()
    }

    #[instrument(skip(self, commit), fields(user_id = %commit.progress.user_id, team_id = %commit.progress.team_id, step = %commit.submitted))]
    async fn commit_step(&self, commit: StepCommit<'_>) -> Result<CommitOutcome, PortalError> {
        let progress = commit.progress;
        let mut tx = self.pool.begin().await?;

        // Compare-and-set on the step the caller saw.
        let mut advanced = sqlx::query(
            r#"
            UPDATE survey_progress
            SET current_step = $3, completed_at = $4, updated_at = $5
            WHERE user_id = $1 AND team_id = $2 AND current_step = $6
            "#,
        )
        .bind(&progress.user_id)
        .bind(progress.team_id)
        .bind(progress.current_step.as_str())
        .bind(progress.completed_at)
        .bind(progress.updated_at)
        .bind(commit.expected_step.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if advanced == 0 && commit.expected_step == SurveyStep::Demographic {
            advanced = sqlx::query(
                r#"
                INSERT INTO survey_progress (user_id, team_id, current_step, completed_at, updated_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (user_id, team_id) DO NOTHING
                "#,
            )
            .bind(&progress.user_id)
            .bind(progress.team_id)
            .bind(progress.current_step.as_str())
            .bind(progress.completed_at)
            .bind(progress.updated_at)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        if advanced == 0 {
            tx.rollback().await.ok();
            return Ok(CommitOutcome::Stale);
        }

        sqlx::query(
            r#"
            INSERT INTO survey_responses (user_id, team_id, step, payload, submitted_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&progress.user_id)
        .bind(progress.team_id)
        .bind(commit.submitted.as_str())
        .bind(commit.payload)
        .bind(progress.updated_at)
        .execute(&mut *tx)
        .await?;

        if progress.is_complete() {
            let answered_at = progress.completed_at.unwrap_or(progress.updated_at);
            let touched = sqlx::query(
                r#"
                UPDATE team_memberships
                SET status = 'answered', answered_at = COALESCE(answered_at, $3)
                WHERE user_id = $1 AND team_id = $2
                "#,
            )
            .bind(&progress.user_id)
            .bind(progress.team_id)
            .bind(answered_at)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if touched == 0 {
                tx.rollback().await.ok();
                return Err(PortalError::ProgressInconsistency(format!(
                    "no membership for user {} in team {}",
                    progress.user_id, progress.team_id
                )));
            }
        }

        tx.commit().await?;
        Ok(CommitOutcome::Committed)
    }
}
