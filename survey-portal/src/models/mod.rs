pub mod invite;
pub mod role;
pub mod session;
pub mod survey;
pub mod team;
pub mod user;

pub use invite::{InviteClaims, InviteParams, PendingInvite};
pub use role::{Portal, Role};
pub use session::{AuthSession, Credentials, SignUpForm};
pub use survey::{ProgressResponse, SURVEY_STEPS, StepOrderError, SurveyProgress, SurveyStep};
pub use team::{CreateTeamRequest, CreateTeamResponse, MembershipStatus, Team, TeamMembership};
pub use user::CurrentUser;
