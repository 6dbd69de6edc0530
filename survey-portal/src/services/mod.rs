pub mod error;
pub mod identity;
pub mod invites;
pub mod progress;
pub mod repository;
pub mod session;
pub mod wait;

pub use error::PortalError;
pub use identity::{HttpIdentityProvider, IdentityProvider, ProviderTokens};
pub use invites::{InviteLifecycle, InviteSigner};
pub use progress::SurveyProgressTracker;
pub use repository::{InMemoryRepository, PgRepository, SurveyRepository};
pub use session::{SessionEvents, SessionResolver};
pub use wait::WaitPolicy;
