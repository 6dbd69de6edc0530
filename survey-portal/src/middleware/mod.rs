pub mod attempts;
pub mod guard;
pub mod host;
