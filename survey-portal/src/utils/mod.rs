pub mod crypto;
pub mod redirect;
