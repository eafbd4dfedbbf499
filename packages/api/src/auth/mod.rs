//! Authentication: credential digests, credential validation and sessions.

mod credentials;
pub mod password;
mod session;

pub use credentials::{CredentialValidator, Validation};
pub use password::Passwords;
pub use session::{SessionError, SessionId, SessionRegistry, SESSION_ID_KEY};
