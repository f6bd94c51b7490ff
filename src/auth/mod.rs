//! Authentication: bearer credential storage and headers.

mod credentials;

pub use credentials::{CredentialProvider, StoredCredentials};
