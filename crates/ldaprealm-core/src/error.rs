//! Error types for ldaprealm
//!
//! Messages never carry bind passwords or user credentials.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing mandatory setting. Fatal at initialization.
    #[error("LDAP configuration error: {0}")]
    Configuration(String),

    /// Cannot open or maintain a directory connection.
    #[error("Unable to open LDAP connection: {0}")]
    Connectivity(String),

    /// StartTLS extended operation or handshake failed.
    #[error("StartTLS negotiation failed: {0}")]
    TlsNegotiation(String),

    /// The directory rejected a bind.
    #[error("LDAP bind rejected: {0}")]
    Authentication(String),

    /// No directory entry matches the login.
    #[error("No such user: {0}")]
    NotFound(String),

    /// Connectivity or protocol failure while looking up a user.
    #[error("Unable to retrieve details for user {login}: {reason}")]
    Retrieval { login: String, reason: String },

    /// The directory answered a search with an error, or the answer was unusable.
    #[error("LDAP search failed: {0}")]
    Search(String),

    /// The search base is not held by this server (noSuchObject or referral).
    #[error("No such LDAP object: {0}")]
    NoSuchObject(String),

    #[error("LDAP operation timed out: {0}")]
    Timeout(String),

    #[error("Failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn connectivity(msg: impl Into<String>) -> Self {
        Error::Connectivity(msg.into())
    }

    pub fn tls(msg: impl Into<String>) -> Self {
        Error::TlsNegotiation(msg.into())
    }

    pub fn not_found(login: impl Into<String>) -> Self {
        Error::NotFound(login.into())
    }

    pub fn retrieval(login: impl Into<String>, reason: impl ToString) -> Self {
        Error::Retrieval {
            login: login.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the directory could not be reached (including TLS and timeouts).
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Error::Connectivity(_) | Error::TlsNegotiation(_) | Error::Timeout(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Short stable identifier, used by the CLI for machine-readable output.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "ConfigurationError",
            Error::Connectivity(_) => "ConnectivityError",
            Error::TlsNegotiation(_) => "TlsNegotiationError",
            Error::Authentication(_) => "AuthenticationError",
            Error::NotFound(_) => "NotFoundError",
            Error::Retrieval { .. } => "RetrievalError",
            Error::Search(_) | Error::NoSuchObject(_) => "SearchError",
            Error::Timeout(_) => "TimeoutError",
            Error::Io(_) | Error::Toml(_) => "ConfigurationError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert!(Error::connectivity("refused").is_connectivity());
        assert!(Error::tls("handshake").is_connectivity());
        assert!(Error::Timeout("search".into()).is_connectivity());
        assert!(!Error::not_found("tester").is_connectivity());
        assert!(Error::not_found("tester").is_not_found());
        assert_eq!(Error::NoSuchObject("cn=g1".into()).code(), "SearchError");
    }

    #[test]
    fn test_retrieval_message_names_login() {
        let err = Error::retrieval("tester", Error::connectivity("no-such-host"));
        assert!(err
            .to_string()
            .contains("Unable to retrieve details for user tester"));
        assert_eq!(err.code(), "RetrievalError");
    }
}
