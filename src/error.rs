//! Client error taxonomy.

use crate::config::ServerAddr;
use crate::connection::ConnectionError;
use crate::protocol::ReplyError;
use crate::routing::NameCollision;
use thiserror::Error;

/// Errors returned by the client API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// I/O error or timeout talking to a server
    #[error("connection to {server} failed: {source}")]
    ConnectionFailure {
        server: ServerAddr,
        #[source]
        source: ConnectionError,
    },

    /// The collection is unknown after a discovery refresh, or the server no
    /// longer hosts it
    #[error("collection '{name}' not found")]
    NotFound {
        name: String,
        server: Option<ServerAddr>,
    },

    #[error("collection '{name}' already exists on {server}")]
    AlreadyExists { name: String, server: ServerAddr },

    /// Malformed or unexpected response, or a server-side error line
    #[error("protocol error from {server}: {message}")]
    Protocol { server: ServerAddr, message: String },

    /// Two servers claim the same collection.
    ///
    /// The client never fails an operation over a collision; it records them
    /// for [`Client::collisions`](crate::Client::collisions). This variant lets
    /// callers who treat a collision as fatal turn one into an error with `?`.
    #[error(transparent)]
    NameCollision(#[from] NameCollision),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A pinned create named a server that is not configured
    #[error("server {0} is not configured")]
    UnknownServer(ServerAddr),

    #[error("pipeline has already been executed")]
    PipelineExhausted,

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    pub(crate) fn connection(server: &ServerAddr, source: ConnectionError) -> Self {
        ClientError::ConnectionFailure {
            server: server.clone(),
            source,
        }
    }

    /// Attaches the collection name and server to a decoded error response.
    pub(crate) fn from_reply(error: ReplyError, name: Option<&str>, server: &ServerAddr) -> Self {
        let name = name.unwrap_or_default().to_string();
        match error {
            ReplyError::NotFound => ClientError::NotFound {
                name,
                server: Some(server.clone()),
            },
            ReplyError::Exists => ClientError::AlreadyExists {
                name,
                server: server.clone(),
            },
            ReplyError::Server(message) => ClientError::Protocol {
                server: server.clone(),
                message,
            },
            other @ ReplyError::Unexpected { .. } => ClientError::Protocol {
                server: server.clone(),
                message: other.to_string(),
            },
        }
    }

    pub fn is_connection_failure(&self) -> bool {
        matches!(self, ClientError::ConnectionFailure { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }

    /// The server involved, when there is one.
    pub fn server(&self) -> Option<&ServerAddr> {
        match self {
            ClientError::ConnectionFailure { server, .. }
            | ClientError::AlreadyExists { server, .. }
            | ClientError::Protocol { server, .. }
            | ClientError::UnknownServer(server) => Some(server),
            ClientError::NotFound { server, .. } => server.as_ref(),
            ClientError::NameCollision(collision) => Some(&collision.duplicate),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_reply_carries_context() {
        let server = ServerAddr::new("10.0.0.1", 8673);

        let err = ClientError::from_reply(ReplyError::NotFound, Some("users"), &server);
        assert!(err.is_not_found());
        assert_eq!(err.server(), Some(&server));
        assert_eq!(err.to_string(), "collection 'users' not found");

        let err = ClientError::from_reply(ReplyError::Exists, Some("users"), &server);
        assert_eq!(
            err.to_string(),
            "collection 'users' already exists on 10.0.0.1:8673"
        );

        let err = ClientError::from_reply(
            ReplyError::Server("Internal Error".to_string()),
            None,
            &server,
        );
        assert!(matches!(
            err,
            ClientError::Protocol { ref message, .. } if message == "Internal Error"
        ));
    }

    #[test]
    fn test_collision_converts_with_question_mark() {
        fn strict(collisions: &[NameCollision]) -> ClientResult<()> {
            if let Some(collision) = collisions.first() {
                Err::<(), _>(collision.clone())?;
            }
            Ok(())
        }

        let collision = NameCollision {
            name: "users".to_string(),
            kept: ServerAddr::new("a", 8673),
            duplicate: ServerAddr::new("b", 8673),
        };
        assert!(strict(&[]).is_ok());

        let err = strict(&[collision]).unwrap_err();
        assert!(matches!(err, ClientError::NameCollision(ref c) if c.name == "users"));
        assert_eq!(err.server(), Some(&ServerAddr::new("b", 8673)));
        assert_eq!(
            err.to_string(),
            "collection 'users' is claimed by both a:8673 and b:8673"
        );
    }

    #[test]
    fn test_connection_failure_display() {
        let server = ServerAddr::new("localhost", 8673);
        let err = ClientError::connection(&server, ConnectionError::Closed);
        assert!(err.is_connection_failure());
        assert_eq!(
            err.to_string(),
            "connection to localhost:8673 failed: server closed the connection"
        );
    }
}
