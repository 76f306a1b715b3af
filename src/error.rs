//! Unified error type.

use thiserror::Error as ThisError;

/// Boxed error accepted from application code (handlers, stores, streams).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shorthand for `Result<T, spindle::Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type returned by spindle's fallible operations.
///
/// Application-level outcomes (404, 422, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values. This type covers infrastructure
/// failures and failures raised while a request travels through the handler
/// chain, which the dispatcher routes to the nearest error handler.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config: {0}")]
    Config(String),

    /// A route pattern could not be compiled.
    #[error("invalid route `{pattern}`: {reason}")]
    Route { pattern: String, reason: String },

    /// No route entry matched the request.
    #[error("no route for {method} {path}")]
    NotFound { method: String, path: String },

    /// The last handler of a route delegated; nothing is left to answer.
    #[error("last handler of {path} delegated with no handler after it")]
    UnhandledDelegation { path: String },

    /// A handler or interceptor failed.
    #[error("handler: {0}")]
    Handler(BoxError),

    /// A handler returned a value the response coercer does not recognize.
    #[error("cannot turn a value of type `{type_name}` into a response")]
    Coercion { type_name: &'static str },

    /// A streaming body source failed after the response head was sent.
    #[error("stream: {0}")]
    Stream(BoxError),

    #[error("session store: {0}")]
    Session(BoxError),
}

impl Error {
    /// Wraps any application error as a handler failure.
    ///
    /// ```rust
    /// use spindle::Error;
    ///
    /// let err = Error::handler("database unavailable");
    /// assert_eq!(err.to_string(), "handler: database unavailable");
    /// ```
    pub fn handler(err: impl Into<BoxError>) -> Self {
        Self::Handler(err.into())
    }

    pub fn stream(err: impl Into<BoxError>) -> Self {
        Self::Stream(err.into())
    }

    pub fn session(err: impl Into<BoxError>) -> Self {
        Self::Session(err.into())
    }

    /// Short, stable label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Config(_) => "config",
            Self::Route { .. } => "route",
            Self::NotFound { .. } => "not_found",
            Self::UnhandledDelegation { .. } => "unhandled_delegation",
            Self::Handler(_) => "handler",
            Self::Coercion { .. } => "coercion",
            Self::Stream(_) => "stream",
            Self::Session(_) => "session",
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}
