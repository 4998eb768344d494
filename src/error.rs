use anyhow::anyhow;

pub type Result<T> = std::result::Result<T, LibError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Connectivity,
    DataAccess,
    Persistence,
    InvalidInput,
    Unknown,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::DataAccess => "data_access",
            ErrorKind::Persistence => "persistence",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug)]
pub struct LibError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub public: &'static str,
    pub source: anyhow::Error,
}

impl std::fmt::Display for LibError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:#}", self.public, self.source)
    }
}

impl std::error::Error for LibError {}

impl LibError {
    pub fn configuration(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Configuration,
            code: "configuration_error",
            public,
            source,
        }
    }

    pub fn configuration_with_code(
        code: &'static str,
        public: &'static str,
        source: anyhow::Error,
    ) -> Self {
        Self {
            kind: ErrorKind::Configuration,
            code,
            public,
            source,
        }
    }

    pub fn connectivity(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Connectivity,
            code: "connectivity_error",
            public,
            source,
        }
    }

    pub fn data_access(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::DataAccess,
            code: "data_access_error",
            public,
            source,
        }
    }

    pub fn persistence_with_code(
        code: &'static str,
        public: &'static str,
        source: anyhow::Error,
    ) -> Self {
        Self {
            kind: ErrorKind::Persistence,
            code,
            public,
            source,
        }
    }

    pub fn invalid_with_code(
        code: &'static str,
        public: &'static str,
        source: anyhow::Error,
    ) -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            code,
            public,
            source,
        }
    }

    pub fn unknown(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            code: "unknown_error",
            public,
            source,
        }
    }

    /// Fatal errors abort the whole batch instead of failing a single user.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::Configuration | ErrorKind::Connectivity)
    }

    /// Maps a driver error raised on the read path.
    pub fn from_read(public: &'static str, err: sqlx::Error) -> Self {
        match classify(&err) {
            Some(kind) => Self::from_kind(kind, public, err),
            None => Self::data_access(public, anyhow!(err)),
        }
    }

    /// Maps a driver error raised while writing inside a backfill transaction.
    pub fn from_write(public: &'static str, err: sqlx::Error) -> Self {
        if let Some(kind) = classify(&err) {
            return Self::from_kind(kind, public, err);
        }

        let code = match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => "unique_violation",
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => "foreign_key_violation",
            sqlx::Error::Database(db) if db.is_check_violation() => "check_violation",
            _ => "persistence_error",
        };
        Self::persistence_with_code(code, public, anyhow!(err))
    }

    fn from_kind(kind: ErrorKind, public: &'static str, err: sqlx::Error) -> Self {
        match kind {
            ErrorKind::Configuration => Self::configuration(public, anyhow!(err)),
            _ => Self::connectivity(public, anyhow!(err)),
        }
    }
}

/// Errors that say nothing about the row being processed.
fn classify(err: &sqlx::Error) -> Option<ErrorKind> {
    match err {
        sqlx::Error::Configuration(_) => Some(ErrorKind::Configuration),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => Some(ErrorKind::Connectivity),
        sqlx::Error::Database(db)
            if db.code().is_some_and(|code| is_connection_sqlstate(&code)) =>
        {
            Some(ErrorKind::Connectivity)
        }
        _ => None,
    }
}

/// SQLSTATE class 08 (connection exception) and the server shutdown codes
/// `admin_shutdown`, `crash_shutdown` and `cannot_connect_now`.
fn is_connection_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03")
}

impl From<sqlx::Error> for LibError {
    fn from(value: sqlx::Error) -> Self {
        Self::from_read("Database request failed", value)
    }
}
