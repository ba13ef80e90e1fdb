use anyhow::anyhow;

pub type Result<T> = std::result::Result<T, LibError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Protected,
    Cycle,
    SelfLoop,
    Duplicate,
    InvalidKind,
    InvalidInput,
    HandleOccupied,
    RemoteFailure,
}

impl ErrorKind {
    /// Whether the error was raised after an optimistic change had been applied.
    pub const fn requires_rollback(self) -> bool {
        matches!(self, ErrorKind::RemoteFailure)
    }
}

#[derive(Debug)]
pub struct LibError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub public: &'static str,
    pub source: anyhow::Error,
}

impl LibError {
    pub fn not_found(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            code: "not_found",
            public,
            source,
        }
    }

    pub fn protected(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Protected,
            code: "protected",
            public,
            source,
        }
    }

    pub fn cycle(source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Cycle,
            code: "workflow_cycle",
            public: "Connection would create a cycle",
            source,
        }
    }

    pub fn self_loop(source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::SelfLoop,
            code: "workflow_self_loop",
            public: "A step cannot connect to itself",
            source,
        }
    }

    pub fn duplicate(source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Duplicate,
            code: "workflow_duplicate_edge",
            public: "These steps are already connected",
            source,
        }
    }

    pub fn invalid_kind(source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::InvalidKind,
            code: "workflow_invalid_kind",
            public: "Unknown step type",
            source,
        }
    }

    pub fn invalid(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            code: "invalid_input",
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

    pub fn handle_occupied(source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::HandleOccupied,
            code: "workflow_handle_occupied",
            public: "This connection point is already in use",
            source,
        }
    }

    pub fn remote(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::RemoteFailure,
            code: "remote_failure",
            public,
            source,
        }
    }

    /// Copies kind, code and message; the cause chain is flattened to text.
    pub fn replicate(&self) -> Self {
        Self {
            kind: self.kind,
            code: self.code,
            public: self.public,
            source: anyhow!("{:#}", self.source),
        }
    }
}

impl std::fmt::Display for LibError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {:#}", self.public, self.code, self.source)
    }
}

impl std::error::Error for LibError {}
