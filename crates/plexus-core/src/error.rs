use thiserror::Error;

/// Canonical result for core and for everything evaluated at run time.
pub type Result<T> = std::result::Result<T, Error>;

/// Runtime error shared by values, async values, stages and result handlers.
///
/// `Clone` because a failed asynchronous value may be observed by several
/// readers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Missing required program argument '{name}' (type '{ty}')")]
    MissingArgument { name: String, ty: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Type error: {0}")]
    Type(String),

    #[error("Invocation of '{name}' failed: {message}")]
    Invocation { name: String, message: String },

    #[error("Execution error: {0}")]
    Exec(String),

    #[error("Hashing error: {0}")]
    Hash(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),

    /// Context layer added while an error travels outward (stage name, step,
    /// scatter item...). Never the root cause.
    #[error("{context}: {source}")]
    Wrapped {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn wrap(self, context: impl Into<String>) -> Self {
        Error::Wrapped {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Unwind every wrapper layer and return the innermost error.
    pub fn root_cause(&self) -> &Error {
        let mut cur = self;
        while let Error::Wrapped { source, .. } = cur {
            cur = source;
        }
        cur
    }

    pub fn into_root_cause(self) -> Error {
        let mut cur = self;
        while let Error::Wrapped { source, .. } = cur {
            cur = *source;
        }
        cur
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root_cause(), Error::Timeout(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwinds_all_layers() {
        let err = Error::Timeout("after 10ms".into())
            .wrap("scatter item 3")
            .wrap("stage 'scatter'");
        assert!(err.is_timeout());
        assert_eq!(err.root_cause(), &Error::Timeout("after 10ms".into()));
        assert_eq!(err.into_root_cause(), Error::Timeout("after 10ms".into()));
    }

    #[test]
    fn test_missing_argument_message() {
        let err = Error::MissingArgument {
            name: "x".into(),
            ty: "int32".into(),
        };
        assert_eq!(
            err.to_string(),
            "Missing required program argument 'x' (type 'int32')"
        );
    }
}
