use crate::backup::result_error::{AddDebugObjectAndFnName, AddFunctionName, AddMsg};
use indent::indent_all_with;
use itertools::Itertools;
use std::fmt::Debug;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification used by the orchestrator and for exit codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    SourceUnavailable,
    DestinationUnavailable,
    Write,
    Persist,
    RetentionWarning,
    Locked,
    Other,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    LiblzmaStream(#[from] liblzma::stream::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error(transparent)]
    Globset(#[from] globset::Error),
    #[error(transparent)]
    StripPrefix(#[from] std::path::StripPrefixError),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Source unavailable {:?}:\n{}", path, indent_all_with("  ", error.to_string()))]
    SourceUnavailable { path: PathBuf, error: Box<Error> },
    #[error("Destination unavailable {:?}: {}", path, reason)]
    DestinationUnavailable { path: PathBuf, reason: String },
    #[error("Write {:?} failed:\n{}", path, indent_all_with("  ", error.to_string()))]
    Write { path: PathBuf, error: Box<Error> },
    #[error("Persist watermark to {:?} failed:\n{}", path, indent_all_with("  ", error.to_string()))]
    Persist { path: PathBuf, error: Box<Error> },
    #[error("Retention of {:?} failed:\n{}", path, indent_all_with("  ", error.to_string()))]
    RetentionWarning { path: PathBuf, error: Box<Error> },
    #[error("Another backup run holds the lock {:?}", path)]
    Locked { path: PathBuf },
    #[error("{}:\n{}", msg, indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{} failed:\n{}", fn_name, indent_all_with("  ", error.to_string()))]
    WithFnName { error: Box<Error>, fn_name: String },
    #[error("{:?} {} failed:\n{}", obj_debug, fn_name, indent_all_with("  ", error.to_string()))]
    WithDebugObjAndFnName {
        error: Box<Error>,
        obj_debug: Box<dyn Debug + Send>,
        fn_name: String,
    },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

impl<S: Into<String>, O: Debug + Send + 'static> AddDebugObjectAndFnName<S, O> for Error {
    fn add_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        Error::WithDebugObjAndFnName {
            error: Box::new(self),
            obj_debug: Box::new(obj),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> AddFunctionName<S> for Error {
    fn add_fn_name(self, fn_name: S) -> Self {
        Error::WithFnName {
            error: Box::new(self),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> AddMsg<S> for Error {
    fn add_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl Error {
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn source_unavailable<P: Into<PathBuf>, E: Into<Error>>(path: P, error: E) -> Self {
        Self::SourceUnavailable {
            path: path.into(),
            error: Box::new(error.into()),
        }
    }

    pub fn destination_unavailable<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::DestinationUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn write<P: Into<PathBuf>, E: Into<Error>>(path: P, error: E) -> Self {
        Self::Write {
            path: path.into(),
            error: Box::new(error.into()),
        }
    }

    pub fn persist<P: Into<PathBuf>, E: Into<Error>>(path: P, error: E) -> Self {
        Self::Persist {
            path: path.into(),
            error: Box::new(error.into()),
        }
    }

    pub fn retention_warning<P: Into<PathBuf>, E: Into<Error>>(path: P, error: E) -> Self {
        Self::RetentionWarning {
            path: path.into(),
            error: Box::new(error.into()),
        }
    }

    /// Classification of this error, looking through context wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_)
            | Error::ValidationError(_)
            | Error::SerdeYml(_)
            | Error::SerdeJson(_)
            | Error::Globset(_) => ErrorKind::Configuration,
            Error::SourceUnavailable { .. } => ErrorKind::SourceUnavailable,
            Error::DestinationUnavailable { .. } => ErrorKind::DestinationUnavailable,
            Error::Write { .. } => ErrorKind::Write,
            Error::Persist { .. } => ErrorKind::Persist,
            Error::RetentionWarning { .. } => ErrorKind::RetentionWarning,
            Error::Locked { .. } => ErrorKind::Locked,
            Error::WithMsg { error, .. }
            | Error::WithFnName { error, .. }
            | Error::WithDebugObjAndFnName { error, .. } => error.kind(),
            Error::LotsOfError(errors) => errors.first().map_or(ErrorKind::Other, Error::kind),
            Error::Io(_)
            | Error::LiblzmaStream(_)
            | Error::WalkDir(_)
            | Error::StripPrefix(_) => ErrorKind::Other,
        }
    }

    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(|e| e.into_iter())),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }
}
