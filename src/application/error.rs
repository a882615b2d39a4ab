use std::error::Error as StdError;
use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{render::RenderError, repos::RepoError},
    cache::FlushError,
    domain::error::DomainError,
    infra::error::InfraError,
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// The only failure classes the dispatch pipeline distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchErrorKind {
    NotFound,
    BadRequest,
    Internal,
}

impl DispatchErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            DispatchErrorKind::NotFound => StatusCode::NOT_FOUND,
            DispatchErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            DispatchErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DispatchErrorKind::NotFound => "not_found",
            DispatchErrorKind::BadRequest => "bad_request",
            DispatchErrorKind::Internal => "internal_error",
        }
    }
}

impl fmt::Display for DispatchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured dispatch failure.
///
/// `public_message` is safe to show to the requester; `detail` and the source
/// chain are for logs only.
#[derive(Debug, Error)]
#[error("{kind}: {detail}")]
pub struct DispatchError {
    kind: DispatchErrorKind,
    public_message: &'static str,
    detail: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl DispatchError {
    fn new(
        kind: DispatchErrorKind,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            public_message,
            detail: detail.into(),
            source: None,
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(DispatchErrorKind::NotFound, "Not found", detail)
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(DispatchErrorKind::BadRequest, "Bad request", detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(DispatchErrorKind::Internal, "Internal server error", detail)
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> DispatchErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    pub fn public_message(&self) -> &'static str {
        self.public_message
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn report(&self, source: &'static str) -> ErrorReport {
        ErrorReport::from_error(source, self.status(), self)
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let report = self.report("application::error::DispatchError");
        let mut response = (self.status(), self.public_message).into_response();
        report.attach(&mut response);
        response
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            report,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<FlushError> for HttpError {
    fn from(error: FlushError) -> Self {
        HttpError::from_error(
            "infra::http::flush_error_to_http_error",
            StatusCode::SERVICE_UNAVAILABLE,
            "Cache invalidation failed",
            &error,
        )
    }
}

impl From<RepoError> for HttpError {
    fn from(error: RepoError) -> Self {
        HttpError::from_error(
            "infra::http::repo_error_to_http_error",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            &error,
        )
    }
}

impl From<DomainError> for HttpError {
    fn from(error: DomainError) -> Self {
        let (status, public_message) = match &error {
            DomainError::UnknownEntity { .. } => (StatusCode::NOT_FOUND, "Resource not found"),
            DomainError::EmptyUpdate { .. } => (StatusCode::BAD_REQUEST, "Nothing to update"),
            DomainError::UriTaken { .. } => (StatusCode::CONFLICT, "Uri is already in use"),
        };
        HttpError::from_error(
            "infra::http::domain_error_to_http_error",
            status,
            public_message,
            &error,
        )
    }
}

/// Failures surfaced by the binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
