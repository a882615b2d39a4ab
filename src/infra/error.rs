use std::{io, net::SocketAddr};

use thiserror::Error;

/// Failures while wiring the process to files, sockets and the log sink.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("cannot read `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("http server stopped: {0}")]
    Serve(#[source] io::Error),
    #[error("cannot write output: {0}")]
    Output(#[source] io::Error),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("configuration error: {message}")]
    Configuration { message: String },
    #[error("site fixture `{path}` is invalid: {message}")]
    Fixture { path: String, message: String },
}

impl InfraError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }

    pub fn fixture(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fixture {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn bind(addr: SocketAddr) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Bind { addr, source }
    }
}
