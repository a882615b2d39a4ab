//! Per-request dispatch pipeline.
//!
//! ```text
//! Start ──resolve──▶ Resolved ──invoke──▶ Invoked ──pre-response──▶ Success
//!   │                    │
//!   └──────────┬─────────┘
//!              ▼
//!           Failed ──error listeners──▶ Invoked | Error
//! ```

mod front;
mod request;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::histogram;
use tracing::{debug, instrument, warn};

use crate::application::error::DispatchError;
use crate::application::events::{
    ControllerEvent, ErrorEvent, NotificationBus, ResponseEvent, TerminateEvent,
};
use crate::application::repos::RouteTable;

pub use front::{FrontController, FrontSettings, ROOT_URI};
pub use request::{ControllerBinding, DispatchRequest, DispatchResponse};

pub const METRIC_DISPATCH_MS: &str = "quire_dispatch_ms";

/// Controller name used when a route does not name one.
pub const DEFAULT_CONTROLLER: &str = "front";

/// Named group of actions.
#[async_trait]
pub trait Controller: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs `action`; unknown actions must yield a bad-request error.
    async fn invoke(
        &self,
        action: &str,
        request: &DispatchRequest,
        params: &BTreeMap<String, String>,
    ) -> Result<DispatchResponse, DispatchError>;
}

enum DispatchState {
    Start,
    Resolved(ControllerBinding),
    Invoked(DispatchResponse),
    Failed(DispatchError),
}

/// Resolves, invokes and post-processes one request at a time.
///
/// The dispatcher holds no per-request state and can serve concurrent
/// requests from a shared reference.
#[derive(Clone)]
pub struct Dispatcher {
    routes: Arc<dyn RouteTable>,
    fallback: Option<Arc<dyn RouteTable>>,
    controllers: HashMap<&'static str, Arc<dyn Controller>>,
    bus: NotificationBus,
}

impl Dispatcher {
    pub fn new(routes: Arc<dyn RouteTable>, bus: NotificationBus) -> Self {
        Self {
            routes,
            fallback: None,
            controllers: HashMap::new(),
            bus,
        }
    }

    /// Catch-all table consulted when no route matches.
    pub fn with_fallback(mut self, fallback: Arc<dyn RouteTable>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_controller(mut self, controller: Arc<dyn Controller>) -> Self {
        self.controllers.insert(controller.name(), controller);
        self
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    /// Runs the pipeline to a terminal state.
    ///
    /// An error is returned only when no error listener converted it.
    #[instrument(skip_all, fields(method = %request.method(), path = request.path()))]
    pub async fn handle(
        &self,
        request: &DispatchRequest,
    ) -> Result<DispatchResponse, DispatchError> {
        let started_at = Instant::now();
        let mut state = DispatchState::Start;

        let result = loop {
            state = match state {
                DispatchState::Start => match self.resolve(request) {
                    Some(binding) => DispatchState::Resolved(binding),
                    None => DispatchState::Failed(DispatchError::not_found(format!(
                        "no route matches `{}`",
                        request.path()
                    ))),
                },
                DispatchState::Resolved(binding) => match self.invoke(request, binding).await {
                    Ok(response) => DispatchState::Invoked(response),
                    Err(err) => DispatchState::Failed(err),
                },
                DispatchState::Invoked(response) => {
                    let mut event = ResponseEvent::new(request, response);
                    self.bus.pre_response(&mut event).await;
                    break Ok(event.into_response());
                }
                DispatchState::Failed(err) => {
                    debug!(kind = %err.kind(), detail = err.detail(), "Dispatch failed");
                    let mut event = ErrorEvent::new(request, &err);
                    self.bus.error(&mut event).await;
                    match event.into_response() {
                        Some(response) => DispatchState::Invoked(response),
                        None => break Err(err),
                    }
                }
            };
        };

        let outcome = match &result {
            Ok(_) => "success",
            Err(err) => err.kind().as_str(),
        };
        histogram!(METRIC_DISPATCH_MS, "outcome" => outcome)
            .record(started_at.elapsed().as_secs_f64() * 1000.0);
        result
    }

    /// Notifies terminate listeners once `response` has been transmitted.
    pub async fn terminate(&self, request: &DispatchRequest, response: &DispatchResponse) {
        self.bus
            .terminate(&TerminateEvent::new(request, response))
            .await;
    }

    fn resolve(&self, request: &DispatchRequest) -> Option<ControllerBinding> {
        if let Some(binding) = request.binding() {
            return Some(binding.clone());
        }

        let matched = self.routes.match_path(request.path()).or_else(|| {
            self.fallback
                .as_ref()
                .and_then(|fallback| fallback.match_path(request.path()))
        })?;

        Some(ControllerBinding {
            controller: matched
                .controller
                .unwrap_or_else(|| DEFAULT_CONTROLLER.to_string()),
            action: matched.action,
            params: matched.params,
        })
    }

    async fn invoke(
        &self,
        request: &DispatchRequest,
        binding: ControllerBinding,
    ) -> Result<DispatchResponse, DispatchError> {
        let mut event = ControllerEvent::new(request, binding);
        self.bus.pre_dispatch(&mut event).await;

        let binding = event.binding();
        let Some(controller) = self.controllers.get(binding.controller.as_str()) else {
            warn!(controller = %binding.controller, "Dispatch bound to unknown controller");
            return Err(DispatchError::bad_request(format!(
                "controller `{}` is not registered",
                binding.controller
            )));
        };

        let response = controller
            .invoke(&binding.action, request, &binding.params)
            .await?;
        self.bus.post_dispatch(&event, &response).await;
        Ok(response)
    }
}
