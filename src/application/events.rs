//! Notification bus for render and dispatch lifecycle events.
//!
//! Listeners run in registration order and receive each event by mutable
//! reference. An event exposes setters only for the fields listeners are
//! allowed to change; everything else is read-only.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::application::dispatch::{ControllerBinding, DispatchRequest, DispatchResponse};
use crate::application::error::DispatchError;
use crate::application::render::RenderContext;
use crate::domain::entities::{RenderTarget, Renderable};

/// Fired around the rendering of one page or content node.
#[derive(Debug)]
pub struct RenderEvent {
    target: RenderTarget,
    context: RenderContext,
    renderer: String,
    fingerprint: String,
    cached: Option<Bytes>,
    output: Option<Bytes>,
    stamp: Option<u64>,
}

impl RenderEvent {
    pub fn new(
        target: RenderTarget,
        context: RenderContext,
        renderer: impl Into<String>,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            target,
            context,
            renderer: renderer.into(),
            fingerprint: fingerprint.into(),
            cached: None,
            output: None,
            stamp: None,
        }
    }

    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    pub fn renderer(&self) -> &str {
        &self.renderer
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Supplies a previously rendered payload; the renderer is then skipped.
    pub fn serve_cached(&mut self, payload: Bytes) {
        self.cached = Some(payload);
    }

    pub fn is_served_from_cache(&self) -> bool {
        self.cached.is_some()
    }

    pub(crate) fn take_cached(&mut self) -> Option<Bytes> {
        self.cached.take()
    }

    /// Freshly rendered output; present during post-render only.
    pub fn output(&self) -> Option<&Bytes> {
        self.output.as_ref()
    }

    pub(crate) fn set_output(&mut self, output: Bytes) {
        self.output = Some(output);
    }

    /// Opaque value a listener records on pre-render and reads on post-render.
    pub fn stamp(&self) -> Option<u64> {
        self.stamp
    }

    pub fn set_stamp(&mut self, stamp: u64) {
        self.stamp = Some(stamp);
    }

    pub fn clear_stamp(&mut self) {
        self.stamp = None;
    }

    /// Swaps in a newer record of the same entity; other targets are refused.
    pub fn refresh_target(&mut self, target: RenderTarget) -> bool {
        let same_entity = target.kind() == self.target.kind()
            && target.identity() == self.target.identity();
        if same_entity {
            self.target = target;
        }
        same_entity
    }
}

/// Fired before and after the bound action runs.
#[derive(Debug)]
pub struct ControllerEvent<'a> {
    request: &'a DispatchRequest,
    binding: ControllerBinding,
}

impl<'a> ControllerEvent<'a> {
    pub fn new(request: &'a DispatchRequest, binding: ControllerBinding) -> Self {
        Self { request, binding }
    }

    pub fn request(&self) -> &DispatchRequest {
        self.request
    }

    pub fn binding(&self) -> &ControllerBinding {
        &self.binding
    }

    /// Redirects dispatch to another controller/action. Honoured during
    /// pre-dispatch only.
    pub fn set_binding(&mut self, binding: ControllerBinding) {
        self.binding = binding;
    }

    pub(crate) fn into_binding(self) -> ControllerBinding {
        self.binding
    }
}

/// Fired once a response exists, before it is transmitted.
#[derive(Debug)]
pub struct ResponseEvent<'a> {
    request: &'a DispatchRequest,
    response: DispatchResponse,
}

impl<'a> ResponseEvent<'a> {
    pub fn new(request: &'a DispatchRequest, response: DispatchResponse) -> Self {
        Self { request, response }
    }

    pub fn request(&self) -> &DispatchRequest {
        self.request
    }

    pub fn response(&self) -> &DispatchResponse {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut DispatchResponse {
        &mut self.response
    }

    pub(crate) fn into_response(self) -> DispatchResponse {
        self.response
    }
}

/// Fired when dispatch failed; a listener may convert the failure into a response.
#[derive(Debug)]
pub struct ErrorEvent<'a> {
    request: &'a DispatchRequest,
    error: &'a DispatchError,
    response: Option<DispatchResponse>,
}

impl<'a> ErrorEvent<'a> {
    pub fn new(request: &'a DispatchRequest, error: &'a DispatchError) -> Self {
        Self {
            request,
            error,
            response: None,
        }
    }

    pub fn request(&self) -> &DispatchRequest {
        self.request
    }

    pub fn error(&self) -> &DispatchError {
        self.error
    }

    pub fn set_response(&mut self, response: DispatchResponse) {
        self.response = Some(response);
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    pub(crate) fn into_response(self) -> Option<DispatchResponse> {
        self.response
    }
}

/// Fired after the response was handed to the transport.
#[derive(Debug)]
pub struct TerminateEvent<'a> {
    request: &'a DispatchRequest,
    response: &'a DispatchResponse,
}

impl<'a> TerminateEvent<'a> {
    pub fn new(request: &'a DispatchRequest, response: &'a DispatchResponse) -> Self {
        Self { request, response }
    }

    pub fn request(&self) -> &DispatchRequest {
        self.request
    }

    pub fn response(&self) -> &DispatchResponse {
        self.response
    }
}

/// Subscriber to lifecycle events. Every hook defaults to doing nothing.
///
/// Implementations may only change an event through its setters.
#[async_trait]
pub trait Listener: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_pre_render(&self, _event: &mut RenderEvent) {}

    async fn on_post_render(&self, _event: &mut RenderEvent) {}

    async fn on_pre_dispatch(&self, _event: &mut ControllerEvent<'_>) {}

    async fn on_post_dispatch(&self, _event: &ControllerEvent<'_>, _response: &DispatchResponse) {}

    async fn on_pre_response(&self, _event: &mut ResponseEvent<'_>) {}

    async fn on_error(&self, _event: &mut ErrorEvent<'_>) {}

    async fn on_terminate(&self, _event: &TerminateEvent<'_>) {}
}

/// Ordered list of listeners.
#[derive(Clone, Default)]
pub struct NotificationBus {
    listeners: Vec<Arc<dyn Listener>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(mut self, listener: Arc<dyn Listener>) -> Self {
        self.subscribe(listener);
        self
    }

    pub fn subscribe(&mut self, listener: Arc<dyn Listener>) {
        self.listeners.push(listener);
    }

    pub fn listener_names(&self) -> Vec<&'static str> {
        self.listeners.iter().map(|listener| listener.name()).collect()
    }

    pub async fn pre_render(&self, event: &mut RenderEvent) {
        for listener in &self.listeners {
            listener.on_pre_render(event).await;
        }
    }

    pub async fn post_render(&self, event: &mut RenderEvent) {
        for listener in &self.listeners {
            listener.on_post_render(event).await;
        }
    }

    pub async fn pre_dispatch(&self, event: &mut ControllerEvent<'_>) {
        for listener in &self.listeners {
            listener.on_pre_dispatch(event).await;
        }
    }

    pub async fn post_dispatch(&self, event: &ControllerEvent<'_>, response: &DispatchResponse) {
        for listener in &self.listeners {
            listener.on_post_dispatch(event, response).await;
        }
    }

    pub async fn pre_response(&self, event: &mut ResponseEvent<'_>) {
        for listener in &self.listeners {
            listener.on_pre_response(event).await;
        }
    }

    /// Stops at the first listener that supplies a response.
    pub async fn error(&self, event: &mut ErrorEvent<'_>) {
        for listener in &self.listeners {
            listener.on_error(event).await;
            if event.has_response() {
                break;
            }
        }
    }

    pub async fn terminate(&self, event: &TerminateEvent<'_>) {
        for listener in &self.listeners {
            listener.on_terminate(event).await;
        }
    }
}
