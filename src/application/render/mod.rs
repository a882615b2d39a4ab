//! Rendering of pages and content trees.
//!
//! Renderers are looked up by entity kind; the render context travels
//! explicitly through every nested call.

mod pipeline;
mod registry;
mod types;

pub use pipeline::RenderService;
pub use registry::{Renderer, RendererRegistry};
pub use types::{Fragment, RenderContext, RenderError, RenderInput};
