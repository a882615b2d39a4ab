mod admin;
mod middleware;
mod public;

pub use admin::{AdminState, build_admin_router};
pub use middleware::{REQUEST_ID_HEADER, RequestContext};
pub use public::{HttpState, PREVIEW_TOKEN_HEADER, build_router};
