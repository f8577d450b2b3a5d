//! Mocha: an embeddable HTTP mock server.
//!
//! Mocks pair a list of weighted expectations with a reply strategy. For
//! every request the server walks the registered mocks in priority order
//! and serves the first one whose expectations all hold. When nothing
//! matches, the response names the closest mock and every mismatch, or the
//! request is forwarded to a passthrough target.
//!
//! ```ignore
//! use mocha_http::matcher::contains;
//! use mocha_http::{MockBuilder, MockServer, StaticReply};
//!
//! let server = MockServer::start_default().await?;
//! server.add(
//!     MockBuilder::get("/users/1")
//!         .header("accept", contains("json"))
//!         .reply(StaticReply::ok().json(&serde_json::json!({"id": 1}))),
//! )?;
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod finder;
pub mod headers;
pub mod loader;
pub mod matcher;
pub mod metrics;
pub mod mock;
pub mod recording;
pub mod reply;
pub mod request;
pub mod scenario;
pub mod server;
pub mod template;

mod upstream;

pub use config::ServerConfig;
pub use error::{MatchError, MockError, ReplyError, ServerError};
pub use events::MockEvent;
pub use loader::{FileLoader, Loader};
pub use mock::{MockBuilder, MockStore};
pub use reply::{
    Cookie, EchoReply, FunctionReply, HandlerReply, ProxiedReply, RandomReply, Reply,
    ResponseStub, ResponseWriter, SequentialReply, StaticReply,
};
pub use request::RequestValues;
pub use scenario::{ScenarioRegistry, SCENARIO_STARTED};
pub use server::{MockServer, MockServerBuilder};
