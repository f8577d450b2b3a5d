//! The mock HTTP server: listener, shared state and the management API.

mod handler;
mod proxy;
mod response;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub use handler::METRICS_PATH;
pub use response::MockBody;

use crate::config::ServerConfig;
use crate::error::{MockError, ServerError};
use crate::events::{EventBus, MockEvent};
use crate::loader::Loader;
use crate::mock::{BuildContext, Mock, MockBuilder, MockStore, PostAction};
use crate::recording::{JsonLinesSink, MemorySink, RecordSink, RecordedExchange, Recorder};
use crate::request::{default_body_parsers, BodyParser};
use crate::scenario::ScenarioRegistry;
use crate::template::{PlaceholderEngine, TemplateEngine};
use proxy::Passthrough;

/// State shared by the accept loop, every connection and the API.
pub(crate) struct ServerState {
    pub config: ServerConfig,
    pub store: MockStore,
    pub scenarios: Arc<ScenarioRegistry>,
    pub templates: Arc<dyn TemplateEngine>,
    pub body_parsers: Vec<Arc<dyn BodyParser>>,
    pub post_actions: RwLock<HashMap<String, Arc<dyn PostAction>>>,
    pub passthrough: Option<Passthrough>,
    pub recorder: Mutex<Option<Arc<Recorder>>>,
    pub events: EventBus,
    pub base_url: RwLock<String>,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl ServerState {
    pub(crate) fn base_url(&self) -> String {
        self.base_url.read().clone()
    }

    pub(crate) fn record(&self, exchange: RecordedExchange) {
        let recorder = self.recorder.lock().clone();
        if let Some(recorder) = recorder {
            recorder.record(exchange);
        }
    }
}

/// Builder for a [`MockServer`] with custom collaborators.
pub struct MockServerBuilder {
    config: ServerConfig,
    body_parsers: Vec<Arc<dyn BodyParser>>,
    templates: Arc<dyn TemplateEngine>,
    post_actions: HashMap<String, Arc<dyn PostAction>>,
    record_sink: Option<Box<dyn RecordSink>>,
}

impl MockServerBuilder {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            body_parsers: Vec::new(),
            templates: Arc::new(PlaceholderEngine),
            post_actions: HashMap::new(),
            record_sink: None,
        }
    }

    /// Custom parsers are consulted before the built-in ones.
    pub fn body_parser(mut self, parser: impl BodyParser + 'static) -> Self {
        self.body_parsers.push(Arc::new(parser));
        self
    }

    pub fn template_engine(mut self, engine: impl TemplateEngine + 'static) -> Self {
        self.templates = Arc::new(engine);
        self
    }

    pub fn post_action(mut self, name: impl Into<String>, action: impl PostAction + 'static) -> Self {
        self.post_actions.insert(name.into(), Arc::new(action));
        self
    }

    /// Record traffic into `sink`, whether or not recording is configured.
    pub fn record_sink(mut self, sink: impl RecordSink + 'static) -> Self {
        self.record_sink = Some(Box::new(sink));
        self
    }

    pub fn build(self) -> Result<MockServer, ServerError> {
        self.config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let mut memory = None;
        let sink: Option<Box<dyn RecordSink>> = match (self.record_sink, &self.config.record) {
            (Some(sink), _) => Some(sink),
            (None, Some(record)) => match &record.path {
                Some(path) => Some(Box::new(
                    JsonLinesSink::open(path).map_err(|e| ServerError::Config(e.to_string()))?,
                )),
                None => {
                    let sink = MemorySink::new();
                    memory = Some(sink.clone());
                    Some(Box::new(sink))
                }
            },
            (None, None) => None,
        };

        let mut body_parsers = self.body_parsers;
        body_parsers.extend(default_body_parsers());

        let (shutdown_tx, _) = broadcast::channel(1);
        let state = ServerState {
            passthrough: self.config.proxy.as_ref().map(Passthrough::new),
            events: EventBus::new(self.config.event_capacity),
            config: self.config,
            store: MockStore::new(),
            scenarios: Arc::new(ScenarioRegistry::new()),
            templates: self.templates,
            body_parsers,
            post_actions: RwLock::new(self.post_actions),
            recorder: Mutex::new(None),
            base_url: RwLock::new(String::new()),
            shutdown_tx,
        };

        Ok(MockServer {
            state: Arc::new(state),
            pending_sink: Mutex::new(sink),
            memory,
            local_addr: RwLock::new(None),
            accept_task: Mutex::new(None),
        })
    }
}

/// An embeddable HTTP mock server.
///
/// ```ignore
/// let server = MockServer::start_default().await?;
/// server.add(MockBuilder::get("/test").reply(StaticReply::ok().text("ok")))?;
/// let body = reqwest::get(server.url_for("/test")).await?.text().await?;
/// ```
pub struct MockServer {
    state: Arc<ServerState>,
    pending_sink: Mutex<Option<Box<dyn RecordSink>>>,
    memory: Option<MemorySink>,
    local_addr: RwLock<Option<SocketAddr>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl MockServer {
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        MockServerBuilder::new(config).build()
    }

    pub fn builder(config: ServerConfig) -> MockServerBuilder {
        MockServerBuilder::new(config)
    }

    /// Build with the default configuration and start on an ephemeral
    /// localhost port.
    pub async fn start_default() -> Result<Self, ServerError> {
        let server = Self::new(ServerConfig::default())?;
        server.start().await?;
        Ok(server)
    }

    /// Bind the listener and start serving in the background.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        if let Some(addr) = *self.local_addr.read() {
            return Err(ServerError::AlreadyRunning(addr));
        }

        let address = self.state.config.listen.address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::Bind {
                addr: address.clone(),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: address.clone(),
            source,
        })?;

        *self.state.base_url.write() = format!("http://{addr}");
        *self.local_addr.write() = Some(addr);

        if let Some(sink) = self.pending_sink.lock().take() {
            let queue_size = self
                .state
                .config
                .record
                .as_ref()
                .map(|r| r.queue_size)
                .unwrap_or(crate::recording::DEFAULT_QUEUE_SIZE);
            *self.state.recorder.lock() = Some(Arc::new(Recorder::start(sink, queue_size)));
        }

        info!("Mock server listening on {}", addr);

        let state = Arc::clone(&self.state);
        let mut shutdown_rx = self.state.shutdown_tx.subscribe();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, remote)) => {
                                let state = Arc::clone(&state);
                                tokio::spawn(async move {
                                    let io = TokioIo::new(stream);
                                    let service = service_fn(move |req| {
                                        let state = Arc::clone(&state);
                                        async move { handler::handle_request(req, state, remote).await }
                                    });
                                    if let Err(e) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .with_upgrades()
                                        .await
                                    {
                                        debug!("Connection error from {}: {}", remote, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Accept error on {}: {}", addr, e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Mock server on {} shutting down", addr);
                        break;
                    }
                }
            }
        });
        *self.accept_task.lock() = Some(task);

        Ok(addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    /// Base URL, empty until the server is started.
    pub fn url(&self) -> String {
        self.state.base_url()
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.url(), path.trim_start_matches('/'))
    }

    /// Collaborators handed to [`MockBuilder::build`].
    pub fn build_context(&self) -> BuildContext {
        BuildContext {
            scenarios: Arc::clone(&self.state.scenarios),
            templates: Arc::clone(&self.state.templates),
            template_data: self.state.config.template_data.clone(),
            post_actions: self.state.post_actions.read().clone(),
        }
    }

    /// Build and register a mock.
    pub fn add(&self, builder: MockBuilder) -> Result<Arc<Mock>, MockError> {
        let mock = Arc::new(builder.build(&self.build_context())?);
        debug!(mock_id = %mock.id(), name = mock.display_name(), "Registered mock");
        self.state.store.save(Arc::clone(&mock));
        Ok(mock)
    }

    /// Register several mocks. Nothing is registered if any fails to build.
    pub fn add_all(
        &self,
        builders: impl IntoIterator<Item = MockBuilder>,
    ) -> Result<Vec<Arc<Mock>>, MockError> {
        let ctx = self.build_context();
        let mocks = builders
            .into_iter()
            .map(|b| b.build(&ctx).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        for mock in &mocks {
            self.state.store.save(Arc::clone(mock));
        }
        Ok(mocks)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Mock>> {
        self.state.store.get(id)
    }

    pub fn mocks(&self) -> Vec<Arc<Mock>> {
        self.state.store.get_all()
    }

    pub fn delete(&self, id: &str) -> bool {
        self.state.store.delete(id)
    }

    pub fn delete_by_source(&self, source: &str) -> usize {
        self.state.store.delete_by_source(source)
    }

    /// Remove every mock registered from a file or another external source.
    pub fn delete_external(&self) -> usize {
        self.state.store.delete_external()
    }

    pub fn set_priority(&self, id: &str, priority: i64) -> bool {
        self.state.store.set_priority(id, priority)
    }

    pub fn enable(&self, id: &str) -> bool {
        match self.state.store.get(id) {
            Some(mock) => {
                mock.enable();
                true
            }
            None => false,
        }
    }

    pub fn disable(&self, id: &str) -> bool {
        match self.state.store.get(id) {
            Some(mock) => {
                mock.disable();
                true
            }
            None => false,
        }
    }

    /// Remove every mock and forget every scenario state.
    pub fn reset(&self) {
        self.state.store.delete_all();
        self.state.scenarios.reset();
        info!("Mock server reset");
    }

    pub fn store(&self) -> &MockStore {
        &self.state.store
    }

    pub fn scenarios(&self) -> Arc<ScenarioRegistry> {
        Arc::clone(&self.state.scenarios)
    }

    /// Register a post action usable by mocks added afterwards.
    pub fn register_post_action(&self, name: impl Into<String>, action: impl PostAction + 'static) {
        self.state
            .post_actions
            .write()
            .insert(name.into(), Arc::new(action));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MockEvent> {
        self.state.events.subscribe()
    }

    /// Run a loader against this server.
    pub fn load(&self, loader: &dyn Loader) -> anyhow::Result<usize> {
        loader.load(self)
    }

    /// Exchanges captured by the in-memory recorder.
    pub fn recordings(&self) -> Vec<RecordedExchange> {
        self.memory.as_ref().map(MemorySink::entries).unwrap_or_default()
    }

    /// Extra template data from the configuration.
    pub fn template_data(&self) -> &Value {
        &self.state.config.template_data
    }

    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Dispatch a request in process, without a network round trip.
    pub async fn dispatch(&self, request: Request<Bytes>) -> Response<MockBody> {
        let (parts, body) = request.into_parts();
        handler::dispatch(&self.state, parts, body, None).await
    }

    /// Stop accepting connections, interrupt pending delays and flush the
    /// recorder.
    pub async fn shutdown(&self) {
        let _ = self.state.shutdown_tx.send(());
        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        let recorder = self.state.recorder.lock().take();
        if let Some(recorder) = recorder {
            recorder.close().await;
        }
        *self.local_addr.write() = None;
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        let _ = self.state.shutdown_tx.send(());
    }
}
