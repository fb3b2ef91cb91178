//! Module Loader
//!
//! Resolves a module source to a compiled [`Module`], instantiates it against
//! the bridge surface and runs its start export, walking the state machine
//!
//! ```text
//! Uninitialized ──► Loading ──► Instantiating ──► Ready
//!                      │              │
//!                      └──────────────┴──► Failed
//! ```
//!
//! `Ready` and `Failed` are terminal: another `init` after `Ready` hands back
//! the same instance, and after `Failed` it reports the recorded failure
//! without retrying.
//!
//! Response sources take the streaming path: the module is structurally
//! parsed chunk by chunk as it arrives. A response whose `Content-Type` is
//! not `application/wasm` (or a loader with streaming disabled) is buffered
//! and compiled in one go instead.

use crate::bridge::create_linker;
use crate::config::BridgeConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::instance::{GuestInstance, SharedGuestInstance};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use host_bridge::capability::Console;
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use parking_lot::Mutex;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn};
use url::Url;
use wasmparser::{Chunk, Encoding, Parser, Payload};
use wasmtime::{Engine, Module};

/// MIME type required by the streaming compile path
pub const WASM_CONTENT_TYPE: &str = "application/wasm";

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Loader lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Uninitialized,
    Loading,
    Instantiating,
    Ready,
    Failed,
}

impl fmt::Display for LoaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Instantiating => "instantiating",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Body of a streaming response
pub type ByteStream = BoxStream<'static, RuntimeResult<Bytes>>;

/// Response-like source: headers plus a body that arrives in chunks
pub struct StreamingResponse {
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl StreamingResponse {
    pub fn new(headers: HeaderMap, body: ByteStream) -> Self {
        Self { headers, body }
    }

    /// A response serving `bytes` in `chunk_size` pieces
    pub fn from_bytes(content_type: &str, bytes: impl Into<Bytes>, chunk_size: usize) -> Self {
        let bytes: Bytes = bytes.into();
        let chunk_size = chunk_size.max(1);
        let chunks: Vec<RuntimeResult<Bytes>> = (0..bytes.len())
            .step_by(chunk_size)
            .map(|start| Ok(bytes.slice(start..(start + chunk_size).min(bytes.len()))))
            .collect();

        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
        headers.insert(CONTENT_TYPE, value);
        Self::new(headers, stream::iter(chunks).boxed())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// `Content-Type` is `application/wasm`, parameters ignored
    pub fn is_wasm(&self) -> bool {
        self.content_type()
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(WASM_CONTENT_TYPE))
    }
}

impl fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Where the guest module comes from
#[derive(Debug)]
pub enum ModuleSource {
    /// Already-fetched module bytes
    Bytes(Bytes),
    /// A response whose body is still arriving
    Response(StreamingResponse),
    /// A module compiled earlier with the loader's engine
    Compiled(Module),
    /// A URL handed to the loader's fetcher
    Url(Url),
    /// `<module_name>_bg.wasm` next to the configured base URL
    Default,
}

impl ModuleSource {
    /// A local file, as a `file://` URL
    pub fn from_path(path: &Path) -> RuntimeResult<Self> {
        let absolute = std::fs::canonicalize(path)
            .map_err(|e| RuntimeError::fetch(format!("Failed to resolve {:?}: {}", path, e)))?;
        Url::from_file_path(&absolute)
            .map(Self::Url)
            .map_err(|()| RuntimeError::fetch(format!("{:?} cannot be expressed as a URL", absolute)))
    }
}

impl From<Vec<u8>> for ModuleSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes.into())
    }
}

impl From<Bytes> for ModuleSource {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<StreamingResponse> for ModuleSource {
    fn from(response: StreamingResponse) -> Self {
        Self::Response(response)
    }
}

impl From<Module> for ModuleSource {
    fn from(module: Module) -> Self {
        Self::Compiled(module)
    }
}

impl From<Url> for ModuleSource {
    fn from(url: Url) -> Self {
        Self::Url(url)
    }
}

/// Turns a URL into a streaming response
#[async_trait]
pub trait ModuleFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> RuntimeResult<StreamingResponse>;
}

/// Fetcher for `file://` URLs; `.wasm` files are served as `application/wasm`
#[derive(Debug, Clone)]
pub struct FileFetcher {
    chunk_size: usize,
}

impl FileFetcher {
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self { chunk_size }
    }
}

impl Default for FileFetcher {
    fn default() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }
}

#[async_trait]
impl ModuleFetcher for FileFetcher {
    async fn fetch(&self, url: &Url) -> RuntimeResult<StreamingResponse> {
        if url.scheme() != "file" {
            return Err(RuntimeError::fetch(format!(
                "unsupported scheme `{}` in {}",
                url.scheme(),
                url
            )));
        }
        let path = url
            .to_file_path()
            .map_err(|()| RuntimeError::fetch(format!("{} is not a local path", url)))?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| RuntimeError::fetch(format!("Failed to read {:?}: {}", path, e)))?;

        let content_type = if path.extension().is_some_and(|ext| ext == "wasm") {
            WASM_CONTENT_TYPE
        } else {
            "application/octet-stream"
        };
        debug!("fetched {} ({} bytes, {})", url, bytes.len(), content_type);
        Ok(StreamingResponse::from_bytes(content_type, bytes, self.chunk_size))
    }
}

/// What the streaming parse saw
#[derive(Debug, Default, Clone, Copy)]
struct ParseStats {
    chunks: usize,
    imports: u32,
    exports: u32,
    functions: u32,
}

impl ParseStats {
    /// Returns `true` at the end of the module
    fn record(&mut self, payload: &Payload<'_>) -> RuntimeResult<bool> {
        match payload {
            Payload::Version {
                encoding: Encoding::Component,
                ..
            } => Err(RuntimeError::instantiation(
                "components are not supported; expected a core module",
            )),
            Payload::ImportSection(reader) => {
                self.imports = reader.count();
                Ok(false)
            }
            Payload::ExportSection(reader) => {
                self.exports = reader.count();
                Ok(false)
            }
            Payload::CodeSectionStart { count, .. } => {
                self.functions = *count;
                Ok(false)
            }
            Payload::End(_) => Ok(true),
            _ => Ok(false),
        }
    }
}

enum Step {
    NeedMoreData,
    Parsed { consumed: usize, end: bool },
}

async fn collect_body(mut body: ByteStream) -> RuntimeResult<Vec<u8>> {
    let mut buf = Vec::new();
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf)
}

/// Single-use guard plus lifecycle bookkeeping
struct Slot {
    state: LoaderState,
    instance: Option<SharedGuestInstance>,
    failure: Option<String>,
}

/// Loads and owns at most one guest instance
pub struct Loader {
    engine: Engine,
    config: BridgeConfig,
    fetcher: Arc<dyn ModuleFetcher>,
    console: Option<Arc<dyn Console>>,
    slot: Mutex<Slot>,
    init_lock: tokio::sync::Mutex<()>,
}

static GLOBAL: OnceLock<Loader> = OnceLock::new();

impl Loader {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            engine: Engine::default(),
            config,
            fetcher: Arc::new(FileFetcher::default()),
            console: None,
            slot: Mutex::new(Slot {
                state: LoaderState::Uninitialized,
                instance: None,
                failure: None,
            }),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ModuleFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Route guest console output somewhere other than `tracing`
    pub fn with_console(mut self, console: Arc<dyn Console>) -> Self {
        self.console = Some(console);
        self
    }

    /// The process-wide loader, created with the default configuration on
    /// first use unless one was installed earlier
    pub fn global() -> &'static Loader {
        GLOBAL.get_or_init(|| Loader::new(BridgeConfig::default()))
    }

    /// Make `loader` the process-wide loader. Fails (handing it back) when
    /// a global loader already exists.
    pub fn install_global(loader: Loader) -> Result<&'static Loader, Loader> {
        GLOBAL.set(loader)?;
        Ok(Self::global())
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> LoaderState {
        self.slot.lock().state
    }

    /// The instance, once `Ready`
    pub fn instance(&self) -> Option<SharedGuestInstance> {
        self.slot.lock().instance.clone()
    }

    fn set_state(&self, next: LoaderState) {
        let mut slot = self.slot.lock();
        debug!("loader: {} -> {}", slot.state, next);
        slot.state = next;
    }

    /// `Ok(Some)` when already `Ready`, `Err` when already `Failed`
    fn settled(&self) -> RuntimeResult<Option<SharedGuestInstance>> {
        let slot = self.slot.lock();
        match slot.state {
            LoaderState::Ready => {
                debug!("loader already ready; returning the existing instance");
                Ok(slot.instance.clone())
            }
            LoaderState::Failed => Err(RuntimeError::Failed {
                message: slot.failure.clone().unwrap_or_default(),
            }),
            _ => Ok(None),
        }
    }

    fn conclude(&self, result: RuntimeResult<SharedGuestInstance>) -> RuntimeResult<SharedGuestInstance> {
        let mut slot = self.slot.lock();
        match result {
            Ok(instance) => {
                slot.state = LoaderState::Ready;
                slot.instance = Some(instance.clone());
                info!("guest module ready");
                Ok(instance)
            }
            Err(e) => {
                error!("guest module failed to load: {}", e);
                slot.state = LoaderState::Failed;
                slot.failure = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Load, instantiate and start the guest
    pub async fn init(&self, source: impl Into<ModuleSource>) -> RuntimeResult<SharedGuestInstance> {
        let _guard = self.init_lock.lock().await;
        if let Some(instance) = self.settled()? {
            return Ok(instance);
        }

        self.set_state(LoaderState::Loading);
        let result = match self.resolve(source.into()).await {
            Ok(module) => self.instantiate(module),
            Err(e) => Err(e),
        };
        self.conclude(result)
    }

    /// Synchronous init for sources that need no fetching (bytes or a
    /// compiled module)
    pub fn init_sync(&self, source: impl Into<ModuleSource>) -> RuntimeResult<SharedGuestInstance> {
        let _guard = self
            .init_lock
            .try_lock()
            .map_err(|_| RuntimeError::instantiation("an asynchronous init is in progress"))?;
        if let Some(instance) = self.settled()? {
            return Ok(instance);
        }

        let module = match source.into() {
            ModuleSource::Bytes(bytes) => {
                self.set_state(LoaderState::Loading);
                self.compile(&bytes)
            }
            ModuleSource::Compiled(module) => {
                self.set_state(LoaderState::Loading);
                self.check_engine(module)
            }
            other => {
                return Err(RuntimeError::config(format!(
                    "init_sync needs module bytes or a compiled module, got {:?}",
                    other
                )));
            }
        };
        let result = module.and_then(|module| self.instantiate(module));
        self.conclude(result)
    }

    async fn resolve(&self, source: ModuleSource) -> RuntimeResult<Module> {
        match source {
            ModuleSource::Bytes(bytes) => self.compile_blocking(bytes.to_vec()).await,
            ModuleSource::Response(response) => self.compile_response(response).await,
            ModuleSource::Compiled(module) => self.check_engine(module),
            ModuleSource::Url(url) => {
                info!("Loading guest module from {}", url);
                let response = self.fetcher.fetch(&url).await?;
                self.compile_response(response).await
            }
            ModuleSource::Default => {
                let url = self.config.default_module_url()?;
                info!("Loading guest module from default location {}", url);
                let response = self.fetcher.fetch(&url).await?;
                self.compile_response(response).await
            }
        }
    }

    fn check_engine(&self, module: Module) -> RuntimeResult<Module> {
        if Engine::same(module.engine(), &self.engine) {
            Ok(module)
        } else {
            Err(RuntimeError::instantiation(
                "compiled module belongs to a different engine",
            ))
        }
    }

    fn compile(&self, bytes: &[u8]) -> RuntimeResult<Module> {
        Module::from_binary(&self.engine, bytes)
            .map_err(|e| RuntimeError::instantiation_with_source("Failed to compile guest module", e))
    }

    async fn compile_blocking(&self, bytes: Vec<u8>) -> RuntimeResult<Module> {
        let engine = self.engine.clone();
        let compiled = tokio::task::spawn_blocking(move || Module::from_binary(&engine, &bytes))
            .await
            .map_err(|e| RuntimeError::instantiation(format!("compile task failed: {}", e)))?;
        compiled.map_err(|e| RuntimeError::instantiation_with_source("Failed to compile guest module", e))
    }

    async fn compile_response(&self, response: StreamingResponse) -> RuntimeResult<Module> {
        if !self.config.streaming {
            debug!("streaming compilation disabled; buffering module");
            let bytes = collect_body(response.body).await?;
            return self.compile_blocking(bytes).await;
        }
        if !response.is_wasm() {
            warn!(
                "module served with Content-Type {:?} instead of `{}`; falling back to buffered compilation",
                response.content_type().unwrap_or("<none>"),
                WASM_CONTENT_TYPE
            );
            let bytes = collect_body(response.body).await?;
            return self.compile_blocking(bytes).await;
        }
        self.compile_streaming(response.body).await
    }

    /// Parse the module section by section as chunks arrive, then compile
    async fn compile_streaming(&self, mut body: ByteStream) -> RuntimeResult<Module> {
        let mut parser = Parser::new(0);
        let mut buf: Vec<u8> = Vec::new();
        let mut offset = 0;
        let mut eof = false;
        let mut stats = ParseStats::default();

        loop {
            let step = match parser.parse(&buf[offset..], eof) {
                Ok(Chunk::NeedMoreData(_)) => Step::NeedMoreData,
                Ok(Chunk::Parsed { consumed, payload }) => Step::Parsed {
                    consumed,
                    end: stats.record(&payload)?,
                },
                Err(e) => {
                    return Err(RuntimeError::instantiation_with_source(
                        format!("malformed module at byte {}", offset),
                        e.into(),
                    ));
                }
            };

            match step {
                Step::NeedMoreData => match body.next().await {
                    Some(chunk) => {
                        buf.extend_from_slice(&chunk?);
                        stats.chunks += 1;
                    }
                    None => eof = true,
                },
                Step::Parsed { consumed, end } => {
                    offset += consumed;
                    if end {
                        break;
                    }
                }
            }
        }

        if let Some(extra) = body.next().await {
            let extra = extra?;
            if !extra.is_empty() {
                return Err(RuntimeError::instantiation(format!(
                    "{} unexpected bytes after the end of the module",
                    extra.len()
                )));
            }
        }

        debug!(
            "streamed {} bytes in {} chunks ({} imports, {} exports, {} functions)",
            buf.len(),
            stats.chunks,
            stats.imports,
            stats.exports,
            stats.functions
        );
        self.compile_blocking(buf).await
    }

    fn instantiate(&self, module: Module) -> RuntimeResult<SharedGuestInstance> {
        self.set_state(LoaderState::Instantiating);
        let linker = create_linker(&self.engine)?;
        let mut instance =
            GuestInstance::instantiate(&self.engine, &linker, module, &self.config, self.console.clone())?;
        instance.start()?;
        Ok(Arc::new(Mutex::new(instance)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_bytes(wat: &str) -> Vec<u8> {
        wat::parse_str(wat).unwrap()
    }

    #[test]
    fn test_content_type_matching() {
        let ok = StreamingResponse::from_bytes("application/wasm; charset=binary", vec![0u8; 4], 2);
        assert!(ok.is_wasm());
        let wrong = StreamingResponse::from_bytes("application/octet-stream", vec![0u8; 4], 2);
        assert!(!wrong.is_wasm());
        assert_eq!(wrong.content_type(), Some("application/octet-stream"));
    }

    #[tokio::test]
    async fn test_from_bytes_chunks_the_body() {
        let response = StreamingResponse::from_bytes(WASM_CONTENT_TYPE, vec![7u8; 10], 4);
        let chunks: Vec<usize> = response
            .body
            .map(|c| c.map(|b| b.len()).unwrap_or(0))
            .collect()
            .await;
        assert_eq!(chunks, vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn test_streaming_parse_compiles_module() {
        let loader = Loader::new(BridgeConfig::default());
        let bytes = module_bytes(r#"(module (func (export "f")) (memory (export "memory") 1))"#);
        let response = StreamingResponse::from_bytes(WASM_CONTENT_TYPE, bytes, 3);
        let module = loader.compile_response(response).await.unwrap();
        assert!(module.exports().any(|e| e.name() == "f"));
    }

    #[tokio::test]
    async fn test_streaming_rejects_truncated_module() {
        let loader = Loader::new(BridgeConfig::default());
        let mut bytes = module_bytes(r#"(module (func (export "f")))"#);
        bytes.truncate(bytes.len() - 3);
        let response = StreamingResponse::from_bytes(WASM_CONTENT_TYPE, bytes, 5);
        let err = loader.compile_response(response).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Instantiation { .. }));
    }

    #[tokio::test]
    async fn test_streaming_rejects_trailing_bytes() {
        let loader = Loader::new(BridgeConfig::default());
        let mut bytes = module_bytes("(module)");
        bytes.extend_from_slice(&[1, 2, 3]);
        let response = StreamingResponse::from_bytes(WASM_CONTENT_TYPE, bytes, 64);
        assert!(loader.compile_response(response).await.is_err());
    }

    #[tokio::test]
    async fn test_file_fetcher_rejects_other_schemes() {
        let url = Url::parse("https://example.com/guest_bg.wasm").unwrap();
        let err = FileFetcher::default().fetch(&url).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Fetch { .. }));
    }

    #[test]
    fn test_foreign_engine_module_is_rejected() {
        let loader = Loader::new(BridgeConfig::default());
        let other = Engine::default();
        let module = Module::new(&other, "(module)").unwrap();
        assert!(loader.check_engine(module).is_err());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LoaderState::Instantiating.to_string(), "instantiating");
    }
}
