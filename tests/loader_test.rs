//! Integration tests for the module loader
//!
//! Every way a module can arrive (bytes, a streaming response, a file URL,
//! the default sibling location) and the single-use lifecycle around it.

mod common;

use common::{counter, guest_bytes, unsatisfiable_bytes};
use guest_bridge::{
    BridgeConfig, Loader, LoaderState, ModuleSource, RuntimeError, StreamingResponse,
    WASM_CONTENT_TYPE,
};
use std::sync::Arc;
use tempfile::TempDir;
use url::Url;
use wasmtime::{Engine, Module};

fn loader() -> Loader {
    Loader::new(BridgeConfig::default())
}

#[tokio::test]
async fn test_init_from_bytes() {
    let loader = loader();
    assert_eq!(loader.state(), LoaderState::Uninitialized);
    assert!(loader.instance().is_none());

    let instance = loader.init(guest_bytes()).await.unwrap();
    assert_eq!(loader.state(), LoaderState::Ready);

    let mut guest = instance.lock();
    assert_eq!(guest.start_calls(), 1);
    assert_eq!(counter(&mut guest, "start_calls"), 1);
    assert!(guest.bridge().table.is_initialized());
}

#[tokio::test]
async fn test_second_init_returns_the_same_instance() {
    let loader = loader();
    let first = loader.init(guest_bytes()).await.unwrap();
    let second = loader.init(guest_bytes()).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    let mut guest = second.lock();
    assert_eq!(counter(&mut guest, "start_calls"), 1);
}

#[tokio::test]
async fn test_streaming_response_compiles() {
    let loader = loader();
    let response = StreamingResponse::from_bytes(WASM_CONTENT_TYPE, guest_bytes(), 7);
    assert!(response.is_wasm());

    let instance = loader.init(response).await.unwrap();
    assert_eq!(loader.state(), LoaderState::Ready);
    assert_eq!(instance.lock().call_str_to_str("echo", "streamed").unwrap(), "streamed");
}

#[tokio::test]
async fn test_wrong_content_type_falls_back_to_buffering() {
    let loader = loader();
    let response = StreamingResponse::from_bytes("application/octet-stream", guest_bytes(), 64);
    assert!(!response.is_wasm());

    loader.init(response).await.unwrap();
    assert_eq!(loader.state(), LoaderState::Ready);
}

#[tokio::test]
async fn test_streaming_disabled_buffers() {
    let loader = Loader::new(BridgeConfig::default().with_streaming(false));
    let response = StreamingResponse::from_bytes(WASM_CONTENT_TYPE, guest_bytes(), 3);

    loader.init(response).await.unwrap();
    assert_eq!(loader.state(), LoaderState::Ready);
}

#[tokio::test]
async fn test_truncated_stream_fails() {
    let loader = loader();
    let mut bytes = guest_bytes();
    bytes.truncate(bytes.len() / 2);
    let response = StreamingResponse::from_bytes(WASM_CONTENT_TYPE, bytes, 16);

    assert!(loader.init(response).await.is_err());
    assert_eq!(loader.state(), LoaderState::Failed);
}

#[tokio::test]
async fn test_failed_loader_does_not_retry() {
    let loader = loader();
    let err = loader.init(unsatisfiable_bytes()).await.unwrap_err();
    assert!(err.to_string().contains("__wbg_Nothing_here"));
    assert_eq!(loader.state(), LoaderState::Failed);

    let again = loader.init(guest_bytes()).await.unwrap_err();
    assert!(matches!(again, RuntimeError::Failed { .. }));
    assert!(again.to_string().contains("__wbg_Nothing_here"));
    assert!(loader.instance().is_none());
}

#[tokio::test]
async fn test_precompiled_module() {
    let engine = Engine::default();
    let module = Module::new(&engine, guest_bytes()).unwrap();
    let loader = loader().with_engine(engine);

    loader.init(ModuleSource::Compiled(module)).await.unwrap();
    assert_eq!(loader.state(), LoaderState::Ready);
}

#[tokio::test]
async fn test_module_from_another_engine_is_rejected() {
    let module = Module::new(&Engine::default(), guest_bytes()).unwrap();
    let loader = loader();

    assert!(loader.init(ModuleSource::Compiled(module)).await.is_err());
    assert_eq!(loader.state(), LoaderState::Failed);
}

#[tokio::test]
async fn test_init_from_file_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app_bg.wasm");
    std::fs::write(&path, guest_bytes()).unwrap();

    let loader = loader();
    loader.init(ModuleSource::from_path(&path).unwrap()).await.unwrap();
    assert_eq!(loader.state(), LoaderState::Ready);
}

#[tokio::test]
async fn test_default_source_is_the_sibling_module() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("game_bg.wasm"), guest_bytes()).unwrap();
    let base = Url::from_directory_path(dir.path()).unwrap();

    let loader = Loader::new(
        BridgeConfig::default()
            .with_base_url(base.as_str())
            .with_module_name("game"),
    );
    loader.init(ModuleSource::Default).await.unwrap();
    assert_eq!(loader.state(), LoaderState::Ready);
}

#[tokio::test]
async fn test_missing_file_is_a_fetch_error() {
    let dir = TempDir::new().unwrap();
    let url = Url::from_file_path(dir.path().join("absent_bg.wasm")).unwrap();

    let loader = loader();
    let err = loader.init(url).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Fetch { .. }));
    assert_eq!(loader.state(), LoaderState::Failed);
}

#[test]
fn test_init_sync_from_bytes() {
    let loader = loader();
    let instance = loader.init_sync(guest_bytes()).unwrap();
    assert_eq!(loader.state(), LoaderState::Ready);
    assert_eq!(instance.lock().start_calls(), 1);
}

#[test]
fn test_init_sync_rejects_sources_that_need_fetching() {
    let loader = loader();
    let err = loader.init_sync(ModuleSource::Default).unwrap_err();
    assert!(matches!(err, RuntimeError::Config { .. }));
    assert_eq!(loader.state(), LoaderState::Uninitialized);
}

#[test]
fn test_init_on_a_plain_runtime() {
    let loader = loader();
    let instance = tokio_test::block_on(loader.init(guest_bytes())).unwrap();
    let mut guest = instance.lock();
    assert_eq!(guest.call_str_to_str("echo", "blocking").unwrap(), "blocking");
}
