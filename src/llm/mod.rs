//! Local inference: catalog, storage, engines, lifecycle and prompts.

pub mod backend;
#[cfg(feature = "candle")]
pub mod candle;
pub mod lifecycle;
#[cfg(feature = "llama")]
pub mod llama;
pub mod model_manager;
pub mod model_registry;
pub mod prompts_local;
