//! Enrich engine: provider access, progress streaming and job orchestration.
mod assets;
mod codec;
mod config;
mod ingress;
mod orchestrator;
mod provider;
mod runner;
mod transport;

pub use assets::{asset_filename, ensure_output_dir, AssetStore, AtomicFileWriter, FsAssetStore, PersistError};
pub use codec::{decode_stream, encode_line, StreamDecoder, StreamEncoder, TransportError, CONTENT_TYPE};
pub use config::{ConfigError, EngineConfig};
pub use ingress::{GenerationEndpoint, GroupRequest, SingleRequest, SingleResponse};
pub use orchestrator::{BatchOrchestrator, JobHandle, OrchestratorSettings};
pub use provider::{GenerationProvider, GroupConfig, HttpProvider, ProviderError, ProviderSettings};
pub use runner::{BatchRunner, RunSummary, RunnerSettings};
pub use transport::{ByteStream, GroupTransport, HttpTransport, LocalTransport};
