//! spawnpoint-backend — the container runtime seam.
//!
//! The daemon never talks to a container runtime directly; it goes through
//! the `ContainerBackend` trait. This crate provides:
//!
//! - `ContainerBackend` — build/start/stop/restart/remove/attach/events/stats
//! - `context` — the build-context synthesizer: a pure function from a
//!   service configuration to an image recipe plus tar payload
//! - `DockerCli` — adapter that drives the local `docker` binary
//! - `MockBackend` — scriptable backend for the test suite

pub mod backend;
pub mod context;
pub mod docker;
pub mod error;
pub mod mock;

pub use backend::{
    BlkioEntry, ContainerBackend, ContainerEvent, EventAction, LaunchSpec, NetworkMode,
    StatsSample,
};
pub use context::{
    build_context, BuildContext, ContextError, DOCKERFILE_NAME, ENTITY_KEY_FILE, IMAGE_TAG_PREFIX,
    PARAMS_FILE, WORKDIR,
};
pub use docker::DockerCli;
pub use error::BackendError;
pub use mock::MockBackend;
