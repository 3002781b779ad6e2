//! Scene-graph extraction and render instrumentation for PixiJS pages.
//!
//! The probe runs against [`runtime`], a model of a page's dynamically shaped
//! execution context, and exposes its operations through an [`agent::Agent`]
//! installed as a namespaced global. [`sim`] provides a simulated
//! application for tests and offline use.

pub mod agent;
pub mod benchmark;
pub mod capture;
pub mod classify;
pub mod error;
pub mod fps;
pub mod ids;
pub mod instructions;
pub mod instrument;
pub mod locate;
pub mod rendering;
pub mod runtime;
pub mod scene;
pub mod sim;
pub mod snapshot;
pub mod stats;
pub mod textures;

pub use agent::{Agent, Method, NAMESPACE};
pub use benchmark::{BenchmarkResult, FrameStats};
pub use capture::{CaptureResult, MemorySnapshot};
pub use classify::NodeKind;
pub use error::{ProbeError, ProbeResult, RenderPhase};
pub use fps::FpsReading;
pub use ids::NodeId;
pub use instructions::{InstructionNode, InstructionPayload};
pub use instrument::{DrawOrderEntry, PipeTiming};
pub use rendering::{CanvasGeometry, RenderingInfo};
pub use scene::{Point, SceneNode};
pub use snapshot::{AllSnapshot, InstructionsReport, PageInfo, Section};
pub use stats::StatsAggregate;
pub use textures::{TextureRecord, TextureReport};
