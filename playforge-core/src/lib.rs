//! PlayForge Core - Playable Build Pipeline
//!
//! Turns a (game template, order) pair into one self-contained HTML page,
//! either a signed, interaction-capped preview or an unrestricted final.
//!
//! # Flow
//! 1. The scheduler admits the order, queues it, or rejects it
//! 2. A prebuilt library page is reused when one fits
//! 3. Otherwise the template is staged, validated and built
//! 4. Preview assets are swapped for placeholders
//! 5. The runtime config and bootstrap script are stamped in

pub mod assembler;
pub mod config;
pub mod deps;
pub mod error;
pub mod exec;
pub mod guard;
pub mod hashing;
pub mod inject;
pub mod inliner;
pub mod library;
pub mod order;
pub mod pipeline;
pub mod postprocess;
pub mod protocol;
pub mod scheduler;
pub mod staging;
pub mod templates;
pub mod validation;
pub mod workspace;

pub use config::{BuilderConfig, ConfigError};
pub use deps::{DependencyInstaller, DependencyProvisioner};
pub use error::BuildError;
pub use inject::{extract_runtime_config, RuntimeConfigInjector};
pub use inliner::{AssetInliner, InlineReport};
pub use library::{prebuild_library, LibraryFastPath};
pub use order::{BuildOrder, OrderConfig, RuntimeConfig, Variant};
pub use pipeline::{ArtifactSource, BuildArtifact, PlayableBuilder, PlayablePipeline};
pub use protocol::{handle_request, RunnerRequest, RunnerResponse};
pub use scheduler::BuildScheduler;
pub use templates::{TemplateDescriptor, TemplateRegistry};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
