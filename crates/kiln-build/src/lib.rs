//! kiln image build backend
//!
//! This crate provides the builder side of kiln: the build specification
//! model, build context packing, registry authentication, image building
//! and pushing through the Docker daemon, and the [`Builder`] capability
//! trait the HTTP service drives.

pub mod auth;
pub mod backend;
pub mod builder;
pub mod context;
pub mod error;
pub mod pusher;
pub mod reference;
pub mod spec;

pub use auth::RegistryAuth;
pub use backend::{Builder, BuiltImage, DockerBuilder, check_destinations};
pub use builder::ImageBuilder;
pub use context::ContextBuilder;
pub use error::{BuildError, BuildResult};
pub use pusher::ImagePusher;
pub use reference::{parse_destination, split_image_tag, validate_tag};
pub use spec::BuildSpec;
