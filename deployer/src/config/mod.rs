//! Deployment configuration

pub mod loader;
pub mod model;

pub use loader::{load_spec, parse_spec, validate};
pub use model::{
    BucketPolicy, BucketSpec, ClusterSettings, Credentials, DeploymentMode, DeploymentSpec,
    DiskSpec, NodeDescriptor, ServiceSettings, StandaloneHost,
};
