//! fleetpkg: server-side package-source ingestion and dependency resolution
//! for fleet configuration management.
//!
//! Given a client's metadata (groups, architecture) and the packages its
//! configuration declares, fleetpkg produces a complete, dependency-closed
//! package list from data harvested out of remote APT, Yum, Pacman and pkgng
//! repositories.

pub mod collection;
pub mod config;
pub mod error;
pub mod fetch;
pub mod profile;
pub mod readers;
pub mod registry;
pub mod service;
pub mod source;

pub use collection::{ClosureResult, Collection};
pub use config::{ServiceConfig, VersionPolicy};
pub use error::{FleetError, Result};
pub use profile::{ClientProfile, PackageEntry, PackageRequest, Resolution, Structure};
pub use readers::{Backend, GraphFragment};
pub use registry::SourceRegistry;
pub use service::PackageService;
pub use source::{Source, SourceOptions};
