//! Declares, checks and provisions the infrastructure behind a static
//! website: a DNS validated certificate, a private content bucket, a
//! CloudFront distribution that reads the bucket through an origin access
//! identity, and alias records for the apex and `www` names.
//!
//! Each site is an independent stack built from the same constructor:
//!
//! ```no_run
//! # async fn run() -> sitestack::Result<()> {
//! use sitestack::{Config, MemoryBackend, StaticZones, site, provision};
//!
//! let config = Config::load("sites.toml")?;
//! let zones = StaticZones::from_config(&config);
//! let sites = site::build_all(&config, &zones).await?;
//! provision::apply_all(&MemoryBackend::new(), &sites).await?;
//! # Ok(())
//! # }
//! ```

pub mod assets;
pub mod checks;
pub mod config;
pub mod deploy_script;
pub mod error;
pub mod graph;
pub mod provision;
pub mod resources;
pub mod site;
pub mod template;
pub mod zone;

pub use config::{Config, SiteConfig};
pub use error::{Error, Result};
pub use graph::{Stack, StackBuilder, Stage};
pub use provision::{MemoryBackend, Provisioner, StackStatus};
pub use site::SiteStack;
pub use template::Template;
pub use zone::{StaticZones, ZoneResolver};
