use crate::error::Result;
use crate::managers::homebrew::{self, HomebrewManager};
use crate::managers::npm::{self, NpmManager};
use crate::managers::{ManagerContext, PackageManager};
use std::collections::BTreeMap;

pub struct ManagerFactory;

impl ManagerFactory {
    /// Managers with an adapter, in registration order.
    pub const SUPPORTED: &'static [&'static str] = &[homebrew::NAME, npm::NAME];

    pub fn supports(name: &str) -> bool {
        Self::SUPPORTED.contains(&name)
    }

    /// Builds the adapter for `name`, or `None` when there is no adapter for it.
    pub fn create(name: &str, ctx: ManagerContext) -> Result<Option<Box<dyn PackageManager>>> {
        let manager: Box<dyn PackageManager> = match name {
            homebrew::NAME => Box::new(HomebrewManager::new(ctx)?),
            npm::NAME => Box::new(NpmManager::new(ctx)?),
            _ => return Ok(None),
        };
        Ok(Some(manager))
    }

    /// Checks adapter-specific options without building the adapter.
    pub fn validate_options(
        name: &str,
        options: &BTreeMap<String, serde_yaml::Value>,
    ) -> Result<()> {
        match name {
            homebrew::NAME => HomebrewManager::parse_options(options).map(drop),
            npm::NAME => NpmManager::parse_options(options).map(drop),
            _ => Ok(()),
        }
    }
}
