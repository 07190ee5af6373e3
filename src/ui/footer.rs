//! Static page footer

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FooterLink {
    pub label: &'static str,
    pub url: &'static str,
}

/// Credits shown under the recorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Footer {
    pub name: &'static str,
    pub version: &'static str,
    pub links: Vec<FooterLink>,
}

impl Default for Footer {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            links: vec![FooterLink {
                label: "Source",
                url: env!("CARGO_PKG_REPOSITORY"),
            }],
        }
    }
}

impl fmt::Display for Footer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--")?;
        writeln!(f, "{} v{}", self.name, self.version)?;
        for link in &self.links {
            writeln!(f, "{}: {}", link.label, link.url)?;
        }
        Ok(())
    }
}
