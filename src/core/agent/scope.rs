use std::fmt;

use serde::Serialize;

use crate::error::CheckError;

/// Optional restriction of a check to one site, rack, or device.
///
/// The scope is only context for the model. It is never applied as a filter
/// by the loop itself.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum Scope {
    #[default]
    All,
    Site(String),
    Rack(String),
    Device(String),
}

impl Scope {
    /// At most one selector may be set.
    pub fn from_options(
        site: Option<String>,
        rack: Option<String>,
        device: Option<String>,
    ) -> Result<Self, CheckError> {
        let selected = [
            site.map(Scope::Site),
            rack.map(Scope::Rack),
            device.map(Scope::Device),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

        match selected.len() {
            0 => Ok(Scope::All),
            1 => Ok(selected.into_iter().next().unwrap_or_default()),
            _ => Err(CheckError::config(
                "only one of --site, --rack or --device may be given",
            )),
        }
    }

    /// `site=DM-Akron` style key/value text used in the seed message.
    pub fn describe(&self) -> String {
        match self {
            Scope::All => "all objects".to_string(),
            Scope::Site(name) => format!("site={name}"),
            Scope::Rack(name) => format!("rack={name}"),
            Scope::Device(name) => format!("device={name}"),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All => write!(f, "all objects"),
            Scope::Site(name) => write!(f, "site {name}"),
            Scope::Rack(name) => write!(f, "rack {name}"),
            Scope::Device(name) => write!(f, "device {name}"),
        }
    }
}
