use crate::error::ConfigError;

/// Which datasources and tables a command operates on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSelection {
    pub datasource: Option<String>,
    pub tables: Option<Vec<String>>,
}

impl TableSelection {
    /// Everything in the settings file.
    pub fn all() -> Self {
        Self::default()
    }

    /// Build a selection from the `--all` / `--datasource` / `--tables` flags.
    ///
    /// `--all` cannot be combined with `--tables`, and without `--all` at
    /// least one of the other two is required.
    pub fn from_flags(
        all: bool,
        datasource: Option<&str>,
        tables: Option<&str>,
    ) -> Result<Self, ConfigError> {
        if all && tables.is_some() {
            return Err(ConfigError::Invalid {
                key: "--tables".into(),
                reason: "--all and --tables cannot be used together".into(),
            });
        }
        if !all && datasource.is_none() && tables.is_none() {
            return Err(ConfigError::Invalid {
                key: "--all".into(),
                reason: "either --all, --datasource or --tables must be specified".into(),
            });
        }
        Ok(Self {
            datasource: datasource.map(String::from),
            tables: tables.map(parse_table_list),
        })
    }

    pub fn includes_datasource(&self, name: &str) -> bool {
        self.datasource.as_deref().map_or(true, |d| d == name)
    }

    pub fn includes_table(&self, name: &str) -> bool {
        self.tables
            .as_ref()
            .map_or(true, |t| t.iter().any(|n| n == name))
    }
}

fn parse_table_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
