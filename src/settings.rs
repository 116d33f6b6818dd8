use crate::domain::Domain;
use crate::error::Result;
use crate::render::Locale;
use crate::schema::{InstancePeriod, Query};
use crate::utils::parse_timezone;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn default_lang() -> String {
    "en_US".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Session settings of the user requesting a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EngineSettings {
    #[serde(default = "default_lang")]
    #[schemars(description = "Language code selecting number and date formatting, e.g. 'fr_FR'")]
    pub lang: String,

    #[serde(default = "default_timezone")]
    #[schemars(description = "IANA time zone used for datetime filters and the current date")]
    pub timezone: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            lang: default_lang(),
            timezone: default_timezone(),
        }
    }
}

impl EngineSettings {
    pub fn new(lang: impl Into<String>, timezone: impl Into<String>) -> Self {
        Self {
            lang: lang.into(),
            timezone: timezone.into(),
        }
    }

    pub fn tz(&self) -> Result<Tz> {
        parse_timezone(&self.timezone)
    }

    /// Formatting conventions for `lang`; unknown languages format like `en_US`.
    pub fn locale(&self) -> &'static Locale {
        Locale::for_lang(&self.lang)
    }

    /// Current date in the session time zone.
    pub fn today(&self) -> Result<NaiveDate> {
        let tz = self.tz()?;
        Ok(Utc::now().with_timezone(&tz).date_naive())
    }
}

/// Extension points to restrict the data a report sees.
///
/// Both hooks default to no restriction.
pub trait ReportFilters {
    /// Extra filter ANDed into the domain of `query` when fetched for `period`.
    fn additional_query_filter(&self, _period: &InstancePeriod, _query: &Query) -> Domain {
        Domain::new()
    }

    /// Extra filter on journal items, used by accounting bindings and drill-down.
    fn additional_move_line_filter(&self, _period: &InstancePeriod) -> Domain {
        Domain::new()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoFilters;

impl ReportFilters for NoFilters {}
