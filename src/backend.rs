//! The data backend the engine reads from.
//!
//! Every call is blocking and either returns data or an error; the engine
//! does not retry. A failure aborts the report computation.

use crate::domain::Domain;
use crate::error::Result;
use crate::value::Record;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A fiscal period as defined in the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalPeriod {
    pub id: u64,
    pub name: String,
    pub date_start: NaiveDate,
    pub date_stop: NaiveDate,
    /// Opening/closing periods are special and never used to resolve report periods.
    #[serde(default)]
    pub special: bool,
    pub company_id: u64,
}

impl FiscalPeriod {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.date_start <= date && date <= self.date_stop
    }
}

/// One group of a grouped aggregation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    /// Number of records in the group.
    pub count: usize,
    /// Aggregated value per requested field.
    pub values: Record,
}

pub trait Backend {
    /// Ids of the records of `model` matching `domain`.
    fn search(&self, model: &str, domain: &Domain) -> Result<Vec<u64>>;

    /// Reads `fields` of the given records, in the order of `ids`.
    fn read(&self, model: &str, ids: &[u64], fields: &[String]) -> Result<Vec<Record>>;

    /// Sums `fields` over the records matching `domain`, grouped by `group_by`.
    /// An empty `group_by` yields at most one group covering every match.
    fn read_group(
        &self,
        model: &str,
        domain: &Domain,
        fields: &[String],
        group_by: &[String],
    ) -> Result<Vec<GroupRecord>>;

    fn has_field(&self, model: &str, field: &str) -> bool;

    /// All fiscal periods of a company, special ones included.
    fn fiscal_periods(&self, company_id: u64) -> Result<Vec<FiscalPeriod>>;
}
