use crate::error::{ReportError, Result};
use crate::utils::is_valid_identifier;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub type PeriodId = u32;

const DEFAULT_SEQUENCE: i32 = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum KpiType {
    #[default]
    #[schemars(description = "Numeric value rendered with the KPI divider, rounding and suffix")]
    Num,

    #[schemars(description = "Ratio rendered as a percentage (0.1 is shown as 10 %)")]
    Pct,

    #[schemars(description = "Free text, rendered as is and never compared")]
    Str,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default, JsonSchema)]
pub enum Divider {
    #[serde(rename = "1e-6")]
    Micro,
    #[serde(rename = "1e-3")]
    Milli,
    #[default]
    #[serde(rename = "1")]
    Unit,
    #[serde(rename = "1e3")]
    Kilo,
    #[serde(rename = "1e6")]
    Mega,
}

impl Divider {
    pub fn factor(self) -> f64 {
        match self {
            Divider::Micro => 1e-6,
            Divider::Milli => 1e-3,
            Divider::Unit => 1.0,
            Divider::Kilo => 1e3,
            Divider::Mega => 1e6,
        }
    }

    /// Unit prefix printed between the number and the suffix. Empty for the identity divider.
    pub fn label(self) -> &'static str {
        match self {
            Divider::Micro => "µ",
            Divider::Milli => "m",
            Divider::Unit => "",
            Divider::Kilo => "k",
            Divider::Mega => "M",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CompareMethod {
    #[schemars(description = "Render the difference between the two values")]
    Diff,

    #[default]
    #[schemars(description = "Render the relative change as a percentage of the base value")]
    Pct,

    #[schemars(description = "Do not render comparisons")]
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Kpi {
    #[schemars(description = "Identifier of the KPI, usable in other formulas")]
    pub name: String,

    #[serde(default)]
    #[schemars(description = "Row label shown in the rendered report")]
    pub description: String,

    #[schemars(description = "Formula computing the KPI value")]
    pub expression: String,

    #[serde(default, rename = "type")]
    pub kpi_type: KpiType,

    #[serde(default)]
    pub divider: Divider,

    #[serde(default)]
    #[schemars(description = "Number of decimal places")]
    pub dp: u32,

    #[serde(default)]
    pub suffix: Option<String>,

    #[serde(default)]
    pub compare_method: CompareMethod,

    #[serde(default)]
    #[schemars(description = "Formula evaluating to a style token for the rendered cell")]
    pub css_style: Option<String>,

    #[serde(default)]
    pub default_css_style: Option<String>,

    #[serde(default = "default_sequence")]
    pub sequence: i32,
}

impl Kpi {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            expression: expression.into(),
            kpi_type: KpiType::Num,
            divider: Divider::Unit,
            dp: 0,
            suffix: None,
            compare_method: CompareMethod::Pct,
            css_style: None,
            default_css_style: None,
            sequence: DEFAULT_SEQUENCE,
        }
    }

    /// Switches the KPI type and resets the rendering options to what suits that type.
    pub fn with_type(mut self, kpi_type: KpiType) -> Self {
        self.kpi_type = kpi_type;
        self.divider = Divider::Unit;
        self.dp = 0;
        self.compare_method = match kpi_type {
            KpiType::Num => CompareMethod::Pct,
            KpiType::Pct => CompareMethod::Diff,
            KpiType::Str => CompareMethod::None,
        };
        self
    }

    pub fn label(&self) -> &str {
        if self.description.is_empty() {
            &self.name
        } else {
            &self.description
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    #[default]
    None,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DateFieldKind {
    #[default]
    Date,
    Datetime,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Query {
    #[schemars(description = "Identifier under which the query result is bound in formulas")]
    pub name: String,

    #[schemars(description = "Backend model to query (e.g. 'sale.order')")]
    pub model: String,

    #[schemars(description = "Fields to fetch, in order")]
    pub fields: Vec<String>,

    #[serde(default)]
    pub aggregate: Aggregate,

    #[schemars(description = "Date or datetime field restricted to the period range")]
    pub date_field: String,

    #[serde(default)]
    pub date_field_kind: DateFieldKind,

    #[serde(default)]
    #[schemars(description = "Filter domain, e.g. [('state', '=', 'done')]")]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Report {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub kpis: Vec<Kpi>,

    #[serde(default)]
    pub queries: Vec<Query>,
}

impl Report {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let mut report: Report = serde_json::from_str(json)?;
        report.kpis.sort_by_key(|k| k.sequence);
        Ok(report)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(Report)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::generate_json_schema())
    }

    /// Appends a KPI after the current last one.
    pub fn push_kpi(&mut self, kpi: Kpi) {
        let len = self.kpis.len();
        self.insert_kpi(len, kpi);
    }

    /// Inserts a KPI at `index`, keeping the list order authoritative.
    pub fn insert_kpi(&mut self, index: usize, mut kpi: Kpi) {
        let index = index.min(self.kpis.len());
        let sequences: Vec<i32> = self.kpis.iter().map(|k| k.sequence).collect();
        match sequence_between(&sequences, index) {
            Some(sequence) => {
                kpi.sequence = sequence;
                self.kpis.insert(index, kpi);
            }
            None => {
                self.kpis.insert(index, kpi);
                self.resequence();
            }
        }
    }

    pub fn move_kpi(&mut self, from: usize, to: usize) {
        if from >= self.kpis.len() || from == to {
            return;
        }
        let kpi = self.kpis.remove(from);
        self.insert_kpi(to, kpi);
    }

    fn resequence(&mut self) {
        for (idx, kpi) in self.kpis.iter_mut().enumerate() {
            kpi.sequence = idx as i32 + 1;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for kpi in &self.kpis {
            if !is_valid_identifier(&kpi.name) {
                return Err(ReportError::InvalidIdentifier {
                    kind: "KPI",
                    name: kpi.name.clone(),
                });
            }
            if !names.insert(kpi.name.as_str()) {
                return Err(ReportError::DuplicateName(kpi.name.clone()));
            }
        }
        for query in &self.queries {
            if !is_valid_identifier(&query.name) {
                return Err(ReportError::InvalidIdentifier {
                    kind: "query",
                    name: query.name.clone(),
                });
            }
            if !names.insert(query.name.as_str()) {
                return Err(ReportError::DuplicateName(query.name.clone()));
            }
        }
        Ok(())
    }
}

/// A sequence number that places an item at `index` without touching its neighbours,
/// or `None` when there is no gap left.
fn sequence_between(sequences: &[i32], index: usize) -> Option<i32> {
    let before = if index == 0 {
        None
    } else {
        sequences.get(index - 1).copied()
    };
    let after = sequences.get(index).copied();
    match (before, after) {
        (None, None) => Some(DEFAULT_SEQUENCE),
        (Some(b), None) => b.checked_add(1),
        (None, Some(a)) => a.checked_sub(1).filter(|s| *s >= 0),
        (Some(b), Some(a)) if (a as i64) - (b as i64) >= 2 => {
            Some((b as i64 + (a as i64 - b as i64) / 2) as i32)
        }
        _ => None,
    }
}

fn default_sequence() -> i32 {
    DEFAULT_SEQUENCE
}

fn default_offset() -> i64 {
    -1
}

fn default_one() -> i64 {
    1
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    Day,
    Week,
    FiscalPeriod,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InstancePeriod {
    pub id: PeriodId,

    pub name: String,

    #[serde(rename = "type")]
    pub period_type: PeriodType,

    #[serde(default = "default_offset")]
    #[schemars(description = "Offset from the period containing the pivot date")]
    pub offset: i64,

    #[serde(default = "default_one")]
    #[schemars(description = "Number of periods")]
    pub duration: i64,

    #[serde(default = "default_one")]
    #[schemars(description = "Factor used to normalize the period before comparison")]
    pub normalize_factor: i64,

    #[serde(default)]
    #[schemars(description = "Ids of the periods this period is compared with")]
    pub comparison_targets: Vec<PeriodId>,

    #[serde(default = "default_sequence")]
    pub sequence: i32,
}

impl InstancePeriod {
    pub fn new(id: PeriodId, name: impl Into<String>, period_type: PeriodType) -> Self {
        Self {
            id,
            name: name.into(),
            period_type,
            offset: default_offset(),
            duration: 1,
            normalize_factor: 1,
            comparison_targets: Vec::new(),
            sequence: DEFAULT_SEQUENCE,
        }
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_normalize_factor(mut self, factor: i64) -> Self {
        self.normalize_factor = factor;
        self
    }

    pub fn compared_with(mut self, target: PeriodId) -> Self {
        self.comparison_targets.push(target);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TargetMove {
    #[default]
    #[schemars(description = "All posted entries")]
    Posted,

    #[schemars(description = "All entries, including drafts")]
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct RootAccount {
    pub id: u64,
    pub code: String,
    pub company_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReportInstance {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    pub report: Report,

    pub root_account: RootAccount,

    #[serde(default)]
    #[schemars(description = "Base date of the report; leave empty to use the current date")]
    pub date: Option<NaiveDate>,

    #[serde(default)]
    pub target_move: TargetMove,

    #[serde(default)]
    pub periods: Vec<InstancePeriod>,
}

impl ReportInstance {
    pub fn new(name: impl Into<String>, report: Report, root_account: RootAccount) -> Self {
        Self {
            name: name.into(),
            description: None,
            report,
            root_account,
            date: None,
            target_move: TargetMove::Posted,
            periods: Vec::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let mut instance: ReportInstance = serde_json::from_str(json)?;
        instance.report.kpis.sort_by_key(|k| k.sequence);
        instance.periods.sort_by_key(|p| p.sequence);
        Ok(instance)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ReportInstance)
    }

    pub fn company_id(&self) -> u64 {
        self.root_account.company_id
    }

    /// The explicit base date, or `today` when none is configured.
    pub fn pivot_date(&self, today: NaiveDate) -> NaiveDate {
        self.date.unwrap_or(today)
    }

    pub fn push_period(&mut self, mut period: InstancePeriod) {
        let sequences: Vec<i32> = self.periods.iter().map(|p| p.sequence).collect();
        match sequence_between(&sequences, sequences.len()) {
            Some(sequence) => period.sequence = sequence,
            None => period.sequence = self.periods.len() as i32 + 1,
        }
        self.periods.push(period);
    }

    pub fn period(&self, id: PeriodId) -> Option<&InstancePeriod> {
        self.periods.iter().find(|p| p.id == id)
    }

    pub fn validate(&self) -> Result<()> {
        self.report.validate()?;

        let mut names = HashSet::new();
        let mut ids: HashSet<PeriodId> = HashSet::new();
        for period in &self.periods {
            if !names.insert(period.name.as_str()) {
                return Err(ReportError::DuplicatePeriodName(period.name.clone()));
            }
            if !ids.insert(period.id) {
                return Err(ReportError::DuplicatePeriodId(period.id));
            }
        }
        for period in &self.periods {
            if period.duration <= 0 {
                return Err(ReportError::InvalidDuration {
                    period: period.name.clone(),
                    duration: period.duration,
                });
            }
            if period.normalize_factor <= 0 {
                return Err(ReportError::InvalidNormalizeFactor {
                    period: period.name.clone(),
                    factor: period.normalize_factor,
                });
            }
            if let Some(target) = period
                .comparison_targets
                .iter()
                .find(|target| !ids.contains(target))
            {
                return Err(ReportError::UnknownComparisonTarget {
                    period: period.name.clone(),
                    target: *target,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> RootAccount {
        RootAccount {
            id: 1,
            code: "0".to_string(),
            company_id: 1,
        }
    }

    #[test]
    fn test_schema_generation() {
        let schema_json = Report::schema_as_json().unwrap();
        assert!(schema_json.contains("kpis"));
        assert!(schema_json.contains("compare_method"));
        assert!(schema_json.contains("date_field_kind"));
    }

    #[test]
    fn test_report_from_json_applies_defaults() {
        let report = Report::from_json(
            r#"{
                "name": "P&L",
                "kpis": [
                    {"name": "margin", "expression": "sales - costs", "sequence": 20},
                    {"name": "ratio", "expression": "margin / sales", "type": "pct", "divider": "1e3", "sequence": 10}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(report.kpis[0].name, "ratio");
        assert_eq!(report.kpis[0].kpi_type, KpiType::Pct);
        assert_eq!(report.kpis[0].divider, Divider::Kilo);
        assert_eq!(report.kpis[1].compare_method, CompareMethod::Pct);
        assert_eq!(report.kpis[1].dp, 0);
    }

    #[test]
    fn test_kpi_type_defaults() {
        let kpi = Kpi::new("ratio", "1").with_type(KpiType::Pct);
        assert_eq!(kpi.compare_method, CompareMethod::Diff);
        let kpi = Kpi::new("label", "'x'").with_type(KpiType::Str);
        assert_eq!(kpi.compare_method, CompareMethod::None);
    }

    #[test]
    fn test_insert_uses_gaps_before_renumbering() {
        let mut report = Report::new("r");
        report.push_kpi(Kpi::new("a", "1"));
        report.push_kpi(Kpi::new("b", "2"));
        assert_eq!(report.kpis[0].sequence, 100);
        assert_eq!(report.kpis[1].sequence, 101);

        // no gap between 100 and 101: everything is renumbered
        report.insert_kpi(1, Kpi::new("c", "3"));
        let order: Vec<_> = report.kpis.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(order, vec!["a", "c", "b"]);
        let sequences: Vec<_> = report.kpis.iter().map(|k| k.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);

        report.move_kpi(2, 0);
        let order: Vec<_> = report.kpis.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
        assert!(report.kpis.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    #[test]
    fn test_insert_between_far_apart_sequences() {
        let mut report = Report::new("r");
        let mut low = Kpi::new("low", "1");
        low.sequence = -2_000_000_000;
        let mut high = Kpi::new("high", "2");
        high.sequence = 2_000_000_000;
        report.kpis = vec![low, high];

        report.insert_kpi(1, Kpi::new("middle", "3"));
        let order: Vec<_> = report.kpis.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(order, vec!["low", "middle", "high"]);
        assert_eq!(report.kpis[1].sequence, 0);
    }

    #[test]
    fn test_report_validation() {
        let mut report = Report::new("r");
        report.push_kpi(Kpi::new("1abc", "1"));
        assert!(matches!(
            report.validate(),
            Err(ReportError::InvalidIdentifier { .. })
        ));

        let mut report = Report::new("r");
        report.push_kpi(Kpi::new("sales", "1"));
        report.queries.push(Query {
            name: "sales".to_string(),
            model: "sale.order".to_string(),
            fields: vec!["amount".to_string()],
            aggregate: Aggregate::Sum,
            date_field: "date".to_string(),
            date_field_kind: DateFieldKind::Date,
            domain: None,
        });
        assert!(matches!(
            report.validate(),
            Err(ReportError::DuplicateName(name)) if name == "sales"
        ));
    }

    #[test]
    fn test_instance_validation() {
        let mut instance = ReportInstance::new("i", Report::new("r"), root());
        instance.push_period(InstancePeriod::new(1, "current", PeriodType::Day).compared_with(7));
        assert!(matches!(
            instance.validate(),
            Err(ReportError::UnknownComparisonTarget { target: 7, .. })
        ));

        let mut instance = ReportInstance::new("i", Report::new("r"), root());
        instance.push_period(InstancePeriod::new(1, "current", PeriodType::Day).with_duration(0));
        assert!(matches!(
            instance.validate(),
            Err(ReportError::InvalidDuration { duration: 0, .. })
        ));

        let mut instance = ReportInstance::new("i", Report::new("r"), root());
        instance.push_period(InstancePeriod::new(1, "p", PeriodType::Day));
        instance.push_period(InstancePeriod::new(2, "p", PeriodType::Week));
        assert!(matches!(
            instance.validate(),
            Err(ReportError::DuplicatePeriodName(_))
        ));

        let mut instance = ReportInstance::new("i", Report::new("r"), root());
        instance.push_period(InstancePeriod::new(5, "yesterday", PeriodType::Day));
        instance.push_period(InstancePeriod::new(5, "two days ago", PeriodType::Day).with_offset(-2));
        assert!(matches!(
            instance.validate(),
            Err(ReportError::DuplicatePeriodId(5))
        ));
    }
}
