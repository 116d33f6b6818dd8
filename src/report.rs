//! Computes a report instance into its display grid.

use crate::accounting::{AccountingBindingProvider, AccountingScope};
use crate::backend::{Backend, FiscalPeriod};
use crate::domain::Domain;
use crate::error::{ReportError, Result};
use crate::evaluator::{ComputedKpiValue, KpiEvaluator};
use crate::expr::Environment;
use crate::period::{resolve_period, ResolvedPeriod};
use crate::query::QueryFetcher;
use crate::render::{render_comparison, Locale};
use crate::schema::{InstancePeriod, PeriodId, PeriodType, ReportInstance};
use crate::settings::{EngineSettings, NoFilters, ReportFilters};
use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

static NO_FILTERS: NoFilters = NoFilters;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnHeader {
    pub name: String,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRow {
    pub kpi_name: String,
    pub cols: Vec<ColumnHeader>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GridCell {
    Value(Box<ComputedKpiValue>),
    Comparison { val_r: String },
}

impl GridCell {
    pub fn rendered(&self) -> &str {
        match self {
            GridCell::Value(value) => &value.val_r,
            GridCell::Comparison { val_r } => val_r,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRow {
    pub kpi_name: String,
    pub cols: Vec<GridCell>,
    pub default_style: Option<String>,
}

/// The computed report: one header row and one content row per KPI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportGrid {
    pub header: Vec<HeaderRow>,
    pub content: Vec<ContentRow>,
}

impl ReportGrid {
    pub fn columns(&self) -> &[ColumnHeader] {
        self.header.first().map(|h| h.cols.as_slice()).unwrap_or(&[])
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Action opening the journal items behind a KPI value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrilldownAction {
    pub name: String,
    pub domain: Domain,
    #[serde(rename = "type")]
    pub action_type: String,
    pub res_model: String,
    pub views: Vec<(bool, String)>,
    pub view_type: String,
    pub view_mode: String,
    pub target: String,
}

impl DrilldownAction {
    fn journal_items(name: String, domain: Domain) -> Self {
        Self {
            name,
            domain,
            action_type: "ir.actions.act_window".to_string(),
            res_model: "account.move.line".to_string(),
            views: vec![(false, "list".to_string()), (false, "form".to_string())],
            view_type: "list".to_string(),
            view_mode: "list".to_string(),
            target: "current".to_string(),
        }
    }
}

pub struct ReportEngine<'a> {
    backend: &'a dyn Backend,
    filters: &'a dyn ReportFilters,
    settings: EngineSettings,
    today: Option<NaiveDate>,
}

impl<'a> ReportEngine<'a> {
    pub fn new(backend: &'a dyn Backend, settings: EngineSettings) -> Self {
        Self {
            backend,
            filters: &NO_FILTERS,
            settings,
            today: None,
        }
    }

    pub fn with_filters(mut self, filters: &'a dyn ReportFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Overrides the current date used when an instance has no explicit date.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn pivot_date(&self, instance: &ReportInstance) -> Result<NaiveDate> {
        let today = match self.today {
            Some(today) => today,
            None => self.settings.today()?,
        };
        Ok(instance.pivot_date(today))
    }

    fn fiscal_periods(&self, instance: &ReportInstance) -> Result<Vec<FiscalPeriod>> {
        let needed = instance
            .periods
            .iter()
            .any(|p| p.period_type == PeriodType::FiscalPeriod);
        if needed {
            self.backend.fiscal_periods(instance.company_id())
        } else {
            Ok(Vec::new())
        }
    }

    /// Concrete dates of every period of `instance`, in period order.
    pub fn resolve_periods(&self, instance: &ReportInstance) -> Result<Vec<(PeriodId, ResolvedPeriod)>> {
        let pivot = self.pivot_date(instance)?;
        let fiscal_periods = self.fiscal_periods(instance)?;
        ordered_periods(instance)
            .into_iter()
            .map(|period| Ok((period.id, resolve_period(period, pivot, &fiscal_periods)?)))
            .collect()
    }

    /// Computes every valid period of `instance` and assembles the grid.
    ///
    /// Configuration and backend errors abort the computation. Errors in
    /// individual formulas only affect their own cells.
    pub fn compute(
        &self,
        instance: &ReportInstance,
        provider: &mut dyn AccountingBindingProvider,
    ) -> Result<ReportGrid> {
        instance.validate()?;
        let report = &instance.report;
        let locale = self.settings.locale();
        let tz = self.settings.tz()?;
        let pivot = self.pivot_date(instance)?;

        info!(
            "Computing report instance {} at {} ({} periods, {} KPIs)",
            instance.name,
            pivot,
            instance.periods.len(),
            report.kpis.len()
        );

        for kpi in &report.kpis {
            provider.parse(&kpi.expression);
        }
        provider.finalize_parsing(&instance.root_account)?;

        let evaluator = KpiEvaluator::new(&report.kpis, &*provider, locale);
        debug!("KPI evaluation order: {:?}", evaluator.evaluation_order());

        let fiscal_periods = self.fiscal_periods(instance)?;
        let fetcher = QueryFetcher::new(self.backend, self.filters, tz, instance.company_id());

        let periods = ordered_periods(instance);
        let mut resolved: BTreeMap<PeriodId, ResolvedPeriod> = BTreeMap::new();
        let mut values: BTreeMap<PeriodId, BTreeMap<String, ComputedKpiValue>> = BTreeMap::new();
        for period in &periods {
            let dates = resolve_period(period, pivot, &fiscal_periods)?;
            if !dates.valid {
                debug!("Skipping period {}: no valid date range", period.name);
                continue;
            }
            let (date_from, date_to) = dates.date_range(&period.name)?;
            debug!("Computing period {} from {} to {}", period.name, date_from, date_to);

            let mut env = Environment::new();
            env.extend(fetcher.fetch_all(&report.queries, period, date_from, date_to)?);

            let scope = self.scope(instance, period, &dates, date_from, date_to);
            provider.bind_and_execute(&scope)?;
            env.extend(provider.bindings());

            values.insert(period.id, evaluator.evaluate(&mut env, period.id));
            resolved.insert(period.id, dates);
        }

        let grid = assemble(instance, &periods, &resolved, &values, locale);
        info!(
            "Report instance {} computed with {} columns",
            instance.name,
            grid.columns().len()
        );
        Ok(grid)
    }

    /// Journal items explaining the value of `expr` in one period, or `None`
    /// when the expression has no accounting reference.
    pub fn drilldown(
        &self,
        instance: &ReportInstance,
        period_id: PeriodId,
        expr: &str,
        provider: &mut dyn AccountingBindingProvider,
    ) -> Result<Option<DrilldownAction>> {
        if !provider.has_account_reference(expr) {
            return Ok(None);
        }
        let period = instance
            .period(period_id)
            .ok_or(ReportError::UnknownPeriod(period_id))?;

        provider.parse(expr);
        provider.finalize_parsing(&instance.root_account)?;

        let pivot = self.pivot_date(instance)?;
        let fiscal_periods = self.fiscal_periods(instance)?;
        let dates = resolve_period(period, pivot, &fiscal_periods)?;
        let (date_from, date_to) = dates.date_range(&period.name)?;

        let scope = self.scope(instance, period, &dates, date_from, date_to);
        let domain = provider.domain_for(expr, &scope)?;
        let domain = Domain::and_all([&domain, &scope.extra_filter])?;

        Ok(Some(DrilldownAction::journal_items(
            format!("{} - {}", expr, period.name),
            domain,
        )))
    }

    fn scope<'p>(
        &self,
        instance: &ReportInstance,
        period: &InstancePeriod,
        dates: &'p ResolvedPeriod,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> AccountingScope<'p> {
        AccountingScope {
            date_from,
            date_to,
            period_from: dates.period_from.as_ref(),
            period_to: dates.period_to.as_ref(),
            target_move: instance.target_move,
            extra_filter: self.filters.additional_move_line_filter(period),
        }
    }
}

fn ordered_periods(instance: &ReportInstance) -> Vec<&InstancePeriod> {
    let mut periods: Vec<&InstancePeriod> = instance.periods.iter().collect();
    periods.sort_by_key(|p| p.sequence);
    periods
}

fn assemble(
    instance: &ReportInstance,
    periods: &[&InstancePeriod],
    resolved: &BTreeMap<PeriodId, ResolvedPeriod>,
    values: &BTreeMap<PeriodId, BTreeMap<String, ComputedKpiValue>>,
    locale: &Locale,
) -> ReportGrid {
    let kpis = &instance.report.kpis;
    let mut header = HeaderRow {
        kpi_name: String::new(),
        cols: Vec::new(),
    };
    let mut content: Vec<ContentRow> = kpis
        .iter()
        .map(|kpi| ContentRow {
            kpi_name: kpi.label().to_string(),
            cols: Vec::new(),
            default_style: kpi.default_css_style.clone(),
        })
        .collect();

    for period in periods {
        let (Some(dates), Some(period_values)) = (resolved.get(&period.id), values.get(&period.id))
        else {
            continue;
        };
        header.cols.push(ColumnHeader {
            name: period.name.clone(),
            date: header_date(period, dates, locale),
        });
        for (row, kpi) in content.iter_mut().zip(kpis) {
            if let Some(value) = period_values.get(&kpi.name) {
                row.cols.push(GridCell::Value(Box::new(value.clone())));
            }
        }

        for target_id in &period.comparison_targets {
            let (Some(target), Some(target_values)) =
                (instance.period(*target_id), values.get(target_id))
            else {
                continue;
            };
            header.cols.push(ColumnHeader {
                name: format!("{} vs {}", period.name, target.name),
                date: String::new(),
            });
            for (row, kpi) in content.iter_mut().zip(kpis) {
                let current = period_values.get(&kpi.name).map(|v| &v.val);
                let base = target_values.get(&kpi.name).map(|v| &v.val);
                let val_r = match (current, base) {
                    (Some(current), Some(base)) => render_comparison(
                        kpi,
                        current,
                        base,
                        period.normalize_factor,
                        target.normalize_factor,
                        locale,
                    ),
                    _ => String::new(),
                };
                row.cols.push(GridCell::Comparison { val_r });
            }
        }
    }

    ReportGrid {
        header: vec![header],
        content,
    }
}

fn header_date(period: &InstancePeriod, dates: &ResolvedPeriod, locale: &Locale) -> String {
    let fiscal = dates.period_from.as_ref().zip(dates.period_to.as_ref());
    let format = |date: Option<NaiveDate>| date.map(|d| locale.format_date(d)).unwrap_or_default();

    if period.duration > 1 || period.period_type == PeriodType::Week {
        let (from, to) = match fiscal {
            Some((first, last)) => (first.name.clone(), last.name.clone()),
            None => (format(dates.date_from), format(dates.date_to)),
        };
        format!("from {} to {}", from, to)
    } else {
        match fiscal {
            Some((first, _)) => first.name.clone(),
            None => format(dates.date_from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting::NoAccounting;
    use crate::memory::MemoryBackend;
    use crate::schema::{Kpi, Report, RootAccount};

    fn instance() -> ReportInstance {
        let mut report = Report::new("r");
        report.push_kpi(Kpi::new("one", "1"));
        let mut instance = ReportInstance::new(
            "i",
            report,
            RootAccount {
                id: 1,
                code: "0".to_string(),
                company_id: 1,
            },
        );
        instance.date = NaiveDate::from_ymd_opt(2024, 3, 14);
        instance
    }

    #[test]
    fn test_header_dates() {
        let mut instance = instance();
        instance.push_period(InstancePeriod::new(1, "yesterday", PeriodType::Day));
        instance.push_period(InstancePeriod::new(2, "this week", PeriodType::Week).with_offset(0));
        let backend = MemoryBackend::new();
        let grid = ReportEngine::new(&backend, EngineSettings::default())
            .compute(&instance, &mut NoAccounting)
            .unwrap();

        assert_eq!(
            grid.columns(),
            &[
                ColumnHeader {
                    name: "yesterday".to_string(),
                    date: "03/13/2024".to_string()
                },
                ColumnHeader {
                    name: "this week".to_string(),
                    date: "from 03/11/2024 to 03/17/2024".to_string()
                },
            ]
        );
        assert_eq!(grid.content[0].kpi_name, "one");
        assert_eq!(grid.content[0].cols.len(), 2);
    }

    #[test]
    fn test_grid_serializes_with_stable_keys() {
        let mut instance = instance();
        instance.push_period(InstancePeriod::new(1, "a", PeriodType::Day).compared_with(2));
        instance.push_period(InstancePeriod::new(2, "b", PeriodType::Day).with_offset(-2));
        let backend = MemoryBackend::new();
        let grid = ReportEngine::new(&backend, EngineSettings::default())
            .compute(&instance, &mut NoAccounting)
            .unwrap();

        let json: serde_json::Value = serde_json::from_str(&grid.to_json().unwrap()).unwrap();
        assert_eq!(json["header"][0]["kpi_name"], "");
        assert_eq!(json["header"][0]["cols"][1]["name"], "a vs b");
        assert_eq!(json["header"][0]["cols"][1]["date"], "");
        let row = &json["content"][0];
        assert_eq!(row["cols"][0]["val"], 1.0);
        assert_eq!(row["cols"][0]["period_id"], 1);
        assert_eq!(row["cols"][1], serde_json::json!({"val_r": "+0\u{a0}%"}));
        assert!(row["default_style"].is_null());
    }

    #[test]
    fn test_duplicate_period_ids_are_rejected() {
        let mut instance = instance();
        instance.push_period(InstancePeriod::new(1, "a", PeriodType::Day));
        instance.push_period(InstancePeriod::new(1, "b", PeriodType::FiscalPeriod));
        let backend = MemoryBackend::new();
        let result = ReportEngine::new(&backend, EngineSettings::default())
            .compute(&instance, &mut NoAccounting);
        assert!(matches!(result, Err(ReportError::DuplicatePeriodId(1))));
    }

    #[test]
    fn test_today_is_the_pivot_without_instance_date() {
        let mut instance = instance();
        instance.date = None;
        instance.push_period(InstancePeriod::new(1, "yesterday", PeriodType::Day));
        let backend = MemoryBackend::new();
        let grid = ReportEngine::new(&backend, EngineSettings::default())
            .with_today(NaiveDate::from_ymd_opt(2024, 6, 2).unwrap())
            .compute(&instance, &mut NoAccounting)
            .unwrap();
        assert_eq!(grid.columns()[0].date, "06/01/2024");
    }

    #[test]
    fn test_unknown_period_drilldown() {
        let instance = instance();
        let backend = MemoryBackend::new();
        let engine = ReportEngine::new(&backend, EngineSettings::default());
        // no accounting reference: nothing to drill into
        assert_eq!(engine.drilldown(&instance, 9, "1", &mut NoAccounting).unwrap(), None);
    }
}
