//! # KPI Report Engine
//!
//! A library for computing management reports: a matrix of Key Performance
//! Indicators (rows) over relative time periods (columns), evaluated from
//! user-authored formulas against data fetched from an accounting backend.
//!
//! ## Core Concepts
//!
//! - **Report**: ordered KPIs (formula, type, rendering options) and named queries
//! - **Report Instance**: a report bound to a company root account and a set of periods
//!   defined relative to a pivot date (days, weeks or fiscal periods)
//! - **Queries**: backend searches restricted to the period, bound by name in formulas,
//!   either as rows or as one aggregate record (`sum`, `avg`, `min`, `max` plus `count`)
//! - **KPI formulas**: small expressions that may reference queries, accounting balances
//!   and other KPIs in any order; failures stay local to their cell (`#DIV/0`, `#ERR`)
//! - **Comparisons**: extra columns comparing a period with another, normalized by period length
//!
//! ## Example
//!
//! ```rust,ignore
//! use kpi_report_engine::*;
//! use chrono::NaiveDate;
//!
//! let mut report = Report::new("Sales dashboard");
//! report.queries.push(Query {
//!     name: "orders".to_string(),
//!     model: "sale.order".to_string(),
//!     fields: vec!["amount_total".to_string()],
//!     aggregate: Aggregate::Sum,
//!     date_field: "date_order".to_string(),
//!     date_field_kind: DateFieldKind::Date,
//!     domain: Some("[('state', '=', 'done')]".to_string()),
//! });
//! report.push_kpi(Kpi::new("sales", "orders.amount_total"));
//! report.push_kpi(Kpi::new("avg_order", "sales / orders.count"));
//!
//! let mut instance = ReportInstance::new(
//!     "Last month",
//!     report,
//!     RootAccount { id: 1, code: "0".to_string(), company_id: 1 },
//! );
//! instance.date = NaiveDate::from_ymd_opt(2024, 3, 14);
//! instance.push_period(InstancePeriod::new(1, "Yesterday", PeriodType::Day).compared_with(2));
//! instance.push_period(InstancePeriod::new(2, "Day before", PeriodType::Day).with_offset(-2));
//!
//! let backend = MemoryBackend::new();
//! let engine = ReportEngine::new(&backend, EngineSettings::default());
//! let grid = engine.compute(&instance, &mut NoAccounting).unwrap();
//! println!("{}", grid.to_json().unwrap());
//! ```

pub mod accounting;
pub mod backend;
pub mod domain;
pub mod error;
pub mod evaluator;
pub mod export;
pub mod expr;
pub mod memory;
pub mod period;
pub mod query;
pub mod render;
pub mod report;
pub mod schema;
pub mod settings;
pub mod utils;
pub mod value;

pub use accounting::{AccountingBindingProvider, AccountingScope, NoAccounting};
pub use backend::{Backend, FiscalPeriod, GroupRecord};
pub use domain::{Domain, DomainItem, Operator, Term};
pub use error::{ReportError, Result};
pub use evaluator::{ComputedKpiValue, KpiEvaluator, DIV_ZERO, EVAL_ERROR};
pub use export::{to_csv_string, write_csv};
pub use memory::MemoryBackend;
pub use period::{resolve_period, ResolvedPeriod};
pub use query::QueryFetcher;
pub use render::{render, render_comparison, render_num, Locale};
pub use report::{
    ColumnHeader, ContentRow, DrilldownAction, GridCell, HeaderRow, ReportEngine, ReportGrid,
};
pub use schema::*;
pub use settings::{EngineSettings, NoFilters, ReportFilters};
pub use utils::*;
pub use value::{Record, Value};

use log::info;

/// Computes `instance` with the default settings and no accounting references.
pub fn compute_report(backend: &dyn Backend, instance: &ReportInstance) -> Result<ReportGrid> {
    compute_report_with(backend, instance, EngineSettings::default(), &mut NoAccounting)
}

/// Computes `instance` with explicit settings and accounting provider.
pub fn compute_report_with(
    backend: &dyn Backend,
    instance: &ReportInstance,
    settings: EngineSettings,
    provider: &mut dyn AccountingBindingProvider,
) -> Result<ReportGrid> {
    info!("Using language {} and time zone {}", settings.lang, settings.timezone);
    ReportEngine::new(backend, settings).compute(instance, provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sale(day: u32, amount: f64) -> Record {
        let mut record = Record::new();
        record.insert(
            "date_order".to_string(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, day).unwrap()),
        );
        record.insert("amount_total".to_string(), Value::Number(amount));
        record
    }

    #[test]
    fn test_end_to_end_processing() {
        let mut backend = MemoryBackend::new();
        backend.insert("sale.order", sale(13, 100.0));
        backend.insert("sale.order", sale(13, 50.0));
        backend.insert("sale.order", sale(12, 120.0));

        let mut report = Report::new("Sales");
        report.queries.push(Query {
            name: "orders".to_string(),
            model: "sale.order".to_string(),
            fields: vec!["amount_total".to_string()],
            aggregate: Aggregate::Sum,
            date_field: "date_order".to_string(),
            date_field_kind: DateFieldKind::Date,
            domain: None,
        });
        report.push_kpi(Kpi::new("sales", "orders.amount_total"));
        report.push_kpi(Kpi::new("avg_order", "sales / orders.count"));

        let mut instance = ReportInstance::new(
            "Daily",
            report,
            RootAccount {
                id: 1,
                code: "0".to_string(),
                company_id: 1,
            },
        );
        instance.date = NaiveDate::from_ymd_opt(2024, 3, 14);
        instance.push_period(InstancePeriod::new(1, "Yesterday", PeriodType::Day).compared_with(2));
        instance.push_period(InstancePeriod::new(2, "Day before", PeriodType::Day).with_offset(-2));

        let grid = compute_report(&backend, &instance).unwrap();
        assert_eq!(grid.columns().len(), 3);

        let sales = &grid.content[0];
        assert_eq!(sales.kpi_name, "sales");
        assert_eq!(sales.cols[0].rendered(), "150\u{a0}");
        assert_eq!(sales.cols[1].rendered(), "+25\u{a0}%");
        assert_eq!(sales.cols[2].rendered(), "120\u{a0}");

        let avg = &grid.content[1];
        assert_eq!(avg.cols[0].rendered(), "75\u{a0}");
    }
}
