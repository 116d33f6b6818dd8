//! Fetches the data of a report's named queries for one period.

use crate::backend::Backend;
use crate::domain::{Domain, DomainItem, Operator, Term};
use crate::error::Result;
use crate::schema::{Aggregate, DateFieldKind, InstancePeriod, Query};
use crate::settings::ReportFilters;
use crate::utils::utc_midnight;
use crate::value::{Record, Value};
use chrono::NaiveDate;
use chrono_tz::Tz;
use log::debug;
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub struct QueryFetcher<'a> {
    backend: &'a dyn Backend,
    filters: &'a dyn ReportFilters,
    tz: Tz,
    company_id: u64,
}

impl<'a> QueryFetcher<'a> {
    pub fn new(
        backend: &'a dyn Backend,
        filters: &'a dyn ReportFilters,
        tz: Tz,
        company_id: u64,
    ) -> Self {
        Self {
            backend,
            filters,
            tz,
            company_id,
        }
    }

    /// Runs every query over `[date_from, date_to]` and returns the results by query name.
    pub fn fetch_all(
        &self,
        queries: &[Query],
        period: &InstancePeriod,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<BTreeMap<String, Value>> {
        let mut results = BTreeMap::new();
        for query in queries {
            let domain = self.domain(query, period, date_from, date_to)?;
            debug!("Query {} on {}: {}", query.name, query.model, domain);
            results.insert(query.name.clone(), self.fetch(query, &domain)?);
        }
        Ok(results)
    }

    /// Full filter of `query`: its own domain, the additional filter hook,
    /// the date range and the company scope.
    pub fn domain(
        &self,
        query: &Query,
        period: &InstancePeriod,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Domain> {
        let base = match &query.domain {
            Some(text) => Domain::parse(text)?,
            None => Domain::new(),
        };
        let additional = self.filters.additional_query_filter(period, query);

        let field = query.date_field.as_str();
        let dates = match query.date_field_kind {
            DateFieldKind::Date => Domain::new()
                .with_term(field, Operator::Ge, date_from)
                .with_term(field, Operator::Le, date_to),
            DateFieldKind::Datetime => Domain::new()
                .with_term(field, Operator::Ge, utc_midnight(date_from, self.tz, 0)?)
                .with_term(field, Operator::Lt, utc_midnight(date_to, self.tz, 1)?),
        };

        let mut company = Domain::new();
        if self.backend.has_field(&query.model, "company_id") {
            company.push(DomainItem::Or);
            company.push_term(Term::new("company_id", Operator::Eq, false));
            company.push_term(Term::new(
                "company_id",
                Operator::Eq,
                Value::Number(self.company_id as f64),
            ));
        }

        Domain::and_all([&base, &additional, &dates, &company])
    }

    /// Executes `query` with an already built domain.
    ///
    /// Without aggregate the result is the list of fetched rows. With an
    /// aggregate it is a single record holding `count` and one value per field.
    pub fn fetch(&self, query: &Query, domain: &Domain) -> Result<Value> {
        match query.aggregate {
            Aggregate::None => {
                let rows = self.read(query, domain)?;
                Ok(Value::List(rows.into_iter().map(Value::Record).collect()))
            }
            Aggregate::Sum => {
                let groups = self
                    .backend
                    .read_group(&query.model, domain, &query.fields, &[])?;
                let mut record = Record::new();
                match groups.into_iter().next() {
                    Some(group) => {
                        record.insert("count".to_string(), Value::Number(group.count as f64));
                        for field in &query.fields {
                            let value = group.values.get(field).cloned().unwrap_or_default();
                            record.insert(field.clone(), value);
                        }
                    }
                    None => {
                        record.insert("count".to_string(), Value::Number(0.0));
                        for field in &query.fields {
                            record.insert(field.clone(), Value::Null);
                        }
                    }
                }
                Ok(Value::Record(record))
            }
            Aggregate::Min | Aggregate::Max | Aggregate::Avg => {
                let rows = self.read(query, domain)?;
                let mut record = Record::new();
                record.insert("count".to_string(), Value::Number(rows.len() as f64));
                for field in &query.fields {
                    let values: Vec<&Value> = rows
                        .iter()
                        .filter_map(|row| row.get(field))
                        .filter(|v| !v.is_null())
                        .collect();
                    record.insert(field.clone(), reduce(query.aggregate, &values));
                }
                Ok(Value::Record(record))
            }
        }
    }

    fn read(&self, query: &Query, domain: &Domain) -> Result<Vec<Record>> {
        let ids = self.backend.search(&query.model, domain)?;
        self.backend.read(&query.model, &ids, &query.fields)
    }
}

/// Client side reduction of non-null values; `Null` when there are none.
fn reduce(aggregate: Aggregate, values: &[&Value]) -> Value {
    match aggregate {
        Aggregate::Min => extreme(values, Ordering::Less),
        Aggregate::Max => extreme(values, Ordering::Greater),
        Aggregate::Avg => {
            let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_number()).collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                Value::Number(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        Aggregate::None | Aggregate::Sum => Value::Null,
    }
}

fn extreme(values: &[&Value], wanted: Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for &value in values {
        best = match best {
            Some(current) if value.partial_cmp_value(current) != Some(wanted) => Some(current),
            _ => Some(value),
        };
    }
    best.cloned().unwrap_or_default()
}
