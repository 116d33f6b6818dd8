//! In-memory [`Backend`], used by tests and for computing reports over data
//! already loaded from elsewhere (JSON exports, fixtures).

use crate::backend::{Backend, FiscalPeriod, GroupRecord};
use crate::domain::Domain;
use crate::error::{ReportError, Result};
use crate::value::{Record, Value};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
struct Model {
    fields: BTreeSet<String>,
    records: BTreeMap<u64, Record>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    models: BTreeMap<String, Model>,
    fiscal_periods: Vec<FiscalPeriod>,
    next_id: u64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a model and its fields, so an empty model still answers `has_field`.
    pub fn define_model<I, S>(&mut self, model: &str, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.models.entry(model.to_string()).or_default();
        entry.fields.extend(fields.into_iter().map(Into::into));
    }

    /// Stores a record and returns its new id. The id is also exposed as the `id` field.
    pub fn insert(&mut self, model: &str, mut record: Record) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        record.insert("id".to_string(), Value::Number(id as f64));

        let entry = self.models.entry(model.to_string()).or_default();
        entry.fields.extend(record.keys().cloned());
        entry.records.insert(id, record);
        id
    }

    pub fn add_fiscal_period(&mut self, period: FiscalPeriod) {
        self.fiscal_periods.push(period);
    }

    fn model(&self, model: &str) -> Result<&Model> {
        self.models.get(model).ok_or_else(|| ReportError::Backend {
            model: model.to_string(),
            message: "unknown model".to_string(),
        })
    }

    fn matching<'a>(&'a self, model: &str, domain: &Domain) -> Result<Vec<(u64, &'a Record)>> {
        let model = self.model(model)?;
        let mut out = Vec::new();
        for (id, record) in &model.records {
            if domain.matches(record)? {
                out.push((*id, record));
            }
        }
        Ok(out)
    }
}

impl Backend for MemoryBackend {
    fn search(&self, model: &str, domain: &Domain) -> Result<Vec<u64>> {
        Ok(self
            .matching(model, domain)?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    fn read(&self, model: &str, ids: &[u64], fields: &[String]) -> Result<Vec<Record>> {
        let data = self.model(model)?;
        ids.iter()
            .map(|id| {
                let record = data.records.get(id).ok_or_else(|| ReportError::Backend {
                    model: model.to_string(),
                    message: format!("record {} does not exist", id),
                })?;
                let mut row = Record::new();
                row.insert("id".to_string(), Value::Number(*id as f64));
                for field in fields {
                    row.insert(field.clone(), record.get(field).cloned().unwrap_or_default());
                }
                Ok(row)
            })
            .collect()
    }

    fn read_group(
        &self,
        model: &str,
        domain: &Domain,
        fields: &[String],
        group_by: &[String],
    ) -> Result<Vec<GroupRecord>> {
        let mut groups: BTreeMap<Vec<String>, GroupRecord> = BTreeMap::new();

        for (_, record) in self.matching(model, domain)? {
            let key: Vec<String> = group_by
                .iter()
                .map(|f| record.get(f).cloned().unwrap_or_default().to_string())
                .collect();
            let group = groups.entry(key).or_insert_with(|| {
                let mut values = Record::new();
                for f in group_by {
                    values.insert(f.clone(), record.get(f).cloned().unwrap_or_default());
                }
                GroupRecord { count: 0, values }
            });
            group.count += 1;

            for field in fields.iter().filter(|f| !group_by.contains(f)) {
                let Some(amount) = record.get(field).and_then(Value::as_number) else {
                    continue;
                };
                let slot = group.values.entry(field.clone()).or_default();
                let total = slot.as_number().unwrap_or(0.0) + amount;
                *slot = Value::Number(total);
            }
        }

        // fields with only null values sum to zero
        for group in groups.values_mut() {
            for field in fields {
                group
                    .values
                    .entry(field.clone())
                    .or_insert(Value::Number(0.0));
            }
        }

        Ok(groups.into_values().collect())
    }

    fn has_field(&self, model: &str, field: &str) -> bool {
        self.models
            .get(model)
            .is_some_and(|m| m.fields.contains(field))
    }

    fn fiscal_periods(&self, company_id: u64) -> Result<Vec<FiscalPeriod>> {
        Ok(self
            .fiscal_periods
            .iter()
            .filter(|p| p.company_id == company_id)
            .cloned()
            .collect())
    }
}
