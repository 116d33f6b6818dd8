//! Accounting balance references inside KPI formulas.
//!
//! The compiler for accounting expressions (balances of account ranges and the
//! like) lives outside this crate. The engine only talks to it through
//! [`AccountingBindingProvider`]: every formula is handed over once for parsing,
//! the provider is told which root account the report is scoped to, then for
//! each period it runs its queries and exposes plain name -> value bindings
//! while rewriting formulas so they reference those names.

use crate::backend::FiscalPeriod;
use crate::domain::Domain;
use crate::error::Result;
use crate::schema::{RootAccount, TargetMove};
use crate::value::Value;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// What the provider needs to know to execute its queries for one period.
#[derive(Debug, Clone)]
pub struct AccountingScope<'a> {
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub period_from: Option<&'a FiscalPeriod>,
    pub period_to: Option<&'a FiscalPeriod>,
    pub target_move: TargetMove,
    /// Extra filter on journal items, from [`crate::settings::ReportFilters`].
    pub extra_filter: Domain,
}

pub trait AccountingBindingProvider {
    fn has_account_reference(&self, expr: &str) -> bool;

    /// Registers the accounting references found in `expr`.
    fn parse(&mut self, expr: &str);

    /// Called once after every formula has been parsed.
    fn finalize_parsing(&mut self, root_account: &RootAccount) -> Result<()>;

    /// Rewrites `expr` so accounting references become plain binding names.
    fn replace(&self, expr: &str) -> String;

    /// Runs the accounting queries for one period. Replaces previous bindings.
    fn bind_and_execute(&mut self, scope: &AccountingScope<'_>) -> Result<()>;

    fn bindings(&self) -> BTreeMap<String, Value>;

    /// Journal item filter matching the references of `expr` in `scope`.
    fn domain_for(&self, expr: &str, scope: &AccountingScope<'_>) -> Result<Domain>;
}

/// Provider for reports that do not use accounting references.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAccounting;

impl AccountingBindingProvider for NoAccounting {
    fn has_account_reference(&self, _expr: &str) -> bool {
        false
    }

    fn parse(&mut self, _expr: &str) {}

    fn finalize_parsing(&mut self, _root_account: &RootAccount) -> Result<()> {
        Ok(())
    }

    fn replace(&self, expr: &str) -> String {
        expr.to_string()
    }

    fn bind_and_execute(&mut self, _scope: &AccountingScope<'_>) -> Result<()> {
        Ok(())
    }

    fn bindings(&self) -> BTreeMap<String, Value> {
        BTreeMap::new()
    }

    fn domain_for(&self, _expr: &str, _scope: &AccountingScope<'_>) -> Result<Domain> {
        Ok(Domain::new())
    }
}
