//! Evaluation of the KPI formulas of a report for one period.
//!
//! KPIs may reference each other in any order. Formulas are first sorted by a
//! static scan of the KPI names they mention, so a KPI is normally evaluated
//! after the KPIs it needs. Evaluation then runs in rounds: a KPI failing on an
//! unknown name or a value error is retried in the next round, until a round
//! resolves nothing new. Whatever is still unresolved then, typically the
//! members of a dependency cycle, is reported as `#ERR`.

use crate::accounting::AccountingBindingProvider;
use crate::expr::{eval, parse, Environment, ErrorClass, EvalError, Expr};
use crate::render::{render, Locale};
use crate::schema::{Kpi, KpiType, PeriodId};
use crate::value::Value;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const DIV_ZERO: &str = "#DIV/0";
pub const EVAL_ERROR: &str = "#ERR";

/// Value of one KPI for one period, as shown in a report cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedKpiValue {
    /// Raw value; `Null` when evaluation failed.
    pub val: Value,
    /// Rendered value.
    pub val_r: String,
    /// `name = expression`, followed by the error when evaluation failed.
    pub val_c: String,
    pub style: Option<String>,
    pub default_style: Option<String>,
    pub suffix: Option<String>,
    pub dp: u32,
    pub is_percentage: bool,
    pub period_id: PeriodId,
    pub expr: String,
    /// True when the value can be explained by the journal items behind it.
    pub drilldown: bool,
}

struct CompiledKpi<'a> {
    kpi: &'a Kpi,
    expr: Result<Expr, EvalError>,
    style: Option<Result<Expr, EvalError>>,
    has_account_reference: bool,
    /// Members of the dependency cycle this KPI belongs to, itself included.
    cycle: Vec<usize>,
}

enum Outcome {
    Value(Value),
    Failed { error: EvalError, retry: bool },
}

pub struct KpiEvaluator<'a> {
    compiled: Vec<CompiledKpi<'a>>,
    order: Vec<usize>,
    locale: &'a Locale,
}

impl<'a> KpiEvaluator<'a> {
    /// Prepares `kpis` for evaluation. Accounting references are rewritten by
    /// `provider`, which must already have parsed every formula.
    pub fn new(
        kpis: &'a [Kpi],
        provider: &dyn AccountingBindingProvider,
        locale: &'a Locale,
    ) -> Self {
        let index: HashMap<&str, usize> = kpis
            .iter()
            .enumerate()
            .map(|(idx, kpi)| (kpi.name.as_str(), idx))
            .collect();

        let mut compiled = Vec::with_capacity(kpis.len());
        let mut deps = Vec::with_capacity(kpis.len());
        for kpi in kpis {
            let expr = parse(&provider.replace(&kpi.expression));
            let kpi_deps: BTreeSet<usize> = match &expr {
                Ok(expr) => expr
                    .free_names()
                    .iter()
                    .filter_map(|name| index.get(name.as_str()).copied())
                    .collect(),
                Err(_) => BTreeSet::new(),
            };
            deps.push(kpi_deps);
            compiled.push(CompiledKpi {
                kpi,
                expr,
                style: kpi
                    .css_style
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .map(parse),
                has_account_reference: provider.has_account_reference(&kpi.expression),
                cycle: Vec::new(),
            });
        }

        let order = dependency_order(&deps);
        for (idx, cycle) in cycles(&deps).into_iter().enumerate() {
            compiled[idx].cycle = cycle;
        }

        Self {
            compiled,
            order,
            locale,
        }
    }

    /// KPI names in the order they are evaluated.
    pub fn evaluation_order(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|idx| self.compiled[*idx].kpi.name.as_str())
            .collect()
    }

    /// Evaluates every KPI against `env`, binding each computed value under its
    /// KPI name. Never fails: errors end up in the returned cells.
    pub fn evaluate(
        &self,
        env: &mut Environment,
        period_id: PeriodId,
    ) -> BTreeMap<String, ComputedKpiValue> {
        let mut outcomes: Vec<Option<Outcome>> = self.compiled.iter().map(|_| None).collect();
        let mut pending = self.order.clone();

        loop {
            let mut deferred = Vec::new();
            for &idx in &pending {
                let compiled = &self.compiled[idx];
                let outcome = match &compiled.expr {
                    Ok(expr) => match eval(expr, env) {
                        Ok(value) => {
                            env.bind(compiled.kpi.name.clone(), value.clone());
                            Outcome::Value(value)
                        }
                        Err(error) => {
                            let retry = error.class() == ErrorClass::Unresolved;
                            if retry {
                                deferred.push(idx);
                            }
                            Outcome::Failed { error, retry }
                        }
                    },
                    Err(error) => Outcome::Failed {
                        error: error.clone(),
                        retry: false,
                    },
                };
                outcomes[idx] = Some(outcome);
            }

            if deferred.is_empty() || deferred.len() == pending.len() {
                break;
            }
            pending = deferred;
        }

        let mut results = BTreeMap::new();
        for (idx, compiled) in self.compiled.iter().enumerate() {
            let outcome = outcomes[idx].take().unwrap_or(Outcome::Value(Value::Null));
            let cell = self.cell(idx, outcome, env, period_id);
            results.insert(compiled.kpi.name.clone(), cell);
        }
        results
    }

    fn cell(
        &self,
        idx: usize,
        outcome: Outcome,
        env: &Environment,
        period_id: PeriodId,
    ) -> ComputedKpiValue {
        let compiled = &self.compiled[idx];
        let kpi = compiled.kpi;
        let mut comment = format!("{} = {}", kpi.name, kpi.expression);

        let (val, val_r) = match outcome {
            Outcome::Value(value) => {
                let rendered = render(kpi, &value, self.locale);
                (value, rendered)
            }
            Outcome::Failed { error, retry } => {
                comment.push_str("\n\n");
                comment.push_str(&error.to_string());
                if retry && !compiled.cycle.is_empty() {
                    let members: Vec<&str> = compiled
                        .cycle
                        .iter()
                        .map(|m| self.compiled[*m].kpi.name.as_str())
                        .collect();
                    comment.push_str(&format!(
                        "\n\nunresolved dependency cycle among: {}",
                        members.join(", ")
                    ));
                }
                debug!("KPI {} could not be computed: {}", kpi.name, error);
                let rendered = if error == EvalError::ZeroDivision {
                    DIV_ZERO
                } else {
                    EVAL_ERROR
                };
                (Value::Null, rendered.to_string())
            }
        };

        ComputedKpiValue {
            drilldown: !val.is_null() && compiled.has_account_reference,
            val,
            val_r,
            val_c: comment,
            style: self.style(compiled, env),
            default_style: kpi.default_css_style.clone().filter(|s| !s.is_empty()),
            suffix: kpi.suffix.clone(),
            dp: kpi.dp,
            is_percentage: kpi.kpi_type == KpiType::Pct,
            period_id,
            expr: kpi.expression.clone(),
        }
    }

    fn style(&self, compiled: &CompiledKpi<'_>, env: &Environment) -> Option<String> {
        let source = compiled.kpi.css_style.as_deref()?;
        let result = match compiled.style.as_ref()? {
            Ok(expr) => eval(expr, env),
            Err(error) => Err(error.clone()),
        };
        match result {
            Ok(Value::Null) => None,
            Ok(value) => Some(value.to_string()),
            Err(error) => {
                warn!("error evaluating css style expression {}: {}", source, error);
                None
            }
        }
    }
}

/// Stable topological order of `deps`: among ready KPIs the first declared
/// goes first. KPIs that never become ready keep their declared order at the end.
fn dependency_order(deps: &[BTreeSet<usize>]) -> Vec<usize> {
    let mut placed = vec![false; deps.len()];
    let mut order = Vec::with_capacity(deps.len());

    while let Some(next) = (0..deps.len())
        .find(|&idx| !placed[idx] && deps[idx].iter().all(|d| *d != idx && placed[*d]))
    {
        placed[next] = true;
        order.push(next);
    }

    order.extend((0..deps.len()).filter(|idx| !placed[*idx]));
    order
}

/// For each KPI, the members of its dependency cycle in declared order, or
/// nothing when it is not part of one.
fn cycles(deps: &[BTreeSet<usize>]) -> Vec<Vec<usize>> {
    let reach: Vec<BTreeSet<usize>> = (0..deps.len()).map(|idx| reachable(deps, idx)).collect();
    (0..deps.len())
        .map(|idx| {
            if !reach[idx].contains(&idx) {
                return Vec::new();
            }
            (0..deps.len())
                .filter(|other| reach[idx].contains(other) && reach[*other].contains(&idx))
                .collect()
        })
        .collect()
}

/// KPIs reachable from `start` through at least one dependency edge.
fn reachable(deps: &[BTreeSet<usize>], start: usize) -> BTreeSet<usize> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<usize> = deps[start].iter().copied().collect();
    while let Some(idx) = stack.pop() {
        if seen.insert(idx) {
            stack.extend(deps[idx].iter().copied());
        }
    }
    seen
}
