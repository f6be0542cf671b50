//! Composable query options.
//!
//! Store list and resolve operations take a slice of [`QueryOption`]s. The
//! options are applied in a fixed phase order whatever order the caller
//! passes them in:
//!
//! 1. namespace scope
//! 2. entity pre-filters (device status)
//! 3. generic match (compiled filters)
//! 4. sort
//! 5. pagination
//! 6. enrichment
//!
//! Enrichments decorate the selected documents only; the total count is taken
//! over phases 1 to 3.

use serde_json::Value;

use super::compile::{compile_filters, compile_paginator, compile_sorter};
use super::filter::Filter;
use super::paginator::{Paginator, Sorter};
use super::stage::{Condition, Stage};
use crate::core::Collection;
use crate::error::QueryResult;
use crate::models::DeviceStatus;
use crate::tenant::{RequestContext, TenantId};

/// A post-selection decoration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Enrichment {
    /// Attach email and username to namespace members.
    MembersData,
    /// Recompute a namespace's accepted-device counter from its devices.
    AcceptedDeviceCount,
    /// Mark sessions that have a live active-session record.
    SessionActivity,
    /// Embed the session's device.
    SessionDevice,
}

impl Enrichment {
    /// The collection this enrichment decorates.
    pub fn collection(&self) -> Collection {
        match self {
            Enrichment::MembersData | Enrichment::AcceptedDeviceCount => Collection::Namespaces,
            Enrichment::SessionActivity | Enrichment::SessionDevice => Collection::Sessions,
        }
    }
}

/// One unit of query construction.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOption {
    /// Restrict to one namespace.
    InNamespace(TenantId),
    /// Restrict devices to one status.
    WithDeviceStatus(DeviceStatus),
    /// Apply a filter list.
    Match(Vec<Filter>),
    /// Order the results.
    Sort(Sorter),
    /// Select one page.
    Paginate(Paginator),
    /// Decorate the selected documents.
    Enrich(Enrichment),
}

impl QueryOption {
    fn phase(&self) -> u8 {
        match self {
            QueryOption::InNamespace(_) => 1,
            QueryOption::WithDeviceStatus(_) => 2,
            QueryOption::Match(_) => 3,
            QueryOption::Sort(_) => 4,
            QueryOption::Paginate(_) => 5,
            QueryOption::Enrich(_) => 6,
        }
    }

    fn applies_to(&self, collection: Collection) -> bool {
        match self {
            QueryOption::InNamespace(_) => {
                collection.tenant_field().is_some() || collection == Collection::Namespaces
            }
            QueryOption::WithDeviceStatus(_) => collection == Collection::Devices,
            QueryOption::Enrich(enrichment) => enrichment.collection() == collection,
            QueryOption::Match(_) | QueryOption::Sort(_) | QueryOption::Paginate(_) => true,
        }
    }
}

/// Query options compiled for one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    collection: Collection,
    conditions: Vec<Condition>,
    sort: Option<Stage>,
    pagination: Vec<Stage>,
    enrichments: Vec<Enrichment>,
}

impl QueryPlan {
    /// An unfiltered plan.
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            conditions: Vec::new(),
            sort: None,
            pagination: Vec::new(),
            enrichments: Vec::new(),
        }
    }

    /// Compiles options for a collection.
    ///
    /// A tenant-owned collection is always scoped to the context's tenant; an
    /// explicit [`QueryOption::InNamespace`] narrows on top of that scope and
    /// never widens it. Options that do not apply to the collection are
    /// ignored.
    pub fn build(
        ctx: &RequestContext,
        collection: Collection,
        options: &[QueryOption],
    ) -> QueryResult<Self> {
        let mut ordered: Vec<&QueryOption> = options.iter().collect();
        ordered.sort_by_key(|o| o.phase());

        let mut plan = Self::new(collection);
        plan.conditions.extend(scope_condition(ctx, collection));

        for option in ordered {
            if !option.applies_to(collection) {
                tracing::debug!(%collection, ?option, "Ignoring query option");
                continue;
            }
            match option {
                QueryOption::InNamespace(tenant) => {
                    let field = collection.tenant_field().unwrap_or("tenant_id");
                    plan.conditions
                        .push(Condition::eq(field, tenant.as_str()));
                }
                QueryOption::WithDeviceStatus(status) => {
                    plan.conditions.push(Condition::eq("status", status.as_str()));
                }
                QueryOption::Match(filters) => {
                    for stage in compile_filters(filters)? {
                        if let Stage::Match(condition) = stage {
                            plan.conditions.push(condition);
                        }
                    }
                }
                QueryOption::Sort(sorter) => plan.sort = Some(compile_sorter(sorter)),
                QueryOption::Paginate(paginator) => plan.pagination = compile_paginator(paginator),
                QueryOption::Enrich(enrichment) => {
                    if !plan.enrichments.contains(enrichment) {
                        plan.enrichments.push(*enrichment);
                    }
                }
            }
        }

        Ok(plan)
    }

    /// Adds an entity-specific condition.
    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Target collection.
    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// The combined match condition, used for counting.
    pub fn condition(&self) -> Condition {
        Condition::all(self.conditions.iter().cloned())
    }

    /// The full pipeline: match, sort, then pagination.
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = Vec::with_capacity(2 + self.pagination.len());
        if !self.conditions.is_empty() {
            stages.push(Stage::Match(self.condition()));
        }
        stages.extend(self.sort.clone());
        stages.extend(self.pagination.iter().cloned());
        stages
    }

    /// Requested enrichments, deduplicated.
    pub fn enrichments(&self) -> &[Enrichment] {
        &self.enrichments
    }

    /// Returns `true` if pagination stages were requested.
    pub fn is_paginated(&self) -> bool {
        !self.pagination.is_empty()
    }
}

/// Condition restricting a tenant-owned collection to the context's tenant.
pub fn scope_condition(ctx: &RequestContext, collection: Collection) -> Option<Condition> {
    let field = collection.tenant_field()?;
    let tenant = ctx.tenant()?;
    Some(Condition::eq(field, Value::String(tenant.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::stage::Order;

    #[test]
    fn test_phase_order_is_fixed() {
        let ctx = RequestContext::new();
        let plan = QueryPlan::build(
            &ctx,
            Collection::Devices,
            &[
                QueryOption::Paginate(Paginator::new(2, 5)),
                QueryOption::Sort(Sorter::new("name", Order::Asc)),
                QueryOption::Match(vec![Filter::property("name", "eq", "web")]),
                QueryOption::WithDeviceStatus(DeviceStatus::Accepted),
                QueryOption::InNamespace(TenantId::new("t1")),
            ],
        )
        .unwrap();

        assert_eq!(
            plan.stages(),
            vec![
                Stage::Match(Condition::And(vec![
                    Condition::eq("tenant_id", "t1"),
                    Condition::eq("status", "accepted"),
                    Condition::Or(vec![Condition::eq("name", "web")]),
                ])),
                Stage::Sort {
                    field: "name".into(),
                    order: Order::Asc
                },
                Stage::Skip(5),
                Stage::Limit(5),
            ]
        );
    }

    #[test]
    fn test_context_tenant_scope_is_never_widened() {
        let ctx = RequestContext::for_tenant("t9");
        let plan = QueryPlan::build(&ctx, Collection::Tags, &[]).unwrap();
        assert_eq!(plan.condition(), Condition::eq("tenant_id", "t9"));

        let plan = QueryPlan::build(
            &ctx,
            Collection::Tags,
            &[QueryOption::InNamespace(TenantId::new("other"))],
        )
        .unwrap();
        assert_eq!(
            plan.condition(),
            Condition::all([
                Condition::eq("tenant_id", "t9"),
                Condition::eq("tenant_id", "other"),
            ])
        );
    }

    #[test]
    fn test_explicit_namespace_without_context_tenant() {
        let ctx = RequestContext::new();
        let plan = QueryPlan::build(
            &ctx,
            Collection::Devices,
            &[QueryOption::InNamespace(TenantId::new("other"))],
        )
        .unwrap();
        assert_eq!(plan.condition(), Condition::eq("tenant_id", "other"));
    }

    #[test]
    fn test_users_are_never_scoped() {
        let ctx = RequestContext::for_tenant("t9");
        let plan = QueryPlan::build(
            &ctx,
            Collection::Users,
            &[
                QueryOption::InNamespace(TenantId::new("t9")),
                QueryOption::WithDeviceStatus(DeviceStatus::Pending),
                QueryOption::Enrich(Enrichment::SessionDevice),
            ],
        )
        .unwrap();
        assert_eq!(plan.condition(), Condition::always());
        assert!(plan.stages().is_empty());
        assert!(plan.enrichments().is_empty());
    }

    #[test]
    fn test_count_condition_ignores_pagination() {
        let ctx = RequestContext::new();
        let plan = QueryPlan::build(
            &ctx,
            Collection::Sessions,
            &[
                QueryOption::Paginate(Paginator::new(1, 1)),
                QueryOption::Enrich(Enrichment::SessionActivity),
                QueryOption::Enrich(Enrichment::SessionActivity),
            ],
        )
        .unwrap();
        assert_eq!(plan.condition(), Condition::always());
        assert!(plan.is_paginated());
        assert_eq!(plan.enrichments(), &[Enrichment::SessionActivity]);
    }

    #[test]
    fn test_invalid_filter_fails_build() {
        let ctx = RequestContext::new();
        let err = QueryPlan::build(
            &ctx,
            Collection::Devices,
            &[QueryOption::Match(vec![Filter::property("n", "gt", "x")])],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            crate::error::QueryError::FilterPropertyInvalid { .. }
        ));
    }
}
