//! Query construction.
//!
//! - [`Filter`] / [`FilterList`] - the declarative filter AST
//! - [`compile_filters`], [`compile_paginator`], [`compile_sorter`] - pure compilers to [`Stage`]s
//! - [`QueryOption`] / [`QueryPlan`] - phase-ordered option composition
//! - [`Resolver`] keys - unique lookup fields per entity
//! - [`ConflictProbe`] / [`detect_conflicts`] - sparse uniqueness checks

mod compile;
mod conflict;
mod filter;
mod options;
mod paginator;
mod resolver;
mod stage;

pub use compile::{compile_filters, compile_paginator, compile_sorter};
pub use conflict::{
    ApiKeyConflicts, ConflictProbe, Conflicts, DeviceConflicts, NamespaceConflicts, TagConflicts,
    UserConflicts, detect_conflicts,
};
pub use filter::{
    FILTER_TYPE_OPERATOR, FILTER_TYPE_PROPERTY, Filter, FilterList, FilterParams, FilterValue,
    OperatorParams, PropertyParams,
};
pub use options::{Enrichment, QueryOption, QueryPlan, scope_condition};
pub use paginator::{DEFAULT_PER_PAGE, MAX_PER_PAGE, Paginator, Sorter};
pub use resolver::{
    ApiKeyResolver, DeviceResolver, NamespaceResolver, PublicKeyResolver, Resolver,
    SessionResolver, TagResolver, UserResolver,
};
pub use stage::{Condition, Order, Predicate, Stage, path_segments};
