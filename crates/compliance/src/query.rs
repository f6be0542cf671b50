//! Query option cases: pagination, filter lists and sorting.

use fleet_persistence::StorageError;
use fleet_persistence::core::{DeviceAcceptable, DeviceStore, NamespaceStore, SessionStore};
use fleet_persistence::error::QueryError;
use fleet_persistence::models::Device;
use fleet_persistence::query::{
    Filter, FilterList, FilterParams, FilterValue, OperatorParams, Order, Paginator, QueryOption,
    Sorter,
};
use fleet_persistence::tenant::{RequestContext, TenantId};

use crate::device::{DEVICE_1, DEVICE_2, DEVICE_3, DEVICE_4, DEVICE_STAGING};
use crate::fixtures::{DEVICES, NAMESPACES, SESSIONS};
use crate::session::SESSION_2;
use crate::{Provider, TENANT_DEV, TENANT_STAGING};

// 2023-01-02T12:00:00Z, the creation time of `device-2`.
const DAY_TWO_MILLIS: i64 = 1_672_660_800_000;

fn uids(devices: &[Device]) -> Vec<&str> {
    devices.iter().map(|d| d.uid.as_str()).collect()
}

async fn count_matching<P: Provider>(p: &P, filters: Vec<Filter>) -> u64 {
    let dev = RequestContext::for_tenant(TENANT_DEV);
    let (_, total) = p
        .store()
        .device_list(&dev, DeviceAcceptable::AsFalse, &[QueryOption::Match(filters)])
        .await
        .unwrap();
    total
}

async fn list_error<P: Provider>(p: &P, filters: Vec<Filter>) -> StorageError {
    let dev = RequestContext::for_tenant(TENANT_DEV);
    p.store()
        .device_list(&dev, DeviceAcceptable::AsFalse, &[QueryOption::Match(filters)])
        .await
        .unwrap_err()
}

/// Totals count every match regardless of the page.
pub async fn pagination_counts_every_match<P: Provider>(p: &P) {
    p.load_fixtures(&[DEVICES]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);
    let by_creation = QueryOption::Sort(Sorter::new("created_at", Order::Asc));

    for (page, per_page, expected) in [
        (1, 2, vec![DEVICE_1, DEVICE_2]),
        (2, 2, vec![DEVICE_3, DEVICE_4]),
        (3, 2, vec![]),
        (0, 3, vec![DEVICE_1, DEVICE_2, DEVICE_3]),
        (1, -1, vec![DEVICE_1, DEVICE_2, DEVICE_3, DEVICE_4]),
    ] {
        let (devices, total) = store
            .device_list(
                &dev,
                DeviceAcceptable::AsFalse,
                &[
                    by_creation.clone(),
                    QueryOption::Paginate(Paginator::new(page, per_page)),
                ],
            )
            .await
            .unwrap();
        assert_eq!(total, 4, "page {page} of {per_page}");
        assert_eq!(uids(&devices), expected, "page {page} of {per_page}");
    }

    let (devices, total) = store
        .device_list(
            &dev,
            DeviceAcceptable::AsFalse,
            &[
                QueryOption::Paginate(Paginator::new(1, 1)),
                QueryOption::Match(vec![Filter::property("status", "eq", "accepted")]),
                QueryOption::Sort(Sorter::new("created_at", Order::Desc)),
            ],
        )
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert_eq!(uids(&devices), vec![DEVICE_2]);

    let admin = RequestContext::new();
    let (devices, total) = store
        .device_list(
            &admin,
            DeviceAcceptable::AsFalse,
            &[QueryOption::InNamespace(TenantId::new(TENANT_STAGING))],
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(uids(&devices), vec![DEVICE_STAGING]);
    let (_, total) = store
        .device_list(&admin, DeviceAcceptable::AsFalse, &[])
        .await
        .unwrap();
    assert_eq!(total, 5);
}

/// Groups close on operator nodes; leftovers combine with `or`.
pub async fn filters_combine_with_operators<P: Provider>(p: &P) {
    p.load_fixtures(&[DEVICES, SESSIONS]).await.unwrap();

    let either_status = vec![
        Filter::property("status", "eq", "accepted"),
        Filter::property("status", "eq", "pending"),
        Filter::operator("or"),
    ];
    assert_eq!(count_matching(p, either_status).await, 3);

    let trailing = vec![
        Filter::property("status", "eq", "accepted"),
        Filter::property("status", "eq", "removed"),
    ];
    assert_eq!(count_matching(p, trailing).await, 3);

    let named_and_accepted = vec![
        Filter::property("name", "contains", "DEVICE"),
        Filter::property("status", "eq", "accepted"),
        Filter::operator("and"),
    ];
    assert_eq!(count_matching(p, named_and_accepted).await, 2);

    let two_groups = vec![
        Filter::property("status", "eq", "accepted"),
        Filter::property("status", "eq", "removed"),
        Filter::operator("or"),
        Filter::property(
            "tags",
            "contains",
            FilterValue::List(vec!["development".into()]),
        ),
        Filter::operator("and"),
    ];
    assert_eq!(count_matching(p, two_groups).await, 2);

    let every_tag = vec![Filter::property(
        "tags",
        "contains",
        FilterValue::List(vec!["production".into(), "development".into()]),
    )];
    assert_eq!(count_matching(p, every_tag).await, 1);

    let newer = vec![Filter::property("created_at", "gt", DAY_TWO_MILLIS)];
    assert_eq!(count_matching(p, newer).await, 2);
    let newer_as_text = vec![Filter::property(
        "created_at",
        "gt",
        DAY_TWO_MILLIS.to_string(),
    )];
    assert_eq!(count_matching(p, newer_as_text).await, 2);

    let nested = vec![Filter::property("identity.mac", "eq", "mac-2")];
    assert_eq!(count_matching(p, nested).await, 1);
    let nested_text = vec![Filter::property("info.pretty_name", "contains", "ubuntu")];
    assert_eq!(count_matching(p, nested_text).await, 1);

    // Skipped nodes leave the list unfiltered.
    let unknown_operator = vec![Filter::property("name", "like", "device-1")];
    assert_eq!(count_matching(p, unknown_operator).await, 4);
    let scalar_contains = vec![Filter::property("tags", "contains", 1_i64)];
    assert_eq!(count_matching(p, scalar_contains).await, 4);
    let unknown_combinator = vec![
        Filter::property("status", "eq", "pending"),
        Filter::operator("xor"),
    ];
    assert_eq!(count_matching(p, unknown_combinator).await, 4);

    let dev = RequestContext::for_tenant(TENANT_DEV);
    let (sessions, total) = p
        .store()
        .session_list(
            &dev,
            &[QueryOption::Match(vec![Filter::property("closed", "bool", "true")])],
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(sessions[0].uid, SESSION_2);

    let encoded = FilterList(vec![
        Filter::property("status", "eq", "pending"),
        Filter::operator("and"),
    ])
    .encode();
    let decoded = FilterList::decode(&encoded).unwrap().into_inner();
    assert_eq!(count_matching(p, decoded).await, 1);
}

/// Malformed nodes and uncoercible operands fail the whole query.
pub async fn invalid_filters_are_rejected<P: Provider>(p: &P) {
    p.load_fixtures(&[DEVICES]).await.unwrap();

    let unknown_kind = Filter {
        kind: "bogus".to_string(),
        params: FilterParams::Operator(OperatorParams {
            name: "and".to_string(),
        }),
    };
    let err = list_error(p, vec![unknown_kind]).await;
    assert!(matches!(err, StorageError::Query(QueryError::FilterInvalid { .. })));

    let mismatched = Filter {
        kind: "property".to_string(),
        params: FilterParams::Operator(OperatorParams {
            name: "and".to_string(),
        }),
    };
    let err = list_error(p, vec![mismatched]).await;
    assert!(matches!(err, StorageError::Query(QueryError::FilterInvalid { .. })));

    for filter in [
        Filter::property("online", "bool", "maybe"),
        Filter::property("created_at", "gt", "yesterday"),
        Filter::property("created_at", "gt", FilterValue::Float(1.5)),
    ] {
        let err = list_error(p, vec![filter]).await;
        assert!(
            matches!(
                err,
                StorageError::Query(QueryError::FilterPropertyInvalid { .. })
            ),
            "{err}"
        );
    }

    let err = FilterList::decode("not base64 at all!").unwrap_err();
    assert!(matches!(err, QueryError::FilterDecode { .. }));
}

/// Ascending and descending orders, alone and under filters.
pub async fn sort_orders<P: Provider>(p: &P) {
    p.load_fixtures(&[DEVICES, NAMESPACES]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);

    let (devices, _) = store
        .device_list(
            &dev,
            DeviceAcceptable::AsFalse,
            &[QueryOption::Sort(Sorter::new("name", Order::Desc))],
        )
        .await
        .unwrap();
    assert_eq!(uids(&devices), vec![DEVICE_4, DEVICE_3, DEVICE_2, DEVICE_1]);

    let (devices, _) = store
        .device_list(
            &dev,
            DeviceAcceptable::AsFalse,
            &[QueryOption::Sort(Sorter::new("last_seen", Order::Asc))],
        )
        .await
        .unwrap();
    assert_eq!(uids(&devices), vec![DEVICE_1, DEVICE_2, DEVICE_3, DEVICE_4]);

    let admin = RequestContext::new();
    let (namespaces, total) = store
        .namespace_list(&admin, &[QueryOption::Sort(Sorter::new("name", Order::Desc))])
        .await
        .unwrap();
    assert_eq!(total, 2);
    let names: Vec<&str> = namespaces.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["staging", "dev"]);
}
