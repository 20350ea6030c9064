use strata::model::Filter;
use strata::optimizer::{normalize, DEFAULT_DEPTH_LIMIT};

fn sel(dimension: &str, value: &str) -> Filter {
    Filter::selector(dimension, value)
}

fn n(filter: &Filter) -> Filter {
    normalize(filter, DEFAULT_DEPTH_LIMIT)
}

fn samples() -> Vec<Filter> {
    vec![
        sel("country", "NZ"),
        !sel("country", "AU"),
        Filter::in_values("platform", ["ios", "android"]),
        Filter::regex("page", "^/checkout"),
        sel("a", "1") & sel("b", "2"),
        sel("a", "1") | sel("b", "2"),
        Filter::Empty,
    ]
}

#[test]
fn test_empty_is_identity() {
    for f in samples() {
        assert_eq!(Filter::Empty & f.clone(), f);
        assert_eq!(Filter::Empty | f.clone(), f);
        assert_eq!(f.clone() & Filter::Empty, f.clone() | Filter::Empty);
    }
}

#[test]
fn test_duplicate_selectors_collapse() {
    let f = Filter::And {
        fields: vec![sel("x", "v"), sel("x", "v")],
    };
    assert_eq!(n(&f), sel("x", "v"));
}

#[test]
fn test_nots_merge_into_opposite_combination() {
    let a = sel("a", "1");
    let b = sel("b", "2");
    let f = Filter::Or {
        fields: vec![!a.clone(), !b.clone()],
    };
    assert_eq!(
        n(&f),
        !Filter::And {
            fields: vec![a, b]
        }
    );
}

#[test]
fn test_deeply_nested_same_kind_flattened() {
    let f = Filter::Or {
        fields: vec![
            sel("a", "1"),
            Filter::Or {
                fields: vec![
                    sel("b", "2"),
                    Filter::Or {
                        fields: vec![sel("c", "3"), sel("a", "1")],
                    },
                ],
            },
        ],
    };
    assert_eq!(
        n(&f),
        Filter::Or {
            fields: vec![sel("a", "1"), sel("b", "2"), sel("c", "3")]
        }
    );
}

#[test]
fn test_normalizing_twice_is_stable() {
    let f = Filter::And {
        fields: vec![
            !sel("a", "1"),
            Filter::And {
                fields: vec![!sel("b", "2"), sel("c", "3")],
            },
            sel("c", "3"),
        ],
    };
    let once = n(&f);
    assert_eq!(n(&once), once);
}

#[test]
fn test_non_selector_family_kept() {
    let f = Filter::And {
        fields: vec![
            Filter::regex("page", "^/a"),
            Filter::regex("page", "^/a"),
            sel("x", "1"),
        ],
    };
    assert_eq!(n(&f), f);
}

#[test]
fn test_leaf_returned_unchanged() {
    let f = Filter::time_intervals(vec!["2024-01-01/2024-02-01".to_string()]);
    assert_eq!(n(&f), f);
}

#[test]
fn test_negated_empty_never_reaches_wire() {
    let f = Filter::And {
        fields: vec![
            sel("country", "NZ"),
            Filter::Not {
                field: Box::new(Filter::Empty),
            },
        ],
    };
    assert_eq!(n(&f), sel("country", "NZ"));

    let bare = Filter::Not {
        field: Box::new(Filter::And { fields: vec![] }),
    };
    assert!(n(&bare).is_empty());
}
