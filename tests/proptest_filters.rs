//! Property-based tests using proptest
//!
//! These tests verify the resource type filter, flat attribute decoding,
//! self link handling and the scan cache using randomized inputs.

use proptest::prelude::*;
use remotescan::remote::google::enumerators::id_from_self_link;
use remotescan::remote::Cache;
use remotescan::resource::extract_short_name;
use remotescan::terraform::{AttrType, TypedValue};
use remotescan::{Filter, ResourceType, TypeFilter};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Terraform-like resource type names (`google_compute_instance`)
fn arb_resource_type() -> impl Strategy<Value = String> {
    "[a-z]{2,8}(_[a-z]{2,10}){1,3}"
}

/// Flat attribute map for `{name, tags: list(string), labels: map(string)}`
fn arb_flat_attributes() -> impl Strategy<Value = (String, Vec<String>, BTreeMap<String, String>)>
{
    (
        "[a-z][a-z0-9-]{0,20}",
        prop::collection::vec("[a-zA-Z0-9 ._-]{0,12}", 0..6),
        prop::collection::btree_map("[a-z][a-z0-9_]{0,10}", "[a-z0-9-]{0,12}", 0..5),
    )
}

mod filter_tests {
    use super::*;

    proptest! {
        #[test]
        fn empty_filter_ignores_nothing(ty in arb_resource_type()) {
            let filter = TypeFilter::new(Vec::<String>::new()).unwrap();
            prop_assert!(filter.is_empty());
            prop_assert!(!filter.is_type_ignored(&ResourceType::new(ty)));
        }

        #[test]
        fn wildcard_ignores_everything(ty in arb_resource_type()) {
            let filter = TypeFilter::new(["*"]).unwrap();
            prop_assert!(filter.is_type_ignored(&ResourceType::new(ty)));
        }

        /// `*` then `!kept` scans only `kept`
        #[test]
        fn negation_keeps_single_type(
            kept in arb_resource_type(),
            other in arb_resource_type(),
        ) {
            let filter = TypeFilter::new(["*".to_string(), format!("!{kept}")]).unwrap();

            prop_assert!(!filter.is_type_ignored(&ResourceType::new(kept.clone())));
            prop_assert_eq!(
                filter.is_type_ignored(&ResourceType::new(other.clone())),
                other != kept
            );
        }

        #[test]
        fn last_matching_rule_wins(ty in arb_resource_type()) {
            let ignore_then_keep = TypeFilter::new([ty.clone(), format!("!{ty}")]).unwrap();
            let keep_then_ignore = TypeFilter::new([format!("!{ty}"), ty.clone()]).unwrap();

            prop_assert!(!ignore_then_keep.is_type_ignored(&ResourceType::new(ty.clone())));
            prop_assert!(keep_then_ignore.is_type_ignored(&ResourceType::new(ty)));
        }

        #[test]
        fn comments_and_blank_lines_are_skipped(ty in arb_resource_type()) {
            let filter =
                TypeFilter::new([format!("# {ty}"), "   ".to_string(), format!("#{ty}")]).unwrap();
            prop_assert!(filter.is_empty());
            prop_assert!(!filter.is_type_ignored(&ResourceType::new(ty)));
        }

        /// A prefix glob matches exactly the types sharing the prefix
        #[test]
        fn prefix_glob_matches_prefix(prefix in "[a-z]{2,8}_", ty in arb_resource_type()) {
            let filter = TypeFilter::new([format!("{prefix}*")]).unwrap();
            prop_assert_eq!(
                filter.is_type_ignored(&ResourceType::new(ty.clone())),
                ty.starts_with(&prefix)
            );
        }
    }
}

mod flatmap_tests {
    use super::*;

    fn schema() -> AttrType {
        AttrType::object([
            ("name", AttrType::String),
            ("tags", AttrType::list(AttrType::String)),
            ("labels", AttrType::map(AttrType::String)),
        ])
    }

    proptest! {
        #[test]
        fn flat_attributes_decode_to_object((name, tags, labels) in arb_flat_attributes()) {
            let mut flat = HashMap::new();
            flat.insert("name".to_string(), name.clone());
            flat.insert("tags.#".to_string(), tags.len().to_string());
            for (i, tag) in tags.iter().enumerate() {
                flat.insert(format!("tags.{i}"), tag.clone());
            }
            flat.insert("labels.%".to_string(), labels.len().to_string());
            for (k, v) in &labels {
                flat.insert(format!("labels.{k}"), v.clone());
            }

            let value = TypedValue::from_flatmap(&flat, &schema()).unwrap();

            prop_assert_eq!(
                value.to_json(),
                json!({
                    "labels": labels,
                    "name": name,
                    "tags": tags,
                })
            );
        }

        /// Missing counts leave collections null rather than empty
        #[test]
        fn missing_counts_decode_to_null(name in "[a-z][a-z0-9-]{0,20}") {
            let flat = HashMap::from([("name".to_string(), name)]);
            let value = TypedValue::from_flatmap(&flat, &schema()).unwrap();

            prop_assert_eq!(value.get_attr("tags"), Some(&TypedValue::Null));
            prop_assert_eq!(value.get_attr("labels"), Some(&TypedValue::Null));
        }

        #[test]
        fn non_numeric_list_count_is_rejected(count in "[a-z]{1,5}") {
            let flat = HashMap::from([("tags.#".to_string(), count)]);
            let err = TypedValue::from_flatmap(&flat, &schema()).unwrap_err();
            prop_assert_eq!(err.path, "tags.#");
        }
    }
}

mod self_link_tests {
    use super::*;

    proptest! {
        #[test]
        fn id_starts_at_projects(
            project in "[a-z][a-z0-9-]{4,28}[a-z0-9]",
            zone in "[a-z]+-[a-z]+[0-9]-[a-z]",
            name in "[a-z][a-z0-9-]{0,30}",
        ) {
            let rest = format!("projects/{project}/zones/{zone}/instances/{name}");
            let item = json!({"selfLink": format!("https://www.googleapis.com/compute/v1/{rest}")});

            prop_assert_eq!(id_from_self_link(&item), Some(rest));
            prop_assert_eq!(extract_short_name(&format!("https://x/zones/{zone}")), zone);
        }

        #[test]
        fn id_requires_projects_segment(link in "[a-z:/.]{0,40}") {
            prop_assume!(!link.contains("projects/"));
            prop_assert_eq!(id_from_self_link(&json!({"selfLink": link})), None);
        }
    }
}

mod cache_tests {
    use super::*;

    proptest! {
        #[test]
        fn put_then_get_returns_value(
            entries in prop::collection::hash_map("[a-zA-Z_]{1,20}", any::<u64>(), 0..20)
        ) {
            let cache = Cache::new();
            for (key, value) in &entries {
                cache.put(key, *value);
            }

            prop_assert_eq!(cache.len(), entries.len());
            for (key, value) in &entries {
                let got = cache.get::<u64>(key);
                prop_assert_eq!(got.as_deref(), Some(value));
                prop_assert!(cache.get::<String>(key).is_none());
            }
        }

        #[test]
        fn fetch_runs_once_per_key(keys in prop::collection::vec("[a-c]", 1..20)) {
            let cache = Cache::new();
            let fetches: Mutex<HashMap<String, usize>> = Mutex::new(HashMap::new());

            tokio_test::block_on(async {
                for key in &keys {
                    let fetches = &fetches;
                    let value = cache
                        .get_or_fetch(key, move || async move {
                            *fetches.lock().unwrap().entry(key.clone()).or_default() += 1;
                            Ok::<_, std::convert::Infallible>(key.to_uppercase())
                        })
                        .await
                        .unwrap();
                    assert_eq!(*value, key.to_uppercase());
                }
            });

            prop_assert!(fetches.into_inner().unwrap().values().all(|&count| count == 1));
        }
    }
}
