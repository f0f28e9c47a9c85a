//! Integration tests for the query engine.

use std::collections::HashSet;
use std::sync::Arc;

use kinddb_core::query::resort;
use kinddb_core::{
    EngineConfig, Error, FetchResult, FieldHandler, FilterHook, FilterRequest, HookOutcome,
    LimitFn, MemoryDatastore, MergeFn, ModelSchema, OrderHook, PropertyField, Query, RawFilters,
    SearchAdapter, Session,
};
use kinddb_proto::{Entity, Key, SortOrder, Value};

struct TestContext {
    store: Arc<MemoryDatastore>,
    session: Session,
}

impl TestContext {
    fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    fn with_config(config: EngineConfig) -> Self {
        init_tracing();
        let store = Arc::new(MemoryDatastore::new());
        let session = Session::new(store.clone(), config);
        Self { store, session }
    }

    fn put(&self, kind: &str, fields: &[(&str, Value)]) -> Key {
        let mut entity = Entity::new(Key::partial(kind));
        for (name, value) in fields {
            entity.set(*name, value.clone());
        }
        self.session.put(entity).unwrap()
    }

    fn person(&self, name: &str, age: i64) -> Key {
        self.put("Person", &[("name", name.into()), ("age", age.into())])
    }

    fn query(&self, kind: &str) -> Query {
        Query::new(kind, &self.session)
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn ages(entities: &[Entity]) -> Vec<i64> {
    entities
        .iter()
        .filter_map(|e| e.get("age").and_then(Value::as_int))
        .collect()
}

fn city_ages(entities: &[Entity]) -> Vec<(String, i64)> {
    entities
        .iter()
        .map(|e| {
            (
                e.get("city").and_then(Value::as_str).unwrap().to_string(),
                e.get("age").and_then(Value::as_int).unwrap(),
            )
        })
        .collect()
}

fn keys(entities: &[Entity]) -> HashSet<Key> {
    entities.iter().map(|e| e.key().clone()).collect()
}

fn person_model() -> ModelSchema {
    ModelSchema::new("Person")
        .field("name", PropertyField::string())
        .field("age", PropertyField::int())
}

// ============================================================================
// Filters and sort orders
// ============================================================================

#[test]
fn test_inequality_prepends_sort() {
    let ctx = TestContext::new();
    ctx.person("Kid", 17);
    ctx.person("Ada", 30);
    ctx.person("Bob", 18);

    let mut query = ctx.query("Person");
    query.filter("age >=", 18).unwrap();

    assert_eq!(
        query.queries().unwrap()[0].orders,
        vec![("age".to_string(), SortOrder::Ascending)]
    );
    let results = query.run(None).unwrap().unwrap();
    assert_eq!(ages(&results), vec![18, 30]);
}

#[test]
fn test_distinct_on_with_postponed_order() {
    let ctx = TestContext::new();
    ctx.put("Person", &[("city", "A".into()), ("age", 10.into())]);
    ctx.put("Person", &[("city", "A".into()), ("age", 40.into())]);
    ctx.put("Person", &[("city", "B".into()), ("age", 5.into())]);

    let mut query = ctx.query("Person");
    query.distinct_on(["city"]);
    query.order([("age", SortOrder::Descending)]).unwrap();

    let definition = &query.queries().unwrap()[0];
    assert_eq!(
        kinddb_core::query::physical_orders(definition),
        vec![
            ("city".to_string(), SortOrder::Ascending),
            ("age".to_string(), SortOrder::Descending),
        ]
    );

    let results = query.run(None).unwrap().unwrap();
    assert_eq!(
        city_ages(&results),
        vec![("A".to_string(), 40), ("B".to_string(), 5)]
    );
}

#[test]
fn test_distinct_on_keeps_city_grouping() {
    let ctx = TestContext::new();
    ctx.put("Person", &[("city", "A".into()), ("age", 10.into())]);
    ctx.put("Person", &[("city", "A".into()), ("age", 40.into())]);
    ctx.put("Person", &[("city", "B".into()), ("age", 50.into())]);

    let mut query = ctx.query("Person");
    query.distinct_on(["city"]);
    query.order([("age", SortOrder::Descending)]).unwrap();

    // Cities ascending even though B holds the highest age overall.
    let results = query.run(None).unwrap().unwrap();
    assert_eq!(
        city_ages(&results),
        vec![("A".to_string(), 40), ("B".to_string(), 50)]
    );
}

#[test]
fn test_in_with_limit() {
    let ctx = TestContext::new();
    for _ in 0..3 {
        ctx.put("Task", &[("status", 1.into())]);
    }
    for _ in 0..10 {
        ctx.put("Task", &[("status", 2.into())]);
    }

    let mut query = ctx.query("Task");
    query.filter("status IN", vec![1, 2]).unwrap();
    query.limit(5);
    assert_eq!(query.queries().unwrap().len(), 2);

    let results = query.run(None).unwrap().unwrap();
    assert_eq!(results.len(), 5);
    assert_eq!(keys(&results).len(), 5);
    assert!(results.iter().all(|e| matches!(
        e.get("status").and_then(Value::as_int),
        Some(1) | Some(2)
    )));
}

#[test]
fn test_in_equals_union_of_equalities() {
    let ctx = TestContext::new();
    for status in [1, 2, 3, 4, 1, 3] {
        ctx.put("Task", &[("status", status.into())]);
    }

    let mut fanned = ctx.query("Task");
    fanned.filter("status IN", vec![1, 3]).unwrap();
    let fanned = fanned.run(None).unwrap().unwrap();

    let mut union = HashSet::new();
    for status in [1, 3] {
        let mut query = ctx.query("Task");
        query.filter("status", status).unwrap();
        union.extend(keys(&query.run(None).unwrap().unwrap()));
    }

    assert_eq!(fanned.len(), 4);
    assert_eq!(keys(&fanned), union);
}

#[test]
fn test_not_equal_equals_union_of_ranges() {
    let ctx = TestContext::new();
    for status in [1, 2, 3, 4, 2] {
        ctx.put("Task", &[("status", status.into())]);
    }
    ctx.put("Task", &[("title", "no status".into())]);

    let mut fanned = ctx.query("Task");
    fanned.filter("status !=", 2).unwrap();
    let fanned = fanned.run(None).unwrap().unwrap();

    let mut union = HashSet::new();
    for op in ["<", ">"] {
        let mut query = ctx.query("Task");
        query.filter(&format!("status {}", op), 2).unwrap();
        union.extend(keys(&query.run(None).unwrap().unwrap()));
    }

    assert_eq!(fanned.len(), 3);
    assert_eq!(keys(&fanned), union);
}

#[test]
fn test_fan_out_results_resorted() {
    let ctx = TestContext::new();
    for age in [50, 10, 30, 20, 40] {
        ctx.person("p", age);
    }

    let mut query = ctx.query("Person");
    query.filter("age !=", 30).unwrap();
    query.order([("age", SortOrder::Descending)]).unwrap();

    let results = query.run(None).unwrap().unwrap();
    assert_eq!(ages(&results), vec![50, 40, 20, 10]);
}

#[test]
fn test_second_fan_out_rejected() {
    let ctx = TestContext::new();
    let mut query = ctx.query("Task");
    query.filter("status IN", vec![1, 2]).unwrap();

    assert!(matches!(
        query.filter("owner !=", "bob"),
        Err(Error::MultipleFanOut)
    ));
}

#[test]
fn test_empty_in_is_unsatisfiable() {
    let ctx = TestContext::new();
    ctx.put("Task", &[("status", 1.into())]);

    let mut query = ctx.query("Task");
    query.filter("status IN", Vec::<i64>::new()).unwrap();
    assert!(query.is_unsatisfiable());

    // Later builder calls are no-ops.
    query.filter("status", 1).unwrap();
    assert!(query.run(None).unwrap().is_none());
}

#[test]
fn test_resort_is_idempotent() {
    let mut entities: Vec<Entity> = [
        Value::Int(3),
        Value::from("x"),
        Value::Float(2.5),
        Value::Null,
        Value::from(vec![9, 1]),
        Value::Int(3),
    ]
    .into_iter()
    .enumerate()
    .map(|(i, v)| Entity::new(Key::from_id("Row", i as i64 + 1)).with("v", v))
    .collect();
    let orders = vec![("v".to_string(), SortOrder::Descending)];

    resort(&mut entities, &orders);
    let once = entities.clone();
    resort(&mut entities, &orders);
    assert_eq!(entities, once);
}

#[test]
fn test_clone_isolation() {
    let ctx = TestContext::new();
    let mut query = ctx.query("Person");
    query.filter("age >=", 18).unwrap();

    let mut copy = query.clone();
    copy.filter("name", "Ada").unwrap();
    copy.limit(3);
    copy.custom_info_mut().insert("tag".to_string(), Value::Bool(true));

    let original = &query.queries().unwrap()[0];
    assert_eq!(original.filters.len(), 1);
    assert_eq!(original.limit, 30);
    assert!(query.custom_info().is_empty());
    assert_eq!(copy.queries().unwrap()[0].filters.len(), 2);
}

// ============================================================================
// Hooks and callbacks
// ============================================================================

#[test]
fn test_filter_hook_rewrites_field() {
    let ctx = TestContext::new();
    ctx.person("Ada", 30);
    ctx.person("Kid", 12);

    let hook: Arc<dyn FilterHook> = Arc::new(
        |_: &Query, mut request: FilterRequest| -> Result<HookOutcome<FilterRequest>, Error> {
            if request.field == "years" {
                request.field = "age".to_string();
            }
            Ok(HookOutcome::Applied(request))
        },
    );

    let mut query = ctx.query("Person");
    query.set_filter_hook(Some(hook));
    query.filter("years >", 18).unwrap();

    let results = query.run(None).unwrap().unwrap();
    assert_eq!(ages(&results), vec![30]);
}

#[test]
fn test_order_hook_rejects() {
    let ctx = TestContext::new();
    let hook: Arc<dyn OrderHook> = Arc::new(
        |_: &Query,
         _: Vec<(String, SortOrder)>|
         -> Result<HookOutcome<Vec<(String, SortOrder)>>, Error> {
            Ok(HookOutcome::Rejected)
        },
    );

    let mut query = ctx.query("Person");
    query.set_order_hook(Some(hook));
    query.order([("secret", SortOrder::Ascending)]).unwrap();

    assert!(query.is_unsatisfiable());
    assert!(query.run(None).unwrap().is_none());
}

#[test]
fn test_custom_merge_and_limit() {
    let ctx = TestContext::new();
    for status in [1, 1, 2, 2, 2] {
        ctx.put("Task", &[("status", status.into())]);
    }

    let merge: MergeFn = Arc::new(|_: &Query, branches: Vec<Vec<Entity>>, _limit: usize| {
        branches.into_iter().rev().flatten().collect()
    });
    let branch_limit: LimitFn = Arc::new(|_: &Query, limit: usize| limit + 1);

    let mut query = ctx.query("Task");
    query.filter("status IN", vec![1, 2]).unwrap();
    query.set_merge_fn(Some(merge)).set_limit_fn(Some(branch_limit));

    let results = query.run(Some(1)).unwrap().unwrap();
    let statuses: Vec<i64> = results
        .iter()
        .filter_map(|e| e.get("status").and_then(Value::as_int))
        .collect();
    assert_eq!(statuses, vec![2, 2, 1, 1]);
}

// ============================================================================
// Cursors and iteration
// ============================================================================

#[test]
fn test_cursor_resumes_query() {
    let ctx = TestContext::new();
    for age in 1..=5 {
        ctx.person("p", age);
    }

    let mut query = ctx.query("Person");
    query.filter("age >", 0).unwrap();
    let first = query.run(Some(2)).unwrap().unwrap();
    assert_eq!(ages(&first), vec![1, 2]);

    let cursor = query.cursor().unwrap();
    let mut next = ctx.query("Person");
    next.filter("age >", 0).unwrap();
    next.set_cursor(Some(&cursor), None).unwrap();
    let second = next.run(Some(2)).unwrap().unwrap();
    assert_eq!(ages(&second), vec![3, 4]);
}

#[test]
fn test_tampered_cursor_rejected() {
    let ctx = TestContext::new();
    for age in 1..=3 {
        ctx.person("p", age);
    }

    let mut query = ctx.query("Person");
    query.run(Some(1)).unwrap();
    let mut cursor = query.cursor().unwrap();
    let last = cursor.pop().unwrap();
    cursor.push(if last == '0' { '1' } else { '0' });

    let mut resumed = ctx.query("Person");
    resumed.set_cursor(Some(&cursor), None).unwrap();
    assert!(matches!(resumed.run(None), Err(Error::InvalidCursor)));
}

#[test]
fn test_foreign_cursor_rejected() {
    let ctx = TestContext::new();
    ctx.person("p", 1);
    ctx.person("q", 2);

    let mut query = ctx.query("Person");
    query.run(Some(1)).unwrap();
    let cursor = query.cursor().unwrap();

    let other = Session::new(
        Arc::new(MemoryDatastore::with_cursor_secret("another secret")),
        EngineConfig::default(),
    );
    let mut resumed = Query::new("Person", &other);
    resumed.set_cursor(Some(&cursor), None).unwrap();
    assert!(matches!(resumed.run(None), Err(Error::InvalidCursor)));
}

#[test]
fn test_cursor_on_fan_out_rejected() {
    let ctx = TestContext::new();
    let mut query = ctx.query("Task");
    query.filter("status IN", vec![1, 2]).unwrap();

    assert!(matches!(
        query.set_cursor(Some("abc"), None),
        Err(Error::CursorMisuse(_))
    ));
    assert!(matches!(query.iter(), Err(Error::CursorMisuse(_))));
}

#[test]
fn test_iter_crosses_batches() {
    let ctx = TestContext::with_config(EngineConfig::new().iter_batch_size(3));
    for age in 0..10 {
        ctx.person("p", age);
    }

    let mut query = ctx.query("Person");
    query.filter("age >=", 0).unwrap();
    query.limit(2);

    let all: Vec<Entity> = query.iter().unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(ages(&all), (0..10).collect::<Vec<_>>());
}

#[test]
fn test_iter_unsatisfiable_is_empty() {
    let ctx = TestContext::new();
    ctx.person("p", 1);

    let mut query = ctx.query("Person");
    query.make_unsatisfiable();
    assert_eq!(query.iter().unwrap().count(), 0);
}

#[test]
fn test_traced_run() {
    let ctx = TestContext::with_config(EngineConfig::new().trace_queries(true));
    ctx.person("Ada", 30);

    let mut query = ctx.query("Person");
    query.filter("age IN", vec![30, 31]).unwrap();
    assert_eq!(query.run(None).unwrap().unwrap().len(), 1);
}

#[test]
fn test_get_entry() {
    let ctx = TestContext::new();
    ctx.person("Old", 80);
    ctx.person("Young", 20);

    let mut query = ctx.query("Person");
    query.order([("age", SortOrder::Ascending)]).unwrap();
    let first = query.get_entry().unwrap().unwrap();
    assert_eq!(first.get("name"), Some(&Value::from("Young")));
    assert_eq!(query.last_entry(), Some(&first));

    let mut none = ctx.query("Person");
    none.filter("age >", 100).unwrap();
    assert!(none.get_entry().unwrap().is_none());
}

// ============================================================================
// Kind fix-up
// ============================================================================

#[test]
fn test_child_results_mapped_to_parents() {
    let ctx = TestContext::new();
    let ada = ctx.person("Ada", 30);
    let bob = ctx.person("Bob", 40);
    for (parent, city) in [(&ada, "Berlin"), (&ada, "Paris"), (&bob, "Rome")] {
        let address = Entity::new(Key::partial("Address").with_parent(parent.clone()))
            .with("city", city);
        ctx.session.put(address).unwrap();
    }
    ctx.put("Address", &[("city", "Nowhere".into())]);

    let mut query = ctx.query("Person");
    query.set_kind("Address");
    let results = query.run(None).unwrap().unwrap();

    let kinds: Vec<&str> = results.iter().map(|e| e.key().kind()).collect();
    assert_eq!(results.len(), 3);
    assert_eq!(kinds.iter().filter(|k| **k == "Person").count(), 2);
    assert!(keys(&results).contains(&ada));
    assert!(keys(&results).contains(&bob));
}

// ============================================================================
// Models, external filters and full-text search
// ============================================================================

#[test]
fn test_merge_external_filter() {
    let ctx = TestContext::new();
    for age in [12, 20, 35, 50] {
        ctx.person("p", age);
    }

    let raw: RawFilters = [("age$ge", "18"), ("orderby", "age"), ("orderdir", "1"), ("limit", "2")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let mut query = ctx.query("Person").with_model(Arc::new(person_model()));
    query.merge_external_filter(&raw).unwrap();

    let results = query.run(None).unwrap().unwrap();
    assert_eq!(ages(&results), vec![50, 35]);
}

#[test]
fn test_merge_external_prefix_filter() {
    let ctx = TestContext::new();
    ctx.person("Alice", 1);
    ctx.person("Alfred", 2);
    ctx.person("Bob", 3);

    let raw: RawFilters = [("name$lk".to_string(), "Al".to_string())].into_iter().collect();
    let mut query = ctx.query("Person").with_model(Arc::new(person_model()));
    query.merge_external_filter(&raw).unwrap();

    let results = query.run(None).unwrap().unwrap();
    let names: Vec<&str> = results
        .iter()
        .filter_map(|e| e.get("name").and_then(Value::as_str))
        .collect();
    assert_eq!(names, vec!["Alfred", "Alice"]);
}

struct Impossible;

impl FieldHandler for Impossible {
    fn build_filter(&self, name: &str, _: &mut Query, raw: &RawFilters) -> Result<(), Error> {
        match raw.get(name) {
            Some(_) => Err(Error::Unsatisfiable(format!("{} never matches", name))),
            None => Ok(()),
        }
    }

    fn build_sort(&self, _: &str, _: &mut Query, _: &RawFilters) -> Result<(), Error> {
        Ok(())
    }
}

#[test]
fn test_unsatisfiable_external_filter() {
    let ctx = TestContext::new();
    ctx.person("Ada", 30);

    let model = person_model().field("vip", Impossible);
    let raw: RawFilters = [("vip".to_string(), "yes".to_string())].into_iter().collect();

    let mut query = ctx.query("Person").with_model(Arc::new(model));
    query.merge_external_filter(&raw).unwrap();
    assert!(query.run(None).unwrap().is_none());
}

struct FixedSearch {
    hits: Vec<Entity>,
    conforming: bool,
}

impl SearchAdapter for FixedSearch {
    fn search(&self, _text: &str, _query: &Query) -> Result<Vec<Entity>, Error> {
        Ok(self.hits.clone())
    }

    fn guarantees_filter_conformance(&self) -> bool {
        self.conforming
    }
}

fn search_model(conforming: bool) -> Arc<ModelSchema> {
    let hits = vec![
        Entity::new(Key::from_id("Person", 1)).with("age", 30),
        Entity::new(Key::from_id("Person", 2)).with("age", 12),
        Entity::new(Key::from_id("Person", 3)).with("age", 45),
    ];
    Arc::new(person_model().search_adapter(Arc::new(FixedSearch { hits, conforming })))
}

#[test]
fn test_fulltext_hits_filtered() {
    let ctx = TestContext::new();
    let mut query = ctx.query("Person").with_model(search_model(false));
    query.filter("age >=", 18).unwrap();
    query.fulltext_search("ada");

    let results = query.run(None).unwrap().unwrap();
    assert_eq!(ages(&results), vec![30, 45]);
    assert!(query.fulltext().is_none());
}

#[test]
fn test_fulltext_trusts_conforming_adapter() {
    let ctx = TestContext::new();
    let mut query = ctx.query("Person").with_model(search_model(true));
    query.filter("age >=", 18).unwrap();
    query.fulltext_search("ada");

    assert_eq!(query.run(None).unwrap().unwrap().len(), 3);
}

#[test]
fn test_fulltext_rejected_in_transaction() {
    let ctx = TestContext::new();
    let model = search_model(false);

    let result = ctx.session.run_in_transaction(|session| {
        let mut query = Query::new("Person", session).with_model(model.clone());
        query.fulltext_search("ada");
        query.run(None)
    });
    assert!(matches!(result, Err(Error::FulltextInTransaction)));
}

#[test]
fn test_fetch() {
    let ctx = TestContext::new();
    for age in [20, 30, 40] {
        ctx.person("p", age);
    }

    let mut query = ctx.query("Person").with_model(Arc::new(person_model()));
    query.order([("age", SortOrder::Ascending)]).unwrap();
    let page: FetchResult = query.fetch(Some(2)).unwrap();

    assert_eq!(page.len(), 2);
    assert!(page.cursor.is_some());
    let fetched: Vec<Option<Value>> = page.iter().map(|item| item.get("age")).collect();
    assert_eq!(fetched, vec![Some(Value::Int(20)), Some(Value::Int(30))]);
}

#[test]
fn test_fetch_limit_bounds() {
    let ctx = TestContext::new();
    let mut query = ctx.query("Person").with_model(Arc::new(person_model()));

    assert!(matches!(
        query.fetch(Some(0)),
        Err(Error::LimitOutOfRange { limit: 0, max: 100 })
    ));
    assert!(matches!(
        query.fetch(Some(100)),
        Err(Error::LimitOutOfRange { limit: 100, .. })
    ));
    assert!(query.fetch(Some(99)).is_ok());

    let mut bare = ctx.query("Person");
    assert!(matches!(bare.fetch(None), Err(Error::ModelRequired)));
    assert!(matches!(bare.get_skel(), Err(Error::ModelRequired)));
}

#[test]
fn test_get_skel() {
    let ctx = TestContext::new();
    ctx.person("Ada", 30);

    let mut query = ctx.query("Person").with_model(Arc::new(person_model()));
    let skel = query.get_skel().unwrap().unwrap();
    assert_eq!(skel.get("name"), Some(Value::from("Ada")));
}

// ============================================================================
// Access log
// ============================================================================

#[test]
fn test_queries_log_their_kind() {
    let ctx = TestContext::new();
    let _ = ctx.query("Person");
    let _ = Query::unlogged("Secret", &ctx.session);

    let log = ctx.session.access_log();
    assert!(log.contains(&kinddb_core::AccessEntry::Kind("Person".to_string())));
    assert!(!log.contains(&kinddb_core::AccessEntry::Kind("Secret".to_string())));
    assert!(ctx.store.is_empty());
}
