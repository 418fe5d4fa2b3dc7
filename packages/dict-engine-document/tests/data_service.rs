//! Integration tests for the dictionary services on the document backend.

use std::sync::Arc;

use dict_engine_core::backend::{Pageable, SortOrder, StorageEngine};
use dict_engine_core::error::DictError;
use dict_engine_core::query::parse;
use dict_engine_core::schema::{Dict, DictConstraint, DictEnum, DictField, FieldType, ItemData};
use dict_engine_core::{DictDataService, DictEngineConfig, DictService, EngineRegistry};
use dict_engine_document::DocumentBackend;
use dict_engine_sql::SqliteBackend;
use ntest::timeout;
use serde_json::{json, Value};

fn services() -> (DictService, DictDataService) {
    let registry = EngineRegistry::new("document").with_engine(StorageEngine::from_backend(
        Arc::new(DocumentBackend::in_memory()),
    ));
    let dicts = DictService::bootstrap(DictEngineConfig::default(), registry).unwrap();
    let data = DictDataService::new(dicts.clone());
    (dicts, data)
}

fn item(pairs: &[(&str, Value)]) -> ItemData {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn orders(dicts: &DictService, customers_engine: &str) {
    dicts
        .create(
            Dict::new("customers", customers_engine)
                .with_field(DictField::new("name", FieldType::String)),
        )
        .unwrap();
    dicts
        .create(
            Dict::new("orders", "document")
                .with_enum(DictEnum::new("status", vec!["new".into(), "done".into()]))
                .with_field(DictField::new("title", FieldType::String).required())
                .with_field(DictField::new("amount", FieldType::Decimal))
                .with_field(DictField::new("state", FieldType::Enum).with_enum("status"))
                .with_field(DictField::new("tags", FieldType::String).multivalued())
                .with_field(
                    DictField::new("customer", FieldType::Dict).with_dict_ref("customers", "name"),
                )
                .with_constraint(DictConstraint {
                    id: "uq_title".into(),
                    fields: vec!["title".into()],
                }),
        )
        .unwrap();
}

fn titles(page: &[dict_engine_core::schema::DictItem]) -> Vec<&str> {
    page.iter()
        .map(|i| i.data["title"].as_str().unwrap_or_default())
        .collect()
}

#[timeout(1000)]
#[test]
fn test_item_lifecycle() {
    let (dicts, data) = services();
    orders(&dicts, "document");

    let created = data.create("orders", item(&[("title", json!("a"))])).unwrap();
    assert_eq!(created.version, 1);

    let updated = data
        .update(
            "orders",
            &created.id,
            item(&[("title", json!("a")), ("amount", json!(3))]),
            1,
        )
        .unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.history.len(), 1);
    assert!(updated.history[0].data.get("amount").is_none());

    let err = data
        .update("orders", &created.id, item(&[("title", json!("b"))]), 1)
        .unwrap_err();
    assert!(matches!(err, DictError::ConcurrentUpdate { expected: 1, actual: 2, .. }));

    data.delete("orders", &created.id, true, Some("test")).unwrap();
    assert!(matches!(
        data.get_by_id("orders", &created.id).unwrap_err(),
        DictError::ItemNotFound { .. }
    ));
    let raw = data.get_raw_by_id("orders", &created.id).unwrap();
    assert_eq!(raw.deletion_reason.as_deref(), Some("test"));
    assert_eq!(raw.data["amount"], json!(3.0));

    assert!(matches!(
        data.delete("orders", &created.id, true, None).unwrap_err(),
        DictError::ItemNotFound { .. }
    ));
    data.delete("orders", &created.id, false, None).unwrap();
    assert!(data.get_raw_by_id("orders", &created.id).is_err());
}

#[timeout(1000)]
#[test]
fn test_filter_operators() {
    let (dicts, data) = services();
    orders(&dicts, "document");
    let created = data
        .create_many(
            "orders",
            vec![
                item(&[
                    ("title", json!("Alpha")),
                    ("amount", json!(10)),
                    ("state", json!("new")),
                    ("tags", json!(["red", "blue"])),
                ]),
                item(&[
                    ("title", json!("beta")),
                    ("amount", json!(20.5)),
                    ("state", json!("done")),
                    ("tags", json!(["blue"])),
                ]),
                item(&[("title", json!("gamma"))]),
            ],
        )
        .unwrap();

    let count = |query: &str| data.count_by_filter("orders", &parse(query).unwrap()).unwrap();

    assert_eq!(count(""), 3);
    assert_eq!(count("amount > 10"), 1);
    assert_eq!(count("10 <= amount"), 2);
    assert_eq!(count("amount = null"), 1);
    assert_eq!(count("amount != null"), 2);
    assert_eq!(count("amount != 10"), 1);
    assert_eq!(count("title like 'a%'"), 0);
    assert_eq!(count("title like 'A%'"), 1);
    assert_eq!(count("title ilike 'a%'"), 1);
    assert_eq!(count("state in ('new', null)"), 2);
    assert_eq!(count("tags = 'blue'"), 2);
    assert_eq!(count("tags != 'red'"), 2);
    assert_eq!(count("tags any ('red', 'green')"), 1);
    assert_eq!(count("tags all ('red', 'blue')"), 1);
    assert_eq!(count("state = 'done' or amount = null"), 2);
    assert_eq!(count(&format!("id = '{}'", created[2].id)), 1);
    assert_eq!(count("version = 1"), 3);

    for query in ["amount > null", "amount like '1%'", "not (state = 'done')"] {
        let err = data
            .count_by_filter("orders", &parse(query).unwrap())
            .unwrap_err();
        assert!(matches!(err, DictError::UnsupportedOperator { .. }), "{}", query);
    }

    assert_eq!(
        data.get_distinct_values_by_filter("orders", "tags", &parse("").unwrap())
            .unwrap(),
        vec![json!("blue"), json!("red")]
    );
    assert_eq!(
        data.get_distinct_values_by_filter("orders", "amount", &parse("amount < 15").unwrap())
            .unwrap(),
        vec![json!(10.0)]
    );
}

#[timeout(1000)]
#[test]
fn test_paging_and_sorting() {
    let (dicts, data) = services();
    orders(&dicts, "document");
    let rows = ["e", "d", "c", "b", "a"]
        .iter()
        .enumerate()
        .map(|(n, title)| item(&[("title", json!(title)), ("amount", json!((n % 2) as i64))]))
        .collect();
    data.create_many("orders", rows).unwrap();

    let by_title = Pageable::new(0, 2).with_sort(SortOrder::asc("title"));
    let first = data
        .get_by_filter("orders", &[], &parse("").unwrap(), &by_title)
        .unwrap();
    assert_eq!(first.total_elements, 5);
    assert_eq!(first.total_pages(), 3);
    assert_eq!(titles(&first.content), vec!["a", "b"]);

    let by_amount = data
        .get_by_filter(
            "orders",
            &["title".into()],
            &parse("").unwrap(),
            &Pageable::unpaged()
                .with_sort(SortOrder::desc("amount"))
                .with_sort(SortOrder::asc("title")),
        )
        .unwrap();
    assert_eq!(titles(&by_amount.content), vec!["b", "d", "a", "c", "e"]);
    assert!(by_amount.content[0].data.get("amount").is_none());

    let unsorted = data
        .get_by_filter("orders", &[], &parse("").unwrap(), &Pageable::unpaged())
        .unwrap();
    assert_eq!(titles(&unsorted.content), vec!["e", "d", "c", "b", "a"]);

    let beyond = data
        .get_by_filter(
            "orders",
            &[],
            &parse("").unwrap(),
            &Pageable {
                page: 9,
                ..by_title
            },
        )
        .unwrap();
    assert!(beyond.content.is_empty());
    assert_eq!(beyond.total_elements, 5);
}

#[timeout(1000)]
#[test]
fn test_lookup_on_referenced_dict() {
    let (dicts, data) = services();
    orders(&dicts, "document");
    let acme = data
        .create("customers", item(&[("name", json!("Acme"))]))
        .unwrap();
    let other = data
        .create("customers", item(&[("name", json!("Other"))]))
        .unwrap();
    data.create_many(
        "orders",
        vec![
            item(&[("title", json!("a")), ("customer", json!(acme.id))]),
            item(&[("title", json!("b")), ("customer", json!(other.id))]),
            item(&[("title", json!("c"))]),
        ],
    )
    .unwrap();

    let page = data
        .get_by_filter(
            "orders",
            &["title".into(), "customers.name".into()],
            &parse("customers.name = 'Acme'").unwrap(),
            &Pageable::unpaged(),
        )
        .unwrap();
    assert_eq!(page.total_elements, 1);
    assert_eq!(page.content[0].data["customers.name"], json!("Acme"));

    let sorted = data
        .get_by_filter(
            "orders",
            &["title".into()],
            &parse("customer != null").unwrap(),
            &Pageable::unpaged().with_sort(SortOrder::desc("customers.name")),
        )
        .unwrap();
    assert_eq!(titles(&sorted.content), vec!["b", "a"]);
}

#[timeout(1000)]
#[test]
fn test_lookup_across_engines_is_rejected() {
    let sql = SqliteBackend::in_memory().unwrap();
    let registry = EngineRegistry::new("document")
        .with_engine(StorageEngine::from_backend(Arc::new(DocumentBackend::in_memory())))
        .with_engine(StorageEngine::from_backend(Arc::new(sql)));
    let dicts = DictService::bootstrap(DictEngineConfig::default(), registry).unwrap();
    let data = DictDataService::new(dicts.clone());
    orders(&dicts, "sql");

    let acme = data
        .create("customers", item(&[("name", json!("Acme"))]))
        .unwrap();
    data.create("orders", item(&[("title", json!("a")), ("customer", json!(acme.id))]))
        .unwrap();
    assert_eq!(
        data.count_by_filter("orders", &parse("customer != null").unwrap())
            .unwrap(),
        1
    );

    let err = data
        .count_by_filter("orders", &parse("customers.name = 'Acme'").unwrap())
        .unwrap_err();
    assert!(matches!(err, DictError::UnsupportedOperator { .. }));
}

#[timeout(1000)]
#[test]
fn test_ilike_matches_the_same_items_on_both_engines() {
    let registry = EngineRegistry::new("document")
        .with_engine(StorageEngine::from_backend(Arc::new(DocumentBackend::in_memory())))
        .with_engine(StorageEngine::from_backend(Arc::new(
            SqliteBackend::in_memory().unwrap(),
        )));
    let dicts = DictService::bootstrap(DictEngineConfig::default(), registry).unwrap();
    let data = DictDataService::new(dicts.clone());

    for engine in ["sql", "document"] {
        let dict_id = format!("fruit_{}", engine);
        dicts
            .create(
                Dict::new(&dict_id, engine)
                    .with_field(DictField::new("name", FieldType::String))
                    .with_field(DictField::new("aliases", FieldType::String).multivalued()),
            )
            .unwrap();
        data.create_many(
            &dict_id,
            vec![
                item(&[("name", json!("Äpfel")), ("aliases", json!(["ÖL", "x"]))]),
                item(&[("name", json!("apfel")), ("aliases", json!(["ol"]))]),
                item(&[("name", json!("[a]*"))]),
            ],
        )
        .unwrap();
    }

    for (query, expected) in [
        ("name ilike 'äpf%'", 1),
        ("name ilike 'ÄPFEL'", 1),
        ("name ilike 'APF_L'", 1),
        ("name ilike '_pfel'", 2),
        ("aliases ilike 'öl'", 1),
        ("name ilike '[a]*'", 1),
    ] {
        let filter = parse(query).unwrap();
        let on_sql = data.count_by_filter("fruit_sql", &filter).unwrap();
        let on_document = data.count_by_filter("fruit_document", &filter).unwrap();
        assert_eq!(on_sql, expected, "sql: {}", query);
        assert_eq!(on_document, expected, "document: {}", query);
    }
}

#[timeout(1000)]
#[test]
fn test_unique_constraint_ignores_soft_deleted() {
    let (dicts, data) = services();
    orders(&dicts, "document");
    let first = data.create("orders", item(&[("title", json!("a"))])).unwrap();

    let err = data.create("orders", item(&[("title", json!("a"))])).unwrap_err();
    assert!(matches!(err, DictError::UniqueViolation { .. }));

    data.delete("orders", &first.id, true, None).unwrap();
    let second = data.create("orders", item(&[("title", json!("a"))])).unwrap();

    let third = data.create("orders", item(&[("title", json!("b"))])).unwrap();
    let err = data
        .update("orders", &third.id, item(&[("title", json!("a"))]), 1)
        .unwrap_err();
    assert!(matches!(err, DictError::UniqueViolation { .. }));
    assert_eq!(data.get_by_id("orders", &second.id).unwrap().version, 1);

    let err = data
        .create_many(
            "orders",
            vec![item(&[("title", json!("x"))]), item(&[("title", json!("x"))])],
        )
        .unwrap_err();
    assert!(matches!(err, DictError::UniqueViolation { .. }));
    assert_eq!(
        data.count_by_filter("orders", &parse("title = 'x'").unwrap())
            .unwrap(),
        0
    );
}

#[timeout(1000)]
#[test]
fn test_failed_bulk_write_changes_nothing() {
    let (dicts, data) = services();
    orders(&dicts, "document");
    data.create_many(
        "orders",
        vec![
            item(&[("title", json!("a")), ("state", json!("new"))]),
            item(&[("title", json!("b")), ("state", json!("new"))]),
            item(&[("title", json!("c")), ("state", json!("done"))]),
        ],
    )
    .unwrap();
    let count = |query: &str| data.count_by_filter("orders", &parse(query).unwrap()).unwrap();

    let err = data
        .update_by_filter(
            "orders",
            &parse("state = 'new'").unwrap(),
            &item(&[("title", json!("same")), ("amount", json!(1))]),
        )
        .unwrap_err();
    assert!(matches!(err, DictError::UniqueViolation { .. }));
    assert_eq!(count("title = 'same'"), 0);
    assert_eq!(count("amount = null"), 3);
    assert_eq!(count("title in ('a', 'b')"), 2);

    let err = data
        .update_by_filter(
            "orders",
            &parse("").unwrap(),
            &item(&[("state", json!("lost"))]),
        )
        .unwrap_err();
    assert!(matches!(err, DictError::ValueValidation { .. }));
    assert_eq!(count("state = 'done'"), 1);

    assert_eq!(
        data.update_by_filter(
            "orders",
            &parse("state = 'new'").unwrap(),
            &item(&[("amount", json!(1))]),
        )
        .unwrap(),
        2
    );
    assert_eq!(
        data.delete_by_filter("orders", &parse("amount = 1").unwrap(), true, None)
            .unwrap(),
        2
    );
    assert_eq!(count(""), 1);
}

#[timeout(1000)]
#[test]
fn test_schema_changes_rewrite_documents() {
    let (dicts, data) = services();
    orders(&dicts, "document");
    let created = data
        .create("orders", item(&[("title", json!("a")), ("amount", json!(1))]))
        .unwrap();
    data.create("orders", item(&[("title", json!("b")), ("state", json!("new"))]))
        .unwrap();
    data.create("orders", item(&[("title", json!("c")), ("state", json!("new"))]))
        .unwrap();

    dicts.rename_field("orders", "title", "headline").unwrap();
    dicts.remove_field("orders", "amount").unwrap();

    let raw = data.get_raw_by_id("orders", &created.id).unwrap();
    assert_eq!(raw.data["headline"], json!("a"));
    assert!(raw.data.get("title").is_none());
    assert!(raw.data.get("amount").is_none());

    let err = dicts
        .create_constraint(
            "orders",
            DictConstraint {
                id: "uq_state".into(),
                fields: vec!["state".into()],
            },
        )
        .unwrap_err();
    assert!(matches!(err, DictError::SchemaModification { .. }));
    assert!(dicts.get("orders").unwrap().get_constraint("uq_state").is_none());
}

#[timeout(1000)]
#[test]
fn test_documents_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = DictEngineConfig {
        default_engine: "document".into(),
        document_data_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let open = || {
        let backend = DocumentBackend::open(&config).unwrap();
        let registry = EngineRegistry::new("document")
            .with_engine(StorageEngine::from_backend(Arc::new(backend)));
        DictService::bootstrap(config.clone(), registry).unwrap()
    };

    {
        let dicts = open();
        orders(&dicts, "document");
        DictDataService::new(dicts)
            .create("orders", item(&[("title", json!("kept")), ("tags", json!(["x"]))]))
            .unwrap();
    }

    let dicts = open();
    assert_eq!(dicts.get("orders").unwrap().constraints.len(), 1);
    let data = DictDataService::new(dicts);
    assert_eq!(
        data.count_by_filter("orders", &parse("tags = 'x'").unwrap())
            .unwrap(),
        1
    );
}
