//! Migration runs against the document backend.

use std::fs;
use std::sync::Arc;

use dict_engine_core::backend::StorageEngine;
use dict_engine_core::error::DictError;
use dict_engine_core::query::parse;
use dict_engine_core::{DictDataService, DictEngineConfig, DictService, EngineRegistry, Migrator};
use dict_engine_document::DocumentBackend;
use ntest::timeout;
use tempfile::tempdir;

const CREATE: &str = "
create dict orders engine document (
    title string required,
    tags string[],
    constraint uq_title (title)
);
insert into orders (title, tags) values ('a', 'x'), ('b', 'y');
";

#[timeout(2000)]
#[test]
fn test_failed_script_restores_documents() {
    let dir = tempdir().unwrap();
    let config = DictEngineConfig {
        default_engine: "document".into(),
        document_data_dir: Some(dir.path().join("data")),
        ..Default::default()
    };
    let scripts = dir.path().join("scripts");
    fs::create_dir(&scripts).unwrap();
    fs::write(scripts.join("V1__create_orders.dql"), CREATE).unwrap();
    fs::write(
        scripts.join("V2__broken.dql"),
        "update orders set title = 'c' where title = 'b';
         insert into orders (title) values ('a');",
    )
    .unwrap();

    let open = || {
        let backend = DocumentBackend::open(&config).unwrap();
        let registry = EngineRegistry::new("document")
            .with_engine(StorageEngine::from_backend(Arc::new(backend)));
        DictService::bootstrap(config.clone(), registry).unwrap()
    };

    let dicts = open();
    let err = Migrator::new(dicts.clone())
        .with_dir(&scripts)
        .migrate()
        .unwrap_err();
    assert!(matches!(
        err,
        DictError::MigrationApplied { ref script, .. } if script == "V2__broken.dql"
    ));
    let data = DictDataService::new(dicts);
    assert_eq!(
        data.count_by_filter("orders", &parse("title = 'b'").unwrap())
            .unwrap(),
        1
    );

    let reopened = open();
    let migrator = Migrator::new(reopened.clone()).with_dir(&scripts);
    assert_eq!(migrator.pending().unwrap().len(), 1);
    let data = DictDataService::new(reopened);
    assert_eq!(
        data.count_by_filter("orders", &parse("tags all ('x')").unwrap())
            .unwrap(),
        1
    );
}
