use super::validation::{validate_dict, validate_user_fields};
use super::*;
use crate::error::DictError;
use ntest::timeout;
use serde_json::json;

fn create_test_dict() -> Dict {
    let mut dict = Dict::new("orders", "sql")
        .with_enum(DictEnum::new(
            "status",
            vec!["new".to_string(), "done".to_string()],
        ))
        .with_field(
            DictField::new("title", FieldType::String)
                .required()
                .with_max_size(FieldSize::Integer(64)),
        )
        .with_field(DictField::new("amount", FieldType::Decimal))
        .with_field(DictField::new("state", FieldType::Enum).with_enum("status"))
        .with_index(DictIndex {
            id: "by_title".to_string(),
            fields: vec!["title".to_string()],
            direction: SortDirection::Asc,
        })
        .with_constraint(DictConstraint {
            id: "uniq_title".to_string(),
            fields: vec!["title".to_string()],
        });
    let mut fields = service_fields();
    fields.append(&mut dict.fields);
    dict.fields = fields;
    dict
}

#[timeout(1000)]
#[test]
fn test_valid_dict_passes() {
    let dict = create_test_dict();
    assert!(validate_dict(&dict, 32, |_| false).is_ok());
}

#[timeout(1000)]
#[test]
fn test_service_field_redeclaration_rejected() {
    let fields = vec![DictField::new("version", FieldType::String)];
    let err = validate_user_fields("orders", &fields).unwrap_err();
    assert_eq!(
        err,
        DictError::ForbiddenFieldName {
            dict: "orders".to_string(),
            field: "version".to_string(),
        }
    );
}

#[timeout(1000)]
#[test]
fn test_duplicate_field_rejected() {
    let dict = create_test_dict().with_field(DictField::new("title", FieldType::Integer));
    let err = validate_dict(&dict, 32, |_| false).unwrap_err();
    assert!(matches!(err, DictError::FieldAlreadyExists { field, .. } if field == "title"));
}

#[timeout(1000)]
#[test]
fn test_field_id_length_limit() {
    let long_id = "a".repeat(33);
    let dict = create_test_dict().with_field(DictField::new(long_id, FieldType::String));
    let err = validate_dict(&dict, 32, |_| false).unwrap_err();
    assert!(matches!(err, DictError::FieldValidation { .. }));
}

#[timeout(1000)]
#[test]
fn test_enum_field_must_reference_declared_enum() {
    let dict = create_test_dict().with_field(DictField::new("kind", FieldType::Enum).with_enum("kinds"));
    let err = validate_dict(&dict, 32, |_| false).unwrap_err();
    assert!(matches!(err, DictError::EnumNotFound { enum_id, .. } if enum_id == "kinds"));
}

#[timeout(1000)]
#[test]
fn test_dict_field_must_reference_existing_dict() {
    let dict = create_test_dict()
        .with_field(DictField::new("customer", FieldType::Dict).with_dict_ref("customers", "name"));
    let err = validate_dict(&dict, 32, |_| false).unwrap_err();
    assert!(matches!(err, DictError::DictNotFound { dict } if dict == "customers"));

    assert!(validate_dict(&dict, 32, |id| id == "customers").is_ok());
}

#[timeout(1000)]
#[test]
fn test_size_bound_type_family() {
    let decimal_bound_on_integer = create_test_dict().with_field(
        DictField::new("count", FieldType::Integer).with_max_size(FieldSize::Decimal(1.5)),
    );
    assert!(validate_dict(&decimal_bound_on_integer, 32, |_| false).is_err());

    let bound_on_boolean = create_test_dict()
        .with_field(DictField::new("flag", FieldType::Boolean).with_min_size(FieldSize::Integer(0)));
    assert!(validate_dict(&bound_on_boolean, 32, |_| false).is_err());

    let inverted = create_test_dict().with_field(
        DictField::new("price", FieldType::Decimal)
            .with_min_size(FieldSize::Decimal(10.0))
            .with_max_size(FieldSize::Integer(1)),
    );
    assert!(validate_dict(&inverted, 32, |_| false).is_err());
}

#[timeout(1000)]
#[test]
fn test_index_and_constraint_share_id_space() {
    let dict = create_test_dict().with_constraint(DictConstraint {
        id: "by_title".to_string(),
        fields: vec!["amount".to_string()],
    });
    let err = validate_dict(&dict, 32, |_| false).unwrap_err();
    assert!(matches!(err, DictError::ConstraintAlreadyExists { .. }));
}

#[timeout(1000)]
#[test]
fn test_default_value_checked_against_field() {
    let dict = create_test_dict()
        .with_field(DictField::new("count", FieldType::Integer).with_default(json!("ten")));
    let err = validate_dict(&dict, 32, |_| false).unwrap_err();
    assert!(matches!(err, DictError::ValueValidation { .. }));
}

#[timeout(1000)]
#[test]
fn test_rename_field_cascades_to_index_and_constraint() {
    let mut dict = create_test_dict();
    dict.rename_field("title", "headline").unwrap();

    assert!(dict.field("title").is_none());
    assert_eq!(dict.get_field("headline").unwrap().name, "headline");
    assert_eq!(dict.get_index("by_title").unwrap().fields, vec!["headline"]);
    assert_eq!(
        dict.get_constraint("uniq_title").unwrap().fields,
        vec!["headline"]
    );

    let err = dict.rename_field("amount", "headline").unwrap_err();
    assert!(matches!(err, DictError::FieldAlreadyExists { .. }));
}

#[timeout(1000)]
#[test]
fn test_dict_json_round_trip_keeps_wire_names() {
    let dict = create_test_dict();
    let text = serde_json::to_string(&dict).unwrap();
    assert!(text.contains("\"type\":\"DECIMAL\""));
    assert!(text.contains("\"enumId\":\"status\""));

    let decoded: Dict = serde_json::from_str(&text).unwrap();
    assert_eq!(decoded, dict);
}

#[timeout(1000)]
#[test]
fn test_item_update_appends_history() {
    let mut data = ItemData::new();
    data.insert("title".to_string(), json!("a"));
    let mut item = DictItem::new(data);
    let created = item.updated;

    let mut next = ItemData::new();
    next.insert("title".to_string(), json!("b"));
    next.insert("amount".to_string(), json!(2.0));
    assert_eq!(item.changed_fields(&next), vec!["amount", "title"]);

    item.apply_update(next, chrono::Utc::now());
    assert_eq!(item.version, 2);
    assert_eq!(item.history.len(), 1);
    assert_eq!(item.history[0].version, 1);
    assert_eq!(item.history[0].updated, created);
    assert_eq!(item.history[0].data["title"], json!("a"));
}
