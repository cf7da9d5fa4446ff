use std::sync::Arc;
use entity_context::{
    ContextEntity, ContextError, ContextHandlerFactory, ContextModel, ContextValues, DataType,
    EntityMetadata, MappedMetadata, PropertyMeta, ProxyConfig, Value,
};
use serde_json::json;

#[derive(Debug, Default, ContextModel)]
pub struct Product {
    pub sku: String,
    pub price: f64,
    pub attrs: serde_json::Value,
}

#[derive(Debug, Default, ContextModel)]
pub struct Plain {
    pub label: String,
}

#[derive(Debug, Default, ContextModel)]
pub struct Document {
    pub title: String,
    pub extra: serde_json::Value,
}

fn factory() -> ContextHandlerFactory {
    ContextHandlerFactory::new(ProxyConfig::default()).unwrap()
}

#[test]
fn map_view_only_for_dynamic_attributes() {
    let factory = factory();

    let mut product = factory.new_handler::<Product>(ContextValues::new()).unwrap();
    assert!(product.proxy_type().is_map_capable());
    assert!(product.as_map().is_some());

    let mut plain = factory.new_handler::<Plain>(ContextValues::new()).unwrap();
    assert!(!plain.proxy_type().is_map_capable());
    assert!(plain.as_map().is_none());
}

#[test]
fn property_write_is_visible_through_map() {
    let factory = factory();
    let mut product = factory.new_handler::<Product>(ContextValues::new()).unwrap();

    product.set_attrs(json!({"color": "red"})).unwrap();

    let mut map = product.as_map().unwrap();
    assert_eq!(map.get("attrs").unwrap(), Some(Value::Json(json!({"color": "red"}))));
    assert_eq!(map.get("color").unwrap(), Some(Value::from("red")));
}

#[test]
fn map_write_is_visible_through_property() {
    let factory = factory();
    let mut product = factory.new_handler::<Product>(ContextValues::new()).unwrap();

    {
        let mut map = product.as_map().unwrap();
        map.insert("attrs", json!({"size": "L"})).unwrap();
        map.insert("price", "9.5").unwrap();
    }

    assert_eq!(product.get_attrs().unwrap(), json!({"size": "L"}));
    assert_eq!(product.get_price().unwrap(), 9.5);
}

#[test]
fn map_write_rejects_mistyped_property() {
    let factory = factory();
    let mut product = factory.new_handler::<Product>(ContextValues::new()).unwrap();
    let mut map = product.as_map().unwrap();

    let err = map.insert("price", "cheap").unwrap_err();
    assert!(matches!(err, ContextError::DispatchFailure { .. }), "{err}");
}

#[test]
fn raw_keys_live_beside_properties() {
    let factory = factory();
    let mut product = factory
        .new_handler_from_json::<Product>(&json!({"sku": "SKU-1", "attrs": {"color": "blue"}}))
        .unwrap();
    let mut map = product.as_map().unwrap();

    assert_eq!(map.insert("campaign", "spring").unwrap(), None);
    assert_eq!(map.get("campaign").unwrap(), Some(Value::from("spring")));
    assert_eq!(map.keys().unwrap(), vec!["attrs", "campaign", "sku"]);
    assert_eq!(map.len().unwrap(), 3);

    assert!(map.contains_key("color").unwrap());
    assert!(!map.contains_key("weight").unwrap());
    assert_eq!(map.get("weight").unwrap(), None);

    assert_eq!(map.remove("campaign").unwrap(), Some(Value::from("spring")));
    assert_eq!(map.remove("campaign").unwrap(), None);

    let entries = map.entries().unwrap();
    assert_eq!(entries[0], ("attrs".to_string(), Value::Json(json!({"color": "blue"}))));

    map.clear().unwrap();
    assert!(map.is_empty().unwrap());
    assert_eq!(product.get_sku().unwrap(), "");
}

#[test]
fn text_encoded_attributes_are_searched() {
    let factory = factory();
    let mut product = factory
        .new_handler_from_json::<Product>(&json!({"attrs": "{\"color\":\"green\"}"}))
        .unwrap();

    let mut map = product.as_map().unwrap();
    assert_eq!(map.get("color").unwrap(), Some(Value::from("green")));
    assert!(map.contains_key("color").unwrap());
}

#[test]
fn metadata_decides_map_capability() {
    let text_attrs = MappedMetadata::new()
        .with(EntityMetadata::new(
            "Product",
            vec![PropertyMeta::new("attrs", DataType::Text)],
        ))
        .unwrap();
    let factory = factory().with_metadata_provider(Arc::new(text_attrs));

    let mut product = factory.new_handler::<Product>(ContextValues::new()).unwrap();
    assert!(product.as_map().is_none());
    product.set_sku("SKU-2".to_string()).unwrap();
    assert_eq!(product.get_sku().unwrap(), "SKU-2");
}

#[test]
fn unavailable_metadata_degrades_to_plain_proxy() {
    let factory = factory().with_metadata_provider(Arc::new(MappedMetadata::new()));

    let mut product = factory.new_handler::<Product>(ContextValues::new()).unwrap();
    assert!(!product.proxy_type().is_map_capable());
    product.set_price(3.0).unwrap();
    assert_eq!(product.context_entity().unwrap().price, 3.0);
}

#[test]
fn configured_attributes_key() {
    let factory =
        ContextHandlerFactory::new(ProxyConfig::new().dynamic_attributes_key("extra")).unwrap();

    let mut product = factory.new_handler::<Product>(ContextValues::new()).unwrap();
    assert!(product.as_map().is_none());

    let mut document = factory
        .new_handler_from_json::<Document>(&json!({"extra": {"pages": 12}}))
        .unwrap();
    assert_eq!(document.proxy_type().dynamic_attributes_key(), Some("extra"));
    let mut map = document.as_map().unwrap();
    assert_eq!(map.get("pages").unwrap(), Some(Value::Integer(12)));
}

#[test]
fn map_get_and_contains_key_agree_on_unset_properties() {
    let factory = factory();
    let mut product = factory.new_handler::<Product>(ContextValues::new()).unwrap();

    {
        let mut map = product.as_map().unwrap();
        for key in ["sku", "price", "attrs"] {
            assert_eq!(map.get(key).unwrap().is_some(), map.contains_key(key).unwrap(), "{key}");
            assert!(!map.contains_key(key).unwrap());
        }
        assert!(map.keys().unwrap().is_empty());
        assert_eq!(map.len().unwrap(), 0);
    }

    // The typed path still reads the declared default.
    assert_eq!(product.get_price().unwrap(), 0.0);

    product.set_price(4.0).unwrap();
    let mut map = product.as_map().unwrap();
    assert_eq!(map.get("price").unwrap(), Some(Value::Float(4.0)));
    assert!(map.contains_key("price").unwrap());
    assert_eq!(map.keys().unwrap(), vec!["price"]);
}
