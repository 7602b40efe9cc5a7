//! Shared metadata fixture for the engine unit tests: a small document
//! management model with a navigation chain, a collection, and a tree
//! dimension.

use indexmap::IndexMap;

use super::metadata::{
    CollectionDescriptor, DataType, EntityModel, EntityTypeMetadata, NavigationDescriptor,
    PropertyDescriptor,
};

fn property(name: &str, data_type: DataType) -> PropertyDescriptor {
    PropertyDescriptor {
        name: name.to_owned(),
        data_type,
        nullable: false,
        foreign_key_of: None,
    }
}

fn foreign_key(name: &str, navigation: &str) -> PropertyDescriptor {
    PropertyDescriptor {
        name: name.to_owned(),
        data_type: DataType::Int,
        nullable: true,
        foreign_key_of: Some(navigation.to_owned()),
    }
}

fn navigation(name: &str, target: &str, foreign_key: &str) -> NavigationDescriptor {
    NavigationDescriptor {
        name: name.to_owned(),
        target_type: target.to_owned(),
        foreign_key_property: foreign_key.to_owned(),
    }
}

pub fn model() -> EntityModel {
    let document = EntityTypeMetadata {
        type_name: "Document".to_owned(),
        table_name: "Documents".to_owned(),
        collection_name: "Documents".to_owned(),
        properties: vec![
            property("Id", DataType::Int),
            property("Memo", DataType::String),
            property("Code", DataType::String),
            property("Amount", DataType::Decimal),
            property("PostingDate", DataType::Date),
            property("IsActive", DataType::Bool),
            foreign_key("CustomerId", "Customer"),
            foreign_key("AccountId", "Account"),
        ],
        navigations: vec![
            navigation("Customer", "Customer", "CustomerId"),
            navigation("Account", "Account", "AccountId"),
        ],
        collections: vec![CollectionDescriptor {
            name: "Lines".to_owned(),
            target_type: "DocumentLine".to_owned(),
            inverse_foreign_key: "DocumentId".to_owned(),
        }],
        search_properties: vec!["Memo".to_owned(), "Code".to_owned()],
        is_active_property: Some("IsActive".to_owned()),
        tree_parent_navigation: None,
    };

    let line = EntityTypeMetadata {
        type_name: "DocumentLine".to_owned(),
        table_name: "DocumentLines".to_owned(),
        collection_name: "DocumentLines".to_owned(),
        properties: vec![
            property("Id", DataType::Int),
            property("Memo", DataType::String),
            property("Quantity", DataType::Decimal),
            foreign_key("DocumentId", "Document"),
        ],
        navigations: vec![navigation("Document", "Document", "DocumentId")],
        collections: vec![],
        search_properties: vec![],
        is_active_property: None,
        tree_parent_navigation: None,
    };

    let customer = EntityTypeMetadata {
        type_name: "Customer".to_owned(),
        table_name: "Customers".to_owned(),
        collection_name: "Customers".to_owned(),
        properties: vec![
            property("Id", DataType::Int),
            property("Name", DataType::String),
            property("Code", DataType::String),
            foreign_key("RegionId", "Region"),
        ],
        navigations: vec![navigation("Region", "Region", "RegionId")],
        collections: vec![],
        search_properties: vec!["Name".to_owned(), "Code".to_owned()],
        is_active_property: None,
        tree_parent_navigation: None,
    };

    let region = EntityTypeMetadata {
        type_name: "Region".to_owned(),
        table_name: "Regions".to_owned(),
        collection_name: "Regions".to_owned(),
        properties: vec![
            property("Id", DataType::Int),
            property("Name", DataType::String),
        ],
        navigations: vec![],
        collections: vec![],
        search_properties: vec![],
        is_active_property: None,
        tree_parent_navigation: None,
    };

    let account = EntityTypeMetadata {
        type_name: "Account".to_owned(),
        table_name: "Accounts".to_owned(),
        collection_name: "Accounts".to_owned(),
        properties: vec![
            property("Id", DataType::Int),
            property("Code", DataType::String),
            property("Name", DataType::String),
            foreign_key("ParentId", "Parent"),
        ],
        navigations: vec![navigation("Parent", "Account", "ParentId")],
        collections: vec![],
        search_properties: vec!["Code".to_owned(), "Name".to_owned()],
        is_active_property: None,
        tree_parent_navigation: Some("Parent".to_owned()),
    };

    let mut types = IndexMap::new();
    for entity_type in [document, line, customer, region, account] {
        types.insert(entity_type.type_name.clone(), entity_type);
    }
    EntityModel { types }
}
