//! Table-driven tests for the document-store shell grammar.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use dbkit::Error;
use dbkit::shell::{CollectionOp, IndexTarget, ShellCommand, normalize_literals, parse_command};
use serde_json::json;
use test_case::test_case;

// ============================================================================
// Accepted commands
// ============================================================================

#[test]
fn test_find_with_operator() {
    let command = parse_command(r#"db.users.find({"age": {"$gt": 21}})"#).unwrap();
    let ShellCommand::Collection { collection, op } = command else {
        panic!("expected a collection command");
    };
    assert_eq!(collection, "users");
    let CollectionOp::Find { filter, projection } = op else {
        panic!("expected find");
    };
    assert_eq!(filter.get("age"), Some(&json!({"$gt": 21})));
    assert!(projection.is_none());
}

#[test_case("db.users.find()", "find" ; "find without filter")]
#[test_case("db.users.findOne({name: 'a'})", "findOne" ; "find one relaxed keys")]
#[test_case("db.users.countDocuments({})", "countDocuments" ; "count documents")]
#[test_case("db.users.count()", "countDocuments" ; "count alias")]
#[test_case("db.users.distinct('city')", "distinct" ; "distinct")]
#[test_case("db.users.aggregate([{$match: {a: 1}}, {$limit: 5}])", "aggregate" ; "aggregate")]
#[test_case("db.users.insertOne({a: 1})", "insertOne" ; "insert one")]
#[test_case("db.users.insertMany([{a: 1}, {a: 2}])", "insertMany" ; "insert many")]
#[test_case("db.users.updateOne({a: 1}, {$set: {b: 2}})", "updateOne" ; "update one")]
#[test_case("db.users.updateMany({}, {$inc: {n: 1}})", "updateMany" ; "update many")]
#[test_case("db.users.deleteOne({a: 1})", "deleteOne" ; "delete one")]
#[test_case("db.users.deleteMany({})", "deleteMany" ; "delete many")]
#[test_case("db.users.createIndex({email: 1})", "createIndex" ; "create index")]
#[test_case("db.users.dropIndex('email_1')", "dropIndex" ; "drop index")]
#[test_case("db.users.getIndexes()", "listIndexes" ; "get indexes alias")]
#[test_case("  db.users.find({});  ", "find" ; "surrounding whitespace and semicolon")]
fn test_collection_methods(input: &str, method: &str) {
    match parse_command(input).unwrap() {
        ShellCommand::Collection { collection, op } => {
            assert_eq!(collection, "users");
            assert_eq!(op.method_name(), method);
        },
        other => panic!("expected a collection command, got {other:?}"),
    }
}

#[test_case("show dbs", ShellCommand::ShowDatabases ; "show dbs")]
#[test_case("show databases", ShellCommand::ShowDatabases ; "show databases")]
#[test_case("show collections", ShellCommand::ShowCollections ; "show collections")]
#[test_case("show users", ShellCommand::ShowUsers ; "show users")]
fn test_show_commands(input: &str, expected: ShellCommand) {
    assert_eq!(parse_command(input).unwrap(), expected);
}

#[test]
fn test_use_switches_database() {
    assert_eq!(
        parse_command("use analytics").unwrap(),
        ShellCommand::Use {
            database: "analytics".to_string()
        }
    );
}

#[test]
fn test_drop_index_by_keys() {
    let command = parse_command("db.users.dropIndex({email: 1, age: -1})").unwrap();
    let ShellCommand::Collection {
        op: CollectionOp::DropIndex { index },
        ..
    } = command
    else {
        panic!("expected dropIndex");
    };
    assert!(matches!(index, IndexTarget::Keys(_)));
}

// ============================================================================
// Extended literals
// ============================================================================

#[test_case(r#"ObjectId("507f1f77bcf86cd799439011")"#, r#""507f1f77bcf86cd799439011""# ; "object id")]
#[test_case(r#"ISODate("2024-01-02T03:04:05Z")"#, r#""2024-01-02T03:04:05Z""# ; "iso date")]
#[test_case("NumberLong(42)", "42" ; "number long")]
#[test_case(r#"NumberInt("7")"#, "7" ; "number int from string")]
#[test_case("undefined", "null" ; "undefined")]
fn test_literal_normalization(input: &str, expected: &str) {
    assert_eq!(normalize_literals(input), expected);
}

#[test]
fn test_object_id_in_filter() {
    let command =
        parse_command(r#"db.orders.find({_id: ObjectId("507f1f77bcf86cd799439011")})"#).unwrap();
    let ShellCommand::Collection {
        op: CollectionOp::Find { filter, .. },
        ..
    } = command
    else {
        panic!("expected find");
    };
    assert_eq!(filter.get("_id"), Some(&json!("507f1f77bcf86cd799439011")));
}

#[test]
fn test_literal_text_inside_strings_is_untouched() {
    let command = parse_command(r#"db.notes.insertOne({body: "call ObjectId(\"x\") later"})"#)
        .unwrap();
    let ShellCommand::Collection {
        op: CollectionOp::InsertOne { document },
        ..
    } = command
    else {
        panic!("expected insertOne");
    };
    assert_eq!(document.get("body"), Some(&json!("call ObjectId(\"x\") later")));
}

// ============================================================================
// Rejected commands
// ============================================================================

#[test_case("" ; "empty")]
#[test_case("select * from users" ; "sql text")]
#[test_case("db.users" ; "no method")]
#[test_case("db.users.find(" ; "unclosed call")]
#[test_case("db.users.find({a: })" ; "missing value")]
#[test_case("db.users.find().limit(5)" ; "chained call")]
#[test_case("db.users.frobnicate()" ; "unknown method")]
#[test_case("show tables" ; "unknown show target")]
#[test_case("use" ; "use without database")]
#[test_case("db.users.updateOne({a: 1})" ; "missing update document")]
fn test_rejected_as_syntax_error(input: &str) {
    let err = parse_command(input).unwrap_err();
    assert!(
        matches!(err, Error::Syntax { .. }),
        "expected syntax error for {input:?}, got {err:?}"
    );
}
