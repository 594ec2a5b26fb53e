//! Translates the [Filter] AST into a Mongo query document (spec §4.11
//! step 2). Runs after `$unwind $namespace`, so namespace fields are
//! matched as plain (non-array) paths.
//!
//! The spec additionally calls for custom `$expr` bit-set operators
//! (any/all set/clear) for statx mode bits; [Value] has no bitset
//! variant of its own, so that piece is left out here (see DESIGN.md).

use crate::mongo::document::id_to_bson;
use crate::mongo::value_bson::value_to_bson;
use bson::{doc, Bson, Document};
use robinhood_core::filter::{Cmp, Field, Filter};
use robinhood_core::id::{BackendTag, Id};
use robinhood_core::value::Value;

fn field_path(field: &Field) -> String {
    match field {
        Field::ParentId => "namespace.parent_id".to_string(),
        Field::Id => "_id".to_string(),
        Field::Name => "namespace.name".to_string(),
        Field::StatxType => "statx.file_type".to_string(),
        Field::StatxSize => "statx.size".to_string(),
        Field::InodeXattr(k) => format!("inode_xattrs.{k}"),
        Field::NsXattr(k) => format!("namespace.xattrs.{k}"),
    }
}

fn cmp_operator(cmp: Cmp) -> &'static str {
    match cmp {
        Cmp::Eq => "$eq",
        Cmp::Ne => "$ne",
        Cmp::Lt => "$lt",
        Cmp::Lte => "$lte",
        Cmp::Gt => "$gt",
        Cmp::Gte => "$gte",
    }
}

/// `Field::Id`/`Field::ParentId` values round-trip through
/// [Value::Binary] (see [robinhood_core::filter::Filter::parent_in]),
/// which carries only raw handle bytes — the filter AST has no [Id] type
/// of its own (spec §1, predicate-to-filter translation is out of
/// scope). The stored `_id`/`namespace.parent_id` fields are tagged
/// binary ([crate::mongo::document::id_to_bson]), so id-valued
/// comparisons need `tag` (the backend this collection was opened
/// against) to reconstruct a matching value.
fn field_value_bson(field: &Field, value: &Value, tag: BackendTag) -> Bson {
    match (field, value) {
        (Field::Id | Field::ParentId, Value::Binary(bytes)) => {
            id_to_bson(&Id::new(tag, bytes.clone()))
        }
        _ => value_to_bson(value),
    }
}

pub fn translate(filter: &Filter, tag: BackendTag) -> Document {
    match filter {
        Filter::Compare(field, cmp, value) => {
            let path = field_path(field);
            let bson = field_value_bson(field, value, tag);
            let mut doc = Document::new();
            if *cmp == Cmp::Eq {
                doc.insert(path, bson);
            } else {
                let mut op = Document::new();
                op.insert(cmp_operator(*cmp), bson);
                doc.insert(path, op);
            }
            doc
        }
        Filter::In(field, values) => {
            let path = field_path(field);
            let items: Vec<Bson> = values
                .iter()
                .map(|v| field_value_bson(field, v, tag))
                .collect();
            let mut doc = Document::new();
            doc.insert(path, doc! { "$in": items });
            doc
        }
        Filter::And(filters) => {
            doc! { "$and": filters.iter().map(|f| translate(f, tag)).collect::<Vec<_>>() }
        }
        Filter::Or(filters) => {
            doc! { "$or": filters.iter().map(|f| translate(f, tag)).collect::<Vec<_>>() }
        }
        Filter::Not(inner) => {
            doc! { "$nor": [translate(inner, tag)] }
        }
    }
}

/// Convenience for the `{_id: id}` base query every update translation
/// starts from (spec §4.11 "base").
pub fn id_filter(id: &robinhood_core::id::Id) -> Document {
    doc! { "_id": id_to_bson(id) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robinhood_core::filter::Field;

    #[test]
    fn compare_eq_is_a_direct_equality_match() {
        let f = Filter::Compare(Field::Name, Cmp::Eq, Value::String("a".into()));
        let doc = translate(&f, BackendTag::Posix);
        assert_eq!(doc.get_str("namespace.name").unwrap(), "a");
    }

    #[test]
    fn and_combines_nested_documents() {
        let f = Filter::is_dir().and(Filter::Compare(
            Field::StatxSize,
            Cmp::Gt,
            Value::Uint64(0),
        ));
        let doc = translate(&f, BackendTag::Posix);
        let and = doc.get_array("$and").unwrap();
        assert_eq!(and.len(), 2);
    }
}
