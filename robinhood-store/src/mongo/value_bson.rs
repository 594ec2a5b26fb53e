//! Conversions between [Value]/[ValueMap] and [bson::Bson], used by every
//! other module under `mongo` to turn xattr maps and filter literals into
//! wire documents (spec §4.11). Kept separate from [super::document] since
//! both the filter translator and the document mapper need it.

use bson::{Bson, Document};
use robinhood_core::value::{Value, ValueMap};

pub fn value_to_bson(v: &Value) -> Bson {
    match v {
        Value::Binary(b) => Bson::Binary(bson::Binary {
            subtype: bson::spec::BinarySubtype::Generic,
            bytes: b.clone(),
        }),
        Value::Uint32(n) => Bson::Int64(*n as i64),
        Value::Uint64(n) => Bson::Int64(*n as i64),
        Value::Int32(n) => Bson::Int32(*n),
        Value::Int64(n) => Bson::Int64(*n),
        Value::String(s) => Bson::String(s.clone()),
        Value::Boolean(b) => Bson::Boolean(*b),
        Value::Regex(pattern, options) => Bson::RegularExpression(bson::Regex {
            pattern: pattern.clone(),
            options: options.clone(),
        }),
        Value::Sequence(items) => Bson::Array(items.iter().map(value_to_bson).collect()),
        Value::Map(map) => Bson::Document(value_map_to_document(map)),
    }
}

pub fn bson_to_value(b: &Bson) -> Value {
    match b {
        Bson::Double(f) => Value::String(f.to_string()),
        Bson::String(s) => Value::String(s.clone()),
        Bson::Array(items) => Value::Sequence(items.iter().map(bson_to_value).collect()),
        Bson::Document(doc) => Value::Map(document_to_value_map(doc)),
        Bson::Boolean(b) => Value::Boolean(*b),
        Bson::Int32(n) => Value::Int32(*n),
        Bson::Int64(n) => Value::Int64(*n),
        Bson::Binary(bin) => Value::Binary(bin.bytes.clone()),
        Bson::RegularExpression(re) => Value::Regex(re.pattern.clone(), re.options.clone()),
        other => Value::String(other.to_string()),
    }
}

pub fn value_map_to_document(map: &ValueMap) -> Document {
    let mut doc = Document::new();
    for (k, v) in map {
        doc.insert(k.clone(), value_to_bson(v));
    }
    doc
}

pub fn document_to_value_map(doc: &Document) -> ValueMap {
    doc.iter()
        .map(|(k, v)| (k.clone(), bson_to_value(v)))
        .collect()
}
