use std::collections::BTreeMap;

use crate::*;

fn sample() -> Value {
    let mut inner = BTreeMap::new();
    inner.insert("name".to_string(), Value::from("lode"));
    inner.insert("count".to_string(), Value::U64(3));
    inner.insert("blob".to_string(), Value::Bytes(vec![0, 1, 2, 255]));

    Value::List(vec![
        Value::Unit,
        Value::Bool(true),
        Value::Bool(false),
        Value::I64(-42),
        Value::U64(u64::MAX),
        Value::F64(1.5),
        Value::from("héllo"),
        Value::Map(inner),
        Value::List(vec![]),
    ])
}

#[test]
fn test_binary_roundtrip() -> Result<()> {
    let codec = BinaryCodec;
    let value = sample();
    let bytes = codec.encode(&value)?;
    assert_eq!(codec.decode(&bytes)?, value);
    Ok(())
}

#[test]
fn test_json_roundtrip() -> Result<()> {
    let codec = JsonCodec;
    let value = sample();
    let bytes = codec.encode(&value)?;
    assert_eq!(codec.decode(&bytes)?, value);
    Ok(())
}

#[test]
fn test_codec_ids() {
    assert_eq!(BinaryCodec.id(), "binary");
    assert_eq!(JsonCodec.id(), "json");
}

#[test]
fn test_binary_truncated() -> Result<()> {
    let bytes = BinaryCodec.encode(&sample())?;
    for cut in [1, bytes.len() / 2, bytes.len() - 1] {
        let err = BinaryCodec.decode(&bytes[..cut]).unwrap_err();
        assert_eq!(err, Error::UnexpectedEnd, "cut at {}", cut);
    }
    Ok(())
}

#[test]
fn test_binary_empty_input() {
    assert_eq!(BinaryCodec.decode(&[]).unwrap_err(), Error::UnexpectedEnd);
}

#[test]
fn test_binary_invalid_tag() {
    assert_eq!(BinaryCodec.decode(&[0xFF]).unwrap_err(), Error::InvalidTag(0xFF));
}

#[test]
fn test_binary_trailing_bytes() -> Result<()> {
    let mut bytes = BinaryCodec.encode(&Value::Unit)?;
    bytes.push(0x0E);
    assert_eq!(BinaryCodec.decode(&bytes).unwrap_err(), Error::TrailingBytes(1));
    Ok(())
}

#[test]
fn test_binary_invalid_utf8() {
    // String tag, length 2, invalid continuation bytes
    let bytes = [0x10, 2, 0, 0, 0, 0xC3, 0x28];
    assert_eq!(BinaryCodec.decode(&bytes).unwrap_err(), Error::InvalidUtf8);
}

#[test]
fn test_binary_map_key_must_be_string() {
    // Map with body [Unit][Unit]
    let bytes = [0x21, 2, 0, 0, 0, 0x0E, 0x0E];
    assert_eq!(BinaryCodec.decode(&bytes).unwrap_err(), Error::InvalidTag(0x0E));
}

#[test]
fn test_binary_recursion_limit() {
    let mut value = Value::Unit;
    for _ in 0..100 {
        value = Value::List(vec![value]);
    }
    assert_eq!(BinaryCodec.encode(&value).unwrap_err(), Error::RecursionLimitExceeded);
}

#[test]
fn test_json_corrupt() {
    let err = JsonCodec.decode(b"{\"String\":").unwrap_err();
    assert!(matches!(err, Error::Json(_)));
}

#[test]
fn test_json_refuses_non_finite_floats() {
    for f in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
        assert!(matches!(JsonCodec.encode(&Value::F64(f)), Err(Error::Json(_))));
        let nested = Value::List(vec![Value::Unit, Value::F64(f)]);
        assert!(matches!(JsonCodec.encode(&nested), Err(Error::Json(_))));
    }
    // The binary codec carries them bit for bit.
    let bytes = BinaryCodec.encode(&Value::F64(f64::INFINITY)).unwrap();
    assert_eq!(BinaryCodec.decode(&bytes).unwrap(), Value::F64(f64::INFINITY));
}

#[test]
fn test_value_type_text_form() -> Result<()> {
    let cases = [
        (ValueType::String, "string"),
        (ValueType::Any, "any"),
        (ValueType::list(ValueType::I64), "list<i64>"),
        (ValueType::map(ValueType::list(ValueType::Bytes)), "map<list<bytes>>"),
    ];
    for (ty, text) in cases {
        assert_eq!(ty.to_string(), text);
        assert_eq!(text.parse::<ValueType>()?, ty);
    }
    Ok(())
}

#[test]
fn test_value_type_unknown() {
    assert!(matches!("list<widget>".parse::<ValueType>(), Err(Error::UnknownType(_))));
    assert!(matches!("list<i64".parse::<ValueType>(), Err(Error::UnknownType(_))));
}

#[test]
fn test_conforms_to() {
    let list = Value::List(vec![Value::I64(1), Value::I64(2)]);
    assert!(list.conforms_to(&ValueType::list(ValueType::I64)));
    assert!(!list.conforms_to(&ValueType::list(ValueType::String)));
    assert!(list.conforms_to(&ValueType::Any));
    assert!(!Value::Unit.conforms_to(&ValueType::Bool));
}

#[test]
fn test_wire_conversions() -> Result<()> {
    assert_eq!(String::from_value(Value::from("ping"))?, "ping");
    assert_eq!(i32::from_value(Value::I64(-7))?, -7);
    assert_eq!(<Vec<u32>>::from_value(vec![1u32, 2, 3].into_value())?, vec![1, 2, 3]);
    assert_eq!(Blob::from_value(Blob(vec![9]).into_value())?, Blob(vec![9]));
    <()>::from_value(Value::Unit)?;
    assert_eq!(<Vec<String>>::value_type(), ValueType::list(ValueType::String));
    Ok(())
}

#[test]
fn test_wire_mismatch() {
    let err = String::from_value(Value::I64(1)).unwrap_err();
    assert_eq!(err, Error::TypeMismatch { expected: "string".into(), found: "i64".into() });

    let err = i32::from_value(Value::I64(i64::MAX)).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }));
}

#[test]
fn test_wire_map() -> Result<()> {
    let mut map = BTreeMap::new();
    map.insert("a".to_string(), 1i64);
    map.insert("b".to_string(), 2i64);
    let value = map.clone().into_value();
    assert!(value.conforms_to(&ValueType::map(ValueType::I64)));
    assert_eq!(<BTreeMap<String, i64>>::from_value(value)?, map);
    Ok(())
}
