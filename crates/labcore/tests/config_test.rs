use labcore::{Config, ConfigurationError, ParamSpec, ParamType, Value};
use std::collections::HashMap;

fn robot_config() -> Config {
    Config::new(vec![
        ParamSpec::new("moving_step", ParamType::Float).with_default(0.1),
        ParamSpec::new("direction", ParamType::Text)
            .with_default("north")
            .with_allowed(["north", "south", "east", "west"]),
        ParamSpec::new("repeat", ParamType::Integer).with_range(1.0, 10.0),
    ])
    .unwrap()
}

#[test]
fn test_defaults_are_returned_until_set() {
    let mut config = robot_config();
    assert_eq!(config.get("direction"), Some(Value::from("north")));
    assert_eq!(config.get("repeat"), None);

    config.set_value("direction", Value::from("east")).unwrap();
    assert_eq!(config.get("direction"), Some(Value::from("east")));
    assert_eq!(config.explicit_values().len(), 1);
    assert_eq!(config.values().len(), 2);
}

#[test]
fn test_integers_coerce_to_float() {
    let mut config = robot_config();
    config.set_value("moving_step", Value::Integer(2)).unwrap();
    assert_eq!(config.get("moving_step"), Some(Value::Number(2.0)));
}

#[test]
fn test_rejects_unknown_and_invalid_values() {
    let mut config = robot_config();

    let err = config.set_value("speed", Value::from(1.0)).unwrap_err();
    assert_eq!(err, ConfigurationError::UnknownParameter("speed".to_string()));

    let err = config.set_value("direction", Value::from("up")).unwrap_err();
    assert!(matches!(err, ConfigurationError::InvalidParameter { .. }));

    let err = config.set_value("repeat", Value::Integer(11)).unwrap_err();
    assert!(matches!(err, ConfigurationError::InvalidParameter { .. }));

    let err = config.set_value("direction", Value::Integer(1)).unwrap_err();
    assert!(matches!(err, ConfigurationError::InvalidParameter { .. }));
}

#[test]
fn test_set_values_is_all_or_nothing() {
    let mut config = robot_config();
    let values = HashMap::from([
        ("direction".to_string(), Value::from("west")),
        ("repeat".to_string(), Value::Integer(0)),
    ]);

    assert!(config.set_values(&values).is_err());
    assert!(config.explicit_values().is_empty());
    assert_eq!(config.get("direction"), Some(Value::from("north")));
}

#[test]
fn test_invalid_default_is_rejected_up_front() {
    let err = Config::new(vec![ParamSpec::new("count", ParamType::Integer)
        .with_default(20)
        .with_range(0.0, 10.0)])
    .unwrap_err();
    assert!(matches!(err, ConfigurationError::InvalidParameter { .. }));

    let err = Config::new(vec![
        ParamSpec::new("a", ParamType::Text),
        ParamSpec::new("a", ParamType::Text),
    ])
    .unwrap_err();
    assert!(matches!(err, ConfigurationError::InvalidParameter { .. }));
}

#[test]
fn test_json_params_accept_any_value() {
    let mut config = Config::new(vec![ParamSpec::new("value", ParamType::Json)]).unwrap();
    config.set_value("value", Value::from("text")).unwrap();
    assert_eq!(config.get("value"), Some(Value::Json(serde_json::json!("text"))));
}
