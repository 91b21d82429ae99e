//! Result projector (§4.8): typed extraction from the evaluator's output container.

use serde::de::DeserializeOwned;
use serde_json::Value as Json;

use crate::model::ResultMap;

/// Projects a `ResultMap` into `T`. Goes through `serde_json::Value` as the canonical
/// tagged-map intermediate, lower-casing both sides' field names so a container key written by
/// a rule (`Result["Discount"]`) lines up with a differently-cased struct field
/// (`discount`) per the case-insensitive fallback rule. Marshalling failures yield `T::default()`
/// rather than panicking. Callers that need to distinguish "no match" from "bad shape" should
/// use `try_project` instead.
pub fn project<T: Default + DeserializeOwned>(container: &ResultMap) -> T {
    try_project(container).unwrap_or_default()
}

/// As [`project`], but surfaces marshalling failure instead of silently defaulting.
pub fn try_project<T: DeserializeOwned>(container: &ResultMap) -> Result<T, String> {
    let json = container_to_json(container);
    serde_json::from_value(json.clone())
        .or_else(|_| serde_json::from_value(lower_case_keys(json)))
        .map_err(|e| e.to_string())
}

fn container_to_json(container: &ResultMap) -> Json {
    Json::Object(container.0.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
}

fn lower_case_keys(value: Json) -> Json {
    match value {
        Json::Object(map) => {
            Json::Object(map.into_iter().map(|(k, v)| (k.to_lowercase(), lower_case_keys(v))).collect())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::model::Value;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Discount {
        #[serde(default)]
        discount: f64,
        #[serde(default)]
        eligible: bool,
    }

    #[test]
    fn projects_matching_fields() {
        let mut container = ResultMap::new();
        container.set("discount", Value::Number(0.2));
        container.set("eligible", Value::Bool(true));
        let out: Discount = project(&container);
        assert_eq!(out, Discount { discount: 0.2, eligible: true });
    }

    #[test]
    fn case_insensitive_fallback() {
        let mut container = ResultMap::new();
        container.set("Discount", Value::Number(0.3));
        container.set("Eligible", Value::Bool(false));
        let out: Discount = project(&container);
        assert_eq!(out, Discount { discount: 0.3, eligible: false });
    }

    #[test]
    fn missing_fields_take_their_zero_value() {
        let container = ResultMap::new();
        let out: Discount = project(&container);
        assert_eq!(out, Discount::default());
    }

    #[test]
    fn native_result_map_round_trips_through_project() {
        let mut container = ResultMap::new();
        container.set("x", Value::String("y".to_string()));
        let out: ResultMap = project(&container);
        assert_eq!(out.get("x"), Some(&Value::String("y".to_string())));
    }
}
