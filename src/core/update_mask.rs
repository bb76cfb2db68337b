use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::error::{Error, Result};

/// Builds the `updateMask` for a PATCH body: the dot-separated path of every
/// field present in `request`, sorted. Nested objects contribute their leaf
/// paths; arrays and empty objects count as leaves. Paths listed in
/// `terminal_paths` are map-valued fields and are masked as a whole, never
/// by their keys.
pub fn update_mask<T: Serialize + ?Sized>(request: &T, terminal_paths: &[&str]) -> Result<String> {
    let value = serde_json::to_value(request)
        .map_err(|e| Error::invalid_argument(format!("Failed to serialize request: {}", e)))?;
    let Value::Object(fields) = value else {
        return Err(Error::invalid_argument("update request must be a JSON object"));
    };

    let mut paths = Vec::new();
    collect_paths(&fields, "", terminal_paths, &mut paths);
    paths.sort();
    Ok(paths.join(","))
}

fn collect_paths(
    fields: &Map<String, Value>,
    prefix: &str,
    terminal_paths: &[&str],
    paths: &mut Vec<String>,
) {
    for (key, value) in fields {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Null => {}
            Value::Object(nested)
                if !nested.is_empty() && !terminal_paths.contains(&path.as_str()) =>
            {
                collect_paths(nested, &path, terminal_paths, paths)
            }
            _ => paths.push(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_fields_are_dotted_and_sorted() {
        let mask = update_mask(&json!({
            "displayName": "x",
            "enabled": true,
            "idpConfig": { "ssoUrl": "https://sso", "idpEntityId": "e" },
            "clientSecret": null,
            "responseType": {},
        }), &[])
        .unwrap();
        assert_eq!(
            mask,
            "displayName,enabled,idpConfig.idpEntityId,idpConfig.ssoUrl,responseType"
        );
    }

    #[test]
    fn non_objects_are_rejected() {
        assert!(matches!(
            update_mask(&json!(["a"]), &[]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn terminal_paths_are_not_expanded() {
        let request = json!({
            "displayName": "x",
            "testPhoneNumbers": { "+15555550100": "123456", "+15555550101": "654321" },
            "mfaConfig": { "state": "ENABLED" },
        });
        assert_eq!(
            update_mask(&request, &["testPhoneNumbers"]).unwrap(),
            "displayName,mfaConfig.state,testPhoneNumbers"
        );
    }
}
