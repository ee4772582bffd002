use serde_json::Value;

/// Resolves a dotted path against a JSON value.
///
/// Segments are identifiers with optional bracketed integer indices
/// (`items[0].price`). A missing key or out-of-range index resolves to
/// `None`; malformed segments also resolve to `None` rather than erroring.
#[must_use]
pub fn resolve<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }

    let mut current = root;
    for segment in path.split('.') {
        let (name, indices) = parse_segment(segment)?;

        if !name.is_empty() {
            current = current.as_object()?.get(name)?;
        }

        for index in indices {
            current = current.as_array()?.get(index)?;
        }
    }

    Some(current)
}

/// Result of rendering a `${path}` template against a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpolated {
    /// Rendered text with every placeholder substituted.
    pub rendered: String,
    /// Paths that did not resolve and rendered as empty strings.
    pub unresolved: Vec<String>,
}

/// Substitutes `${path}` placeholders in a template with resolved values.
///
/// Unresolved paths render to the empty string and are reported so callers
/// can surface a warning. Non-string values render in their JSON form.
#[must_use]
pub fn interpolate(template: &str, root: &Value) -> Interpolated {
    let mut rendered = String::with_capacity(template.len());
    let mut unresolved = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        rendered.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];

        let Some(end) = after_open.find('}') else {
            rendered.push_str(&rest[start..]);
            rest = "";
            break;
        };

        let path = &after_open[..end];
        match resolve(root, path) {
            Some(Value::String(text)) => rendered.push_str(text),
            Some(value) => rendered.push_str(value.to_string().as_str()),
            None => unresolved.push(path.to_owned()),
        }

        rest = &after_open[end + 1..];
    }

    rendered.push_str(rest);
    Interpolated {
        rendered,
        unresolved,
    }
}

/// Splits one path segment into its leading key and bracketed indices.
fn parse_segment(segment: &str) -> Option<(&str, Vec<usize>)> {
    if segment.is_empty() {
        return None;
    }

    let Some(bracket) = segment.find('[') else {
        return Some((segment, Vec::new()));
    };

    let name = &segment[..bracket];
    let mut indices = Vec::new();
    let mut rest = &segment[bracket..];

    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let close = inner.find(']')?;
        let index = inner[..close].parse::<usize>().ok()?;
        indices.push(index);
        rest = &inner[close + 1..];
    }

    Some((name, indices))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::{Value, json};

    use super::{interpolate, resolve};

    #[test]
    fn resolves_nested_object_keys() {
        let payload = json!({"order": {"total": 1500}});
        assert_eq!(resolve(&payload, "order.total"), Some(&json!(1500)));
    }

    #[test]
    fn resolves_array_index_after_key() {
        let payload = json!({"items": [{"price": 10}, {"price": 20}]});
        assert_eq!(resolve(&payload, "items[1].price"), Some(&json!(20)));
    }

    #[test]
    fn missing_key_and_out_of_range_index_resolve_to_none() {
        let payload = json!({"items": [1]});
        assert_eq!(resolve(&payload, "absent"), None);
        assert_eq!(resolve(&payload, "items[3]"), None);
    }

    #[test]
    fn malformed_segment_resolves_to_none() {
        let payload = json!({"items": [1]});
        assert_eq!(resolve(&payload, "items[x]"), None);
        assert_eq!(resolve(&payload, "items[0"), None);
        assert_eq!(resolve(&payload, ""), None);
    }

    #[test]
    fn interpolates_resolved_and_unresolved_paths() {
        let payload = json!({"order": {"id": "ord-1", "total": 12.5}});
        let result = interpolate("order ${order.id} total ${order.total}${missing}", &payload);

        assert_eq!(result.rendered, "order ord-1 total 12.5");
        assert_eq!(result.unresolved, vec!["missing".to_owned()]);
    }

    #[test]
    fn unterminated_placeholder_renders_verbatim() {
        let payload = json!({});
        let result = interpolate("prefix ${oops", &payload);
        assert_eq!(result.rendered, "prefix ${oops");
        assert!(result.unresolved.is_empty());
    }

    fn leaf_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            "[a-z]{1,8}".prop_map(Value::from),
        ]
    }

    fn path_and_object() -> impl Strategy<Value = (Value, String)> {
        (
            proptest::collection::vec("[a-z][a-z0-9]{0,6}", 1..5),
            leaf_value(),
        )
            .prop_map(|(segments, leaf)| {
                let mut value = leaf;
                for segment in segments.iter().rev() {
                    value = serde_json::json!({ segment.as_str(): value });
                }
                (value, segments.join("."))
            })
    }

    proptest! {
        #[test]
        fn resolve_returns_the_traversed_value((object, path) in path_and_object()) {
            let mut expected = &object;
            for segment in path.split('.') {
                expected = &expected[segment];
            }

            prop_assert_eq!(resolve(&object, path.as_str()), Some(expected));
        }
    }
}
