use serde_json::{Map, Value, json};

use crate::engine_ports::EventRecord;

/// Builds the initial execution context from the trigger payload.
pub(super) fn initial_context(trigger_payload: Value, event: Option<&EventRecord>) -> Value {
    let mut root = Map::new();
    root.insert("trigger".to_owned(), trigger_payload);

    if let Some(event) = event {
        root.insert(
            "event".to_owned(),
            json!({
                "type": event.event_type,
                "id": event.id,
                "source": event.source,
            }),
        );
    }

    root.insert("env".to_owned(), json!({}));
    root.insert("steps".to_owned(), json!({}));
    Value::Object(root)
}

/// Records one step output under `steps.<step_id>` in a new context value.
pub(super) fn record_step_output(context: &Value, step_id: &str, output: Option<Value>) -> Value {
    let Some(output) = output else {
        return context.clone();
    };

    let mut root = as_object(context);
    let mut steps = root
        .get("steps")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    steps.insert(step_id.to_owned(), output);
    root.insert("steps".to_owned(), Value::Object(steps));
    Value::Object(root)
}

/// Merges a resume payload into the context under the given key.
pub(super) fn merge_resume_payload(context: &Value, key: &str, payload: Value) -> Value {
    let mut root = as_object(context);
    root.insert(key.to_owned(), payload);
    Value::Object(root)
}

fn as_object(context: &Value) -> Map<String, Value> {
    context.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{initial_context, merge_resume_payload, record_step_output};

    #[test]
    fn initial_context_carries_trigger_and_event_metadata() {
        let context = initial_context(json!({"order": {"total": 5}}), None);
        assert_eq!(context["trigger"]["order"]["total"], json!(5));
        assert_eq!(context["steps"], json!({}));
    }

    #[test]
    fn step_outputs_accumulate_under_their_ids() {
        let context = initial_context(json!({}), None);
        let context = record_step_output(&context, "first", Some(json!({"n": 1})));
        let context = record_step_output(&context, "second", Some(json!({"n": 2})));

        assert_eq!(context["steps"]["first"]["n"], json!(1));
        assert_eq!(context["steps"]["second"]["n"], json!(2));
    }

    #[test]
    fn resume_payload_merges_under_its_kind_key() {
        let context = initial_context(json!({}), None);
        let context = merge_resume_payload(&context, "approval", json!({"status": "approved"}));
        assert_eq!(context["approval"]["status"], json!("approved"));
    }
}
